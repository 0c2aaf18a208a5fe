use crate::granule::{GranuleGuard, GranuleState, GranuleTable, GRANULE_SIZE};
use crate::realm::mm::stage2_tte::{
    level_shift, map_size, RttPage, RTT_PAGE_LEVEL, S2TTE, S2TTES_PER_S2TT, S2TTE_STRIDE,
};
use crate::realm::rd::RealmInfo;

/// The leaf of an RTT walk: the only table still locked.
pub struct RttWalk<'a> {
    pub level: usize,
    pub table: GranuleGuard<'a>,
    pub index: usize,
}

impl RttWalk<'_> {
    pub fn entry(&self) -> S2TTE {
        self.table.content::<RttPage>().get(self.index)
    }

    pub fn set_entry(&mut self, s2tte: S2TTE) {
        let index = self.index;
        self.table.content_mut::<RttPage>().set(index, s2tte);
    }
}

pub fn s2_addr_to_idx(addr: usize, level: usize) -> usize {
    (addr >> level_shift(level)) & (S2TTES_PER_S2TT - 1)
}

/// Index into the (possibly concatenated) starting level tables.
pub fn s2_sl_addr_to_idx(addr: usize, start_level: usize, ipa_bits: usize) -> usize {
    let lsb = level_shift(start_level);
    (addr >> lsb) & ((1 << (ipa_bits - lsb)) - 1)
}

/// Walks from a locked root towards `target_level`, locking hand over hand.
///
/// Stops at `target_level` or at the first entry that is not a table. The
/// root guard is consumed and exactly one table stays locked.
pub fn walk<'a>(
    granules: &'a GranuleTable,
    root: GranuleGuard<'a>,
    start_level: usize,
    ipa_bits: usize,
    addr: usize,
    target_level: usize,
) -> RttWalk<'a> {
    let mut index = s2_sl_addr_to_idx(addr, start_level, ipa_bits);
    let mut table = root;

    if index >= S2TTES_PER_S2TT {
        let root = table.addr() + (index >> S2TTE_STRIDE) * GRANULE_SIZE;
        table = granules.lock_unconditional(root, GranuleState::RTT);
        index &= S2TTES_PER_S2TT - 1;
    }

    let mut level = start_level;
    while level < target_level {
        let s2tte = table.content::<RttPage>().get(index);
        if !s2tte.is_table(level) {
            break;
        }

        // the child is locked before the parent guard is dropped
        table = granules.lock_unconditional(s2tte.pa_table(), GranuleState::RTT);
        level += 1;
        index = s2_addr_to_idx(addr, level);
    }

    RttWalk {
        level,
        table,
        index,
    }
}

/// Walks a realm's tables.
///
/// The caller pins the tables either by holding the RD lock or by running
/// a REC of the realm.
pub fn walk_realm<'a>(
    granules: &'a GranuleTable,
    info: &RealmInfo,
    addr: usize,
    target_level: usize,
) -> RttWalk<'a> {
    let root = granules.lock_unconditional(info.rtt_base, GranuleState::RTT);
    walk(
        granules,
        root,
        info.s2_starting_level,
        info.ipa_bits,
        addr,
        target_level,
    )
}

/// Translates a protected IPA of a running realm.
///
/// The leaf table stays locked in the returned walk so the mapping cannot
/// change while the caller touches the page. When the IPA is not mapped by
/// a valid entry the level where the walk stopped is returned instead.
pub fn realm_ipa_to_pa<'a>(
    granules: &'a GranuleTable,
    info: &RealmInfo,
    ipa: usize,
) -> Result<(usize, RttWalk<'a>), usize> {
    let walk = walk_realm(granules, info, ipa, RTT_PAGE_LEVEL);
    let s2tte = walk.entry();
    if !s2tte.is_valid(walk.level) {
        return Err(walk.level);
    }
    let pa = s2tte.pa(walk.level) + (ipa & (map_size(walk.level) - 1));
    Ok((pa, walk))
}
