use crate::granule::{GranuleGuard, GranuleState, GranuleTable};
use crate::host::DataPage;
use crate::measurement::{HashContext, MEASUREMENTS_SLOT_RIM};
use crate::realm::mm::rtt::{walk, walk_realm, RttWalk};
use crate::realm::mm::stage2_tte::{
    addr_level_mask, host_ns_attrs, invalid_ripas, map_size, RttPage, NS_ATTR_HOST_MASK,
    RTT_MIN_BLOCK_LEVEL, RTT_PAGE_LEVEL, S2TTE, S2TTES_PER_S2TT,
};
use crate::realm::rd::{Rd, RealmInfo};
use crate::rec::Rec;
use crate::rmi::error::Error;
use crate::rmi::rtt_entry_state;
use crate::Monitor;

/// Locks the starting level table, lets the RD go and walks towards `level`.
fn walk_released<'a>(
    granules: &'a GranuleTable,
    rd: GranuleGuard<'a>,
    ipa: usize,
    level: usize,
) -> (RealmInfo, RttWalk<'a>) {
    let info = *rd.content::<Rd>().info();
    let root = granules.lock_unconditional(info.rtt_base, GranuleState::RTT);
    drop(rd);

    let walk = walk(
        granules,
        root,
        info.s2_starting_level,
        info.ipa_bits,
        ipa,
        level,
    );
    (info, walk)
}

fn block_base(ipa: usize, level: usize) -> usize {
    addr_level_mask(ipa as u64, level) as usize
}

/// Links `rtt` below the entry at (`ipa`, `level` - 1).
pub fn create(
    rmm: &Monitor,
    rd: GranuleGuard<'_>,
    mut rtt: GranuleGuard<'_>,
    ipa: usize,
    level: usize,
) -> Result<(), Error> {
    let parent_level = level - 1;
    let (info, mut parent) = walk_released(&rmm.granules, rd, ipa, parent_level);
    if parent.level != parent_level {
        return Err(Error::RmiErrorRtt(parent.level));
    }

    let parent_s2tte = parent.entry();
    let table = rtt.content_mut::<RttPage>();
    let unfolded = if parent_s2tte.is_unassigned() {
        table.init_unassigned(parent_s2tte.get_ripas());
        false
    } else if parent_s2tte.is_destroyed() {
        table.init_destroyed();
        false
    } else if parent_s2tte.is_assigned() {
        table.init_assigned_empty(parent_s2tte.pa(parent_level), level);
        true
    } else if parent_s2tte.is_valid(parent_level) {
        // break before make
        parent.set_entry(S2TTE::invalid_unprotected());
        rmm.tlb
            .invalidate_block(info.vmid, block_base(ipa, parent_level));
        table.init_valid(parent_s2tte.pa(parent_level), level);
        true
    } else if parent_s2tte.is_valid_unprotected(parent_level) {
        parent.set_entry(S2TTE::invalid_unprotected());
        rmm.tlb
            .invalidate_block(info.vmid, block_base(ipa, parent_level));
        table.init_valid_unprotected(
            parent_s2tte.get_masked(NS_ATTR_HOST_MASK),
            parent_s2tte.pa(parent_level),
            level,
        );
        true
    } else {
        return Err(Error::RmiErrorRtt(parent_level));
    };

    // An unfolded block keeps one reference per entry in the new table,
    // otherwise the parent gains a live entry.
    if unfolded {
        rtt.inc_ref(S2TTES_PER_S2TT as u64);
    } else {
        parent.table.inc_ref(1);
    }

    rtt.set_state(GranuleState::RTT);
    parent.set_entry(S2TTE::table(rtt.addr(), parent_level));
    Ok(())
}

/// Replaces the table at (`ipa`, `level`) by a single entry in its parent.
pub fn fold(
    rmm: &Monitor,
    rd: GranuleGuard<'_>,
    rtt_addr: usize,
    ipa: usize,
    level: usize,
) -> Result<(), Error> {
    let parent_level = level - 1;
    let (info, mut parent) = walk_released(&rmm.granules, rd, ipa, parent_level);
    if parent.level != parent_level {
        return Err(Error::RmiErrorRtt(parent.level));
    }

    let parent_s2tte = parent.entry();
    if !parent_s2tte.is_table(parent_level) {
        return Err(Error::RmiErrorRtt(parent_level));
    }
    if parent_s2tte.pa_table() != rtt_addr {
        return Err(Error::RmiErrorInput);
    }

    let mut rtt = rmm.granules.lock_unconditional(rtt_addr, GranuleState::RTT);
    let refcount = rtt.refcount();
    let table = rtt.content::<RttPage>();

    let new_s2tte = if refcount == 0 {
        let s2tte = if table.is_destroyed_block() {
            S2TTE::destroyed()
        } else if let Some(ripas) = table.is_unassigned_block() {
            S2TTE::unassigned(ripas)
        } else {
            return Err(Error::RmiErrorInUse);
        };
        parent.table.dec_ref(1);
        s2tte
    } else if refcount == S2TTES_PER_S2TT as u64 {
        // no blocks above level 2
        if level <= RTT_MIN_BLOCK_LEVEL {
            return Err(Error::RmiErrorInUse);
        }

        let first = table.get(0);
        let block_pa = first.pa(parent_level);
        let s2tte = if table.maps_assigned_block(level) {
            S2TTE::assigned_empty(block_pa, parent_level)
        } else if table.maps_valid_block(level) {
            S2TTE::valid(block_pa, parent_level)
        } else if table.maps_valid_unprotected_block(level) {
            S2TTE::valid_unprotected(
                first.get_masked(NS_ATTR_HOST_MASK) | block_pa as u64,
                parent_level,
            )
        } else {
            return Err(Error::RmiErrorInUse);
        };
        rtt.dec_ref(S2TTES_PER_S2TT as u64);
        s2tte
    } else {
        return Err(Error::RmiErrorInUse);
    };

    parent.set_entry(S2TTE::invalid_unprotected());
    let base = block_base(ipa, parent_level);
    if new_s2tte.is_valid(parent_level) || new_s2tte.is_valid_unprotected(parent_level) {
        rmm.tlb.invalidate_pages_in_block(info.vmid, base);
    } else {
        rmm.tlb.invalidate_block(info.vmid, base);
    }
    parent.set_entry(new_s2tte);

    rtt.zeroize();
    rtt.set_state(GranuleState::Delegated);
    Ok(())
}

/// Unlinks an empty table. Protected IPAs it covered become destroyed.
pub fn destroy(
    rmm: &Monitor,
    rd: GranuleGuard<'_>,
    rtt_addr: usize,
    ipa: usize,
    level: usize,
) -> Result<(), Error> {
    let parent_level = level - 1;
    let (info, mut parent) = walk_released(&rmm.granules, rd, ipa, parent_level);
    if parent.level != parent_level {
        return Err(Error::RmiErrorRtt(parent.level));
    }

    let parent_s2tte = parent.entry();
    if !parent_s2tte.is_table(parent_level) {
        return Err(Error::RmiErrorRtt(parent_level));
    }
    if parent_s2tte.pa_table() != rtt_addr {
        return Err(Error::RmiErrorInput);
    }

    let mut rtt = rmm.granules.lock_unconditional(rtt_addr, GranuleState::RTT);
    if rtt.refcount() != 0 {
        return Err(Error::RmiErrorInUse);
    }

    let new_s2tte = match info.addr_in_par(ipa) {
        true => S2TTE::destroyed(),
        false => S2TTE::invalid_unprotected(),
    };
    parent.set_entry(S2TTE::invalid_unprotected());
    rmm.tlb
        .invalidate_block(info.vmid, block_base(ipa, parent_level));
    parent.set_entry(new_s2tte);
    parent.table.dec_ref(1);

    rtt.zeroize();
    rtt.set_state(GranuleState::Delegated);
    Ok(())
}

/// Maps the host's non-secure block or page at an unprotected IPA.
pub fn map_unprotected(
    rmm: &Monitor,
    rd: GranuleGuard<'_>,
    ipa: usize,
    level: usize,
    host_s2tte: u64,
) -> Result<(), Error> {
    let (_, mut llt) = walk_released(&rmm.granules, rd, ipa, level);
    if llt.level != level {
        return Err(Error::RmiErrorRtt(llt.level));
    }
    if !llt.entry().is_unassigned() {
        return Err(Error::RmiErrorRtt(level));
    }

    llt.set_entry(S2TTE::valid_unprotected(
        host_ns_attrs(host_s2tte, level),
        level,
    ));
    llt.table.inc_ref(1);
    Ok(())
}

pub fn unmap_unprotected(
    rmm: &Monitor,
    rd: GranuleGuard<'_>,
    ipa: usize,
    level: usize,
) -> Result<(), Error> {
    let (info, mut llt) = walk_released(&rmm.granules, rd, ipa, level);
    if llt.level != level {
        return Err(Error::RmiErrorRtt(llt.level));
    }
    // valid-NS entries only exist outside the PAR
    if !llt.entry().is_valid_unprotected(level) {
        return Err(Error::RmiErrorRtt(level));
    }

    llt.set_entry(S2TTE::invalid_unprotected());
    llt.table.dec_ref(1);
    if level == RTT_PAGE_LEVEL {
        rmm.tlb.invalidate_page(info.vmid, ipa);
    } else {
        rmm.tlb.invalidate_block(info.vmid, ipa);
    }
    Ok(())
}

/// (walk level, entry state, output address, RIPAS) of the entry at `ipa`.
pub fn read_entry(
    rmm: &Monitor,
    rd: GranuleGuard<'_>,
    ipa: usize,
    level: usize,
) -> [usize; 4] {
    let (_, llt) = walk_released(&rmm.granules, rd, ipa, level);
    let (last_level, s2tte) = (llt.level, llt.entry());

    let (state, addr, ripas) = if s2tte.is_unassigned() {
        (rtt_entry_state::RMI_UNASSIGNED, 0, s2tte.get_ripas())
    } else if s2tte.is_destroyed() {
        (rtt_entry_state::RMI_DESTROYED, 0, 0)
    } else if s2tte.is_assigned() {
        (
            rtt_entry_state::RMI_ASSIGNED,
            s2tte.pa(last_level),
            invalid_ripas::EMPTY,
        )
    } else if s2tte.is_valid(last_level) {
        (
            rtt_entry_state::RMI_ASSIGNED,
            s2tte.pa(last_level),
            invalid_ripas::RAM,
        )
    } else if s2tte.is_valid_unprotected(last_level) {
        (
            rtt_entry_state::RMI_VALID_NS,
            host_ns_attrs(s2tte.get(), last_level) as usize,
            0,
        )
    } else if s2tte.is_table(last_level) {
        (rtt_entry_state::RMI_TABLE, s2tte.pa_table(), 0)
    } else {
        panic!("unexpected s2tte {:#X} at level {}", s2tte.get(), last_level);
    };

    [last_level, state, addr, ripas as usize]
}

/// Assigns `data` to the protected page at `ipa`.
///
/// With `contents` the page receives a copy of the host's page, measured
/// into the RIM according to `flags`. Without it the contents are unknown
/// to the realm and nothing is measured.
/// Attaches a device whose descriptor has been copied into the granule.
pub type AttachDevice<'a> = &'a dyn Fn(usize) -> Result<(), Error>;

/// Maps `data` at `ipa`. With `contents` the page is copied in and
/// measured first. `attach`, if any, runs between that measurement and a
/// second one. A failure before the entry is written restores the RIM and
/// leaves `data` delegated and zeroed.
pub fn data_create(
    rmm: &Monitor,
    rd: &mut GranuleGuard<'_>,
    data: &mut GranuleGuard<'_>,
    ipa: usize,
    contents: Option<(&DataPage, usize)>,
    attach: Option<AttachDevice<'_>>,
) -> Result<(), Error> {
    let info = *rd.content::<Rd>().info();
    let mut llt = walk_realm(&rmm.granules, &info, ipa, RTT_PAGE_LEVEL);
    if llt.level != RTT_PAGE_LEVEL {
        return Err(Error::RmiErrorRtt(llt.level));
    }

    let s2tte = llt.entry();
    if !s2tte.is_unassigned() {
        return Err(Error::RmiErrorRtt(RTT_PAGE_LEVEL));
    }

    if let Some((page, flags)) = contents {
        let rim = rd.content::<Rd>().measurements[MEASUREMENTS_SLOT_RIM];
        *data.content_mut::<DataPage>() = *page;

        if let Err(e) = measure_contents(rd, data, ipa, flags, attach) {
            rd.content_mut::<Rd>().measurements[MEASUREMENTS_SLOT_RIM] = rim;
            data.zeroize();
            return Err(e);
        }
    }

    let new_s2tte = match s2tte.get_ripas() {
        invalid_ripas::EMPTY => S2TTE::assigned_empty(data.addr(), RTT_PAGE_LEVEL),
        _ => S2TTE::valid(data.addr(), RTT_PAGE_LEVEL),
    };
    llt.set_entry(new_s2tte);
    llt.table.inc_ref(1);
    data.set_state(GranuleState::Data);
    Ok(())
}

fn measure_contents(
    rd: &mut GranuleGuard<'_>,
    data: &GranuleGuard<'_>,
    ipa: usize,
    flags: usize,
    attach: Option<AttachDevice<'_>>,
) -> Result<(), Error> {
    let page = data.content::<DataPage>().as_slice();
    HashContext::new(rd.content_mut::<Rd>())?.measure_data_granule(page, ipa, flags)?;

    if let Some(attach) = attach {
        attach(data.addr())?;
        HashContext::new(rd.content_mut::<Rd>())?.measure_data_granule(page, ipa, flags)?;
    }
    Ok(())
}

/// Unmaps the protected page at `ipa` and returns its granule, now
/// delegated again.
pub fn data_destroy(rmm: &Monitor, rd: GranuleGuard<'_>, ipa: usize) -> Result<usize, Error> {
    let (info, mut llt) = walk_released(&rmm.granules, rd, ipa, RTT_PAGE_LEVEL);
    if llt.level != RTT_PAGE_LEVEL {
        return Err(Error::RmiErrorRtt(llt.level));
    }

    let s2tte = llt.entry();
    let valid = s2tte.is_valid(RTT_PAGE_LEVEL);
    if !valid && !s2tte.is_assigned() {
        return Err(Error::RmiErrorRtt(RTT_PAGE_LEVEL));
    }
    let data_addr = s2tte.pa(RTT_PAGE_LEVEL);

    if valid {
        llt.set_entry(S2TTE::destroyed());
        rmm.tlb.invalidate_page(info.vmid, ipa);
    } else {
        llt.set_entry(S2TTE::unassigned(invalid_ripas::EMPTY));
    }
    llt.table.dec_ref(1);

    // The address comes from a locked table, so the granule is Data.
    let mut data = rmm
        .granules
        .lock_unconditional(data_addr, GranuleState::Data);
    data.zeroize();
    data.unlock_transition(GranuleState::Delegated);
    Ok(data_addr)
}

/// Sets RIPAS RAM on an unassigned entry of a new realm and measures it.
pub fn init_ripas(
    rmm: &Monitor,
    rd: &mut GranuleGuard<'_>,
    ipa: usize,
    level: usize,
) -> Result<(), Error> {
    let info = *rd.content::<Rd>().info();
    let mut llt = walk_realm(&rmm.granules, &info, ipa, level);
    if llt.level != level {
        return Err(Error::RmiErrorRtt(llt.level));
    }

    let mut s2tte = llt.entry();
    if s2tte.is_table(level) || !s2tte.is_unassigned() {
        return Err(Error::RmiErrorRtt(level));
    }
    s2tte.set_masked_value(S2TTE::INVALID_RIPAS, invalid_ripas::RAM);

    HashContext::new(rd.content_mut::<Rd>())?.measure_ripas_granule(ipa, level as u8)?;
    llt.set_entry(s2tte);
    Ok(())
}

/// Applies the next chunk of the REC's pending RIPAS change.
pub fn set_ripas(
    rmm: &Monitor,
    rd: &GranuleGuard<'_>,
    rec: &mut Rec,
    ipa: usize,
    level: usize,
    ripas: u64,
) -> Result<(), Error> {
    let info = *rd.content::<Rd>().info();
    let mut llt = walk_realm(&rmm.granules, &info, ipa, level);
    if llt.level != level {
        return Err(Error::RmiErrorRtt(llt.level));
    }

    let mut s2tte = llt.entry();
    let valid = s2tte.is_valid(level);
    if s2tte.is_table(level) {
        return Err(Error::RmiErrorRtt(level));
    } else if valid {
        if ripas == invalid_ripas::EMPTY {
            s2tte = S2TTE::assigned_empty(s2tte.pa(level), level);
        }
    } else if s2tte.is_unassigned() || s2tte.is_assigned() {
        s2tte.set_masked_value(S2TTE::INVALID_RIPAS, ripas);
    } else {
        return Err(Error::RmiErrorRtt(level));
    }
    llt.set_entry(s2tte);

    if valid && ripas == invalid_ripas::EMPTY {
        if level == RTT_PAGE_LEVEL {
            rmm.tlb.invalidate_page(info.vmid, ipa);
        } else {
            rmm.tlb.invalidate_block(info.vmid, ipa);
        }
    }

    rec.set_ripas_addr(ipa + map_size(level));
    Ok(())
}

/// Checks that every granule of `pages` is realm data mapped at its IPA.
///
/// `pages` yields (ipa, pa) pairs. The RD is held while walking so the
/// tables cannot be torn down underneath.
pub fn check_mappings(
    rmm: &Monitor,
    rd: &GranuleGuard<'_>,
    pages: impl Iterator<Item = (usize, usize)>,
) -> Result<(), Error> {
    let info = *rd.content::<Rd>().info();

    for (ipa, pa) in pages {
        let llt = walk_realm(&rmm.granules, &info, ipa, RTT_PAGE_LEVEL);
        if llt.level != RTT_PAGE_LEVEL {
            return Err(Error::RmiErrorRtt(llt.level));
        }

        let s2tte = llt.entry();
        if !s2tte.is_valid(RTT_PAGE_LEVEL) && !s2tte.is_assigned() {
            return Err(Error::RmiErrorRtt(RTT_PAGE_LEVEL));
        }
        if s2tte.pa(RTT_PAGE_LEVEL) != pa {
            warn!(
                "ipa {:#X} maps {:#X}, expected {:#X}",
                ipa,
                s2tte.pa(RTT_PAGE_LEVEL),
                pa
            );
            return Err(Error::RmiErrorInput);
        }
    }
    Ok(())
}
