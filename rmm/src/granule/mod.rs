pub mod entry;

pub use self::entry::{Content, GranuleGuard, LockFree, RdRef, RecInUse, RecRef, RefHandle};

use self::entry::Entry;
use crate::rmi::error::Error;

use alloc::boxed::Box;
use alloc::vec::Vec;
use core::ops::Range;

pub const GRANULE_SIZE: usize = 4096;
pub const GRANULE_SHIFT: usize = 12;
pub const GRANULE_MASK: usize = !((1 << GRANULE_SHIFT) - 1);

pub fn is_granule_aligned(addr: usize) -> bool {
    addr % GRANULE_SIZE == 0
}

#[allow(clippy::upper_case_acronyms)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum GranuleState {
    Undelegated = 0,
    Delegated = 1,
    RD = 2,
    Rec = 3,
    RecAux = 4,
    Data = 5,
    RTT = 6,
}

impl GranuleState {
    /// Whether `refcount` is acceptable for a granule released in this state.
    pub fn refcount_allowed(&self, refcount: u64) -> bool {
        match self {
            GranuleState::Undelegated
            | GranuleState::Delegated
            | GranuleState::Data
            | GranuleState::RecAux => refcount == 0,
            GranuleState::Rec => refcount <= 1,
            GranuleState::RD | GranuleState::RTT => true,
        }
    }
}

struct Region {
    range: Range<usize>,
    first: usize,
}

/// One entry per granule of every tracked physical region.
///
/// Entries are never freed. A granule is found through a pure
/// address-to-index mapping and its payload is reached only through the
/// `GranuleGuard` returned by one of the lock operations.
pub struct GranuleTable {
    regions: Vec<Region>,
    entries: Box<[Entry]>,
}

impl GranuleTable {
    pub fn new(ranges: &[Range<usize>]) -> Self {
        let mut regions = Vec::with_capacity(ranges.len());
        let mut count = 0;

        for range in ranges {
            let start = range.start & GRANULE_MASK;
            let end = range.end & GRANULE_MASK;
            regions.push(Region {
                range: start..end,
                first: count,
            });
            count += (end - start) / GRANULE_SIZE;
        }

        let entries: Vec<Entry> = (0..count).map(|_| Entry::new()).collect();

        Self {
            regions,
            entries: entries.into_boxed_slice(),
        }
    }

    /// Builds the table over the platform DRAM layout.
    pub fn from_platform() -> Self {
        let regions = crate::config::DRAM_REGIONS.lock();
        Self::new(&regions[..])
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn addr_to_index(&self, addr: usize) -> Option<usize> {
        if !is_granule_aligned(addr) {
            return None;
        }
        self.regions
            .iter()
            .find(|region| region.range.contains(&addr))
            .map(|region| region.first + (addr - region.range.start) / GRANULE_SIZE)
    }

    fn entry(&self, addr: usize) -> Result<&Entry, Error> {
        match self.addr_to_index(addr) {
            Some(idx) => Ok(&self.entries[idx]),
            None => {
                warn!("address is not a tracked granule 0x{:X}", addr);
                Err(Error::RmiErrorInput)
            }
        }
    }

    /// Locks `addr` if it is currently in `expected` state.
    pub fn lock(&self, addr: usize, expected: GranuleState) -> Result<GranuleGuard<'_>, Error> {
        let guard = self.entry(addr)?.lock(addr);
        if guard.state() != expected {
            return Err(Error::RmiErrorInput);
        }
        Ok(guard)
    }

    /// Locks a granule the caller already holds a reference to.
    ///
    /// A state mismatch means the tracking is corrupted and is fatal.
    pub fn lock_unconditional(&self, addr: usize, expected: GranuleState) -> GranuleGuard<'_> {
        let entry = match self.entry(addr) {
            Ok(entry) => entry,
            Err(_) => panic!("untracked granule 0x{:X}", addr),
        };
        let guard = entry.lock(addr);
        if guard.state() != expected {
            panic!(
                "granule 0x{:X} is {:?}, expected {:?}",
                addr,
                guard.state(),
                expected
            );
        }
        guard
    }

    /// Locks two distinct granules, lower address first.
    ///
    /// The guards come back in argument order. On failure nothing stays locked.
    pub fn lock_two(
        &self,
        addr1: usize,
        expected1: GranuleState,
        addr2: usize,
        expected2: GranuleState,
    ) -> Result<(GranuleGuard<'_>, GranuleGuard<'_>), Error> {
        if addr1 == addr2 {
            return Err(Error::RmiErrorInput);
        }

        // Validate both before taking any lock.
        self.entry(addr1)?;
        self.entry(addr2)?;

        if addr1 < addr2 {
            let g1 = self.lock(addr1, expected1)?;
            let g2 = self.lock(addr2, expected2)?;
            Ok((g1, g2))
        } else {
            let g2 = self.lock(addr2, expected2)?;
            let g1 = self.lock(addr1, expected1)?;
            Ok((g1, g2))
        }
    }

    /// Locks `addr` and requires that nothing references it.
    pub fn lock_unused(
        &self,
        addr: usize,
        expected: GranuleState,
    ) -> Result<GranuleGuard<'_>, Error> {
        let guard = self.lock(addr, expected)?;
        if guard.refcount_acquire() != 0 {
            return Err(Error::RmiErrorInUse);
        }
        Ok(guard)
    }

    /// Refcount handle for a granule whose state is pinned by a reference
    /// the caller holds (an RD referenced by a REC, a REC that is running).
    pub fn lock_free<S: LockFree>(&self, addr: usize) -> RefHandle<'_, S> {
        match self.entry(addr) {
            Ok(entry) => RefHandle::new(addr, entry),
            Err(_) => panic!("untracked granule 0x{:X}", addr),
        }
    }
}

#[cfg(test)]
mod test {
    extern crate std;

    use super::*;
    use crate::rmi::error::Error;
    use crate::test_utils::*;

    use alloc::sync::Arc;
    use std::thread;

    #[test]
    fn addr_to_index_spans_regions() {
        let table = GranuleTable::new(&[0x1000..0x4000, 0x10_0000..0x10_2000]);
        assert_eq!(table.len(), 5);
        assert_eq!(table.addr_to_index(0x1000), Some(0));
        assert_eq!(table.addr_to_index(0x3000), Some(2));
        assert_eq!(table.addr_to_index(0x10_0000), Some(3));
        assert_eq!(table.addr_to_index(0x10_1000), Some(4));
        assert_eq!(table.addr_to_index(0x4000), None);
        assert_eq!(table.addr_to_index(0x1008), None);
    }

    #[test]
    fn lock_state_mismatch_is_input_error() {
        let mem = TestMemory::new(4);
        let table = mem.table();
        let addr = mem.granule(0);

        let ret = table.lock(addr, GranuleState::Delegated);
        assert!(matches!(ret, Err(Error::RmiErrorInput)));

        let mut g = table.lock(addr, GranuleState::Undelegated).unwrap();
        g.set_state(GranuleState::Delegated);
        drop(g);

        assert!(table.lock(addr, GranuleState::Delegated).is_ok());
        assert!(table.lock(addr + 1, GranuleState::Delegated).is_err());
    }

    #[test]
    fn lock_two_returns_in_argument_order() {
        let mem = TestMemory::new(4);
        let table = mem.table();
        let (lo, hi) = (mem.granule(1), mem.granule(2));

        let (g1, g2) = table
            .lock_two(hi, GranuleState::Undelegated, lo, GranuleState::Undelegated)
            .unwrap();
        assert_eq!(g1.addr(), hi);
        assert_eq!(g2.addr(), lo);
        drop((g1, g2));

        let ret = table.lock_two(lo, GranuleState::Undelegated, lo, GranuleState::Undelegated);
        assert!(matches!(ret, Err(Error::RmiErrorInput)));
    }

    #[test]
    fn lock_two_failure_releases_everything() {
        let mem = TestMemory::new(4);
        let table = mem.table();
        let (lo, hi) = (mem.granule(0), mem.granule(3));

        // the lower granule locks, the higher one fails its state check
        let ret = table.lock_two(hi, GranuleState::Delegated, lo, GranuleState::Undelegated);
        assert!(ret.is_err());

        assert!(table.lock(lo, GranuleState::Undelegated).is_ok());
        assert!(table.lock(hi, GranuleState::Undelegated).is_ok());
    }

    #[test]
    fn lock_two_opposite_orders_do_not_deadlock() {
        let mem = Arc::new(TestMemory::new(2));
        let (x, y) = (mem.granule(0), mem.granule(1));

        let workers: std::vec::Vec<_> = [(x, y), (y, x)]
            .into_iter()
            .map(|(a, b)| {
                let mem = mem.clone();
                thread::spawn(move || {
                    for _ in 0..1000 {
                        let (ga, gb) = mem
                            .table()
                            .lock_two(a, GranuleState::Undelegated, b, GranuleState::Undelegated)
                            .unwrap();
                        assert_eq!((ga.addr(), gb.addr()), (a, b));
                    }
                })
            })
            .collect();

        for worker in workers {
            assert!(worker.join().is_ok());
        }
    }

    #[test]
    fn lock_unused_reports_in_use() {
        let mem = TestMemory::new(2);
        let table = mem.table();
        let addr = mem.granule(0);

        let mut g = table.lock(addr, GranuleState::Undelegated).unwrap();
        g.set_state(GranuleState::RD);
        g.inc_ref(1);
        drop(g);

        let ret = table.lock_unused(addr, GranuleState::RD);
        assert!(matches!(ret, Err(Error::RmiErrorInUse)));
        let ret = table.lock_unused(addr, GranuleState::RTT);
        assert!(matches!(ret, Err(Error::RmiErrorInput)));

        table.lock_free::<RdRef>(addr).put();
        assert!(table.lock_unused(addr, GranuleState::RD).is_ok());
    }

    #[test]
    fn unlocked_refcount_invariant() {
        assert!(GranuleState::Undelegated.refcount_allowed(0));
        assert!(!GranuleState::Delegated.refcount_allowed(1));
        assert!(!GranuleState::Data.refcount_allowed(1));
        assert!(!GranuleState::RecAux.refcount_allowed(1));
        assert!(GranuleState::Rec.refcount_allowed(1));
        assert!(!GranuleState::Rec.refcount_allowed(2));
        assert!(GranuleState::RD.refcount_allowed(100));
        assert!(GranuleState::RTT.refcount_allowed(512));
    }

    #[test]
    #[should_panic]
    fn unlock_with_broken_invariant_is_fatal() {
        let mem = TestMemory::new(1);
        let table = mem.table();
        let mut g = table.lock(mem.granule(0), GranuleState::Undelegated).unwrap();
        g.set_state(GranuleState::Data);
        g.inc_ref(1);
    }

    #[test]
    #[should_panic]
    fn lock_unconditional_mismatch_is_fatal() {
        let mem = TestMemory::new(1);
        let _ = mem
            .table()
            .lock_unconditional(mem.granule(0), GranuleState::Data);
    }

    #[test]
    fn rec_handle_orders_refcount() {
        let mem = TestMemory::new(1);
        let table = mem.table();
        let addr = mem.granule(0);

        let mut g = table.lock(addr, GranuleState::Undelegated).unwrap();
        g.set_state(GranuleState::Rec);
        let rec = g.lock_free::<RecRef>();
        rec.get_release();
        drop(g);

        assert_eq!(table.lock_free::<RecRef>(addr).read_acquire(), 1);
        table.lock_free::<RecRef>(addr).put_release();
        assert_eq!(table.lock_free::<RecRef>(addr).read_acquire(), 0);
    }
}
