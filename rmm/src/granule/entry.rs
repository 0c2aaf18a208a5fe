use super::{GranuleState, GRANULE_SIZE};

use core::marker::PhantomData;
use core::sync::atomic::{AtomicU64, Ordering};
use spinning_top::{guard::SpinlockGuard, Spinlock};

// Safety: concurrency safety
//  - The table does not use a big lock, so every entry carries its own lock.
//  - `refcount` lives outside the lock because RD and REC granules are
//    referenced without holding it (see `LockFree`).

pub struct Granule {
    state: GranuleState,
}

pub struct Entry {
    granule: Spinlock<Granule>,
    refcount: AtomicU64,
}

impl Entry {
    pub fn new() -> Self {
        Self {
            granule: Spinlock::new(Granule {
                state: GranuleState::Undelegated,
            }),
            refcount: AtomicU64::new(0),
        }
    }

    pub(super) fn lock(&self, addr: usize) -> GranuleGuard<'_> {
        GranuleGuard {
            addr,
            entry: self,
            inner: self.granule.lock(),
        }
    }

    pub(super) fn refcount(&self) -> &AtomicU64 {
        &self.refcount
    }
}

impl Default for Entry {
    fn default() -> Self {
        Self::new()
    }
}

/// Types that may be placed in a granule and accessed through its guard.
pub trait Content {}

/// A locked granule.
///
/// Dropping the guard unlocks the granule. The refcount invariant of the
/// state held at that moment is checked while the lock is still taken.
pub struct GranuleGuard<'a> {
    addr: usize,
    entry: &'a Entry,
    inner: SpinlockGuard<'a, Granule>,
}

impl<'a> GranuleGuard<'a> {
    pub fn addr(&self) -> usize {
        self.addr
    }

    pub fn state(&self) -> GranuleState {
        self.inner.state
    }

    pub fn set_state(&mut self, state: GranuleState) {
        self.inner.state = state;
    }

    /// Changes the state and releases the lock.
    pub fn unlock_transition(mut self, state: GranuleState) {
        self.set_state(state);
    }

    pub fn refcount(&self) -> u64 {
        self.entry.refcount.load(Ordering::Relaxed)
    }

    pub fn refcount_acquire(&self) -> u64 {
        self.entry.refcount.load(Ordering::Acquire)
    }

    pub fn inc_ref(&mut self, val: u64) {
        self.entry.refcount.fetch_add(val, Ordering::Relaxed);
    }

    pub fn dec_ref(&mut self, val: u64) {
        let prev = self.entry.refcount.fetch_sub(val, Ordering::Relaxed);
        if prev < val {
            panic!("refcount underflow at 0x{:X}", self.addr);
        }
    }

    pub fn content<T: Content>(&self) -> &T {
        debug_assert!(core::mem::size_of::<T>() <= GRANULE_SIZE);
        unsafe { &*(self.addr as *const T) }
    }

    pub fn content_mut<T: Content>(&mut self) -> &mut T {
        debug_assert!(core::mem::size_of::<T>() <= GRANULE_SIZE);
        unsafe { &mut *(self.addr as *mut T) }
    }

    pub fn zeroize(&mut self) {
        unsafe {
            core::ptr::write_bytes(self.addr as *mut u8, 0x0, GRANULE_SIZE);
        }
    }

    /// Hands out the lock-free refcount handle of a locked RD or REC.
    pub fn lock_free<S: LockFree>(&self) -> RefHandle<'a, S> {
        if self.state() != S::STATE {
            panic!(
                "lock-free access to 0x{:X} in state {:?}",
                self.addr,
                self.state()
            );
        }
        RefHandle::new(self.addr, self.entry)
    }

    /// Pins a locked REC with its refcount and releases the lock.
    pub fn into_running(self) -> RecInUse<'a> {
        let handle = self.lock_free::<RecRef>();
        handle.get_release();
        drop(self);
        RecInUse { handle }
    }
}

impl Drop for GranuleGuard<'_> {
    fn drop(&mut self) {
        let refcount = self.entry.refcount.load(Ordering::Relaxed);
        if !self.inner.state.refcount_allowed(refcount) {
            panic!(
                "granule 0x{:X} unlocked as {:?} with refcount {}",
                self.addr, self.inner.state, refcount
            );
        }
    }
}

/// Granule states whose refcount may be touched without the granule lock.
pub trait LockFree {
    const STATE: GranuleState;
}

pub enum RdRef {}
impl LockFree for RdRef {
    const STATE: GranuleState = GranuleState::RD;
}

pub enum RecRef {}
impl LockFree for RecRef {
    const STATE: GranuleState = GranuleState::Rec;
}

pub struct RefHandle<'a, S: LockFree> {
    addr: usize,
    entry: &'a Entry,
    _state: PhantomData<S>,
}

impl<'a, S: LockFree> RefHandle<'a, S> {
    pub(super) fn new(addr: usize, entry: &'a Entry) -> Self {
        Self {
            addr,
            entry,
            _state: PhantomData,
        }
    }

    pub fn addr(&self) -> usize {
        self.addr
    }
}

impl RefHandle<'_, RdRef> {
    /// Taken by REC_CREATE while the RD is locked.
    pub fn get(&self) {
        self.entry.refcount.fetch_add(1, Ordering::Relaxed);
    }

    /// Dropped by REC_DESTROY without the RD lock.
    pub fn put(&self) {
        let prev = self.entry.refcount.fetch_sub(1, Ordering::Relaxed);
        if prev == 0 {
            panic!("RD 0x{:X} refcount underflow", self.addr);
        }
    }
}

impl RefHandle<'_, RecRef> {
    pub fn get_release(&self) {
        self.entry.refcount.fetch_add(1, Ordering::Release);
    }

    pub fn put_release(&self) {
        let prev = self.entry.refcount.fetch_sub(1, Ordering::Release);
        if prev == 0 {
            panic!("REC 0x{:X} refcount underflow", self.addr);
        }
    }

    pub fn read_acquire(&self) -> u64 {
        self.entry.refcount.load(Ordering::Acquire)
    }
}

/// A REC that is being run.
///
/// The refcount taken by `GranuleGuard::into_running` keeps REC_DESTROY and
/// RTT_SET_RIPAS away, so the content is reachable without the lock. It is
/// dropped again with release semantics when the value goes away.
pub struct RecInUse<'a> {
    handle: RefHandle<'a, RecRef>,
}

impl RecInUse<'_> {
    pub fn addr(&self) -> usize {
        self.handle.addr
    }

    pub fn content_mut<T: Content>(&mut self) -> &mut T {
        debug_assert!(core::mem::size_of::<T>() <= GRANULE_SIZE);
        unsafe { &mut *(self.handle.addr as *mut T) }
    }
}

impl Drop for RecInUse<'_> {
    fn drop(&mut self) {
        self.handle.put_release();
    }
}
