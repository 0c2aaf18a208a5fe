use crate::granule::{Content, GranuleState, GranuleTable, GRANULE_SIZE};

/// Contents of a whole granule, as copied from the host or into a realm.
#[repr(C, align(4096))]
#[derive(Clone, Copy)]
pub struct DataPage([u8; GRANULE_SIZE]);

impl DataPage {
    pub fn as_slice(&self) -> &[u8] {
        self.0.as_slice()
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        self.0.as_mut_slice()
    }
}

impl Content for DataPage {}

/// Copies a `T` out of host memory.
///
/// The granule at `addr` is locked as non-secure for the duration of the
/// copy so it cannot be delegated under our feet.
pub fn copy_from<T: Copy>(granules: &GranuleTable, addr: usize) -> Option<T> {
    if core::mem::size_of::<T>() > GRANULE_SIZE {
        return None;
    }
    let _guard = granules.lock(addr, GranuleState::Undelegated).ok()?;

    // Safety: the granule is tracked, aligned and reserved to the host.
    Some(unsafe { core::ptr::read_volatile(addr as *const T) })
}

/// Copies `src` into host memory at `addr`.
pub fn copy_to<T: Copy>(granules: &GranuleTable, src: &T, addr: usize) -> Option<()> {
    if core::mem::size_of::<T>() > GRANULE_SIZE {
        return None;
    }
    let _guard = granules.lock(addr, GranuleState::Undelegated).ok()?;

    unsafe { core::ptr::write_volatile(addr as *mut T, *src) };
    Some(())
}
