use crate::config::VMID_BITS;

use alloc::vec;
use alloc::vec::Vec;
use spin::mutex::Mutex;

const BITS_PER_WORD: usize = u64::BITS as usize;

/// Tracks the VMIDs handed out to live realms.
pub struct VmidPool {
    bitmap: Mutex<Vec<u64>>,
}

impl VmidPool {
    pub fn new() -> Self {
        Self {
            bitmap: Mutex::new(vec![0; (1 << VMID_BITS) / BITS_PER_WORD]),
        }
    }

    /// Claims `vmid`. Fails if it is out of range or already in use.
    pub fn reserve(&self, vmid: usize) -> bool {
        if vmid >= 1 << VMID_BITS {
            return false;
        }
        let (word, bit) = (vmid / BITS_PER_WORD, vmid % BITS_PER_WORD);
        let mut bitmap = self.bitmap.lock();

        if bitmap[word] & (1 << bit) != 0 {
            return false;
        }
        bitmap[word] |= 1 << bit;
        true
    }

    pub fn free(&self, vmid: usize) {
        let (word, bit) = (vmid / BITS_PER_WORD, vmid % BITS_PER_WORD);
        let mut bitmap = self.bitmap.lock();

        if bitmap[word] & (1 << bit) == 0 {
            panic!("freeing unused vmid {}", vmid);
        }
        bitmap[word] &= !(1 << bit);
    }
}

impl Default for VmidPool {
    fn default() -> Self {
        Self::new()
    }
}
