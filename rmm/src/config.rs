use alloc::vec::Vec;
use spin::mutex::Mutex;

pub const NUM_OF_CPU: usize = 8;
pub const NUM_OF_CLUSTER: usize = 2;
pub const NUM_OF_CPU_PER_CLUSTER: usize = NUM_OF_CPU / NUM_OF_CLUSTER;

// Protected address space limits accepted by REALM_CREATE.
pub const MIN_IPA_BITS: usize = 32;
pub const MAX_IPA_BITS: usize = 48;
pub const MIN_STARTING_LEVEL: usize = 0;

pub const VMID_BITS: usize = 16;
pub const MAX_REC_AUX_GRANULES: usize = 16;

// A single DEV_MEM request never spans more than one level 3 table.
pub const MAX_DEV_MEM_GRANULES: usize = 512;

#[cfg(any(feature = "fvp", not(feature = "qemu")))]
const PLATFORM_DRAM: [core::ops::Range<usize>; 2] = [
    0x8000_0000..0x8000_0000 + 0x7C00_0000,
    0x8_8000_0000..0x8_8000_0000 + 0x8000_0000,
];
#[cfg(all(feature = "qemu", not(feature = "fvp")))]
const PLATFORM_DRAM: [core::ops::Range<usize>; 1] = [0x4000_0000..0x4000_0000 + 0x2_0000_0000];

lazy_static! {
    /// Physical memory tracked by the granule table. Boot code may replace
    /// the platform default before the monitor is built.
    pub static ref DRAM_REGIONS: Mutex<Vec<core::ops::Range<usize>>> =
        Mutex::new(PLATFORM_DRAM.to_vec());
}
