use crate::granule::GRANULE_SIZE;
use crate::realm::mm::stage2_tte::{map_size, RTT_MIN_BLOCK_LEVEL};

/// Stage 2 TLB maintenance for one realm.
///
/// Callers invalidate after an entry that may be cached has been changed.
pub trait InvalidateTlb: Send + Sync {
    /// Invalidates `count` granules of IPA space starting at `ipa`, then
    /// the stage 1 entries of the VMID.
    fn invalidate_ipas(&self, vmid: u16, ipa: usize, count: usize);

    /// A page entry was removed.
    fn invalidate_page(&self, vmid: u16, ipa: usize) {
        self.invalidate_ipas(vmid, ipa, 1);
    }

    /// A block entry, or a child table with no valid entry, was removed.
    fn invalidate_block(&self, vmid: u16, ipa: usize) {
        self.invalidate_ipas(vmid, ipa, 1);
    }

    /// A level 2 child table holding valid entries was removed.
    fn invalidate_pages_in_block(&self, vmid: u16, ipa: usize) {
        self.invalidate_ipas(vmid, ipa, map_size(RTT_MIN_BLOCK_LEVEL) / GRANULE_SIZE);
    }
}

/// Broadcast TLBI issued on the current PE.
pub struct Stage2Tlbi;

#[cfg(target_arch = "aarch64")]
impl InvalidateTlb for Stage2Tlbi {
    fn invalidate_ipas(&self, vmid: u16, ipa: usize, count: usize) {
        use armv9a::{bits_in_reg, VTTBR_EL2};
        use core::arch::asm;

        let vttbr = bits_in_reg(VTTBR_EL2::VMID, vmid as u64);
        let mut old_vttbr: u64;

        unsafe {
            asm!("mrs {}, vttbr_el2", out(reg) old_vttbr);
            asm!("msr vttbr_el2, {}", "isb", in(reg) vttbr);

            for i in 0..count {
                let operand = ((ipa + i * GRANULE_SIZE) >> 12) as u64;
                asm!("tlbi ipas2e1is, {}", in(reg) operand);
            }

            // According to DDI0487 D5.10.2, stage 1 entries of the VMID may
            // have been built from the removed stage 2 entry.
            asm!("dsb ish", "tlbi vmalle1is", "dsb ish", "isb");

            asm!("msr vttbr_el2, {}", "isb", in(reg) old_vttbr);
        }
    }
}

#[cfg(not(target_arch = "aarch64"))]
impl InvalidateTlb for Stage2Tlbi {
    fn invalidate_ipas(&self, vmid: u16, ipa: usize, count: usize) {
        trace!("tlbi vmid {} ipa {:#X} x{}", vmid, ipa, count);
    }
}
