use core::ops::Range;

use crate::config::{MAX_IPA_BITS, MIN_IPA_BITS, MIN_STARTING_LEVEL};
use crate::granule::{is_granule_aligned, GRANULE_SHIFT, GRANULE_SIZE};
use crate::measurement::{Hashable, Hasher, MeasurementError};
use crate::realm::mm::stage2_tte::{RTT_PAGE_LEVEL, S2TTE_STRIDE};
use crate::realm::rd::RPV_SIZE;
use crate::rmi::error::Error;
use crate::rmi::features::FeatureReg0;
use crate::rmi::{HASH_ALGO_SHA256, HASH_ALGO_SHA512};

/// Realm parameters, read from the granule the host passes to
/// REALM_CREATE.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct Params {
    pub features_0: u64,
    pub(crate) _reserved0: [u8; 0x100 - 0x8],
    pub hash_algo: u8,
    pub(crate) _reserved1: [u8; 0x400 - 0x101],
    pub rpv: [u8; RPV_SIZE],
    pub(crate) _reserved2: [u8; 0x800 - 0x440],
    pub vmid: u16,
    pub(crate) _reserved3: [u8; 0x808 - 0x802],
    pub rtt_base: u64,
    pub rtt_level_start: i64,
    pub rtt_num_start: u32,
    pub(crate) _reserved4: [u8; 0x1000 - 0x81c],
}

crate::const_assert_size!(Params, GRANULE_SIZE);
crate::const_assert_offset!(Params, hash_algo, 0x100);
crate::const_assert_offset!(Params, rpv, 0x400);
crate::const_assert_offset!(Params, vmid, 0x800);
crate::const_assert_offset!(Params, rtt_base, 0x808);
crate::const_assert_offset!(Params, rtt_level_start, 0x810);
crate::const_assert_offset!(Params, rtt_num_start, 0x818);

impl Default for Params {
    fn default() -> Self {
        Self {
            features_0: 0,
            _reserved0: [0; 0x100 - 0x8],
            hash_algo: 0,
            _reserved1: [0; 0x400 - 0x101],
            rpv: [0; RPV_SIZE],
            _reserved2: [0; 0x800 - 0x440],
            vmid: 0,
            _reserved3: [0; 0x808 - 0x802],
            rtt_base: 0,
            rtt_level_start: 0,
            rtt_num_start: 0,
            _reserved4: [0; 0x1000 - 0x81c],
        }
    }
}

impl core::fmt::Debug for Params {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Params")
            .field("features_0", &format_args!("{:#X}", self.features_0))
            .field("hash_algo", &self.hash_algo)
            .field("vmid", &self.vmid)
            .field("rtt_base", &format_args!("{:#X}", self.rtt_base))
            .field("rtt_level_start", &self.rtt_level_start)
            .field("rtt_num_start", &self.rtt_num_start)
            .finish()
    }
}

// Only the hash algorithm contributes to the initial RIM. Everything else
// is measured as zero.
impl Hashable for Params {
    fn hash(&self, hasher: &Hasher, out: &mut [u8]) -> Result<(), MeasurementError> {
        let measured = Params {
            hash_algo: self.hash_algo,
            ..Default::default()
        };
        // Safety: Params is repr(C) plain data of exactly one granule.
        let bytes = unsafe {
            core::slice::from_raw_parts(&measured as *const Params as *const u8, GRANULE_SIZE)
        };
        hasher.hash_fields_into(out, |h| h.hash(bytes))
    }
}

/// Number of concatenated tables needed at `sl` to resolve `ipa_bits`.
pub fn s2_num_root_rtts(ipa_bits: usize, sl: usize) -> usize {
    let levels = RTT_PAGE_LEVEL - sl;
    let sl_ipa_bits = levels * S2TTE_STRIDE + GRANULE_SHIFT + S2TTE_STRIDE;

    if sl_ipa_bits >= ipa_bits {
        1
    } else {
        1 << (ipa_bits - sl_ipa_bits)
    }
}

impl Params {
    pub fn ipa_bits(&self) -> usize {
        FeatureReg0::new(self.features_0).get_masked_value(FeatureReg0::S2SZ) as usize
    }

    pub fn rtt_level_start(&self) -> usize {
        self.rtt_level_start as usize
    }

    pub fn rtt_num_start(&self) -> usize {
        self.rtt_num_start as usize
    }

    /// Physical range of the starting level tables.
    pub fn rtt_range(&self) -> Result<Range<usize>, Error> {
        let base = self.rtt_base as usize;
        self.rtt_num_start()
            .checked_mul(GRANULE_SIZE)
            .and_then(|size| base.checked_add(size))
            .map(|end| base..end)
            .ok_or(Error::RmiErrorInput)
    }

    /// Checks everything that can be checked without touching a granule.
    pub fn verify_compliance(&self, rd: usize) -> Result<(), Error> {
        trace!("{:?}", self);

        if FeatureReg0::new(self.features_0).get_masked(FeatureReg0::LPA2) != 0 {
            return Err(Error::RmiErrorInput);
        }

        let ipa_bits = self.ipa_bits();
        if !(MIN_IPA_BITS..=MAX_IPA_BITS).contains(&ipa_bits) {
            return Err(Error::RmiErrorInput);
        }

        let sl = self.rtt_level_start;
        if sl < MIN_STARTING_LEVEL as i64 || sl > RTT_PAGE_LEVEL as i64 {
            return Err(Error::RmiErrorInput);
        }

        // Check misconfigurations between IPA size and SL. At most 16
        // tables can be concatenated at the starting level.
        let levels = RTT_PAGE_LEVEL - sl as usize;
        let min_ipa_bits = levels * S2TTE_STRIDE + GRANULE_SHIFT + 1;
        let max_ipa_bits = min_ipa_bits + (S2TTE_STRIDE - 1) + 4;
        if ipa_bits < min_ipa_bits || ipa_bits > max_ipa_bits {
            return Err(Error::RmiErrorInput);
        }

        if s2_num_root_rtts(ipa_bits, sl as usize) != self.rtt_num_start() {
            return Err(Error::RmiErrorInput);
        }

        if !is_granule_aligned(self.rtt_base as usize) {
            return Err(Error::RmiErrorInput);
        }
        if self.rtt_range()?.contains(&rd) {
            return Err(Error::RmiErrorInput);
        }

        match self.hash_algo {
            HASH_ALGO_SHA256 | HASH_ALGO_SHA512 => Ok(()),
            _ => Err(Error::RmiErrorInput),
        }
    }
}
