use crate::config::MAX_IPA_BITS;
use crate::event::Mainloop;
use crate::listen;
use crate::rmi;
use armv9a::{define_bitfield, define_bits, define_mask};

extern crate alloc;

define_bits!(
    FeatureReg0,
    HASH_SHA_512[29 - 29],
    HASH_SHA_256[28 - 28],
    PMU_NUM_CTRS[27 - 23],
    PMU_EN[22 - 22],
    NUM_WPS[21 - 18],
    NUM_BPS[17 - 14],
    SVE_VL[13 - 10],
    SVE_EN[9 - 9],
    LPA2[8 - 8],
    S2SZ[7 - 0]
);

const S2SZ_VALUE: u64 = MAX_IPA_BITS as u64;
const LPA2_VALUE: u64 = NOT_SUPPORTED;
const HASH_SHA_256_VALUE: u64 = SUPPORTED;
const HASH_SHA_512_VALUE: u64 = SUPPORTED;

const NOT_SUPPORTED: u64 = 0;
const SUPPORTED: u64 = 1;

const FEATURE_REGISTER_0_INDEX: usize = 0;

pub fn feature_register_0() -> u64 {
    let mut feat_reg0 = FeatureReg0::new(0);
    feat_reg0
        .set_masked_value(FeatureReg0::S2SZ, S2SZ_VALUE)
        .set_masked_value(FeatureReg0::LPA2, LPA2_VALUE)
        .set_masked_value(FeatureReg0::HASH_SHA_256, HASH_SHA_256_VALUE)
        .set_masked_value(FeatureReg0::HASH_SHA_512, HASH_SHA_512_VALUE);
    feat_reg0.get()
}

pub fn set_event_handler(mainloop: &mut Mainloop) {
    listen!(mainloop, rmi::FEATURES, |arg, ret, _| {
        if arg[0] != FEATURE_REGISTER_0_INDEX {
            ret[1] = 0;
            return Ok(());
        }

        ret[1] = feature_register_0() as usize;
        debug!("rmi::FEATURES ret:{:X}", ret[1]);
        Ok(())
    });
}
