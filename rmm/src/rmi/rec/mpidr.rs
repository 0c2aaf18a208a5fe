use armv9a::{define_bitfield, define_bits, define_mask};

// B3.4.16 RmiRecMpidr type
define_bits!(
    MPIDR,
    AFF3[31 - 24],
    AFF2[23 - 16],
    AFF1[15 - 8],
    AFF0[3 - 0]
);

/// VMPIDR_EL2 bit 31 is RES1.
pub const VMPIDR_RES1: u64 = 1 << 31;

pub fn validate(mpidr: u64) -> bool {
    let must_be_zero = !(MPIDR::AFF0 | MPIDR::AFF1 | MPIDR::AFF2 | MPIDR::AFF3);
    mpidr & must_be_zero == 0
}

/// Linear REC index of a valid MPIDR. RECs of a realm are created in this
/// order.
pub fn to_index(mpidr: u64) -> usize {
    let mpidr = MPIDR::new(mpidr);
    (mpidr.get_masked_value(MPIDR::AFF0)
        | mpidr.get_masked_value(MPIDR::AFF1) << 4
        | mpidr.get_masked_value(MPIDR::AFF2) << 12
        | mpidr.get_masked_value(MPIDR::AFF3) << 20) as usize
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn index_packs_the_affinity_fields() {
        assert_eq!(to_index(0), 0);
        assert_eq!(to_index(0xf), 15);
        assert_eq!(to_index(0x100), 16);
        assert_eq!(to_index(0x0102_0304), (1 << 20) | (2 << 12) | (3 << 4) | 4);

        assert!(validate(0x0102_030f));
        // Aff0 only has four bits
        assert!(!validate(0x10));
        assert!(!validate(1 << 32));
    }
}
