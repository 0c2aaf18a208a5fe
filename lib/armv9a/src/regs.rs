use crate::bits_in_reg;

define_bits!(
    EsrEl2,
    // Exception Class.
    EC[31 - 26],
    // Instruction Length for synchronous exceptions.
    IL[25 - 25],
    // Instruction syndrome valid.
    ISV[24 - 24],
    // Syndrome Access Size (ISV == '1')
    SAS[23 - 22],
    // Syndrome Sign Extend (ISV == '1')
    SSE[21 - 21],
    // Syndrome Register Transfer (ISV == '1')
    SRT[20 - 16],
    // Width of the register accessed by the instruction is Sixty-Four (ISV == '1')
    SF[15 - 15],
    // Acquire/Release. (ISV == '1')
    AR[14 - 14],
    // Indicates that the fault came from use of VNCR_EL2 register by EL1 code.
    VNCR[13 - 13],
    // Synchronous Error Type
    SET[12 - 11],
    // FAR not Valid
    FNV[10 - 10],
    // External Abort type
    EA[9 - 9],
    // Cache Maintenance
    CM[8 - 8],
    S1PTW[7 - 7],
    // Write not Read.
    WNR[6 - 6],
    DFSC[5 - 0]
);

impl EsrEl2 {
    pub fn ec(&self) -> u64 {
        self.get_masked_value(EsrEl2::EC)
    }

    pub fn is_write(&self) -> bool {
        self.get_masked(EsrEl2::WNR) != 0
    }

    pub fn srt(&self) -> usize {
        self.get_masked_value(EsrEl2::SRT) as usize
    }

    pub fn get_access_size_mask(&self) -> u64 {
        match self.get_masked_value(EsrEl2::SAS) {
            0 => 0xff,
            1 => 0xffff,
            2 => 0xffff_ffff,
            _ => 0xffff_ffff_ffff_ffff,
        }
    }
}

pub const ESR_EL2_EC_UNKNOWN: u64 = 0;
pub const ESR_EL2_EC_WFX: u64 = 1;
pub const ESR_EL2_EC_FPU: u64 = 7;
pub const ESR_EL2_EC_HVC: u64 = 22;
pub const ESR_EL2_EC_SMC: u64 = 23;
pub const ESR_EL2_EC_SYSREG: u64 = 24;
pub const ESR_EL2_EC_SVE: u64 = 25;
pub const ESR_EL2_EC_INST_ABORT: u64 = 32;
pub const ESR_EL2_EC_DATA_ABORT: u64 = 36;
pub const ESR_EL2_EC_DATA_ABORT_SEL: u64 = 37;
pub const ESR_EL2_EC_SERROR: u64 = 47;

pub const ESR_EL2_WFX_TI: u64 = 1 << 0;

pub const NON_EMULATABLE_ABORT_MASK: u64 =
    EsrEl2::EC | EsrEl2::SET | EsrEl2::FNV | EsrEl2::EA | EsrEl2::DFSC;
pub const EMULATABLE_ABORT_MASK: u64 =
    NON_EMULATABLE_ABORT_MASK | EsrEl2::ISV | EsrEl2::SAS | EsrEl2::SF | EsrEl2::WNR;

pub mod abort_fsc {
    pub const LEVEL_MASK: u64 = 0b11;
    pub const TRANSLATION_FAULT: u64 = 0b00_0100;
    pub const SEA: u64 = 0b01_0000;
    pub const SEA_TTW_START: u64 = 0b01_0011;
    pub const SEA_TTW_END: u64 = 0b01_0111;
}

pub mod abort_set {
    pub const UER: u64 = 0b00;
    pub const UC: u64 = 0b10;
    pub const UEO: u64 = 0b11;
}

define_bits!(
    SErrorIss,
    // Implementation Defined Syndrome
    IDS[24 - 24],
    // Asynchronous Error Type
    AET[12 - 10],
    EA[9 - 9],
    DFSC[5 - 0]
);

pub const SERROR_DFSC_ASYNC: u64 = 0b01_0001;

pub mod serror_aet {
    pub const UC: u64 = 0b000;
    pub const UEU: u64 = 0b001;
    pub const UEO: u64 = 0b010;
    pub const UER: u64 = 0b011;
    pub const CE: u64 = 0b110;
}

pub const SERROR_MASK: u64 =
    EsrEl2::EC | SErrorIss::IDS | SErrorIss::AET | SErrorIss::EA | SErrorIss::DFSC;

define_bits!(
    HPFAR_EL2,
    // Faulting IPA, bits [51:12]
    FIPA[43 - 4]
);

pub const HPFAR_EL2_FIPA_OFFSET: u64 = 8;

impl HPFAR_EL2 {
    pub fn fault_ipa(&self) -> usize {
        (self.get_masked(HPFAR_EL2::FIPA) << HPFAR_EL2_FIPA_OFFSET) as usize
    }
}

define_bits!(
    VTTBR_EL2,
    VMID[63 - 48],
    BADDR[47 - 1]
);

pub const SPSR_EL2_NRW_AARCH32: u64 = 1 << 4;

define_bits!(
    ISS,
    IL[25 - 25],
    Op0[21 - 20],
    Op2[19 - 17],
    Op1[16 - 14],
    CRn[13 - 10],
    Rt[9 - 5],
    CRm[4 - 1],
    Direction[0 - 0]
);

/// Bits of a trapped MSR/MRS syndrome which identify the system register.
pub const ISS_SYSREG_ID_MASK: u32 =
    (ISS::Op0 | ISS::Op2 | ISS::Op1 | ISS::CRn | ISS::CRm) as u32;

macro_rules! define_iss_id {
    ($name:ident, $Op0:expr, $Op1:expr, $CRn:expr, $CRm:expr, $Op2:expr) => {
        pub const $name: u32 = bits_in_reg(ISS::Op0, $Op0) as u32
            | bits_in_reg(ISS::Op1, $Op1) as u32
            | bits_in_reg(ISS::CRn, $CRn) as u32
            | bits_in_reg(ISS::CRm, $CRm) as u32
            | bits_in_reg(ISS::Op2, $Op2) as u32;
    };
}

define_iss_id!(ISS_ID_AA64PFR0_EL1, 3, 0, 0, 4, 0);
define_iss_id!(ISS_ID_AA64PFR1_EL1, 3, 0, 0, 4, 1);
define_iss_id!(ISS_ID_AA64DFR0_EL1, 3, 0, 0, 5, 0);
define_iss_id!(ISS_ID_AA64DFR1_EL1, 3, 0, 0, 5, 1);
define_iss_id!(ISS_ID_AA64AFR0_EL1, 3, 0, 0, 5, 4);
define_iss_id!(ISS_ID_AA64AFR1_EL1, 3, 0, 0, 5, 5);
define_iss_id!(ISS_ID_AA64ISAR0_EL1, 3, 0, 0, 6, 0);
define_iss_id!(ISS_ID_AA64ISAR1_EL1, 3, 0, 0, 6, 1);
define_iss_id!(ISS_ID_AA64MMFR0_EL1, 3, 0, 0, 7, 0);
define_iss_id!(ISS_ID_AA64MMFR1_EL1, 3, 0, 0, 7, 1);
define_iss_id!(ISS_ID_AA64MMFR2_EL1, 3, 0, 0, 7, 2);

define_iss_id!(ISS_ICC_DIR_EL1, 3, 0, 12, 11, 1);
define_iss_id!(ISS_ICC_SGI1R_EL1, 3, 0, 12, 11, 5);
define_iss_id!(ISS_ICC_ASGI1R_EL1, 3, 0, 12, 11, 6);
define_iss_id!(ISS_ICC_SGI0R_EL1, 3, 0, 12, 11, 7);

/// Op0 == 3, Op1 == 0, CRn == 0: the feature ID register space.
pub const ISS_ID_SPACE: u32 = bits_in_reg(ISS::Op0, 3) as u32;
pub const ISS_ID_SPACE_MASK: u32 = (ISS::Op0 | ISS::Op1 | ISS::CRn) as u32;

define_bits!(
    ID_AA64ISAR1_EL1,
    GPI[31 - 28],
    GPA[27 - 24],
    API[11 - 8],
    APA[7 - 4]
);

define_bits!(
    ID_AA64PFR0_EL1,
    AMU[47 - 44],
    SVE[35 - 32]
);
