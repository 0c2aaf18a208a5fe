use armv9a::regs::*;
use armv9a::bits_in_reg;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Fault {
    AddressSize { level: u8 },
    Translation { level: u8 },
    AccessFlag { level: u8 },
    Permission { level: u8 },
    /// Synchronous external abort, on the access itself or on a table walk.
    External,
    Alignment,
    TLBConflict,
    Other(u8),
}

impl From<u64> for Fault {
    fn from(origin: u64) -> Self {
        let dfsc = origin & EsrEl2::DFSC;
        let level = (dfsc & abort_fsc::LEVEL_MASK) as u8;

        if dfsc == abort_fsc::SEA || (abort_fsc::SEA_TTW_START..=abort_fsc::SEA_TTW_END).contains(&dfsc) {
            return Fault::External;
        }

        match dfsc >> 2 {
            0b0000 => Fault::AddressSize { level },
            0b0001 => Fault::Translation { level },
            0b0010 => Fault::AccessFlag { level },
            0b0011 => Fault::Permission { level },
            0b1000 => Fault::Alignment,
            0b1100 => Fault::TLBConflict,
            _ => Fault::Other(dfsc as u8),
        }
    }
}

impl From<Fault> for u64 {
    fn from(fault: Fault) -> u64 {
        match fault {
            Fault::AddressSize { level } => level as u64,
            Fault::Translation { level } => abort_fsc::TRANSLATION_FAULT | level as u64,
            Fault::AccessFlag { level } => 0b00_1000 | level as u64,
            Fault::Permission { level } => 0b00_1100 | level as u64,
            Fault::External => abort_fsc::SEA,
            Fault::Alignment => 0b10_0001,
            Fault::TLBConflict => 0b11_0000,
            Fault::Other(dfsc) => dfsc as u64,
        }
    }
}

/// Synchronous exits from a lower exception level, by exception class.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Syndrome {
    Unknown,
    WFX,
    FPU,
    HVC,
    SMC,
    SysRegInst,
    InstructionAbort(Fault),
    DataAbort(Fault),
    Other(u64),
}

impl From<u64> for Syndrome {
    fn from(origin: u64) -> Self {
        match EsrEl2::new(origin).ec() {
            ESR_EL2_EC_UNKNOWN => Syndrome::Unknown,
            ESR_EL2_EC_WFX => Syndrome::WFX,
            ESR_EL2_EC_FPU | ESR_EL2_EC_SVE => Syndrome::FPU,
            0b01_0010 | ESR_EL2_EC_HVC => Syndrome::HVC,
            0b01_0011 | ESR_EL2_EC_SMC => Syndrome::SMC,
            ESR_EL2_EC_SYSREG => Syndrome::SysRegInst,
            ESR_EL2_EC_INST_ABORT => Syndrome::InstructionAbort(Fault::from(origin)),
            ESR_EL2_EC_DATA_ABORT => Syndrome::DataAbort(Fault::from(origin)),
            ec => Syndrome::Other(ec),
        }
    }
}

impl From<Syndrome> for u64 {
    fn from(syndrome: Syndrome) -> u64 {
        match syndrome {
            Syndrome::DataAbort(fault) => {
                bits_in_reg(EsrEl2::EC, ESR_EL2_EC_DATA_ABORT) | u64::from(fault)
            }
            Syndrome::InstructionAbort(fault) => {
                bits_in_reg(EsrEl2::EC, ESR_EL2_EC_INST_ABORT) | u64::from(fault)
            }
            Syndrome::Unknown => 0,
            Syndrome::WFX => bits_in_reg(EsrEl2::EC, ESR_EL2_EC_WFX),
            Syndrome::FPU => bits_in_reg(EsrEl2::EC, ESR_EL2_EC_FPU),
            Syndrome::HVC => bits_in_reg(EsrEl2::EC, ESR_EL2_EC_HVC),
            Syndrome::SMC => bits_in_reg(EsrEl2::EC, ESR_EL2_EC_SMC),
            Syndrome::SysRegInst => bits_in_reg(EsrEl2::EC, ESR_EL2_EC_SYSREG),
            Syndrome::Other(ec) => bits_in_reg(EsrEl2::EC, ec),
        }
    }
}
