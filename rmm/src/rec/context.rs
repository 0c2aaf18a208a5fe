use crate::rec::Rec;
use crate::rmi::error::Error;

use aarch64_cpu::registers::SPSR_EL2;

#[repr(C)]
#[derive(Default, Debug, Clone, Copy)]
pub struct Context {
    pub gp_regs: [u64; 31],
    pub elr_el2: u64,
    pub spsr_el2: u64,
    pub sys_regs: SystemRegister,
}

pub struct RegOffset;
impl RegOffset {
    pub const PC: usize = 31;
    pub const PSTATE: usize = 32;
}

pub fn set_reg(rec: &mut Rec, register: usize, value: usize) -> Result<(), Error> {
    match register {
        0..=30 => {
            rec.context.gp_regs[register] = value as u64;
            Ok(())
        }
        RegOffset::PC => {
            rec.context.elr_el2 = value as u64;
            Ok(())
        }
        RegOffset::PSTATE => {
            rec.context.spsr_el2 = value as u64;
            Ok(())
        }
        _ => Err(Error::RmiErrorInput),
    }
}

pub fn get_reg(rec: &Rec, register: usize) -> Result<usize, Error> {
    match register {
        0..=30 => Ok(rec.context.gp_regs[register] as usize),
        RegOffset::PC => Ok(rec.context.elr_el2 as usize),
        RegOffset::PSTATE => Ok(rec.context.spsr_el2 as usize),
        _ => Err(Error::RmiErrorInput),
    }
}

impl Context {
    /// EL1h with D, A, I and F masked: where a realm vCPU starts and where
    /// injected exceptions are taken.
    pub const INITIAL_PSTATE: u64 = (SPSR_EL2::D.mask << SPSR_EL2::D.shift)
        | (SPSR_EL2::A.mask << SPSR_EL2::A.shift)
        | (SPSR_EL2::I.mask << SPSR_EL2::I.shift)
        | (SPSR_EL2::F.mask << SPSR_EL2::F.shift)
        | (0b0101 << SPSR_EL2::M.shift);

    pub fn new(pc: u64, gprs: &[u64]) -> Self {
        let mut context = Self {
            elr_el2: pc,
            spsr_el2: Self::INITIAL_PSTATE,
            ..Default::default()
        };
        let n = gprs.len().min(context.gp_regs.len());
        context.gp_regs[..n].copy_from_slice(&gprs[..n]);
        context
    }

    pub fn advance_pc(&mut self) {
        self.elr_el2 += 4;
    }
}

/// EL1 state used for exception injection, and the EL2 syndrome of the
/// last exit.
#[repr(C)]
#[derive(Default, Debug, Clone, Copy)]
pub struct SystemRegister {
    pub sp: u64,
    pub esr_el1: u64,
    pub far: u64,
    pub elr: u64,
    pub spsr: u64,
    pub vbar: u64,
    pub sctlr: u64,
    pub esr_el2: u64,
    pub far_el2: u64,
    pub hpfar: u64,
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn initial_pstate_is_el1h_masked() {
        let context = Context::new(0x8000_0000, &[1, 2, 3]);
        assert_eq!(context.spsr_el2, 0x3c5);
        assert_eq!(context.elr_el2, 0x8000_0000);
        assert_eq!(&context.gp_regs[..4], &[1, 2, 3, 0]);
    }
}
