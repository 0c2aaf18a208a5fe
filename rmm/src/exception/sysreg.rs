use crate::event::realmexit::{Decision, ExitRecord, Injection};
use crate::rec::Rec;
use crate::rmi;

use armv9a::regs::*;

const XZR: usize = 31;

fn is_id_space(iss: u32) -> bool {
    iss & ISS_ID_SPACE_MASK == ISS_ID_SPACE
}

/// Handles a trapped MSR/MRS.
pub fn handle(rec: &mut Rec, esr: u64) -> Decision {
    let iss = ISS::new(esr);
    let idreg = (esr as u32) & ISS_SYSREG_ID_MASK;
    let rt = iss.get_masked_value(ISS::Rt) as usize;
    // direction: 0b0 - write, 0b1 - read
    let is_read = iss.get_masked_value(ISS::Direction) != 0;

    if is_id_space(idreg) {
        handle_sysreg_id(rec, idreg, rt, is_read);
        return Decision::ResumeRealm { advance_pc: true };
    }

    match idreg {
        ISS_ICC_SGI1R_EL1 | ISS_ICC_ASGI1R_EL1 | ISS_ICC_SGI0R_EL1 | ISS_ICC_DIR_EL1 => {
            let gpr0 = if !is_read && rt != XZR {
                rec.context.gp_regs[rt]
            } else {
                0
            };
            Decision::ExitToHost {
                exit: Some(ExitRecord {
                    reason: rmi::EXIT_SYNC,
                    esr: esr & (EsrEl2::EC | ISS_SYSREG_ID_MASK as u64 | ISS::Direction),
                    gpr0,
                    ..Default::default()
                }),
                advance_pc: true,
            }
        }
        _ => {
            debug!("unhandled sysreg access {:#X}", esr);
            Decision::InjectFault {
                kind: Injection::Undefined,
                report: None,
            }
        }
    }
}

fn handle_sysreg_id(rec: &mut Rec, idreg: u32, rt: usize, is_read: bool) {
    if !is_read {
        warn!("Unable to write id system reg. Will ignore this request!");
        return;
    }
    if rt == XZR {
        trace!("handle_sysreg_id(): Rt = xzr");
        return;
    }

    rec.context.gp_regs[rt] = sanitize(idreg, read_id_reg(idreg));
}

/// Hides the features a realm must not use from an ID register value.
pub fn sanitize(idreg: u32, raw: u64) -> u64 {
    let mask: u64 = match idreg {
        ISS_ID_AA64ISAR1_EL1 => {
            ID_AA64ISAR1_EL1::GPI
                | ID_AA64ISAR1_EL1::GPA
                | ID_AA64ISAR1_EL1::API
                | ID_AA64ISAR1_EL1::APA
        }
        ISS_ID_AA64PFR0_EL1 => ID_AA64PFR0_EL1::AMU | ID_AA64PFR0_EL1::SVE,
        _ => 0,
    };
    raw & !mask
}

#[cfg(target_arch = "aarch64")]
macro_rules! mrs {
    ($reg:literal) => {{
        let val: u64;
        unsafe {
            core::arch::asm!(concat!("mrs {}, ", $reg), out(reg) val);
        }
        val
    }};
}

#[cfg(target_arch = "aarch64")]
fn read_id_reg(idreg: u32) -> u64 {
    match idreg {
        ISS_ID_AA64PFR0_EL1 => mrs!("id_aa64pfr0_el1"),
        ISS_ID_AA64PFR1_EL1 => mrs!("id_aa64pfr1_el1"),
        ISS_ID_AA64DFR0_EL1 => mrs!("id_aa64dfr0_el1"),
        ISS_ID_AA64DFR1_EL1 => mrs!("id_aa64dfr1_el1"),
        ISS_ID_AA64AFR0_EL1 => mrs!("id_aa64afr0_el1"),
        ISS_ID_AA64AFR1_EL1 => mrs!("id_aa64afr1_el1"),
        ISS_ID_AA64ISAR0_EL1 => mrs!("id_aa64isar0_el1"),
        ISS_ID_AA64ISAR1_EL1 => mrs!("id_aa64isar1_el1"),
        ISS_ID_AA64MMFR0_EL1 => mrs!("id_aa64mmfr0_el1"),
        ISS_ID_AA64MMFR1_EL1 => mrs!("id_aa64mmfr1_el1"),
        ISS_ID_AA64MMFR2_EL1 => mrs!("id_aa64mmfr2_el1"),
        // RES0 for the rest of the ID space
        _ => 0,
    }
}

#[cfg(not(target_arch = "aarch64"))]
fn read_id_reg(_idreg: u32) -> u64 {
    0
}
