use crate::rec::Rec;
use crate::rmi::rec::run::{EntryFlag, Run};

use aarch64_cpu::registers::SPSR_EL2;
use armv9a::regs::*;
use armv9a::bits_in_reg;
use armv9a::{InMemoryRegister, Readable}; // re-exported from tock_registers

const VBAR_CURRENT_SP0_OFFSET: u64 = 0x0;
const VBAR_CURRENT_SPX_OFFSET: u64 = 0x200;
const VBAR_LOWER_AARCH64_OFFSET: u64 = 0x400;

const VECTOR_SYNC_OFFSET: u64 = 0x0;
const VECTOR_SERROR_OFFSET: u64 = 0x180;

/// Injects a SEA requested by the host for the last emulatable abort.
pub fn host_sea_inject(rec: &mut Rec, run: &Run) {
    // Host has not completed emulation for an Emulatable Abort.
    if run.entry_flags().get_masked(EntryFlag::INJECT_SEA) == 0 {
        return;
    }

    let esr_el2 = rec.context.sys_regs.esr_el2;
    if EsrEl2::new(esr_el2).ec() != ESR_EL2_EC_DATA_ABORT {
        return;
    }

    // Only an abort at an unprotected IPA can have been emulated by the host.
    let fault_ipa = rec.fault_ipa();
    let realm = rec.realm();
    if !realm.addr_in_par(fault_ipa) && fault_ipa < realm.ipa_size() {
        debug!("injecting SEA at ipa {:#X}", fault_ipa);
        let far_el2 = rec.context.sys_regs.far_el2;
        inject_sea(rec, esr_el2, far_el2);
    }
}

/// Synchronous external abort for the instruction or data abort in `esr_el2`.
pub fn inject_sea(rec: &mut Rec, esr_el2: u64, far_el2: u64) {
    let mut esr_el1 = esr_el2 & !(EsrEl2::EC | EsrEl2::FNV | EsrEl2::S1PTW | EsrEl2::DFSC);
    let mut ec = esr_el2 & EsrEl2::EC;
    if !from_el0(rec) {
        // "taken without a change in exception level" is the next EC
        ec += 1 << EsrEl2::EC.trailing_zeros();
    }
    esr_el1 |= ec;
    esr_el1 |= EsrEl2::EA;
    esr_el1 |= abort_fsc::SEA;

    take_exception(rec, esr_el1, far_el2, VECTOR_SYNC_OFFSET);
}

pub fn inject_undef(rec: &mut Rec) {
    let esr_el1 = bits_in_reg(EsrEl2::EC, ESR_EL2_EC_UNKNOWN) | EsrEl2::IL;
    let far = rec.context.sys_regs.far;
    take_exception(rec, esr_el1, far, VECTOR_SYNC_OFFSET);
}

pub fn inject_serror(rec: &mut Rec, esr: u64) {
    let esr_el1 = bits_in_reg(EsrEl2::EC, ESR_EL2_EC_SERROR) | (esr & !EsrEl2::EC);
    let far = rec.context.sys_regs.far;
    take_exception(rec, esr_el1, far, VECTOR_SERROR_OFFSET);
}

fn from_el0(rec: &Rec) -> bool {
    let spsr_el2: InMemoryRegister<u64, SPSR_EL2::Register> =
        InMemoryRegister::new(rec.context.spsr_el2);
    spsr_el2.read(SPSR_EL2::M) == SPSR_EL2::M::EL0t.into()
}

fn take_exception(rec: &mut Rec, esr_el1: u64, far: u64, kind_offset: u64) {
    let context = &mut rec.context;
    let spsr_el2: InMemoryRegister<u64, SPSR_EL2::Register> =
        InMemoryRegister::new(context.spsr_el2);

    let vector_base = match spsr_el2.read_as_enum(SPSR_EL2::M) {
        Some(SPSR_EL2::M::Value::EL0t) => VBAR_LOWER_AARCH64_OFFSET,
        Some(SPSR_EL2::M::Value::EL1t) => VBAR_CURRENT_SP0_OFFSET,
        Some(SPSR_EL2::M::Value::EL1h) => VBAR_CURRENT_SPX_OFFSET,
        // realms run in AArch64 state only
        _ => panic!("unexpected realm PSTATE {:#X}", context.spsr_el2),
    };

    let pstate: u64 = (SPSR_EL2::D::SET
        + SPSR_EL2::A::SET
        + SPSR_EL2::I::SET
        + SPSR_EL2::F::SET
        + SPSR_EL2::M::EL1h)
        .into();

    context.sys_regs.esr_el1 = esr_el1;
    context.sys_regs.far = far;
    context.sys_regs.elr = context.elr_el2;
    context.sys_regs.spsr = spsr_el2.get();
    context.elr_el2 = context.sys_regs.vbar + vector_base + kind_offset;
    context.spsr_el2 = pstate;
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::rec::context::Context;

    fn rec_at(pc: u64, spsr: u64) -> Rec {
        let mut rec = unsafe { core::mem::zeroed::<Rec>() };
        rec.context = Context::new(pc, &[]);
        rec.context.spsr_el2 = spsr;
        rec.context.sys_regs.vbar = 0x8000_0000;
        rec
    }

    #[test]
    fn sea_from_el1h_uses_current_spx_vector() {
        let mut rec = rec_at(0x1000, Context::INITIAL_PSTATE);
        // data abort, translation fault level 3, write
        let esr = bits_in_reg(EsrEl2::EC, ESR_EL2_EC_DATA_ABORT) | EsrEl2::WNR | 0b00_0111;
        inject_sea(&mut rec, esr, 0xdead_0000);

        let sys = &rec.context.sys_regs;
        assert_eq!(sys.esr_el1 & EsrEl2::EC, bits_in_reg(EsrEl2::EC, ESR_EL2_EC_DATA_ABORT_SEL));
        assert_eq!(sys.esr_el1 & EsrEl2::DFSC, abort_fsc::SEA);
        assert_ne!(sys.esr_el1 & EsrEl2::EA, 0);
        assert_ne!(sys.esr_el1 & EsrEl2::WNR, 0);
        assert_eq!(sys.far, 0xdead_0000);
        assert_eq!(sys.elr, 0x1000);
        assert_eq!(rec.context.elr_el2, 0x8000_0200);
        assert_eq!(rec.context.spsr_el2, Context::INITIAL_PSTATE);
    }

    #[test]
    fn sea_from_el0_uses_lower_vector() {
        let mut rec = rec_at(0x2000, 0);
        let esr = bits_in_reg(EsrEl2::EC, ESR_EL2_EC_INST_ABORT);
        inject_sea(&mut rec, esr, 0);

        assert_eq!(
            rec.context.sys_regs.esr_el1 & EsrEl2::EC,
            bits_in_reg(EsrEl2::EC, ESR_EL2_EC_INST_ABORT)
        );
        assert_eq!(rec.context.elr_el2, 0x8000_0400);
        assert_eq!(rec.context.sys_regs.spsr, 0);
    }

    #[test]
    fn undef_and_serror_vectors() {
        let mut rec = rec_at(0x3000, Context::INITIAL_PSTATE);
        inject_undef(&mut rec);
        assert_eq!(rec.context.sys_regs.esr_el1, EsrEl2::IL);
        assert_eq!(rec.context.elr_el2, 0x8000_0200);

        let mut rec = rec_at(0x3000, Context::INITIAL_PSTATE);
        inject_serror(&mut rec, bits_in_reg(SErrorIss::AET, serror_aet::UER));
        assert_eq!(rec.context.elr_el2, 0x8000_0380);
        assert_eq!(
            rec.context.sys_regs.esr_el1 & EsrEl2::EC,
            bits_in_reg(EsrEl2::EC, ESR_EL2_EC_SERROR)
        );
    }
}
