use crate::cpu::{ExitKind, RealmExit};
use crate::exception::sysreg;
use crate::exception::trap::syndrome::{Fault, Syndrome};
use crate::granule::{GranuleTable, GRANULE_MASK};
use crate::realm::mm::rtt::walk_realm;
use crate::realm::mm::stage2_tte::{invalid_ripas, RTT_PAGE_LEVEL};
use crate::realm::rd::RealmInfo;
use crate::rec::sea::{inject_sea, inject_serror, inject_undef};
use crate::rec::Rec;
use crate::rmi;
use crate::rmi::error::Error;
use crate::rmi::rec::run::Run;
use crate::rsi;
use crate::Monitor;

use armv9a::regs::*;

const XZR: usize = 31;

/// What the host learns about an exit.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ExitRecord {
    pub reason: u8,
    pub esr: u64,
    pub far: u64,
    pub hpfar: u64,
    pub gpr0: u64,
}

impl ExitRecord {
    fn new(reason: u8) -> Self {
        Self {
            reason,
            ..Default::default()
        }
    }

    fn sync(esr: u64, far: u64, hpfar: u64) -> Self {
        Self {
            reason: rmi::EXIT_SYNC,
            esr,
            far,
            hpfar,
            gpr0: 0,
        }
    }

    pub fn write(&self, run: &mut Run) {
        run.set_exit_reason(self.reason);
        run.set_esr(self.esr);
        run.set_far(self.far);
        run.set_hpfar(self.hpfar);
        run.set_gpr(0, self.gpr0);
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Injection {
    Sea { esr: u64, far: u64 },
    Undefined,
    SError { esr: u64 },
}

/// Exits that need more than the syndrome to be handled.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Service {
    Rsi,
    SysReg,
    Fpu,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Decision {
    ResumeRealm {
        advance_pc: bool,
    },
    /// `exit` is `None` when the run page was already filled in.
    ExitToHost {
        exit: Option<ExitRecord>,
        advance_pc: bool,
    },
    /// The realm takes the exception on its next run. With a report the
    /// host is told first.
    InjectFault {
        kind: Injection,
        report: Option<ExitRecord>,
    },
    Delegate(Service),
    Fatal(&'static str),
}

/// The view of the REC that exit classification needs.
pub trait ExitEnv {
    fn realm(&self) -> &RealmInfo;
    /// Whether a protected IPA has RIPAS EMPTY.
    fn ripas_is_empty(&self, ipa: usize) -> bool;
    fn is_aarch32(&self) -> bool;
    fn gpr(&self, idx: usize) -> u64;
}

pub struct RecEnv<'a> {
    granules: &'a GranuleTable,
    rec: &'a Rec,
}

impl<'a> RecEnv<'a> {
    pub fn new(granules: &'a GranuleTable, rec: &'a Rec) -> Self {
        Self { granules, rec }
    }
}

impl ExitEnv for RecEnv<'_> {
    fn realm(&self) -> &RealmInfo {
        self.rec.realm()
    }

    fn ripas_is_empty(&self, ipa: usize) -> bool {
        let walk = walk_realm(self.granules, self.rec.realm(), ipa, RTT_PAGE_LEVEL);
        let s2tte = walk.entry();
        (s2tte.is_assigned() || s2tte.is_unassigned())
            && s2tte.get_ripas() == invalid_ripas::EMPTY
    }

    fn is_aarch32(&self) -> bool {
        self.rec.context.spsr_el2 & SPSR_EL2_NRW_AARCH32 != 0
    }

    fn gpr(&self, idx: usize) -> u64 {
        self.rec.context.gp_regs[idx]
    }
}

/// Decides what happens after the realm left EL1/EL0.
pub fn classify(exit: &RealmExit, env: &impl ExitEnv) -> Decision {
    match exit.kind {
        ExitKind::Irq => Decision::ExitToHost {
            exit: Some(ExitRecord::new(rmi::EXIT_IRQ)),
            advance_pc: false,
        },
        ExitKind::Fiq => Decision::ExitToHost {
            exit: Some(ExitRecord::new(rmi::EXIT_FIQ)),
            advance_pc: false,
        },
        ExitKind::SError => classify_serror(exit.esr),
        ExitKind::Sync => classify_sync(exit, env),
        ExitKind::Unknown => Decision::Fatal("unknown exception from realm"),
    }
}

fn classify_serror(esr: u64) -> Decision {
    let iss = SErrorIss::new(esr);
    if iss.get_masked(SErrorIss::IDS) != 0
        || iss.get_masked_value(SErrorIss::DFSC) != SERROR_DFSC_ASYNC
    {
        return Decision::Fatal("implementation defined SError");
    }

    let report = ExitRecord {
        reason: rmi::EXIT_SERROR,
        esr: esr & SERROR_MASK,
        ..Default::default()
    };
    match iss.get_masked_value(SErrorIss::AET) {
        serror_aet::UEU | serror_aet::UER => Decision::InjectFault {
            kind: Injection::SError { esr },
            report: Some(report),
        },
        serror_aet::UEO | serror_aet::CE => Decision::ExitToHost {
            exit: Some(report),
            advance_pc: false,
        },
        _ => Decision::Fatal("uncontainable SError"),
    }
}

fn classify_sync(exit: &RealmExit, env: &impl ExitEnv) -> Decision {
    let esr = exit.esr;
    match Syndrome::from(esr) {
        Syndrome::WFX => Decision::ExitToHost {
            exit: Some(ExitRecord::sync(esr & (EsrEl2::EC | ESR_EL2_WFX_TI), 0, 0)),
            advance_pc: true,
        },
        Syndrome::HVC => Decision::InjectFault {
            kind: Injection::Undefined,
            report: None,
        },
        Syndrome::SMC => Decision::Delegate(Service::Rsi),
        Syndrome::SysRegInst => Decision::Delegate(Service::SysReg),
        Syndrome::FPU => Decision::Delegate(Service::Fpu),
        Syndrome::DataAbort(Fault::External) | Syndrome::InstructionAbort(Fault::External) => {
            classify_external_abort(exit)
        }
        Syndrome::DataAbort(_) => classify_data_abort(exit, env),
        Syndrome::InstructionAbort(fault) => classify_inst_abort(exit, fault, env),
        Syndrome::Unknown | Syndrome::Other(_) => Decision::ExitToHost {
            exit: Some(ExitRecord::sync(0, 0, 0)),
            advance_pc: false,
        },
    }
}

fn sea(exit: &RealmExit) -> Injection {
    Injection::Sea {
        esr: exit.esr,
        far: exit.far,
    }
}

fn classify_external_abort(exit: &RealmExit) -> Decision {
    let report = ExitRecord::sync(exit.esr & NON_EMULATABLE_ABORT_MASK, 0, 0);
    match EsrEl2::new(exit.esr).get_masked_value(EsrEl2::SET) {
        abort_set::UER => Decision::InjectFault {
            kind: sea(exit),
            report: Some(report),
        },
        abort_set::UEO => Decision::ExitToHost {
            exit: Some(report),
            advance_pc: false,
        },
        _ => Decision::Fatal("uncontainable synchronous external abort"),
    }
}

fn classify_data_abort(exit: &RealmExit, env: &impl ExitEnv) -> Decision {
    let realm = env.realm();
    let ipa = HPFAR_EL2::new(exit.hpfar).fault_ipa();
    let in_par = realm.addr_in_par(ipa);

    if ipa >= realm.ipa_size() || (in_par && env.ripas_is_empty(ipa)) {
        return Decision::InjectFault {
            kind: sea(exit),
            report: None,
        };
    }

    let esr = EsrEl2::new(exit.esr);
    if env.is_aarch32() || in_par || esr.get_masked(EsrEl2::ISV) == 0 {
        return Decision::ExitToHost {
            exit: Some(ExitRecord::sync(
                exit.esr & NON_EMULATABLE_ABORT_MASK,
                0,
                exit.hpfar,
            )),
            advance_pc: false,
        };
    }

    let gpr0 = if esr.is_write() && esr.srt() != XZR {
        env.gpr(esr.srt()) & esr.get_access_size_mask()
    } else {
        0
    };
    Decision::ExitToHost {
        exit: Some(ExitRecord {
            reason: rmi::EXIT_SYNC,
            esr: exit.esr & EMULATABLE_ABORT_MASK,
            far: exit.far & !(GRANULE_MASK as u64),
            hpfar: exit.hpfar,
            gpr0,
        }),
        advance_pc: false,
    }
}

fn classify_inst_abort(exit: &RealmExit, fault: Fault, env: &impl ExitEnv) -> Decision {
    let realm = env.realm();
    let ipa = HPFAR_EL2::new(exit.hpfar).fault_ipa();

    if ipa >= realm.ipa_size() || !realm.addr_in_par(ipa) || env.ripas_is_empty(ipa) {
        return Decision::InjectFault {
            kind: sea(exit),
            report: None,
        };
    }

    let record = match fault {
        Fault::Translation { .. } => {
            ExitRecord::sync(exit.esr & NON_EMULATABLE_ABORT_MASK, 0, exit.hpfar)
        }
        _ => ExitRecord::sync(0, 0, 0),
    };
    Decision::ExitToHost {
        exit: Some(record),
        advance_pc: false,
    }
}

/// Handles one exit of a running REC.
///
/// Returns true when REC_ENTER has to go back to the host with the exit
/// record in `run`, false when the realm can be resumed.
pub fn handle_realm_exit(
    rmm: &Monitor,
    rec: &mut Rec,
    run: &mut Run,
    exit: &RealmExit,
) -> Result<bool, Error> {
    rec.context.sys_regs.esr_el2 = exit.esr;
    rec.context.sys_regs.far_el2 = exit.far;
    rec.context.sys_regs.hpfar = exit.hpfar;

    let decision = classify(exit, &RecEnv::new(&rmm.granules, rec));
    trace!("realm exit {:?} -> {:?}", exit.kind, decision);
    apply(rmm, rec, run, decision)
}

fn apply(rmm: &Monitor, rec: &mut Rec, run: &mut Run, decision: Decision) -> Result<bool, Error> {
    match decision {
        Decision::ResumeRealm { advance_pc } => {
            if advance_pc {
                rec.context.advance_pc();
            }
            Ok(false)
        }
        Decision::ExitToHost { exit, advance_pc } => {
            if let Some(exit) = exit {
                exit.write(run);
            }
            if advance_pc {
                rec.context.advance_pc();
            }
            Ok(true)
        }
        Decision::InjectFault { kind, report } => {
            match kind {
                Injection::Sea { esr, far } => inject_sea(rec, esr, far),
                Injection::Undefined => inject_undef(rec),
                Injection::SError { esr } => inject_serror(rec, esr),
            }
            match report {
                Some(exit) => {
                    exit.write(run);
                    Ok(true)
                }
                None => Ok(false),
            }
        }
        Decision::Delegate(Service::Rsi) => {
            let mut ctx = rsi::context(rec);
            rmm.rsi.dispatch(&mut ctx, rmm, rec, run)?;
            if ctx.ret_slice()[0] == rmi::SUCCESS_REC_ENTER {
                rec.context.advance_pc();
                Ok(false)
            } else {
                Ok(true)
            }
        }
        Decision::Delegate(Service::SysReg) => {
            let esr = rec.context.sys_regs.esr_el2;
            let decision = sysreg::handle(rec, esr);
            apply(rmm, rec, run, decision)
        }
        Decision::Delegate(Service::Fpu) => {
            rmm.cpu.switch_fpu(rec);
            Ok(false)
        }
        Decision::Fatal(reason) => panic!(
            "{}: esr {:#X} far {:#X}",
            reason, rec.context.sys_regs.esr_el2, rec.context.sys_regs.far_el2
        ),
    }
}
