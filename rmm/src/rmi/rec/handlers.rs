use super::mpidr::{self, VMPIDR_RES1};
use super::params::Params;
use super::run::{EntryFlag, Run};
use crate::cpu::get_cpu_id;
use crate::event::realmexit::handle_realm_exit;
use crate::event::Mainloop;
use crate::granule::{GranuleState, GranuleTable, RdRef};
use crate::host;
use crate::listen;
use crate::measurement::HashContext;
use crate::realm::rd::{Rd, State};
use crate::rec::context::{set_reg, Context};
use crate::rec::sea::host_sea_inject;
use crate::rec::Rec;
use crate::rmi;
use crate::rmi::error::Error;
use crate::rsi::hostcall::complete_host_call;
use crate::rsi::ripas::complete_ripas;
use crate::Monitor;

use armv9a::regs::*;

extern crate alloc;
use alloc::vec::Vec;

const XZR: usize = 31;

/// Gives REC_AUX granules back as delegated ones.
fn free_rec_aux_granules(granules: &GranuleTable, aux: &[usize], scrub: bool) {
    for addr in aux {
        let mut g = granules.lock_unconditional(*addr, GranuleState::RecAux);
        if scrub {
            g.zeroize();
        }
        g.unlock_transition(GranuleState::Delegated);
    }
}

fn rec_create(rmm: &Monitor, rec: usize, rd: usize, params: &Params, aux: &[usize]) -> Result<(), Error> {
    let (mut rec_granule, mut rd_granule) =
        rmm.granules
            .lock_two(rec, GranuleState::Delegated, rd, GranuleState::RD)?;

    let rd_obj = rd_granule.content_mut::<Rd>();
    if !rd_obj.at_state(State::New) {
        return Err(Error::RmiErrorRealm);
    }

    let rec_index = mpidr::to_index(params.mpidr);
    if rec_index != rd_obj.rec_index() || aux.len() != rd_obj.num_rec_aux() {
        return Err(Error::RmiErrorInput);
    }

    let realm = *rd_obj.info();
    HashContext::new(rd_obj)?.measure_rec_params(params)?;
    rd_obj.inc_rec_index();

    rec_granule.content_mut::<Rec>().init(
        rd,
        realm,
        rec_index,
        params.mpidr | VMPIDR_RES1,
        params.flags,
        Context::new(params.pc, &params.gprs),
        aux,
    );

    // REC_DESTROY drops it without the RD lock
    rd_granule.lock_free::<RdRef>().get();
    rec_granule.set_state(GranuleState::Rec);
    Ok(())
}

/// The host finished emulating the load or store behind the last exit.
fn complete_mmio(rec: &mut Rec, run: &Run) -> Result<(), Error> {
    let esr = EsrEl2::new(rec.context.sys_regs.esr_el2);
    let ipa = rec.fault_ipa();

    if esr.ec() != ESR_EL2_EC_DATA_ABORT
        || esr.get_masked(EsrEl2::ISV) == 0
        || rec.realm().addr_in_par(ipa)
    {
        return Err(Error::RmiErrorRec);
    }

    if !esr.is_write() && esr.srt() != XZR {
        let mask = esr.get_access_size_mask();
        let mut val = run.entry_gpr(0) & mask;

        if esr.get_masked(EsrEl2::SSE) != 0 && mask != u64::MAX {
            let sign = (mask >> 1) + 1;
            if val & sign != 0 {
                val |= !mask;
            }
        }
        if esr.get_masked(EsrEl2::SF) == 0 {
            val &= 0xffff_ffff;
        }
        set_reg(rec, esr.srt(), val as usize)?;
    }

    rec.context.advance_pc();
    Ok(())
}

/// Applies what the host hands back on entry. Returns false when the REC
/// has to go straight back to the host.
fn apply_entry(rmm: &Monitor, rec: &mut Rec, run: &mut Run) -> Result<bool, Error> {
    if run.entry_flags().get_masked(EntryFlag::EMUL_MMIO) != 0 {
        complete_mmio(rec, run)?;
    }

    host_sea_inject(rec, run);

    if rec.host_call_pending() && !complete_host_call(&rmm.granules, rec, run)? {
        return Ok(false);
    }

    complete_ripas(rec)?;
    Ok(true)
}

pub fn set_event_handler(mainloop: &mut Mainloop) {
    listen!(mainloop, rmi::REC_CREATE, |arg, _, rmm| {
        let rec = arg[0];
        let rd = arg[1];
        let params_ptr = arg[2];

        if rec == rd {
            return Err(Error::RmiErrorInput);
        }

        let params =
            host::copy_from::<Params>(&rmm.granules, params_ptr).ok_or(Error::RmiErrorInput)?;
        params.verify_compliance(rec, rd)?;

        let aux: Vec<usize> = params.aux().iter().map(|addr| *addr as usize).collect();
        for (i, addr) in aux.iter().enumerate() {
            match rmm.granules.lock(*addr, GranuleState::Delegated) {
                Ok(g) => g.unlock_transition(GranuleState::RecAux),
                Err(e) => {
                    free_rec_aux_granules(&rmm.granules, &aux[..i], false);
                    return Err(e);
                }
            }
        }

        rec_create(rmm, rec, rd, &params, &aux).map_err(|e| {
            free_rec_aux_granules(&rmm.granules, &aux, false);
            e
        })
    });

    listen!(mainloop, rmi::REC_DESTROY, |arg, _ret, rmm| {
        let mut rec_granule = rmm.granules.lock_unused(arg[0], GranuleState::Rec)?;

        let rec = rec_granule.content::<Rec>();
        let owner = rec.owner();
        let aux = rec.aux().to_vec();

        free_rec_aux_granules(&rmm.granules, &aux, true);

        rec_granule.zeroize();
        rec_granule.unlock_transition(GranuleState::Delegated);

        // a transient over-estimate between the unlock and here is fine
        rmm.granules.lock_free::<RdRef>(owner).put();
        Ok(())
    });

    listen!(mainloop, rmi::REC_ENTER, |arg, _, rmm| {
        let run_pa = arg[1];

        let mut run = host::copy_from::<Run>(&rmm.granules, run_pa).ok_or(Error::RmiErrorInput)?;
        trace!("{:?}", run);

        let rec_granule = rmm.granules.lock(arg[0], GranuleState::Rec)?;
        // running on another PE
        if rec_granule.refcount_acquire() != 0 {
            return Err(Error::RmiErrorInUse);
        }
        let rec = rec_granule.content::<Rec>();
        let owner = rec.owner();
        if !rec.runnable() {
            return Err(Error::RmiErrorRec);
        }

        let mut running = rec_granule.into_running();
        let rec = running.content_mut::<Rec>();

        // The REC holds a reference on its RD so the RD is still there.
        // Its lock is only taken once the REC lock is gone.
        let active = rmm
            .granules
            .lock_unconditional(owner, GranuleState::RD)
            .content::<Rd>()
            .at_state(State::Active);
        if !active {
            return Err(Error::RmiErrorRealm);
        }

        run.clear_exit();
        if apply_entry(rmm, rec, &mut run)? {
            let vttbr = rec.realm().vttbr();
            loop {
                let exit = rmm.cpu.run(rec, vttbr);
                if handle_realm_exit(rmm, rec, &mut run, &exit)? {
                    break;
                }
            }
        }

        trace!(
            "REC {:X} on cpu {} exits with reason {}",
            arg[0],
            get_cpu_id(),
            run.exit_reason()
        );
        host::copy_to::<Run>(&rmm.granules, &run, run_pa).ok_or(Error::RmiErrorInput)
    });
}
