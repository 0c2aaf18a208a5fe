pub(crate) mod params;

use self::params::Params;
use super::error::Error;
use crate::config::MAX_REC_AUX_GRANULES;
use crate::event::Mainloop;
use crate::granule::{GranuleGuard, GranuleState, GranuleTable, GRANULE_SIZE};
use crate::host;
use crate::listen;
use crate::measurement::HashContext;
use crate::realm::mm::stage2_tte::{invalid_ripas, RttPage};
use crate::realm::rd::{Rd, RealmInfo, State};
use crate::rmi;

extern crate alloc;
use alloc::vec::Vec;

/// Locks the RD and every starting level table in ascending address order.
/// All of them must be delegated.
fn lock_realm_granules<'a>(
    granules: &'a GranuleTable,
    rd: usize,
    params: &Params,
) -> Result<(GranuleGuard<'a>, Vec<GranuleGuard<'a>>), Error> {
    let mut addrs: Vec<usize> = params.rtt_range()?.step_by(GRANULE_SIZE).collect();
    addrs.push(rd);
    addrs.sort_unstable();

    let mut guards = Vec::with_capacity(addrs.len());
    for addr in addrs {
        guards.push(granules.lock(addr, GranuleState::Delegated)?);
    }

    let pos = guards
        .iter()
        .position(|g| g.addr() == rd)
        .ok_or(Error::RmiErrorInput)?;
    let rd = guards.remove(pos);
    Ok((rd, guards))
}

pub fn set_event_handler(mainloop: &mut Mainloop) {
    listen!(mainloop, rmi::REALM_ACTIVATE, |arg, _, rmm| {
        let mut rd_granule = rmm.granules.lock(arg[0], GranuleState::RD)?;
        let rd = rd_granule.content_mut::<Rd>();

        if !rd.at_state(State::New) {
            return Err(Error::RmiErrorRealm);
        }

        rd.set_state(State::Active);
        Ok(())
    });

    listen!(mainloop, rmi::REALM_CREATE, |arg, _, rmm| {
        let rd = arg[0];
        let params_ptr = arg[1];

        let params =
            host::copy_from::<Params>(&rmm.granules, params_ptr).ok_or(Error::RmiErrorInput)?;
        params.verify_compliance(rd)?;

        let vmid = params.vmid as usize;
        if !rmm.vmids.reserve(vmid) {
            return Err(Error::RmiErrorInput);
        }

        let (mut rd_granule, mut rtt_granules) =
            match lock_realm_granules(&rmm.granules, rd, &params) {
                Ok(locked) => locked,
                Err(e) => {
                    rmm.vmids.free(vmid);
                    return Err(e);
                }
            };

        let info = RealmInfo {
            vmid: params.vmid,
            ipa_bits: params.ipa_bits(),
            s2_starting_level: params.rtt_level_start(),
            rtt_base: params.rtt_base as usize,
        };
        let rd_obj = rd_granule.content_mut::<Rd>();
        rd_obj.init(
            info,
            params.rtt_num_start(),
            MAX_REC_AUX_GRANULES,
            params.hash_algo,
            &params.rpv,
        );

        if let Err(e) = HashContext::new(rd_obj).and_then(|mut ctx| ctx.measure_realm_create(&params)) {
            rd_granule.zeroize();
            rmm.vmids.free(vmid);
            return Err(e.into());
        }

        for rtt in rtt_granules.iter_mut() {
            rtt.content_mut::<RttPage>()
                .init_unassigned(invalid_ripas::EMPTY);
            rtt.set_state(GranuleState::RTT);
        }
        rd_granule.set_state(GranuleState::RD);

        debug!("realm {} created at {:X}", vmid, rd);
        Ok(())
    });

    listen!(mainloop, rmi::REC_AUX_COUNT, |arg, ret, rmm| {
        let rd_granule = rmm.granules.lock(arg[0], GranuleState::RD)?;
        ret[1] = rd_granule.content::<Rd>().num_rec_aux();
        Ok(())
    });

    listen!(mainloop, rmi::REALM_DESTROY, |arg, _ret, rmm| {
        // RECs hold a reference on the RD
        let mut rd_granule = rmm.granules.lock_unused(arg[0], GranuleState::RD)?;
        let rd = rd_granule.content::<Rd>();
        let (vmid, rtt_base, num_rtts) = (rd.vmid(), rd.rtt_base(), rd.rtt_num_start());

        let mut rtt_granules: Vec<GranuleGuard<'_>> = (0..num_rtts)
            .map(|i| rmm.granules.lock_unconditional(rtt_base + i * GRANULE_SIZE, GranuleState::RTT))
            .collect();

        // the tables must not link to anything anymore
        if rtt_granules.iter().any(|g| g.refcount() != 0) {
            return Err(Error::RmiErrorInUse);
        }

        for rtt in rtt_granules.iter_mut() {
            rtt.zeroize();
            rtt.set_state(GranuleState::Delegated);
        }
        drop(rtt_granules);

        rmm.vmids.free(vmid as usize);
        rd_granule.zeroize();
        rd_granule.unlock_transition(GranuleState::Delegated);

        debug!("realm {} destroyed", vmid);
        Ok(())
    });
}
