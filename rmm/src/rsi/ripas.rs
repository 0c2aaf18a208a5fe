use crate::granule::is_granule_aligned;
use crate::realm::mm::rtt::walk_realm;
use crate::realm::mm::stage2_tte::{invalid_ripas, RTT_PAGE_LEVEL};
use crate::rec::context::{get_reg, set_reg};
use crate::rec::Rec;
use crate::rmi;
use crate::rmi::error::Error;
use crate::rmi::rec::run::Run;
use crate::rsi;
use crate::Monitor;

pub fn get_ripas_state(
    _arg: &[usize],
    ret: &mut [usize],
    rmm: &Monitor,
    rec: &mut Rec,
    _run: &mut Run,
) -> Result<(), Error> {
    let ipa = get_reg(rec, 1)?;
    ret[0] = rmi::SUCCESS_REC_ENTER;

    if !is_granule_aligned(ipa) || !rec.realm().addr_in_par(ipa) {
        set_reg(rec, 0, rsi::ERROR_INPUT)?;
        return Ok(());
    }

    let s2tte = walk_realm(&rmm.granules, rec.realm(), ipa, RTT_PAGE_LEVEL).entry();
    if s2tte.is_destroyed() {
        set_reg(rec, 0, rsi::ERROR_INPUT)?;
        return Ok(());
    }

    let ripas = s2tte.get_ripas();
    debug!("RSI_IPA_STATE_GET: ipa: {:X} ripas: {:X}", ipa, ripas);

    set_reg(rec, 0, rsi::SUCCESS)?;
    set_reg(rec, 1, ripas as usize)?;
    Ok(())
}

pub fn set_ripas_state(
    _arg: &[usize],
    ret: &mut [usize],
    _rmm: &Monitor,
    rec: &mut Rec,
    run: &mut Run,
) -> Result<(), Error> {
    let ipa_start = get_reg(rec, 1)?;
    let ipa_end = get_reg(rec, 2)?;
    let ipa_state = get_reg(rec, 3)?;

    if ipa_end <= ipa_start
        || !is_granule_aligned(ipa_start)
        || !is_granule_aligned(ipa_end)
        || !is_ripas_valid(ipa_state)
        || !rec.realm().addr_in_par(ipa_end - 1)
    {
        set_reg(rec, 0, rsi::ERROR_INPUT)?;
        ret[0] = rmi::SUCCESS_REC_ENTER;
        return Ok(());
    }

    run.set_exit_reason(rmi::EXIT_RIPAS_CHANGE);
    run.set_ripas(
        ipa_start as u64,
        (ipa_end - ipa_start) as u64,
        ipa_state as u8,
    );
    rec.set_ripas(ipa_start, ipa_end, ipa_state as u8);
    rec.context.advance_pc();

    debug!(
        "RSI_IPA_STATE_SET: {:X} ~ {:X} {:X}",
        ipa_start, ipa_end, ipa_state
    );
    ret[0] = rmi::SUCCESS;
    Ok(())
}

fn is_ripas_valid(ripas: usize) -> bool {
    matches!(ripas as u64, invalid_ripas::EMPTY | invalid_ripas::RAM)
}

/// Reports how far the host got with the last RIPAS change request.
pub fn complete_ripas(rec: &mut Rec) -> Result<(), Error> {
    if rec.ripas_pending() {
        let ripas_addr = rec.ripas_addr();
        set_reg(rec, 0, rsi::SUCCESS)?;
        set_reg(rec, 1, ripas_addr)?;
        rec.clear_ripas();
    }
    Ok(())
}
