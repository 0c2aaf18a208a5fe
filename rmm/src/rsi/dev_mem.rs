use crate::config::MAX_DEV_MEM_GRANULES;
use crate::granule::{GranuleGuard, GranuleState, GRANULE_MASK, GRANULE_SIZE};
use crate::realm::mm::rtt::walk_realm;
use crate::realm::mm::stage2_tte::{invalid_ripas, map_size, RTT_PAGE_LEVEL};
use crate::realm::rd::RealmInfo;
use crate::rec::context::{get_reg, set_reg};
use crate::rec::Rec;
use crate::rmi;
use crate::rmi::error::Error;
use crate::rmi::rec::run::Run;
use crate::rsi::emulate_data_abort;
use crate::rsi::error::Error as RsiError;
use crate::Monitor;

use alloc::vec::Vec;

/// Stream ID reported to the host for the device the memory is handed to.
const DEV_MEM_STREAM_ID: u64 = 31;

/// Why a span could not be pinned.
enum PinError {
    Rsi(RsiError),
    /// The walk for `ipa` stopped above the page level.
    Abort { ipa: usize, level: usize },
}

/// Hands the realm memory backing `[ipa, ipa + count granules)` to or back
/// from a device through the granule protection service.
///
/// x1 = IPA, x2 = 1 to give the memory to the device, x3 = granule count.
/// The call always exits to the host with reason DEV_MEM so it can update
/// the SMMU, unless a granule of the span is not mapped yet.
pub fn do_dev_mem(
    _arg: &[usize],
    ret: &mut [usize],
    rmm: &Monitor,
    rec: &mut Rec,
    run: &mut Run,
) -> Result<(), Error> {
    let ipa = get_reg(rec, 1)? & GRANULE_MASK;
    let delegate = get_reg(rec, 2)? != 0;
    let count = get_reg(rec, 3)?;
    let realm = *rec.realm();

    let result = match check_span(&realm, ipa, count) {
        Err(e) => Err(e),
        Ok(()) => {
            // RD lock is held while the span is pinned
            let _rd = rmm.granules.lock_unconditional(rec.owner(), GranuleState::RD);

            match pin_span(rmm, &realm, ipa, count) {
                Ok(granules) => mark_span(rmm, &granules, ipa, delegate),
                Err(PinError::Rsi(e)) => Err(e),
                Err(PinError::Abort { ipa: at, level }) => {
                    emulate_data_abort(rec, run, at, level);
                    ret[0] = rmi::SUCCESS;
                    return Ok(());
                }
            }
        }
    };

    let status = match result {
        Ok(()) => crate::rsi::SUCCESS,
        Err(e) => {
            warn!("DEV_MEM {:X} x {} failed: {:?}", ipa, count, e);
            e.into()
        }
    };

    set_reg(rec, 0, status)?;
    rec.context.advance_pc();

    run.set_exit_reason(rmi::EXIT_DEV_MEM);
    run.set_gpr(1, ipa as u64);
    run.set_gpr(2, ipa as u64);
    run.set_gpr(3, DEV_MEM_STREAM_ID);
    ret[0] = rmi::SUCCESS;
    Ok(())
}

fn check_span(realm: &RealmInfo, ipa: usize, count: usize) -> Result<(), RsiError> {
    if count == 0 || count > MAX_DEV_MEM_GRANULES {
        return Err(RsiError::Input);
    }
    if !realm.addr_in_par(ipa) {
        return Err(RsiError::Input);
    }
    match ipa.checked_add((count - 1) * GRANULE_SIZE) {
        Some(last) if realm.addr_in_par(last) => Ok(()),
        _ => Err(RsiError::Input),
    }
}

/// Locks every data granule of the span, in IPA order.
fn pin_span<'a>(
    rmm: &'a Monitor,
    realm: &RealmInfo,
    base: usize,
    count: usize,
) -> Result<Vec<GranuleGuard<'a>>, PinError> {
    let mut granules = Vec::with_capacity(count);

    for i in 0..count {
        let ipa = base + i * GRANULE_SIZE;
        let walk = walk_realm(&rmm.granules, realm, ipa, RTT_PAGE_LEVEL);
        let s2tte = walk.entry();

        if !s2tte.is_valid(walk.level) {
            if s2tte.get_ripas() == invalid_ripas::EMPTY {
                return Err(PinError::Rsi(RsiError::Input));
            }
            return Err(PinError::Abort {
                ipa,
                level: walk.level,
            });
        }

        let pa = s2tte.pa(walk.level) + (ipa & (map_size(walk.level) - 1));
        granules.push(rmm.granules.lock_unconditional(pa, GranuleState::Data));
    }
    Ok(granules)
}

/// Asks EL3 to change the protection of the pinned span.
///
/// Giving memory to a device marks the first granule only and the service
/// extends it over the device's window. Taking it back goes granule by
/// granule. Any failure fails the whole call.
fn mark_span(
    rmm: &Monitor,
    granules: &[GranuleGuard<'_>],
    base: usize,
    delegate: bool,
) -> Result<(), RsiError> {
    for (i, granule) in granules.iter().enumerate() {
        let ipa = base + i * GRANULE_SIZE;
        if let Err(e) = rmm.gpt.mark_secure_device(granule.addr(), delegate, ipa) {
            error!("mark_secure_device {:X} failed: {:?}", granule.addr(), e);
            return Err(RsiError::Input);
        }
        if delegate {
            break;
        }
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use super::check_span;
    use crate::granule::GRANULE_SIZE;
    use crate::realm::rd::RealmInfo;

    fn realm() -> RealmInfo {
        RealmInfo {
            ipa_bits: 40,
            s2_starting_level: 1,
            ..Default::default()
        }
    }

    #[test]
    fn span_must_stay_in_par() {
        let par_end = 1 << 39;
        assert!(check_span(&realm(), 0, 512).is_ok());
        assert!(check_span(&realm(), par_end - GRANULE_SIZE, 1).is_ok());
        assert!(check_span(&realm(), par_end - GRANULE_SIZE, 2).is_err());
        assert!(check_span(&realm(), 0, 0).is_err());
        assert!(check_span(&realm(), 0, 513).is_err());
    }

    #[test]
    fn wrapping_span_is_rejected() {
        assert!(check_span(&realm(), 0xFFFF_FFFF_FFFF_F000, 2).is_err());
        assert!(check_span(&realm(), 0xFFFF_FFFF_FFFF_F000, 1).is_err());
    }
}
