pub mod attestation;
pub mod constraint;
pub mod dev_mem;
pub mod error;
pub mod hostcall;
pub mod measurement;
pub mod ripas;
pub mod version;

use crate::define_interface;
use crate::event::{Context, RsiHandle};
use crate::exception::trap::syndrome::{Fault, Syndrome};
use crate::granule::{is_granule_aligned, GranuleState, GranuleTable, GRANULE_MASK};
use crate::host::DataPage;
use crate::listen;
use crate::measurement::Measurement;
use crate::realm::mm::rtt::realm_ipa_to_pa;
use crate::realm::rd::{Rd, RealmInfo};
use crate::rec::context::{get_reg, set_reg};
use crate::rec::Rec;
use crate::rmi;
use crate::rmi::rec::run::Run;
use crate::rsi::attestation::{AttestState, Claims, TokenStep, CHALLENGE_SIZE};
use crate::rsi::dev_mem::do_dev_mem;
use crate::rsi::hostcall::do_host_call;
use crate::rsi::ripas::{get_ripas_state, set_ripas_state};

use alloc::vec::Vec;

define_interface! {
    command {
        VERSION                 = 0xc400_0190,
        MEASUREMENT_READ        = 0xc400_0192,
        MEASUREMENT_EXTEND      = 0xc400_0193,
        ATTEST_TOKEN_INIT       = 0xc400_0194,
        ATTEST_TOKEN_CONTINUE   = 0xc400_0195,
        REALM_CONFIG            = 0xc400_0196,
        IPA_STATE_SET           = 0xc400_0197,
        IPA_STATE_GET           = 0xc400_0198,
        HOST_CALL               = 0xc400_0199,
        DEV_MEM                 = 0xc400_019a,
        SMCCC_VERSION           = 0x8000_0000,
    }
}

pub const SUCCESS: usize = 0;
pub const ERROR_INPUT: usize = 1;
pub const ERROR_STATE: usize = 2;
pub const INCOMPLETE: usize = 3;

/// Answer to a function ID the monitor does not implement, PSCI included.
pub const SMC_UNKNOWN: usize = !0;

pub const ABI_VERSION_MAJOR: usize = 12;
pub const ABI_VERSION_MINOR: usize = 0;

// SMCCC v1.2
pub const SMCCC_VERSION_NUMBER: usize = 0x1_0002;

extern crate alloc;

/// Builds the call context from the registers the realm trapped with.
pub fn context(rec: &Rec) -> Context {
    let cmd = rec.context.gp_regs[0] as usize;
    let mut ctx = Context::new(cmd);

    constraint::validate(cmd, |arg_num, _| {
        let args: Vec<usize> = rec.context.gp_regs[1..=arg_num]
            .iter()
            .map(|reg| *reg as usize)
            .collect();
        ctx.init_arg(&args);
    });
    ctx.resize_ret(1);
    ctx
}

/// Runs `f` on the realm granule that backs `ipa`.
///
/// The leaf table and the data granule stay locked while `f` runs. When
/// the IPA is not mapped, the level where the walk stopped is returned.
pub fn with_realm_page<T>(
    granules: &GranuleTable,
    realm: &RealmInfo,
    ipa: usize,
    f: impl FnOnce(&mut [u8]) -> T,
) -> Result<T, usize> {
    let (pa, _walk) = realm_ipa_to_pa(granules, realm, ipa)?;
    let mut data = granules.lock_unconditional(pa & GRANULE_MASK, GranuleState::Data);
    Ok(f(data.content_mut::<DataPage>().as_mut_slice()))
}

/// Reports a stage 2 translation fault on `ipa` to the host, as if the
/// realm had touched the unmapped page itself.
pub fn emulate_data_abort(rec: &mut Rec, run: &mut Run, ipa: usize, level: usize) {
    let esr: u64 = Syndrome::DataAbort(Fault::Translation { level: level as u8 }).into();
    let hpfar = ((ipa >> 12) << 4) as u64;

    rec.context.sys_regs.esr_el2 = esr;
    rec.context.sys_regs.far_el2 = 0;
    rec.context.sys_regs.hpfar = hpfar;

    run.set_exit_reason(rmi::EXIT_SYNC);
    run.set_esr(esr);
    run.set_far(0);
    run.set_hpfar(hpfar);
}

pub fn set_event_handler(rsi: &mut RsiHandle) {
    listen!(rsi, SMCCC_VERSION, |_arg, ret, _rmm, rec, _| {
        set_reg(rec, 0, SMCCC_VERSION_NUMBER)?;
        ret[0] = rmi::SUCCESS_REC_ENTER;
        Ok(())
    });

    listen!(rsi, VERSION, |_arg, ret, _rmm, rec, _| {
        let version = version::encode_version();
        set_reg(rec, 0, version)?;

        trace!("RSI_ABI_VERSION: {:#X?}", version);
        ret[0] = rmi::SUCCESS_REC_ENTER;
        Ok(())
    });

    listen!(rsi, ATTEST_TOKEN_INIT, |_arg, ret, _rmm, rec, _| {
        let mut challenge = [0u8; CHALLENGE_SIZE];

        for i in 0..8 {
            let challenge_part = get_reg(rec, i + 1)?;
            let start_idx = i * 8;
            let end_idx = start_idx + 8;
            challenge[start_idx..end_idx].copy_from_slice(&challenge_part.to_le_bytes());
        }

        rec.attest.start(&challenge);

        set_reg(rec, 0, SUCCESS)?;
        ret[0] = rmi::SUCCESS_REC_ENTER;
        Ok(())
    });

    listen!(rsi, ATTEST_TOKEN_CONTINUE, |_arg, ret, rmm, rec, run| {
        ret[0] = rmi::SUCCESS_REC_ENTER;

        if !rec.attest.in_progress {
            warn!("Calling attest token continue without init");
            set_reg(rec, 0, ERROR_STATE)?;
            return Ok(());
        }

        let ipa = get_reg(rec, 1)?;
        let realm = *rec.realm();
        if !is_granule_aligned(ipa) || !realm.addr_in_par(ipa) {
            warn!("Wrong ipa passed {:X}", ipa);
            set_reg(rec, 0, ERROR_INPUT)?;
            return Ok(());
        }

        loop {
            let step = {
                let rd_granule = rmm.granules.lock_unconditional(rec.owner(), GranuleState::RD);
                let rd = rd_granule.content::<Rd>();
                let AttestState {
                    challenge, progress, ..
                } = &mut rec.attest;
                let claims = Claims {
                    challenge,
                    measurements: &rd.measurements,
                    rpv: rd.personalization_value(),
                    hash_algo: rd.hash_algo(),
                };
                with_realm_page(&rmm.granules, &realm, ipa, |token| {
                    rmm.attestation
                        .continue_token(progress, &claims, token)
                })
            };

            match step {
                Ok(TokenStep::Complete(len)) => {
                    rec.attest.finish();
                    set_reg(rec, 0, SUCCESS)?;
                    set_reg(rec, 1, len)?;
                    return Ok(());
                }
                Ok(TokenStep::Incomplete) => {
                    if rmm.cpu.irq_pending() {
                        // the realm retries the call once the host is done
                        run.set_exit_reason(rmi::EXIT_IRQ);
                        ret[0] = rmi::SUCCESS;
                        return Ok(());
                    }
                }
                Err(level) => {
                    emulate_data_abort(rec, run, ipa, level);
                    ret[0] = rmi::SUCCESS;
                    return Ok(());
                }
            }
        }
    });

    listen!(rsi, HOST_CALL, do_host_call);

    listen!(rsi, MEASUREMENT_READ, |_arg, ret, rmm, rec, _| {
        let index = get_reg(rec, 1)?;
        let mut measurement = Measurement::empty();
        ret[0] = rmi::SUCCESS_REC_ENTER;

        let res = {
            let rd_granule = rmm.granules.lock_unconditional(rec.owner(), GranuleState::RD);
            measurement::read(rd_granule.content::<Rd>(), index, &mut measurement)
        };
        if let Err(e) = res {
            warn!("Wrong index passed: {}", index);
            set_reg(rec, 0, e.into())?;
            return Ok(());
        }

        set_reg(rec, 0, SUCCESS)?;
        for (ind, chunk) in measurement
            .as_slice()
            .chunks_exact(core::mem::size_of::<usize>())
            .enumerate()
        {
            let mut bytes = [0u8; core::mem::size_of::<usize>()];
            bytes.copy_from_slice(chunk);
            set_reg(rec, ind + 1, usize::from_le_bytes(bytes))?;
        }
        Ok(())
    });

    listen!(rsi, MEASUREMENT_EXTEND, |_arg, ret, rmm, rec, _| {
        let index = get_reg(rec, 1)?;
        let size = get_reg(rec, 2)?;
        let mut buffer = [0u8; measurement::MAX_EXTEND_SIZE];
        ret[0] = rmi::SUCCESS_REC_ENTER;

        for i in 0..8 {
            buffer[i * 8..i * 8 + 8].copy_from_slice(get_reg(rec, i + 3)?.to_le_bytes().as_slice());
        }

        if size > buffer.len() {
            warn!("Wrong buffer size passed: {}", size);
            set_reg(rec, 0, ERROR_INPUT)?;
            return Ok(());
        }

        let res = {
            let mut rd_granule = rmm.granules.lock_unconditional(rec.owner(), GranuleState::RD);
            measurement::extend(rd_granule.content_mut::<Rd>(), index, &buffer[..size])
        };
        let status = match res {
            Ok(()) => SUCCESS,
            Err(e) => {
                warn!("Wrong index passed: {}", index);
                e.into()
            }
        };
        set_reg(rec, 0, status)?;
        Ok(())
    });

    listen!(rsi, REALM_CONFIG, |_arg, ret, rmm, rec, run| {
        let config_ipa = get_reg(rec, 1)?;
        let realm = *rec.realm();
        ret[0] = rmi::SUCCESS_REC_ENTER;

        if !is_granule_aligned(config_ipa) || !realm.addr_in_par(config_ipa) {
            set_reg(rec, 0, ERROR_INPUT)?;
            return Ok(());
        }

        // struct realm_config { ipa_width: u64, .. }
        let res = with_realm_page(&rmm.granules, &realm, config_ipa, |page| {
            page[..8].copy_from_slice(&(realm.ipa_bits as u64).to_le_bytes());
        });

        match res {
            Ok(()) => set_reg(rec, 0, SUCCESS)?,
            Err(level) => {
                emulate_data_abort(rec, run, config_ipa, level);
                ret[0] = rmi::SUCCESS;
            }
        }
        Ok(())
    });

    listen!(rsi, IPA_STATE_GET, get_ripas_state);
    listen!(rsi, IPA_STATE_SET, set_ripas_state);
    listen!(rsi, DEV_MEM, do_dev_mem);
}
