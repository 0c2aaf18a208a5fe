use crate::granule::{GranuleTable, GRANULE_MASK};
use crate::rec::context::{get_reg, set_reg};
use crate::rec::Rec;
use crate::rmi;
use crate::rmi::error::Error;
use crate::rmi::rec::run::Run;
use crate::rsi;
use crate::rsi::{emulate_data_abort, with_realm_page};
use crate::Monitor;

pub const HOST_CALL_NR_GPRS: usize = 7;

/// The realm's HOST_CALL argument block: `imm` at 0 and the gprs at 8,
/// padded to 0x100 bytes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct HostCall {
    pub imm: u16,
    pub gprs: [u64; HOST_CALL_NR_GPRS],
}

const GPRS_OFFSET: usize = 8;

impl HostCall {
    pub const SIZE: usize = 0x100;

    pub fn parse(buf: &[u8]) -> Self {
        let mut host_call = Self {
            imm: u16::from_le_bytes([buf[0], buf[1]]),
            ..Default::default()
        };
        for (gpr, chunk) in host_call
            .gprs
            .iter_mut()
            .zip(buf[GPRS_OFFSET..].chunks_exact(8))
        {
            let mut bytes = [0u8; 8];
            bytes.copy_from_slice(chunk);
            *gpr = u64::from_le_bytes(bytes);
        }
        host_call
    }

    pub fn write_gprs(buf: &mut [u8], gprs: &[u64]) {
        for (chunk, gpr) in buf[GPRS_OFFSET..]
            .chunks_exact_mut(8)
            .zip(gprs.iter().take(HOST_CALL_NR_GPRS))
        {
            chunk.copy_from_slice(&gpr.to_le_bytes());
        }
    }
}

pub fn do_host_call(
    _arg: &[usize],
    ret: &mut [usize],
    rmm: &Monitor,
    rec: &mut Rec,
    run: &mut Run,
) -> Result<(), Error> {
    let ipa = get_reg(rec, 1)?;
    let realm = *rec.realm();

    // an aligned block never crosses a granule boundary
    if ipa % HostCall::SIZE != 0 || !realm.addr_in_par(ipa) {
        set_reg(rec, 0, rsi::ERROR_INPUT)?;
        ret[0] = rmi::SUCCESS_REC_ENTER;
        return Ok(());
    }

    let offset = ipa & !GRANULE_MASK;
    let res = with_realm_page(&rmm.granules, &realm, ipa, |page| {
        HostCall::parse(&page[offset..offset + HostCall::SIZE])
    });

    match res {
        Ok(host_call) => {
            trace!("HOST_CALL param: {:#X?}", host_call);
            run.set_exit_reason(rmi::EXIT_HOST_CALL);
            run.set_imm(host_call.imm);
            for (i, gpr) in host_call.gprs.iter().enumerate() {
                run.set_gpr(i, *gpr);
            }
            rec.set_host_call_pending(true);
            rec.context.advance_pc();
        }
        Err(level) => emulate_data_abort(rec, run, ipa, level),
    }

    ret[0] = rmi::SUCCESS;
    Ok(())
}

/// Copies the host's answer to a pending HOST_CALL into the realm's block.
///
/// Returns false when the block is no longer mapped. The REC then goes
/// back to the host with an emulated data abort and the call stays pending.
pub fn complete_host_call(granules: &GranuleTable, rec: &mut Rec, run: &mut Run) -> Result<bool, Error> {
    let ipa = get_reg(rec, 1)?;
    let realm = *rec.realm();
    let offset = ipa & !GRANULE_MASK;
    let gprs = run.entry_gprs();

    let res = with_realm_page(granules, &realm, ipa, |page| {
        HostCall::write_gprs(&mut page[offset..offset + HostCall::SIZE], &gprs[..HOST_CALL_NR_GPRS]);
    });

    match res {
        Ok(()) => {
            set_reg(rec, 0, rsi::SUCCESS)?;
            rec.set_host_call_pending(false);
            Ok(true)
        }
        Err(level) => {
            emulate_data_abort(rec, run, ipa, level);
            Ok(false)
        }
    }
}
