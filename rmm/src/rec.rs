pub mod context;
pub mod sea;

use self::context::Context;
use crate::config::MAX_REC_AUX_GRANULES;
use crate::granule::Content;
use crate::realm::rd::RealmInfo;
use crate::rsi::attestation::AttestState;

/// A RIPAS change requested by the realm and not yet fully applied by the
/// host through RTT_SET_RIPAS.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default)]
struct Ripas {
    base: usize,
    end: usize,
    addr: usize,
    value: u8,
}

/// Realm Execution Context, stored in a REC granule.
#[repr(C)]
pub struct Rec {
    /// PA of the RD of the realm which owns this REC.
    owner: usize,
    realm: RealmInfo,
    vcpuid: usize,
    mpidr: u64,
    runnable: bool,
    host_call_pending: bool,
    ripas: Ripas,
    num_aux: usize,
    aux: [usize; MAX_REC_AUX_GRANULES],
    pub context: Context,
    pub attest: AttestState,
}

impl Content for Rec {}

crate::const_assert_eq!((core::mem::size_of::<Rec>() <= crate::granule::GRANULE_SIZE), true);

impl Rec {
    #[allow(clippy::too_many_arguments)]
    pub fn init(
        &mut self,
        owner: usize,
        realm: RealmInfo,
        vcpuid: usize,
        mpidr: u64,
        flags: u64,
        context: Context,
        aux: &[usize],
    ) {
        let mut aux_granules = [0; MAX_REC_AUX_GRANULES];
        aux_granules[..aux.len()].copy_from_slice(aux);

        *self = Self {
            owner,
            realm,
            vcpuid,
            mpidr,
            runnable: false,
            host_call_pending: false,
            ripas: Ripas::default(),
            num_aux: aux.len(),
            aux: aux_granules,
            context,
            attest: AttestState::default(),
        };
        self.set_runnable(flags);
    }

    pub fn owner(&self) -> usize {
        self.owner
    }

    pub fn realm(&self) -> &RealmInfo {
        &self.realm
    }

    pub fn vcpuid(&self) -> usize {
        self.vcpuid
    }

    pub fn mpidr(&self) -> u64 {
        self.mpidr
    }

    pub fn runnable(&self) -> bool {
        self.runnable
    }

    pub fn set_runnable(&mut self, flags: u64) {
        const RUNNABLE_OFFSET: u64 = 1;
        self.runnable = flags & RUNNABLE_OFFSET != 0;
    }

    pub fn aux(&self) -> &[usize] {
        &self.aux[..self.num_aux]
    }

    pub fn host_call_pending(&self) -> bool {
        self.host_call_pending
    }

    pub fn set_host_call_pending(&mut self, val: bool) {
        self.host_call_pending = val;
    }

    pub fn set_ripas(&mut self, base: usize, end: usize, value: u8) {
        self.ripas = Ripas {
            base,
            end,
            addr: base,
            value,
        };
    }

    /// Whether an IPA_STATE_SET is waiting for its answer.
    pub fn ripas_pending(&self) -> bool {
        self.ripas.end != 0
    }

    pub fn clear_ripas(&mut self) {
        self.ripas = Ripas::default();
    }

    pub fn ripas_base(&self) -> usize {
        self.ripas.base
    }

    pub fn ripas_addr(&self) -> usize {
        self.ripas.addr
    }

    pub fn set_ripas_addr(&mut self, addr: usize) {
        self.ripas.addr = addr;
    }

    pub fn ripas_end(&self) -> usize {
        self.ripas.end
    }

    pub fn ripas_value(&self) -> u8 {
        self.ripas.value
    }

    /// The faulting IPA of the last stage 2 abort.
    pub fn fault_ipa(&self) -> usize {
        armv9a::HPFAR_EL2::new(self.context.sys_regs.hpfar).fault_ipa()
    }
}

impl core::fmt::Debug for Rec {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Rec")
            .field("owner", &format_args!("{:#X}", self.owner))
            .field("vcpuid", &self.vcpuid)
            .field("runnable", &self.runnable)
            .field("pc", &format_args!("{:#X}", self.context.elr_el2))
            .finish()
    }
}
