extern crate std;

use crate::config::MAX_REC_AUX_GRANULES;
use crate::cpu::{ExitKind, RealmCpu, RealmExit};
use crate::granule::{GranuleTable, GRANULE_SIZE};
use crate::realm::mm::stage2_translation::InvalidateTlb;
use crate::rec::Rec;
use crate::rmi::gpt::{GptError, GranuleProtection};
use crate::rmi::realm::params::Params;
use crate::rmi::rec::params::Params as RecParams;
use crate::realm::mm::stage2_tte::addr_level_mask;
use crate::rmi::{GRANULE_DELEGATE, REALM_CREATE, REC_CREATE, RTT_CREATE, SUCCESS};
use crate::rsi::attestation::{Attestation, Claims, TokenStep};
use crate::Monitor;

use alloc::boxed::Box;
use alloc::collections::VecDeque;
use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;
use core::ops::Range;
use core::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use spin::mutex::Mutex;

pub const TEST_IPA_BITS: usize = 40;
pub const TEST_LEVEL_START: usize = 1;
/// Two concatenated tables resolve 40 bits from level 1.
pub const TEST_NUM_ROOTS: usize = 2;
pub const TEST_VMID: u16 = 7;
pub const TEST_REC_PC: u64 = 0x8000_0000;

/// Granule aligned scratch memory standing in for DRAM.
pub struct TestMemory {
    _buf: Vec<u8>,
    base: usize,
    len: usize,
    next: AtomicUsize,
    table: GranuleTable,
}

impl TestMemory {
    pub fn new(granules: usize) -> Self {
        let buf = vec![0u8; (granules + 1) * GRANULE_SIZE];
        let base = (buf.as_ptr() as usize + GRANULE_SIZE - 1) & !(GRANULE_SIZE - 1);
        let range = base..base + granules * GRANULE_SIZE;
        Self {
            _buf: buf,
            base,
            len: granules,
            next: AtomicUsize::new(0),
            table: GranuleTable::new(&[range]),
        }
    }

    pub fn granule(&self, idx: usize) -> usize {
        assert!(idx < self.len);
        self.base + idx * GRANULE_SIZE
    }

    pub fn range(&self) -> Range<usize> {
        self.base..self.base + self.len * GRANULE_SIZE
    }

    /// A table of its own, for tests that do not go through a monitor.
    pub fn table(&self) -> &GranuleTable {
        &self.table
    }

    pub fn alloc_granule(&self) -> usize {
        self.alloc_granules(1)
    }

    /// `count` contiguous granules.
    pub fn alloc_granules(&self, count: usize) -> usize {
        let idx = self.next.fetch_add(count, Ordering::Relaxed);
        self.granule(idx + count - 1);
        self.granule(idx)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GptCall {
    Realm(usize),
    NonSecure(usize),
    SecureDevice(usize, bool, usize),
    Attach(usize),
}

/// What the platform collaborators saw, and what they should do next.
#[derive(Default)]
pub struct MockState {
    gpt: Mutex<Vec<GptCall>>,
    pub gpt_fail: AtomicBool,
    tlbi: Mutex<Vec<(u16, usize, usize)>>,
    exits: Mutex<VecDeque<(RealmExit, Vec<(usize, u64)>)>>,
    runs: AtomicUsize,
    pub irq_pending: AtomicBool,
    pub fpu_switches: AtomicUsize,
    /// Token steps that report `Incomplete` before the token is done.
    pub attest_steps: AtomicUsize,
}

impl MockState {
    pub fn gpt_log(&self) -> Vec<GptCall> {
        self.gpt.lock().clone()
    }

    /// (vmid, ipa, granule count) of every invalidation.
    pub fn tlbi_log(&self) -> Vec<(u16, usize, usize)> {
        self.tlbi.lock().clone()
    }

    /// Queues an exit. `regs` are written into the REC's GPRs before the
    /// exit is reported, as if the realm had set them.
    pub fn script(&self, exit: RealmExit, regs: &[(usize, u64)]) {
        self.exits.lock().push_back((exit, regs.to_vec()));
    }

    pub fn runs(&self) -> usize {
        self.runs.load(Ordering::Relaxed)
    }

    fn gpt_call(&self, call: GptCall) -> Result<(), GptError> {
        self.gpt.lock().push(call);
        match self.gpt_fail.load(Ordering::Relaxed) {
            true => Err(GptError(1)),
            false => Ok(()),
        }
    }
}

pub struct Mock(Arc<MockState>);

impl GranuleProtection for Mock {
    fn mark_realm(&self, addr: usize) -> Result<(), GptError> {
        self.0.gpt_call(GptCall::Realm(addr))
    }

    fn mark_nonsecure(&self, addr: usize) -> Result<(), GptError> {
        self.0.gpt_call(GptCall::NonSecure(addr))
    }

    fn mark_secure_device(&self, addr: usize, delegate: bool, ipa: usize) -> Result<(), GptError> {
        self.0.gpt_call(GptCall::SecureDevice(addr, delegate, ipa))
    }

    fn attach_device(&self, addr: usize) -> Result<(), GptError> {
        self.0.gpt_call(GptCall::Attach(addr))
    }
}

impl InvalidateTlb for Mock {
    fn invalidate_ipas(&self, vmid: u16, ipa: usize, count: usize) {
        self.0.tlbi.lock().push((vmid, ipa, count));
    }
}

impl RealmCpu for Mock {
    fn run(&self, rec: &mut Rec, _vttbr: u64) -> RealmExit {
        self.0.runs.fetch_add(1, Ordering::Relaxed);
        match self.0.exits.lock().pop_front() {
            Some((exit, regs)) => {
                for (idx, val) in regs {
                    rec.context.gp_regs[idx] = val;
                }
                exit
            }
            // nothing scripted: the host's timer fires
            None => RealmExit {
                kind: ExitKind::Irq,
                esr: 0,
                far: 0,
                hpfar: 0,
            },
        }
    }

    fn irq_pending(&self) -> bool {
        self.0.irq_pending.load(Ordering::Relaxed)
    }

    fn switch_fpu(&self, _rec: &mut Rec) {
        self.0.fpu_switches.fetch_add(1, Ordering::Relaxed);
    }
}

pub const TEST_TOKEN: &[u8] = b"realm-token";

impl Attestation for Mock {
    fn continue_token(&self, progress: &mut usize, _claims: &Claims<'_>, token: &mut [u8]) -> TokenStep {
        if *progress < self.0.attest_steps.load(Ordering::Relaxed) {
            *progress += 1;
            return TokenStep::Incomplete;
        }
        token[..TEST_TOKEN.len()].copy_from_slice(TEST_TOKEN);
        TokenStep::Complete(TEST_TOKEN.len())
    }
}

pub fn mock_monitor_with(mem: &TestMemory) -> (Monitor, Arc<MockState>) {
    let state = Arc::new(MockState::default());
    let monitor = Monitor::new(
        GranuleTable::new(&[mem.range()]),
        Box::new(Mock(state.clone())),
        Box::new(Mock(state.clone())),
        Box::new(Mock(state.clone())),
        Box::new(Mock(state.clone())),
    );
    (monitor, state)
}

pub fn mock_monitor(mem: &TestMemory) -> Monitor {
    mock_monitor_with(mem).0
}

pub fn rmi<const COMMAND: usize>(monitor: &Monitor, args: &[usize]) -> [usize; 5] {
    monitor.handle_rmi(COMMAND, args)
}

pub fn extract_bits(value: usize, start: u32, end: u32) -> usize {
    let num_bits = end - start + 1;
    let mask = if num_bits == usize::BITS {
        usize::MAX
    } else {
        (1 << num_bits) - 1
    };
    (value >> start) & mask
}

pub fn delegate(monitor: &Monitor, addr: usize) {
    let ret = rmi::<GRANULE_DELEGATE>(monitor, &[addr]);
    assert_eq!(ret[0], SUCCESS);
}

/// Fills the host's REALM_CREATE parameter granule with the test layout.
pub fn write_params(params_ptr: usize, rtt_base: usize, f: impl FnOnce(&mut Params)) {
    let mut params = Params {
        features_0: TEST_IPA_BITS as u64,
        vmid: TEST_VMID,
        rtt_base: rtt_base as u64,
        rtt_level_start: TEST_LEVEL_START as i64,
        rtt_num_start: TEST_NUM_ROOTS as u32,
        ..Default::default()
    };
    f(&mut params);
    unsafe { core::ptr::write(params_ptr as *mut Params, params) };
}

pub struct TestRealm {
    pub rd: usize,
    pub rtt_base: usize,
}

impl TestRealm {
    pub fn roots(&self) -> impl Iterator<Item = usize> + '_ {
        (0..TEST_NUM_ROOTS).map(move |i| self.rtt_base + i * GRANULE_SIZE)
    }
}

pub fn realm_create_with(
    monitor: &Monitor,
    mem: &TestMemory,
    f: impl FnOnce(&mut Params),
) -> TestRealm {
    let rd = mem.alloc_granule();
    let rtt_base = mem.alloc_granules(TEST_NUM_ROOTS);
    let params = mem.alloc_granule();

    delegate(monitor, rd);
    for i in 0..TEST_NUM_ROOTS {
        delegate(monitor, rtt_base + i * GRANULE_SIZE);
    }
    write_params(params, rtt_base, f);

    let ret = rmi::<REALM_CREATE>(monitor, &[rd, params]);
    assert_eq!(ret[0], SUCCESS);
    TestRealm { rd, rtt_base }
}

pub fn realm_create(monitor: &Monitor, mem: &TestMemory) -> TestRealm {
    realm_create_with(monitor, mem, |_| ())
}

pub struct RecSetup {
    pub rec: usize,
    pub params: usize,
    pub aux: Vec<usize>,
}

pub fn write_rec_params(params_ptr: usize, mpidr: u64, aux: &[usize]) {
    let mut params = RecParams {
        flags: 1,
        mpidr,
        pc: TEST_REC_PC,
        num_aux: aux.len() as u64,
        ..Default::default()
    };
    for (i, addr) in aux.iter().enumerate() {
        params.aux[i] = *addr as u64;
    }
    unsafe { core::ptr::write(params_ptr as *mut RecParams, params) };
}

/// A delegated REC granule, its aux granules and the parameters to create
/// it with `mpidr`.
pub fn rec_prepare(monitor: &Monitor, mem: &TestMemory, mpidr: u64) -> RecSetup {
    let rec = mem.alloc_granule();
    delegate(monitor, rec);

    let aux: Vec<usize> = (0..MAX_REC_AUX_GRANULES)
        .map(|_| {
            let addr = mem.alloc_granule();
            delegate(monitor, addr);
            addr
        })
        .collect();

    let params = mem.alloc_granule();
    write_rec_params(params, mpidr, &aux);
    RecSetup { rec, params, aux }
}

pub fn rec_create(monitor: &Monitor, mem: &TestMemory, realm: &TestRealm, mpidr: u64) -> usize {
    let setup = rec_prepare(monitor, mem, mpidr);
    let ret = rmi::<REC_CREATE>(monitor, &[setup.rec, realm.rd, setup.params]);
    assert_eq!(ret[0], SUCCESS);
    setup.rec
}

/// Delegates a fresh granule and links it as the table at (`ipa`, `level`).
pub fn rtt_create(monitor: &Monitor, mem: &TestMemory, realm: &TestRealm, ipa: usize, level: usize) -> usize {
    let rtt = mem.alloc_granule();
    delegate(monitor, rtt);
    let ipa = addr_level_mask(ipa as u64, level - 1) as usize;
    let ret = rmi::<RTT_CREATE>(monitor, &[rtt, realm.rd, ipa, level]);
    assert_eq!(ret[0], SUCCESS);
    rtt
}

/// Level 2 and level 3 tables down to the page at `ipa`.
pub fn rtt_create_page_tables(
    monitor: &Monitor,
    mem: &TestMemory,
    realm: &TestRealm,
    ipa: usize,
) -> (usize, usize) {
    let l2 = rtt_create(monitor, mem, realm, ipa, 2);
    let l3 = rtt_create(monitor, mem, realm, ipa, 3);
    (l2, l3)
}
