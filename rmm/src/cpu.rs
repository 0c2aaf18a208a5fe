#[cfg(target_arch = "aarch64")]
use crate::config::NUM_OF_CPU_PER_CLUSTER;
use crate::rec::Rec;

#[cfg(target_arch = "aarch64")]
use aarch64_cpu::registers::*;

/// How the realm left EL1/EL0.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExitKind {
    Sync,
    Irq,
    Fiq,
    SError,
    Unknown,
}

/// Syndrome captured by the EL2 vectors when the realm traps.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RealmExit {
    pub kind: ExitKind,
    pub esr: u64,
    pub far: u64,
    pub hpfar: u64,
}

impl RealmExit {
    pub fn sync(esr: u64, far: u64, hpfar: u64) -> Self {
        Self {
            kind: ExitKind::Sync,
            esr,
            far,
            hpfar,
        }
    }
}

/// The PE-level side of running a REC.
///
/// Implementations restore the REC's register state, enter the realm on the
/// current PE and return when it traps back to EL2.
pub trait RealmCpu: Send + Sync {
    fn run(&self, rec: &mut Rec, vttbr: u64) -> RealmExit;

    /// Whether a physical IRQ is pending for this PE.
    fn irq_pending(&self) -> bool {
        armv9a::is_irq_pending()
    }

    /// Lazy FP/SIMD switch on an FP access trap.
    fn switch_fpu(&self, rec: &mut Rec);
}

#[cfg(target_arch = "aarch64")]
pub fn get_cpu_id() -> usize {
    let (cluster, core) = id();
    cluster * NUM_OF_CPU_PER_CLUSTER + core
}

#[cfg(not(target_arch = "aarch64"))]
pub fn get_cpu_id() -> usize {
    0
}

#[cfg(target_arch = "aarch64")]
#[inline(always)]
pub fn id() -> (usize, usize) {
    (
        MPIDR_EL1.read(MPIDR_EL1::Aff2) as usize,
        MPIDR_EL1.read(MPIDR_EL1::Aff1) as usize,
    )
}
