#![no_std]
#![warn(rust_2018_idioms)]

pub mod asm;
pub mod config;
pub mod cpu;
pub mod event;
pub mod exception;
pub mod granule;
pub mod host;
pub mod logger;
pub mod measurement;
pub mod realm;
pub mod rec;
pub mod rmi;
pub mod rsi;
pub mod rtt;
#[macro_use]
pub mod r#macro;
#[cfg(test)]
pub mod test_utils;

extern crate alloc;

#[macro_use]
extern crate lazy_static;

#[macro_use]
extern crate log;

use crate::cpu::RealmCpu;
use crate::event::{Mainloop, RsiHandle};
use crate::granule::GranuleTable;
use crate::realm::mm::stage2_translation::InvalidateTlb;
use crate::realm::vmid::VmidPool;
use crate::rmi::gpt::GranuleProtection;
use crate::rsi::attestation::Attestation;

use alloc::boxed::Box;

/// Everything an RMI or RSI handler may touch.
///
/// The platform supplies the collaborators that reach outside the core:
/// the granule protection service at EL3, TLB maintenance, the realm
/// execution primitive and the attestation token signer.
pub struct Monitor {
    pub granules: GranuleTable,
    pub vmids: VmidPool,
    pub gpt: Box<dyn GranuleProtection>,
    pub tlb: Box<dyn InvalidateTlb>,
    pub cpu: Box<dyn RealmCpu>,
    pub attestation: Box<dyn Attestation>,
    pub rmi: Mainloop,
    pub rsi: RsiHandle,
}

impl Monitor {
    pub fn new(
        granules: GranuleTable,
        gpt: Box<dyn GranuleProtection>,
        tlb: Box<dyn InvalidateTlb>,
        cpu: Box<dyn RealmCpu>,
        attestation: Box<dyn Attestation>,
    ) -> Self {
        Self {
            granules,
            vmids: VmidPool::new(),
            gpt,
            tlb,
            cpu,
            attestation,
            rmi: Mainloop::new(),
            rsi: RsiHandle::new(),
        }
    }

    /// Entry point for an SMC from the host: `cmd` is x0, `args` x1 onwards.
    /// The result goes back in x0..x4.
    pub fn handle_rmi(&self, cmd: usize, args: &[usize]) -> [usize; 5] {
        self.rmi.dispatch(self, cmd, args)
    }
}
