use crate::asm::{smc, SMC_SUCCESS};
use crate::event::Mainloop;
use crate::granule::GranuleState;
use crate::listen;
use crate::rmi;
use crate::rmi::error::Error;

extern crate alloc;

// defined in trusted-firmware-a/include/services/rmmd_svc.h
const MARK_REALM: usize = 0xc400_01b0;
const MARK_NONSECURE: usize = 0xc400_01b1;
// device assignment extension of the EL3 access-control service
const MARK_SECURE_DEV: usize = 0xc400_01b2;
const ATTACH_DEV: usize = 0xc400_01b3;

/// Status returned by EL3 when a request is refused.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GptError(pub usize);

/// The physical address space controller at EL3.
pub trait GranuleProtection: Send + Sync {
    fn mark_realm(&self, addr: usize) -> Result<(), GptError>;
    fn mark_nonsecure(&self, addr: usize) -> Result<(), GptError>;
    /// Moves a realm device page into (`delegate`) or out of the secure
    /// device space. `ipa` is where the realm maps it.
    fn mark_secure_device(&self, addr: usize, delegate: bool, ipa: usize) -> Result<(), GptError>;
    /// Attaches the device described by the descriptor at `addr`.
    fn attach_device(&self, addr: usize) -> Result<(), GptError>;
}

/// Forwards every request to EL3 through an SMC.
pub struct El3Gpt;

fn check(ret: [usize; 8]) -> Result<(), GptError> {
    match ret[0] {
        SMC_SUCCESS => Ok(()),
        code => Err(GptError(code)),
    }
}

impl GranuleProtection for El3Gpt {
    fn mark_realm(&self, addr: usize) -> Result<(), GptError> {
        check(smc(MARK_REALM, &[addr]))
    }

    fn mark_nonsecure(&self, addr: usize) -> Result<(), GptError> {
        check(smc(MARK_NONSECURE, &[addr]))
    }

    fn mark_secure_device(&self, addr: usize, delegate: bool, ipa: usize) -> Result<(), GptError> {
        check(smc(MARK_SECURE_DEV, &[addr, delegate as usize, ipa]))
    }

    fn attach_device(&self, addr: usize) -> Result<(), GptError> {
        check(smc(ATTACH_DEV, &[addr]))
    }
}

pub fn set_event_handler(mainloop: &mut Mainloop) {
    listen!(mainloop, rmi::GRANULE_DELEGATE, |arg, _, rmm| {
        let addr = arg[0];
        let granule = rmm.granules.lock(addr, GranuleState::Undelegated)?;

        if let Err(e) = rmm.gpt.mark_realm(addr) {
            // EL3 refuses addresses the host does not own; the host gets Input.
            warn!("delegating {:X} refused by EL3: {:?}", addr, e);
            return Err(Error::RmiErrorInput);
        }

        granule.unlock_transition(GranuleState::Delegated);
        Ok(())
    });

    listen!(mainloop, rmi::GRANULE_UNDELEGATE, |arg, _, rmm| {
        let addr = arg[0];
        let mut granule = rmm.granules.lock(addr, GranuleState::Delegated)?;

        // nothing the realm world wrote may leak to the host
        granule.zeroize();
        if let Err(e) = rmm.gpt.mark_nonsecure(addr) {
            panic!(
                "A delegated granule should only be undelegated on request from RMM. {:X} {:?}",
                addr, e
            );
        }

        granule.unlock_transition(GranuleState::Undelegated);
        Ok(())
    });
}

#[cfg(test)]
mod test {
    use crate::granule::GranuleState;
    use crate::rmi::error::Error;
    use crate::rmi::{GRANULE_DELEGATE, GRANULE_UNDELEGATE, SUCCESS};
    use crate::test_utils::*;

    use core::sync::atomic::Ordering;

    #[test]
    fn delegate_undelegate_round_trip() {
        let mem = TestMemory::new(2);
        let (monitor, mock) = mock_monitor_with(&mem);
        let addr = mem.granule(1);
        unsafe { *(addr as *mut u64) = 0x1234 };

        let ret = rmi::<GRANULE_DELEGATE>(&monitor, &[addr]);
        assert_eq!(ret[0], SUCCESS);
        assert!(monitor.granules.lock(addr, GranuleState::Delegated).is_ok());

        // a delegated granule cannot be delegated again
        let ret = rmi::<GRANULE_DELEGATE>(&monitor, &[addr]);
        assert_eq!(ret[0], usize::from(Error::RmiErrorInput));

        let ret = rmi::<GRANULE_UNDELEGATE>(&monitor, &[addr]);
        assert_eq!(ret[0], SUCCESS);
        let g = monitor.granules.lock(addr, GranuleState::Undelegated).unwrap();
        assert_eq!(g.refcount(), 0);
        assert_eq!(unsafe { *(addr as *const u64) }, 0);
        drop(g);

        assert_eq!(
            mock.gpt_log(),
            [GptCall::Realm(addr), GptCall::NonSecure(addr)]
        );
    }

    #[test]
    fn refused_delegation_leaves_the_granule_alone() {
        let mem = TestMemory::new(1);
        let (monitor, mock) = mock_monitor_with(&mem);
        let addr = mem.granule(0);

        mock.gpt_fail.store(true, Ordering::Relaxed);
        let ret = rmi::<GRANULE_DELEGATE>(&monitor, &[addr]);
        assert_eq!(ret[0], usize::from(Error::RmiErrorInput));
        assert!(monitor.granules.lock(addr, GranuleState::Undelegated).is_ok());

        // untracked address
        let ret = rmi::<GRANULE_DELEGATE>(&monitor, &[0x10]);
        assert_eq!(ret[0], usize::from(Error::RmiErrorInput));
    }
}
