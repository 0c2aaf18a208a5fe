use crate::measurement::{Measurement, MEASUREMENTS_SLOT_NR};

pub const CHALLENGE_SIZE: usize = 64;

/// Per-REC attestation progress, from ATTEST_TOKEN_INIT to the end of the
/// last ATTEST_TOKEN_CONTINUE.
#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct AttestState {
    pub in_progress: bool,
    pub challenge: [u8; CHALLENGE_SIZE],
    /// Owned by the token signer between two steps.
    pub progress: usize,
}

impl Default for AttestState {
    fn default() -> Self {
        Self {
            in_progress: false,
            challenge: [0; CHALLENGE_SIZE],
            progress: 0,
        }
    }
}

impl AttestState {
    pub fn start(&mut self, challenge: &[u8; CHALLENGE_SIZE]) {
        self.in_progress = true;
        self.challenge = *challenge;
        self.progress = 0;
    }

    pub fn finish(&mut self) {
        self.in_progress = false;
        self.progress = 0;
    }
}

/// Realm claims that go into a token.
pub struct Claims<'a> {
    pub challenge: &'a [u8; CHALLENGE_SIZE],
    pub measurements: &'a [Measurement; MEASUREMENTS_SLOT_NR],
    pub rpv: &'a [u8],
    pub hash_algo: u8,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TokenStep {
    Incomplete,
    /// The token was written to the output buffer, with this length.
    Complete(usize),
}

/// Realm token signer.
///
/// Each call performs a bounded amount of work so the caller can yield to
/// the host when an interrupt is pending.
pub trait Attestation: Send + Sync {
    fn continue_token(&self, progress: &mut usize, claims: &Claims<'_>, token: &mut [u8]) -> TokenStep;
}
