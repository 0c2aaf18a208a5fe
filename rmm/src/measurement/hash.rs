use sha2::{Digest, Sha256, Sha512};

use crate::measurement::MeasurementError;
use crate::rmi::{HASH_ALGO_SHA256, HASH_ALGO_SHA512};

pub enum HashWrapper {
    Sha256(Sha256),
    Sha512(Sha512),
}

impl HashWrapper {
    pub fn hash(&mut self, data: impl AsRef<[u8]>) {
        match self {
            HashWrapper::Sha256(h) => h.update(data.as_ref()),
            HashWrapper::Sha512(h) => h.update(data.as_ref()),
        }
    }

    pub fn hash_u8(&mut self, data: u8) {
        self.hash(data.to_le_bytes());
    }

    pub fn hash_u64(&mut self, data: u64) {
        self.hash(data.to_le_bytes());
    }

    pub fn hash_usize(&mut self, data: usize) {
        self.hash(data.to_le_bytes());
    }

    fn finish(self, out: &mut [u8]) -> Result<(), MeasurementError> {
        let write = |digest: &[u8], out: &mut [u8]| {
            if out.len() < digest.len() {
                return Err(MeasurementError::OutputBufferTooSmall);
            }
            out.fill(0);
            out[..digest.len()].copy_from_slice(digest);
            Ok(())
        };

        match self {
            HashWrapper::Sha256(h) => write(h.finalize().as_slice(), out),
            HashWrapper::Sha512(h) => write(h.finalize().as_slice(), out),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Hasher {
    Sha256,
    Sha512,
}

impl Hasher {
    pub fn from_hash_algo(hash_algo: u8) -> Result<Self, MeasurementError> {
        match hash_algo {
            HASH_ALGO_SHA256 => Ok(Hasher::Sha256),
            HASH_ALGO_SHA512 => Ok(Hasher::Sha512),
            _ => Err(MeasurementError::InvalidHashAlgorithmValue(hash_algo)),
        }
    }

    pub fn output_size(&self) -> usize {
        match self {
            Hasher::Sha256 => 32,
            Hasher::Sha512 => 64,
        }
    }

    pub fn hash_fields_into(
        &self,
        mut out: impl AsMut<[u8]>,
        f: impl FnOnce(&mut HashWrapper),
    ) -> Result<(), MeasurementError> {
        let mut wrapper = match self {
            Hasher::Sha256 => HashWrapper::Sha256(Sha256::new()),
            Hasher::Sha512 => HashWrapper::Sha512(Sha512::new()),
        };
        f(&mut wrapper);
        wrapper.finish(out.as_mut())
    }

    pub fn hash_object_into(
        &self,
        obj: &dyn Hashable,
        mut out: impl AsMut<[u8]>,
    ) -> Result<(), MeasurementError> {
        obj.hash(self, out.as_mut())
    }
}

pub trait Hashable {
    fn hash(&self, hasher: &Hasher, out: &mut [u8]) -> Result<(), MeasurementError>;
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::measurement::Measurement;

    #[test]
    fn sha256_known_answer() {
        let mut out = Measurement::empty();
        let hasher = Hasher::from_hash_algo(HASH_ALGO_SHA256).unwrap();
        hasher.hash_fields_into(&mut out, |h| h.hash(b"abc")).unwrap();

        assert_eq!(
            &out.as_slice()[..4],
            &[0xba, 0x78, 0x16, 0xbf],
        );
        assert!(out.as_slice()[32..].iter().all(|b| *b == 0));
    }

    #[test]
    fn sha512_fills_the_slot() {
        let mut out = Measurement::empty();
        let hasher = Hasher::from_hash_algo(HASH_ALGO_SHA512).unwrap();
        hasher.hash_fields_into(&mut out, |h| h.hash(b"abc")).unwrap();

        assert_eq!(&out.as_slice()[..4], &[0xdd, 0xaf, 0x35, 0xa1]);
        assert_eq!(hasher.output_size(), 64);
    }

    #[test]
    fn unknown_algorithm() {
        assert_eq!(
            Hasher::from_hash_algo(2),
            Err(MeasurementError::InvalidHashAlgorithmValue(2))
        );
    }
}
