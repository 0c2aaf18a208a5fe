use super::mpidr;
use crate::config::MAX_REC_AUX_GRANULES;
use crate::granule::GRANULE_SIZE;
use crate::measurement::{Hashable, Hasher, MeasurementError};
use crate::rmi::error::Error;

pub const NR_GPRS: usize = 8;

const PADDING: [usize; 5] = [248, 248, 248, 1216, 1912];

#[repr(C)]
#[derive(Clone, Copy)]
pub struct Params {
    pub flags: u64,
    pub(crate) padding0: [u8; PADDING[0]],
    pub mpidr: u64,
    pub(crate) padding1: [u8; PADDING[1]],
    pub pc: u64,
    pub(crate) padding2: [u8; PADDING[2]],
    pub gprs: [u64; NR_GPRS],
    pub(crate) padding3: [u8; PADDING[3]],
    pub num_aux: u64,
    pub aux: [u64; MAX_REC_AUX_GRANULES],
    pub(crate) padding4: [u8; PADDING[4]],
}

crate::const_assert_size!(Params, GRANULE_SIZE);
crate::const_assert_offset!(Params, mpidr, 0x100);
crate::const_assert_offset!(Params, pc, 0x200);
crate::const_assert_offset!(Params, gprs, 0x300);
crate::const_assert_offset!(Params, num_aux, 0x800);
crate::const_assert_offset!(Params, aux, 0x808);

impl Default for Params {
    fn default() -> Self {
        Self {
            flags: 0,
            padding0: [0; PADDING[0]],
            mpidr: 0,
            padding1: [0; PADDING[1]],
            pc: 0,
            padding2: [0; PADDING[2]],
            gprs: [0; NR_GPRS],
            padding3: [0; PADDING[3]],
            num_aux: 0,
            aux: [0; MAX_REC_AUX_GRANULES],
            padding4: [0; PADDING[4]],
        }
    }
}

impl core::fmt::Debug for Params {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Params")
            .field("flags", &format_args!("{:#X}", &self.flags))
            .field("mpidr", &format_args!("{:#X}", &self.mpidr))
            .field("pc", &format_args!("{:#X}", &self.pc))
            .field("gprs", &format_args!("{:#X?}", &self.gprs))
            .field("num_aux", &self.num_aux)
            .finish()
    }
}

// Only the entry state goes into the RIM: flags, pc and gprs. MPIDR and
// the aux granules are measured as zero.
impl Hashable for Params {
    fn hash(&self, hasher: &Hasher, out: &mut [u8]) -> Result<(), MeasurementError> {
        let measured = Params {
            flags: self.flags,
            pc: self.pc,
            gprs: self.gprs,
            ..Default::default()
        };
        // Safety: Params is repr(C) plain data of exactly one granule.
        let bytes = unsafe {
            core::slice::from_raw_parts(&measured as *const Params as *const u8, GRANULE_SIZE)
        };
        hasher.hash_fields_into(out, |h| h.hash(bytes))
    }
}

impl Params {
    pub fn aux(&self) -> &[u64] {
        &self.aux[..(self.num_aux as usize).min(MAX_REC_AUX_GRANULES)]
    }

    pub fn verify_compliance(&self, rec: usize, rd: usize) -> Result<(), Error> {
        trace!("{:?}", self);

        if self.num_aux as usize > MAX_REC_AUX_GRANULES || !mpidr::validate(self.mpidr) {
            return Err(Error::RmiErrorInput);
        }

        let aux = self.aux();
        for (i, addr) in aux.iter().enumerate() {
            let addr = *addr as usize;
            if addr == rec || addr == rd || aux[..i].contains(&(addr as u64)) {
                return Err(Error::RmiErrorInput);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn aux_list_is_checked() {
        let mut params = Params {
            num_aux: 2,
            ..Default::default()
        };
        params.aux[0] = 0x8800_2000;
        params.aux[1] = 0x8800_3000;
        assert!(params.verify_compliance(0x8800_0000, 0x8800_1000).is_ok());
        assert_eq!(params.aux().len(), 2);

        // aux must not alias the REC
        assert!(params.verify_compliance(0x8800_2000, 0x8800_1000).is_err());

        params.aux[1] = 0x8800_2000;
        assert!(params.verify_compliance(0x8800_0000, 0x8800_1000).is_err());

        params.num_aux = MAX_REC_AUX_GRANULES as u64 + 1;
        assert!(params.verify_compliance(0x8800_0000, 0x8800_1000).is_err());
    }

    #[test]
    fn mpidr_outside_affinity_fields() {
        let params = Params {
            mpidr: 0x10,
            ..Default::default()
        };
        assert!(params.verify_compliance(0x8800_0000, 0x8800_1000).is_err());
    }
}
