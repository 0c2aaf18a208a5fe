use super::{
    Hashable, Hasher, Measurement, MeasurementError, MEASUREMENTS_SLOT_NR, MEASUREMENTS_SLOT_RIM,
    MEASURE_DESC_TYPE_DATA, MEASURE_DESC_TYPE_REC, MEASURE_DESC_TYPE_RIPAS, RMI_MEASURE_CONTENT,
};
use crate::realm::rd::Rd;

/// Extends the measurements of a locked RD.
pub struct HashContext<'a> {
    hasher: Hasher,
    rd: &'a mut Rd,
}

impl<'a> HashContext<'a> {
    pub fn new(rd: &'a mut Rd) -> Result<Self, MeasurementError> {
        Ok(Self {
            hasher: Hasher::from_hash_algo(rd.hash_algo())?,
            rd,
        })
    }

    fn extend(
        &mut self,
        index: usize,
        f: impl FnOnce(&Hasher, Measurement, &mut Measurement) -> Result<(), MeasurementError>,
    ) -> Result<(), MeasurementError> {
        if index >= MEASUREMENTS_SLOT_NR {
            return Err(MeasurementError::InvalidMeasurementIndex(index));
        }
        let old = self.rd.measurements[index];
        f(&self.hasher, old, &mut self.rd.measurements[index])
    }

    pub fn measure_realm_create(&mut self, params: &dyn Hashable) -> Result<(), MeasurementError> {
        self.extend(MEASUREMENTS_SLOT_RIM, |hasher, _, rim| {
            hasher.hash_object_into(params, rim)
        })
    }

    pub fn extend_measurement(&mut self, buffer: &[u8], index: usize) -> Result<(), MeasurementError> {
        self.extend(index, |hasher, old, current| {
            hasher.hash_fields_into(current, |h| {
                h.hash(&old.as_slice()[0..hasher.output_size()]);
                h.hash(buffer);
            })
        })
    }

    pub fn measure_data_granule(
        &mut self,
        data: &[u8],
        ipa: usize,
        flags: usize,
    ) -> Result<(), MeasurementError> {
        let mut data_measurement = Measurement::empty();

        if flags & RMI_MEASURE_CONTENT != 0 {
            self.hasher
                .hash_fields_into(&mut data_measurement, |h| h.hash(data))?;
        }

        self.extend(MEASUREMENTS_SLOT_RIM, |hasher, oldrim, rim| {
            hasher.hash_fields_into(rim, |h| {
                h.hash_u8(MEASURE_DESC_TYPE_DATA); // desc type
                h.hash([0u8; 7]); // padding
                h.hash_u64(0x100); // desc struct size
                h.hash(oldrim); // old RIM value
                h.hash_usize(ipa); // ipa
                h.hash_usize(flags); // flags
                h.hash(data_measurement); // data granule hash
                h.hash([0u8; 0x100 - 0xa0]); // padding
            })
        })
    }

    pub fn measure_rec_params(&mut self, params: &dyn Hashable) -> Result<(), MeasurementError> {
        let mut params_measurement = Measurement::empty();
        self.hasher
            .hash_object_into(params, &mut params_measurement)?;

        self.extend(MEASUREMENTS_SLOT_RIM, |hasher, oldrim, rim| {
            hasher.hash_fields_into(rim, |h| {
                h.hash_u8(MEASURE_DESC_TYPE_REC); // desc type
                h.hash([0u8; 7]); // padding
                h.hash_u64(0x100); // desc struct size
                h.hash(oldrim); // old RIM value
                h.hash(params_measurement); // REC params hash
                h.hash([0u8; 0x100 - 0x90]); // padding
            })
        })
    }

    pub fn measure_ripas_granule(&mut self, ipa: usize, level: u8) -> Result<(), MeasurementError> {
        self.extend(MEASUREMENTS_SLOT_RIM, |hasher, oldrim, rim| {
            hasher.hash_fields_into(rim, |h| {
                h.hash_u8(MEASURE_DESC_TYPE_RIPAS); // desc type
                h.hash([0u8; 7]); // padding
                h.hash_u64(0x100); // desc struct size
                h.hash(oldrim); // old RIM value
                h.hash_usize(ipa); // ipa
                h.hash_u8(level); // level
                h.hash([0u8; 7]); // level's padding
                h.hash([0u8; 0xa0]); // padding to 0x100 size
            })
        })
    }
}
