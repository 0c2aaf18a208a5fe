use crate::measurement::{HashContext, Measurement, MEASUREMENTS_SLOT_NR, MEASUREMENTS_SLOT_RIM};
use crate::realm::rd::Rd;
use crate::rsi::error::Error;

pub const MAX_EXTEND_SIZE: usize = 64;

pub fn read(rd: &Rd, index: usize, out: &mut Measurement) -> Result<(), Error> {
    let measurement = rd.measurements.get(index).ok_or(Error::Input)?;

    out.as_mut_slice().copy_from_slice(measurement.as_slice());
    Ok(())
}

/// Extends one of the REMs. The RIM is not reachable from the realm.
pub fn extend(rd: &mut Rd, index: usize, data: &[u8]) -> Result<(), Error> {
    if index == MEASUREMENTS_SLOT_RIM || index >= MEASUREMENTS_SLOT_NR {
        return Err(Error::Input);
    }
    if data.len() > MAX_EXTEND_SIZE {
        return Err(Error::Input);
    }

    HashContext::new(rd)?.extend_measurement(data, index)?;
    Ok(())
}
