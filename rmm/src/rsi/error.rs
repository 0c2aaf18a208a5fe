use crate::measurement::MeasurementError;
use crate::rsi;

/// Failures reported to the realm in x0.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    Input,
    State,
    Incomplete,
}

impl From<Error> for usize {
    fn from(err: Error) -> Self {
        match err {
            Error::Input => rsi::ERROR_INPUT,
            Error::State => rsi::ERROR_STATE,
            Error::Incomplete => rsi::INCOMPLETE,
        }
    }
}

impl From<MeasurementError> for Error {
    fn from(err: MeasurementError) -> Self {
        warn!("measurement failed: {:?}", err);
        Error::Input
    }
}
