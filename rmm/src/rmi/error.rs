#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    RmiErrorInput,
    RmiErrorRealm,
    RmiErrorRec,
    /// Carries the level at which the RTT walk stopped.
    RmiErrorRtt(usize),
    RmiErrorInUse,
    RmiErrorCount,
    //// The below are our-defined errors not in the RMI status codes
    RmiErrorOthers(InternalError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InternalError {
    NotExistRealm,
    NotExistRec,
    WalkAborted,
}

impl Error {
    pub fn status(&self) -> usize {
        match self {
            Error::RmiErrorInput => 1,
            Error::RmiErrorRealm => 2,
            Error::RmiErrorRec => 3,
            Error::RmiErrorRtt(_) => 4,
            Error::RmiErrorInUse => 5,
            Error::RmiErrorCount => 6,
            Error::RmiErrorOthers(_) => 7,
        }
    }

    pub fn index(&self) -> usize {
        match self {
            Error::RmiErrorRtt(level) => *level,
            _ => 0,
        }
    }
}

impl From<Error> for usize {
    fn from(err: Error) -> Self {
        err.status() | (err.index() << 8)
    }
}
