use optics_lens::{LensError, LensType};
use optics_region::RegionError;
use std::fmt;

pub type OpticsResult<T, E = OpticsError> = Result<T, E>;

/// Errors surfaced by the region facade. Most wrap a lower-layer error; a
/// few (`Busy`, `DuplicateKey`, `AllocExhausted`) are caller-contract
/// outcomes rather than bugs, and callers that care can match on them.
#[derive(Debug)]
pub enum OpticsError {
    Region(RegionError),
    /// A name argument (prefix, host, source, or lens name) did not fit
    /// within `NAME_MAX` bytes including its terminator.
    NameTooLong { name: String },
    /// A caller-supplied argument violated a precondition (e.g. a
    /// histogram's bucket edges were not strictly increasing).
    InvalidArgument { reason: String },
    /// A typed operation was attempted against a lens of a different type.
    WrongType { expected: LensType, actual: LensType },
    /// The region could not grow to satisfy an allocation; lens creation
    /// fails, but existing record/read operations are unaffected.
    AllocExhausted,
    /// `alloc` found a lens already registered under that name.
    DuplicateKey { name: String },
    /// A distribution's slot lock was held at poll time; the poller should
    /// skip this lens for the current round.
    Busy,
}

impl fmt::Display for OpticsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OpticsError::Region(err) => write!(f, "{err}"),
            OpticsError::NameTooLong { name } => write!(f, "name '{name}' exceeds the name length limit"),
            OpticsError::InvalidArgument { reason } => write!(f, "invalid argument: {reason}"),
            OpticsError::WrongType { expected, actual } => {
                write!(f, "lens type mismatch: expected {expected:?}, found {actual:?}")
            }
            OpticsError::AllocExhausted => write!(f, "region allocation exhausted"),
            OpticsError::DuplicateKey { name } => write!(f, "a lens named '{name}' already exists"),
            OpticsError::Busy => write!(f, "lens is busy"),
        }
    }
}

impl std::error::Error for OpticsError {}

impl From<RegionError> for OpticsError {
    fn from(err: RegionError) -> Self {
        OpticsError::Region(err)
    }
}

impl From<LensError> for OpticsError {
    fn from(err: LensError) -> Self {
        match err {
            LensError::Region(err) => OpticsError::Region(err),
            LensError::WrongType { expected, actual } => OpticsError::WrongType { expected, actual },
            LensError::NameTooLong { name } => OpticsError::NameTooLong { name },
            LensError::InvalidBuckets { reason } => OpticsError::InvalidArgument { reason },
        }
    }
}
