use optics_region::RegionError;
use std::fmt;

pub type LensResult<T, E = LensError> = Result<T, E>;

/// Errors surfaced by the lens substrate. Most are a thin wrapper over
/// [`RegionError`] since a lens operation's only real failure modes are
/// running out of region/allocator capacity or a caller-side type mismatch.
#[derive(Debug)]
pub enum LensError {
    Region(RegionError),
    /// A typed operation was attempted against a lens of a different type.
    WrongType { expected: crate::LensType, actual: crate::LensType },
    /// A lens name did not fit within `NAME_MAX` bytes including its
    /// terminator.
    NameTooLong { name: String },
    /// A histogram was allocated with a bucket-edge list that was empty,
    /// too long, or not strictly increasing.
    InvalidBuckets { reason: String },
}

impl fmt::Display for LensError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LensError::Region(err) => write!(f, "{err}"),
            LensError::WrongType { expected, actual } => {
                write!(f, "lens type mismatch: expected {expected:?}, found {actual:?}")
            }
            LensError::NameTooLong { name } => {
                write!(f, "lens name '{name}' exceeds the name length limit")
            }
            LensError::InvalidBuckets { reason } => {
                write!(f, "invalid histogram bucket edges: {reason}")
            }
        }
    }
}

impl std::error::Error for LensError {}

impl From<RegionError> for LensError {
    fn from(err: RegionError) -> Self {
        LensError::Region(err)
    }
}
