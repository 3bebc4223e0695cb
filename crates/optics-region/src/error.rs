use std::fmt;

/// Convenience result alias for fallible region operations.
pub type RegionResult<T, E = RegionError> = Result<T, E>;

/// Errors surfaced by the low-level region/mapping layer. Kept small and
/// hand-rolled rather than deriving `thiserror` the way the richer facade
/// crate above it does — this layer has nothing to attach a source location
/// or backend name to, just a handful of OS-boundary failures.
#[derive(Debug)]
pub enum RegionError {
    /// The region's logical name, once prefixed, does not fit the OS object
    /// naming limits.
    NameTooLong { name: String },
    /// Creating the backing object failed (already exists, permission, …).
    CreateFailed { name: String, source: std::io::Error },
    /// Opening an existing backing object failed (not found, permission, …).
    OpenFailed { name: String, source: std::io::Error },
    /// Growing the backing object or remapping it failed.
    GrowFailed { requested: usize, source: std::io::Error },
    /// `offset + len` exceeds the currently mapped length.
    OutOfRegion { offset: u64, len: usize, mapped_len: usize },
    /// Requested alignment was zero or not a power of two.
    InvalidAlignment { alignment: usize },
}

impl fmt::Display for RegionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegionError::NameTooLong { name } => {
                write!(f, "region name '{name}' exceeds the OS object name limit")
            }
            RegionError::CreateFailed { name, source } => {
                write!(f, "failed to create region '{name}': {source}")
            }
            RegionError::OpenFailed { name, source } => {
                write!(f, "failed to open region '{name}': {source}")
            }
            RegionError::GrowFailed { requested, source } => {
                write!(f, "failed to grow region by {requested} bytes: {source}")
            }
            RegionError::OutOfRegion { offset, len, mapped_len } => {
                write!(
                    f,
                    "offset {offset} + len {len} exceeds mapped length {mapped_len}"
                )
            }
            RegionError::InvalidAlignment { alignment } => {
                write!(f, "alignment {alignment} is not a nonzero power of two")
            }
        }
    }
}

impl std::error::Error for RegionError {}
