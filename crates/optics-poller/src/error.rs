use std::fmt;

pub type PollerResult<T, E = PollerError> = Result<T, E>;

/// Errors surfaced by the poller's own plumbing. Per-lens and per-backend
/// failures never reach here — they are logged and skipped in place,
/// keeping one bad lens or backend from failing a whole poll round.
#[derive(Debug)]
pub enum PollerError {
    Io(std::io::Error),
    Optics(optics_core::OpticsError),
    /// `add_backend` was called past the bounded backend count.
    TooManyBackends,
}

impl fmt::Display for PollerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PollerError::Io(err) => write!(f, "{err}"),
            PollerError::Optics(err) => write!(f, "{err}"),
            PollerError::TooManyBackends => write!(f, "poller already has the maximum number of backends"),
        }
    }
}

impl std::error::Error for PollerError {}

impl From<std::io::Error> for PollerError {
    fn from(err: std::io::Error) -> Self {
        PollerError::Io(err)
    }
}

impl From<optics_core::OpticsError> for PollerError {
    fn from(err: optics_core::OpticsError) -> Self {
        PollerError::Optics(err)
    }
}
