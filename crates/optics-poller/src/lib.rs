//! The poller: the out-of-process collaborator that discovers regions,
//! advances their epochs, traverses their lens lists, normalizes rates, and
//! fans the results out to registered backends.

mod backend;
mod error;
mod poll;
mod poller;

pub use backend::Backend;
pub use error::{PollerError, PollerResult};
pub use poll::{normalize, Poll, PollValue};
pub use poller::{Poller, MAX_BACKENDS};
