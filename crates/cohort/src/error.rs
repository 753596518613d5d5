//! Error types shared by the worker and serializer engines.
//!
//! The two interesting cases are the submission-after-shutdown sentinel
//! [`Error::Closed`] and the re-entrant-wait sentinel
//! [`Error::WouldDeadlock`]; both are compared by value in caller code. The
//! remaining variants surface internal failures that are unreachable in
//! normal operation but are reported as errors rather than panics.

use std::sync::{MutexGuard, PoisonError};

pub type Result<T> = core::result::Result<T, Error>;

/// Unified error type for all engines in this crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// The engine has been shut down by a call to `wait`; no further
    /// submissions are accepted.
    #[error("engine has been closed by a call to wait")]
    Closed,

    /// `wait` was invoked from inside `integrate`; completing it would
    /// deadlock the engine, so it fails instead.
    #[error("wait called from integrate; would deadlock")]
    WouldDeadlock,

    /// A thread panicked while holding the engine lock.
    #[error("engine lock poisoned")]
    LockPoisoned,

    /// An engine thread disconnected mid-conversation.
    #[error("engine thread disconnected")]
    Disconnected,
}

// Convert all poisoned lock errors to a simplified `LockPoisoned`
impl<T> From<PoisonError<MutexGuard<'_, T>>> for Error {
    fn from(_: PoisonError<MutexGuard<'_, T>>) -> Self {
        Error::LockPoisoned
    }
}
