//! Error types for lock acquisition.
//!
//! Every failure maps to a distinct variant so callers and tests can
//! discriminate cause. Nothing here is retried or swallowed internally;
//! each error surfaces to the immediate caller of
//! [`Synchronizer::with_lock`](crate::Synchronizer::with_lock).

/// Errors surfaced when taking ownership of a [`Synchronizer`](crate::Synchronizer).
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum LockError {
    /// The calling thread is not registered as a worker of the managed pool.
    ///
    /// Raised before any lock state is touched; the coordinator's blocking
    /// section is never entered.
    #[error("the current thread is not registered as a worker thread")]
    NotAWorker,

    /// The calling thread already holds this lock.
    ///
    /// Reentrant acquisition is not supported. The outer ownership is
    /// unaffected and still released normally.
    #[error("the current thread already holds this lock")]
    AlreadyHeld,

    /// Cancellation was requested while waiting for ownership.
    ///
    /// No ownership was taken, so no cleanup is required; the current
    /// holder and other waiters are unaffected.
    #[error("cancelled while waiting for the lock")]
    Cancelled,
}
