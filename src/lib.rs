//! Worklock: worker-lease-aware exclusive locking for bounded thread pools.
//!
//! # Overview
//!
//! A bounded worker pool deadlocks easily when its own threads block on
//! ordinary locks: a parked thread still occupies a pool slot, and the work
//! that would release the lock may never be admitted. Worklock's
//! [`Synchronizer`] keeps the scheduler in the loop: an uncontended
//! acquisition is a plain state update, while a contended one parks inside
//! the [`LeaseCoordinator`]'s blocking section, so the pool knows the slot
//! is free to compensate for the duration of the wait.
//!
//! # Core guarantees
//!
//! - **Exclusive access**: at most one thread runs the protected action at
//!   a time per [`Synchronizer`] instance.
//! - **Release on every exit path**: normal return, error value, or panic —
//!   the lock never stays held by a finished action.
//! - **No silent worker loss**: waiting happens inside the coordinator's
//!   blocking section, never in a bare park the scheduler cannot see.
//! - **Typed failures**: non-worker callers, reentrant acquisition, and
//!   cancelled waits each surface as a distinct [`LockError`] variant.
//!
//! # Example
//!
//! ```
//! use worklock::LeaseRegistry;
//!
//! let registry = LeaseRegistry::new();
//! let lock = registry.synchronizer();
//!
//! let _worker = registry.register();
//! let value = lock.with_lock(|| 41 + 1)?;
//! assert_eq!(value, 42);
//! # Ok::<(), worklock::LockError>(())
//! ```
//!
//! # Module structure
//!
//! - [`error`]: lock error taxonomy
//! - [`lease`]: scheduler contract and the in-crate lease registry
//! - [`synchronizer`]: the exclusive lock
//! - [`test_utils`]: tracing-based logging helpers for tests

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_const_for_fn)]

pub mod error;
pub mod lease;
pub mod synchronizer;
pub mod test_utils;

pub use error::LockError;
pub use lease::{
    CancelHandle, LeaseCoordinator, LeaseRegistry, RegistryOptions, WorkerRegistration,
};
pub use synchronizer::Synchronizer;
