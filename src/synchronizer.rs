//! Exclusive locking that cooperates with the pool scheduler.
//!
//! [`Synchronizer`] is an exclusive-access lock for the threads of a
//! bounded worker pool. An uncontended acquisition is a plain state update;
//! a contended one parks inside the lease coordinator's blocking section,
//! so the scheduler can compensate the pool for the suspended thread
//! instead of stalling.
//!
//! # Protocol
//!
//! - Callers must be registered workers; anything else is rejected before
//!   lock state is touched.
//! - Reentrant acquisition is an error, not a deadlock.
//! - Ownership is released on every exit path of
//!   [`Synchronizer::with_lock`], including a panicking action.
//! - Release wakes all waiters; whichever wins the re-check race takes
//!   ownership. No ordering among waiters is guaranteed.
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

use std::fmt;
use std::sync::Arc;
use std::thread::{self, ThreadId};
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use crate::error::LockError;
use crate::lease::LeaseCoordinator;

/// How often a parked waiter re-checks its cancellation flag.
const CANCEL_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// An exclusive lock whose waiters coordinate with the pool scheduler.
///
/// One instance protects one resource and is shared by all of that
/// resource's callers, typically for the resource's whole lifetime.
pub struct Synchronizer {
    leases: Arc<dyn LeaseCoordinator>,
    /// Current holder; `None` when unlocked. `unlocked` is bound to this
    /// mutex and no other; state checks and waits must go through it.
    owner: Mutex<Option<ThreadId>>,
    unlocked: Condvar,
}

impl Synchronizer {
    /// Creates an unlocked synchronizer backed by `leases`.
    #[must_use]
    pub fn new(leases: Arc<dyn LeaseCoordinator>) -> Self {
        Self {
            leases,
            owner: Mutex::new(None),
            unlocked: Condvar::new(),
        }
    }

    /// Runs `action` under exclusive ownership of this synchronizer and
    /// returns its value.
    ///
    /// Ownership is released on every exit path, including when `action`
    /// panics. An action that fails by value surfaces its failure through
    /// the returned `T` after the lock has been released.
    ///
    /// # Errors
    ///
    /// - [`LockError::NotAWorker`] if the calling thread is not registered
    ///   with the lease coordinator; `action` does not run.
    /// - [`LockError::AlreadyHeld`] if the calling thread already owns this
    ///   synchronizer; `action` does not run and the outer ownership is
    ///   unaffected.
    /// - [`LockError::Cancelled`] if cancellation was requested while
    ///   waiting for ownership; `action` does not run.
    pub fn with_lock<T>(&self, action: impl FnOnce() -> T) -> Result<T, LockError> {
        self.take_ownership()?;
        let _release = ReleaseOwnership { lock: self };
        Ok(action())
    }

    /// Returns true if some thread currently holds the lock.
    #[must_use]
    pub fn is_locked(&self) -> bool {
        self.owner.lock().is_some()
    }

    fn take_ownership(&self) -> Result<(), LockError> {
        let current = thread::current().id();
        if !self.leases.is_worker(current) {
            return Err(LockError::NotAWorker);
        }
        {
            let mut owner = self.owner.lock();
            match *owner {
                None => {
                    *owner = Some(current);
                    return Ok(());
                }
                Some(holder) if holder == current => return Err(LockError::AlreadyHeld),
                Some(_) => {}
            }
        }
        // Contended: park inside the coordinator's blocking section so the
        // pool can substitute other work while this thread waits.
        tracing::trace!(thread = ?current, "lock contended, entering blocking section");
        self.leases
            .run_blocking_section(&mut || self.wait_for_ownership(current))
    }

    /// Wait loop executed inside the blocking section.
    ///
    /// Waits on the condvar bound to the `owner` mutex. The bounded wait
    /// exists only to re-poll the cancellation flag; ownership handoff
    /// itself is driven by `release_ownership`'s notification.
    fn wait_for_ownership(&self, current: ThreadId) -> Result<(), LockError> {
        let mut owner = self.owner.lock();
        while owner.is_some() {
            if self.leases.cancellation_requested(current) {
                tracing::debug!(thread = ?current, "wait for lock cancelled");
                return Err(LockError::Cancelled);
            }
            let _ = self.unlocked.wait_for(&mut owner, CANCEL_POLL_INTERVAL);
        }
        *owner = Some(current);
        Ok(())
    }

    fn release_ownership(&self) {
        let mut owner = self.owner.lock();
        *owner = None;
        // Wake every waiter; the winner of the re-check race takes over.
        self.unlocked.notify_all();
    }
}

impl fmt::Debug for Synchronizer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Synchronizer")
            .field("owner", &*self.owner.lock())
            .finish_non_exhaustive()
    }
}

/// Releases ownership when dropped, so a panicking action still unlocks.
struct ReleaseOwnership<'a> {
    lock: &'a Synchronizer,
}

impl Drop for ReleaseOwnership<'_> {
    fn drop(&mut self) {
        self.lock.release_ownership();
    }
}
