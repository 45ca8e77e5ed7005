//! Lease coordination between worker threads and the pool scheduler.
//!
//! A bounded worker pool cannot afford to lose a slot to a thread that is
//! merely waiting for a lock. The [`LeaseCoordinator`] contract lets a
//! blocking primitive tell the scheduler that a thread is about to park, so
//! capacity can be compensated for the duration, and lets the primitive
//! refuse callers that are not registered participants of the pool.
//!
//! [`LeaseRegistry`] is the in-crate coordinator: it tracks which threads
//! are registered workers, carries per-worker cancellation flags, and
//! brackets blocking sections with caller-supplied callbacks. It does no
//! capacity accounting of its own; compensation policy belongs to the pool
//! that installs the callbacks.
//!
//! # Example
//!
//! ```
//! use worklock::LeaseRegistry;
//!
//! let registry = LeaseRegistry::new();
//! let worker = registry.register();
//! assert_eq!(registry.worker_count(), 1);
//! drop(worker);
//! assert_eq!(registry.worker_count(), 0);
//! ```

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, ThreadId};

use parking_lot::Mutex;

use crate::error::LockError;
use crate::synchronizer::Synchronizer;

/// Scheduler-facing contract consumed by blocking primitives.
///
/// Implementations must execute blocking sections exactly once,
/// synchronously, on the calling thread, and must pair every "blocked"
/// notification with a "resumed" notification on all exit paths,
/// including panics.
pub trait LeaseCoordinator: Send + Sync {
    /// Returns true if `thread` is a registered worker of the managed pool.
    fn is_worker(&self, thread: ThreadId) -> bool;

    /// Returns true if cancellation has been requested for `thread`.
    ///
    /// Blocking waits cannot be interrupted from outside, so primitives
    /// poll this flag from their wait loops. Unknown threads report false.
    fn cancellation_requested(&self, thread: ThreadId) -> bool;

    /// Runs `section` on the calling thread inside a blocked/resumed
    /// bracket, so the pool can substitute other work for the duration.
    ///
    /// The section's error is propagated unchanged.
    fn run_blocking_section(
        &self,
        section: &mut dyn FnMut() -> Result<(), LockError>,
    ) -> Result<(), LockError>;
}

/// Hooks invoked when a registered worker parks in and resumes from a
/// blocking section.
#[derive(Clone, Default)]
pub struct RegistryOptions {
    /// Called just before a worker enters a blocking section.
    pub on_worker_blocked: Option<Arc<dyn Fn() + Send + Sync>>,
    /// Called after a worker leaves a blocking section.
    pub on_worker_resumed: Option<Arc<dyn Fn() + Send + Sync>>,
}

impl fmt::Debug for RegistryOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegistryOptions")
            .field("on_worker_blocked", &self.on_worker_blocked.is_some())
            .field("on_worker_resumed", &self.on_worker_resumed.is_some())
            .finish()
    }
}

/// Tracks which threads are registered workers of a managed pool.
///
/// Cloning is cheap; clones share the same registration table.
#[derive(Clone)]
pub struct LeaseRegistry {
    inner: Arc<RegistryInner>,
}

struct RegistryInner {
    /// Registered workers, keyed by thread identity.
    workers: Mutex<HashMap<ThreadId, WorkerEntry>>,
    /// Workers currently parked in blocking sections.
    blocked: AtomicUsize,
    options: RegistryOptions,
}

struct WorkerEntry {
    cancelled: Arc<AtomicBool>,
}

impl LeaseRegistry {
    /// Creates an empty registry with no capacity hooks.
    #[must_use]
    pub fn new() -> Self {
        Self::with_options(RegistryOptions::default())
    }

    /// Creates an empty registry with the given capacity hooks.
    #[must_use]
    pub fn with_options(options: RegistryOptions) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                workers: Mutex::new(HashMap::new()),
                blocked: AtomicUsize::new(0),
                options,
            }),
        }
    }

    /// Registers the calling thread as a worker of the managed pool.
    ///
    /// The registration lasts until the returned guard is dropped.
    ///
    /// # Panics
    ///
    /// Panics if the calling thread is already registered.
    pub fn register(&self) -> WorkerRegistration {
        let thread = thread::current().id();
        let cancelled = Arc::new(AtomicBool::new(false));
        {
            let mut workers = self.inner.workers.lock();
            assert!(
                !workers.contains_key(&thread),
                "thread is already registered as a worker"
            );
            workers.insert(
                thread,
                WorkerEntry {
                    cancelled: Arc::clone(&cancelled),
                },
            );
        }
        tracing::debug!(thread = ?thread, "worker registered");
        WorkerRegistration {
            inner: Arc::clone(&self.inner),
            thread,
            cancelled,
        }
    }

    /// Number of currently registered workers.
    #[must_use]
    pub fn worker_count(&self) -> usize {
        self.inner.workers.lock().len()
    }

    /// Number of workers currently parked in blocking sections.
    #[must_use]
    pub fn blocked_workers(&self) -> usize {
        self.inner.blocked.load(Ordering::Relaxed)
    }

    /// Creates a lock whose waiters coordinate through this registry.
    #[must_use]
    pub fn synchronizer(&self) -> Synchronizer {
        Synchronizer::new(Arc::new(self.clone()))
    }
}

impl Default for LeaseRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for LeaseRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LeaseRegistry")
            .field("workers", &self.worker_count())
            .field("blocked", &self.blocked_workers())
            .finish()
    }
}

impl LeaseCoordinator for LeaseRegistry {
    fn is_worker(&self, thread: ThreadId) -> bool {
        self.inner.workers.lock().contains_key(&thread)
    }

    fn cancellation_requested(&self, thread: ThreadId) -> bool {
        self.inner
            .workers
            .lock()
            .get(&thread)
            .is_some_and(|entry| entry.cancelled.load(Ordering::Acquire))
    }

    fn run_blocking_section(
        &self,
        section: &mut dyn FnMut() -> Result<(), LockError>,
    ) -> Result<(), LockError> {
        self.inner.blocked.fetch_add(1, Ordering::Relaxed);
        if let Some(hook) = &self.inner.options.on_worker_blocked {
            hook();
        }
        tracing::trace!(thread = ?thread::current().id(), "worker entered blocking section");
        let _resume = ResumeOnDrop { inner: &self.inner };
        section()
    }
}

/// Closes the blocked/resumed bracket even if the section panics.
struct ResumeOnDrop<'a> {
    inner: &'a RegistryInner,
}

impl Drop for ResumeOnDrop<'_> {
    fn drop(&mut self) {
        self.inner.blocked.fetch_sub(1, Ordering::Relaxed);
        if let Some(hook) = &self.inner.options.on_worker_resumed {
            hook();
        }
        tracing::trace!(thread = ?thread::current().id(), "worker left blocking section");
    }
}

/// The calling thread's registration with a [`LeaseRegistry`].
///
/// Deregisters the thread when dropped.
pub struct WorkerRegistration {
    inner: Arc<RegistryInner>,
    thread: ThreadId,
    cancelled: Arc<AtomicBool>,
}

impl WorkerRegistration {
    /// Identity of the registered thread.
    #[must_use]
    pub fn thread(&self) -> ThreadId {
        self.thread
    }

    /// Handle for cancelling this worker's pending blocking waits from
    /// another thread.
    #[must_use]
    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle {
            cancelled: Arc::clone(&self.cancelled),
        }
    }
}

impl Drop for WorkerRegistration {
    fn drop(&mut self) {
        self.inner.workers.lock().remove(&self.thread);
        tracing::debug!(thread = ?self.thread, "worker deregistered");
    }
}

impl fmt::Debug for WorkerRegistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerRegistration")
            .field("thread", &self.thread)
            .finish()
    }
}

/// Requests cancellation of a worker's pending blocking waits.
///
/// Cancellation is soft: the flag is observed by waiters from their wait
/// loops. It aborts waits, never ownership already held.
#[derive(Clone)]
pub struct CancelHandle {
    cancelled: Arc<AtomicBool>,
}

impl CancelHandle {
    /// Requests cancellation.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    /// Returns true if cancellation has been requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

impl fmt::Debug for CancelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancelHandle")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}
