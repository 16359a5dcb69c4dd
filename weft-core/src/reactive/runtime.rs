//! Runtime Plumbing
//!
//! The reactive engine itself is synchronous. The runtime is the small set
//! of hooks it needs from the outside world:
//!
//! 1. A way to drive in-flight asynchronous work (effect continuations,
//!    loadable settlement, watcher resolution) without anyone awaiting it.
//!
//! 2. A delay primitive for `debounce`/`throttle`.
//!
//! 3. Process-unique ids for states, effects and subscriptions.
//!
//! # Executor
//!
//! Work is spawned with `tokio::task::spawn_local`, so anything that
//! suspends must run inside a tokio `LocalSet`. Purely synchronous use of
//! states and effects needs no runtime at all.

use std::cell::{Cell, RefCell};
use std::future::Future;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures::future::{AbortHandle, Abortable};
use tokio::time::Instant;

use super::scheduler::Scheduler;
use super::scope::Scope;
use super::State;

/// Counter shared by every id the engine hands out.
static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Entry points into the executor and clock.
pub struct Runtime;

impl Runtime {
    /// Allocate a new unique id.
    pub(crate) fn next_id() -> u64 {
        NEXT_ID.fetch_add(1, Ordering::Relaxed)
    }

    /// Spawn a local task, returning a handle that aborts it.
    ///
    /// Dropping the handle does not abort the task.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio `LocalSet`.
    pub fn spawn<F>(future: F) -> AbortHandle
    where
        F: Future<Output = ()> + 'static,
    {
        let (handle, registration) = AbortHandle::new_pair();
        tokio::task::spawn_local(Abortable::new(future, registration));
        handle
    }

    /// Wait for the given delay.
    pub async fn sleep(delay: Duration) {
        tokio::time::sleep(delay).await;
    }

    /// The current instant on the runtime clock.
    ///
    /// Follows tokio's paused clock in tests.
    pub fn now() -> Instant {
        Instant::now()
    }

    /// Run `f` with change notifications held back until it returns.
    ///
    /// Dependents are brought up to date and listeners notified once, after
    /// the outermost batch ends.
    pub fn batch<R>(f: impl FnOnce() -> R) -> R {
        Scheduler::batch(f)
    }

    /// Check if a state is currently being evaluated.
    pub fn is_tracking() -> bool {
        Scope::is_active()
    }

    /// The state currently being evaluated, if any.
    pub fn current_state() -> Option<State> {
        Scope::current()
    }
}

struct Task {
    handle: AbortHandle,
    finished: Rc<Cell<bool>>,
}

/// Background tasks owned by one component.
///
/// Finished tasks are forgotten on the next spawn.
#[derive(Default)]
pub(crate) struct TaskSet {
    tasks: RefCell<Vec<Task>>,
}

impl TaskSet {
    /// Spawn `future`, tracking it until it finishes.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio `LocalSet`.
    pub(crate) fn spawn<F>(&self, future: F)
    where
        F: Future<Output = ()> + 'static,
    {
        let finished = Rc::new(Cell::new(false));
        let flag = Rc::clone(&finished);
        let handle = Runtime::spawn(async move {
            future.await;
            flag.set(true);
        });

        let mut tasks = self.tasks.borrow_mut();
        tasks.retain(|task| !task.finished.get());
        tasks.push(Task { handle, finished });
    }

    /// Abort every task still running.
    pub(crate) fn abort_all(&self) {
        let tasks = std::mem::take(&mut *self.tasks.borrow_mut());
        for task in tasks {
            task.handle.abort();
        }
    }

    /// Get the number of tasks still running.
    pub(crate) fn len(&self) -> usize {
        let mut tasks = self.tasks.borrow_mut();
        tasks.retain(|task| !task.finished.get());
        tasks.len()
    }
}
