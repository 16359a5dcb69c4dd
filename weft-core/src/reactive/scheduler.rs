//! Update Scheduler
//!
//! The scheduler makes sure a write is fully propagated before anyone
//! hears about it.
//!
//! # Algorithm
//!
//! We use a push-pull approach:
//!
//! 1. When a state's value changes, its direct dependents are marked
//!    "dirty" and everything downstream of them "maybe dirty". Marked
//!    states are queued. Nothing is recomputed yet.
//! 2. When the outermost batch ends, every queued state is brought up to
//!    date. A state first brings its own sources up to date, so each state
//!    recomputes at most once and only after all of its inputs:
//!    - "maybe dirty" states recompute only if a source actually changed
//!    - "dirty" states recompute
//!    - a recomputed value that differs marks its dependents dirty
//! 3. Only then are the recorded change notifications dispatched, in the
//!    order the changes happened.
//!
//! Listeners that write start a nested round, processed before the flush
//! returns.

use std::cell::RefCell;

use tracing::trace;

use super::state::{Change, State};

/// How up to date a computed state is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) enum DirtyState {
    /// The value is up to date.
    Clean,

    /// Something upstream changed; a source may or may not have.
    MaybeDirty,

    /// A source changed. The value must be recomputed.
    Dirty,
}

struct Batch {
    depth: usize,
    /// States marked since the last flush, in marking order.
    marked: Vec<State>,
    /// Notifications waiting for propagation to finish.
    changes: Vec<(State, Change)>,
}

thread_local! {
    static BATCH: RefCell<Batch> = const {
        RefCell::new(Batch {
            depth: 0,
            marked: Vec::new(),
            changes: Vec::new(),
        })
    };
}

/// Decrements the batch depth, flushing when the outermost batch ends.
struct BatchGuard;

impl Drop for BatchGuard {
    fn drop(&mut self) {
        let outermost = BATCH.with(|batch| {
            let mut batch = batch.borrow_mut();
            batch.depth -= 1;
            batch.depth == 0
        });
        if outermost && !std::thread::panicking() {
            Scheduler::flush();
        }
    }
}

pub(crate) struct Scheduler;

impl Scheduler {
    /// Run `f` inside a batch.
    pub(crate) fn batch<R>(f: impl FnOnce() -> R) -> R {
        BATCH.with(|batch| batch.borrow_mut().depth += 1);
        let _guard = BatchGuard;
        f()
    }

    /// Queue a newly marked state for the next flush.
    pub(crate) fn enqueue(state: State) {
        BATCH.with(|batch| batch.borrow_mut().marked.push(state));
    }

    /// Record a change notification. Outside a batch, it is delivered
    /// right away.
    pub(crate) fn record(state: State, change: Change) {
        Self::batch(|| BATCH.with(|batch| batch.borrow_mut().changes.push((state, change))));
    }

    fn flush() {
        BATCH.with(|batch| batch.borrow_mut().depth += 1);
        let _guard = FlushGuard;

        loop {
            let marked = BATCH.with(|batch| std::mem::take(&mut batch.borrow_mut().marked));
            for state in &marked {
                state.resolve();
            }

            let changes = BATCH.with(|batch| std::mem::take(&mut batch.borrow_mut().changes));
            if marked.is_empty() && changes.is_empty() {
                break;
            }
            trace!(recomputed = marked.len(), notified = changes.len(), "propagation round");
            for (state, change) in changes {
                state.dispatch_change(&change);
            }
        }
    }
}

/// Leaves the flush's own batch level without flushing again.
struct FlushGuard;

impl Drop for FlushGuard {
    fn drop(&mut self) {
        BATCH.with(|batch| batch.borrow_mut().depth -= 1);
    }
}
