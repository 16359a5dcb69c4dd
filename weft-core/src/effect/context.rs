//! Execution Context
//!
//! One [`ExecutionContext`] is created per effect call. It carries the
//! payload, the call's run status and its cancellation flag.
//!
//! # Cancellation
//!
//! Cancellation is cooperative. `cancel` sets the flag and wakes whatever
//! the interpreter is waiting on, so the run notices at its next resumption
//! point and stops. Work already in flight is not interrupted; its
//! continuation is discarded.
//!
//! # Await-All Bookkeeping
//!
//! "Wait for all of these" expressions count firings over the whole call,
//! not per expression. The first time such an expression names a target,
//! the context starts recording that target's firings and keeps recording
//! until the call finishes.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::future::Future;
use std::task::{Poll, Waker};

use futures::future::{self, Either};
use indexmap::IndexMap;

use crate::error::Result;
use crate::reactive::{Runtime, Subscription};
use crate::value::Value;

/// Where an effect call is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    /// The interpreter is stepping the body.
    Running,
    /// Waiting on an async value or a signal.
    Suspended,
    /// Cancelled before it finished.
    Cancelled,
    /// Finished, successfully or not.
    Done,
}

/// Per-call state shared by the interpreter and the call's async handle.
pub struct ExecutionContext {
    id: u64,
    effect: u64,
    payload: Value,
    status: Cell<RunStatus>,
    cancelled: Cell<bool>,
    /// Set when the call suspended and now runs on the executor.
    detached: Cell<bool>,
    cancel_wakers: RefCell<Vec<Waker>>,
    /// Latest firing per target id, for await-all expressions.
    fired: RefCell<IndexMap<u64, Result<Value>>>,
    fired_wakers: RefCell<Vec<Waker>>,
    recorders: RefCell<IndexMap<u64, Subscription>>,
}

fn register(wakers: &RefCell<Vec<Waker>>, waker: &Waker) {
    let mut wakers = wakers.borrow_mut();
    if !wakers.iter().any(|w| w.will_wake(waker)) {
        wakers.push(waker.clone());
    }
}

fn wake_all(wakers: &RefCell<Vec<Waker>>) {
    let wakers = std::mem::take(&mut *wakers.borrow_mut());
    for waker in wakers {
        waker.wake();
    }
}

impl ExecutionContext {
    pub(crate) fn new(effect: u64, payload: Value) -> Self {
        Self {
            id: Runtime::next_id(),
            effect,
            payload,
            status: Cell::new(RunStatus::Running),
            cancelled: Cell::new(false),
            detached: Cell::new(false),
            cancel_wakers: RefCell::new(Vec::new()),
            fired: RefCell::new(IndexMap::new()),
            fired_wakers: RefCell::new(Vec::new()),
            recorders: RefCell::new(IndexMap::new()),
        }
    }

    /// Get the call's unique ID.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// The id of the effect this call belongs to.
    pub fn effect_id(&self) -> u64 {
        self.effect
    }

    pub fn payload(&self) -> &Value {
        &self.payload
    }

    pub fn status(&self) -> RunStatus {
        self.status.get()
    }

    pub(crate) fn set_status(&self, status: RunStatus) {
        if !matches!(self.status.get(), RunStatus::Cancelled | RunStatus::Done) {
            self.status.set(status);
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.get()
    }

    /// Request cancellation. Does nothing once the call is done.
    pub fn cancel(&self) {
        if self.cancelled.get() || self.status.get() == RunStatus::Done {
            return;
        }
        self.cancelled.set(true);
        self.status.set(RunStatus::Cancelled);
        wake_all(&self.cancel_wakers);
        wake_all(&self.fired_wakers);
    }

    /// Resolves once the call is cancelled.
    pub fn cancelled(&self) -> impl Future<Output = ()> + '_ {
        future::poll_fn(move |cx| {
            if self.is_cancelled() {
                Poll::Ready(())
            } else {
                register(&self.cancel_wakers, cx.waker());
                Poll::Pending
            }
        })
    }

    /// Run `fut` until it completes or the call is cancelled.
    pub async fn until_cancelled<F: Future>(&self, fut: F) -> Option<F::Output> {
        if self.is_cancelled() {
            return None;
        }
        let fut = std::pin::pin!(fut);
        let cancelled = std::pin::pin!(self.cancelled());
        match future::select(fut, cancelled).await {
            Either::Left((output, _)) => Some(output),
            Either::Right(_) => None,
        }
    }

    pub(crate) fn register_cancel_waker(&self, waker: &Waker) {
        register(&self.cancel_wakers, waker);
    }

    pub(crate) fn is_detached(&self) -> bool {
        self.detached.get()
    }

    pub(crate) fn detach(&self) {
        self.detached.set(true);
    }

    /// Start recording firings of `target` unless already recording.
    pub(crate) fn record<F>(&self, target: u64, subscribe: F) -> Result<()>
    where
        F: FnOnce() -> Result<Subscription>,
    {
        if self.recorders.borrow().contains_key(&target) {
            return Ok(());
        }
        let subscription = subscribe()?;
        self.recorders.borrow_mut().insert(target, subscription);
        Ok(())
    }

    pub(crate) fn fire(&self, target: u64, value: Result<Value>) {
        self.fired.borrow_mut().insert(target, value);
        wake_all(&self.fired_wakers);
    }

    /// The latest firing of every target, once all of them have fired.
    pub(crate) fn poll_fired(&self, targets: &[u64], waker: &Waker) -> Option<Vec<Result<Value>>> {
        let fired = self.fired.borrow();
        let all = targets
            .iter()
            .map(|target| fired.get(target).cloned())
            .collect::<Option<Vec<_>>>();
        if all.is_none() {
            register(&self.fired_wakers, waker);
        }
        all
    }

    /// Mark the call done and release recorders.
    pub(crate) fn finish(&self) {
        self.set_status(RunStatus::Done);
        let recorders = std::mem::take(&mut *self.recorders.borrow_mut());
        drop(recorders);
        self.cancel_wakers.borrow_mut().clear();
        self.fired_wakers.borrow_mut().clear();
    }
}

impl fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("id", &self.id)
            .field("effect", &self.effect)
            .field("payload", &self.payload)
            .field("status", &self.status.get())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn cancel_is_idempotent_and_final() {
        let context = ExecutionContext::new(1, Value::Null);
        assert_eq!(context.status(), RunStatus::Running);

        context.cancel();
        context.cancel();
        assert!(context.is_cancelled());
        assert_eq!(context.status(), RunStatus::Cancelled);

        context.set_status(RunStatus::Running);
        assert_eq!(context.status(), RunStatus::Cancelled);
    }

    #[test]
    fn finished_calls_ignore_cancel() {
        let context = ExecutionContext::new(1, Value::Null);
        context.finish();
        context.cancel();
        assert!(!context.is_cancelled());
        assert_eq!(context.status(), RunStatus::Done);
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn until_cancelled_stops_waiting() {
        let context = std::rc::Rc::new(ExecutionContext::new(1, Value::Null));

        let finished = context.until_cancelled(async { 7 }).await;
        assert_eq!(finished, Some(7));

        let canceller = context.clone();
        let waiting = context.until_cancelled(async {
            Runtime::sleep(Duration::from_secs(60)).await;
            0
        });
        let cancel = async move {
            Runtime::sleep(Duration::from_millis(1)).await;
            canceller.cancel();
        };
        let (result, ()) = futures::join!(waiting, cancel);
        assert_eq!(result, None);
    }
}
