//! Call Wrappers
//!
//! Wrappers that change *when* an effect runs: [`Latest`] keeps only the
//! newest call alive, [`Debounced`] waits for a quiet period, and
//! [`Throttled`] runs at most once per window.
//!
//! Debounce and throttle use the runtime clock, so they follow tokio's
//! paused clock in tests.

use std::cell::RefCell;
use std::time::Duration;

use futures::future::AbortHandle;
use tokio::time::Instant;
use tracing::{trace, warn};

use super::Effect;
use crate::error::Result;
use crate::reactive::Runtime;
use crate::value::Value;

/// Cancels the previous call before starting a new one.
#[derive(Debug, Clone)]
pub struct Latest {
    effect: Effect,
}

impl Latest {
    pub(crate) fn new(effect: Effect) -> Self {
        Self { effect }
    }

    pub fn call(&self, payload: impl Into<Value>) -> Result<Value> {
        self.effect.cancel();
        self.effect.call(payload)
    }
}

/// Calls the effect once `delay` has passed without another call.
#[derive(Debug)]
pub struct Debounced {
    effect: Effect,
    delay: Duration,
    timer: RefCell<Option<AbortHandle>>,
}

impl Debounced {
    pub(crate) fn new(effect: Effect, delay: Duration) -> Self {
        Self {
            effect,
            delay,
            timer: RefCell::new(None),
        }
    }

    /// Restart the timer with `payload`.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio `LocalSet`.
    pub fn call(&self, payload: impl Into<Value>) {
        self.cancel();

        let (effect, delay, payload) = (self.effect.clone(), self.delay, payload.into());
        let handle = Runtime::spawn(async move {
            Runtime::sleep(delay).await;
            trace!(effect = effect.id(), "debounce elapsed");
            if let Err(error) = effect.call(payload) {
                warn!(effect = effect.id(), %error, "debounced call failed");
            }
        });
        *self.timer.borrow_mut() = Some(handle);
    }

    /// Drop the pending call, if any.
    pub fn cancel(&self) {
        if let Some(timer) = self.timer.borrow_mut().take() {
            timer.abort();
        }
    }
}

impl Drop for Debounced {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// Calls immediately, then ignores calls for `window`.
#[derive(Debug)]
pub struct Throttled {
    effect: Effect,
    window: Duration,
    last: RefCell<Option<(Instant, Result<Value>)>>,
}

impl Throttled {
    pub(crate) fn new(effect: Effect, window: Duration) -> Self {
        Self {
            effect,
            window,
            last: RefCell::new(None),
        }
    }

    /// Call the effect, or return the previous result inside the window.
    pub fn call(&self, payload: impl Into<Value>) -> Result<Value> {
        let now = Runtime::now();
        if let Some((at, result)) = &*self.last.borrow() {
            if now.duration_since(*at) < self.window {
                trace!(effect = self.effect.id(), "throttled");
                return result.clone();
            }
        }

        let result = self.effect.call(payload);
        *self.last.borrow_mut() = Some((now, result.clone()));
        result
    }
}
