//! Loadable Snapshots
//!
//! A [`Loadable`] is an immutable point-in-time projection of a possibly
//! asynchronous value: `Loading`, `HasValue` or `HasError`.
//!
//! A loading snapshot never changes. Instead it fires its settlement
//! listeners exactly once when the underlying value settles, handing them
//! the settled snapshot. The owner's cache is updated before that happens,
//! so reading the owner's loadable from inside a settlement listener
//! already sees the settled snapshot.

use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use tracing::debug;

use super::observable::{Observable, Subscription};
use super::runtime::TaskSet;
use super::AsyncValue;
use crate::error::{Error, Result};
use crate::value::Value;

/// The state a loadable snapshot captured.
#[derive(Debug, Clone)]
pub enum LoadableState {
    Loading,
    HasValue(Value),
    HasError(Error),
}

struct LoadableInner {
    state: LoadableState,
    /// Fired once when a loading snapshot settles.
    settled: Observable<Loadable>,
    resolution: RefCell<Option<Loadable>>,
}

/// An immutable snapshot of a value's loading state.
#[derive(Clone)]
pub struct Loadable {
    inner: Rc<LoadableInner>,
}

impl Loadable {
    fn from_state(state: LoadableState) -> Self {
        Self {
            inner: Rc::new(LoadableInner {
                state,
                settled: Observable::new(),
                resolution: RefCell::new(None),
            }),
        }
    }

    pub(crate) fn loading() -> Self {
        Self::from_state(LoadableState::Loading)
    }

    pub(crate) fn settled(result: Result<Value>) -> Self {
        Self::from_state(match result {
            Ok(value) => LoadableState::HasValue(value),
            Err(error) => LoadableState::HasError(error),
        })
    }

    pub fn state(&self) -> &LoadableState {
        &self.inner.state
    }

    pub fn is_loading(&self) -> bool {
        matches!(self.inner.state, LoadableState::Loading)
    }

    pub fn has_value(&self) -> bool {
        matches!(self.inner.state, LoadableState::HasValue(_))
    }

    pub fn has_error(&self) -> bool {
        matches!(self.inner.state, LoadableState::HasError(_))
    }

    pub fn value(&self) -> Option<&Value> {
        match &self.inner.state {
            LoadableState::HasValue(value) => Some(value),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&Error> {
        match &self.inner.state {
            LoadableState::HasError(error) => Some(error),
            _ => None,
        }
    }

    /// Get notified when this loading snapshot settles.
    ///
    /// Fires exactly once. Subscribing after settlement fires immediately.
    /// Snapshots that were never loading never fire.
    pub fn on_settled<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&Loadable) + 'static,
    {
        if !self.is_loading() {
            return Subscription::empty();
        }
        let resolution = self.inner.resolution.borrow().clone();
        match resolution {
            Some(settled) => {
                listener(&settled);
                Subscription::empty()
            }
            None => self.inner.settled.subscribe(listener),
        }
    }

    /// The settled snapshot, once a loading snapshot has settled.
    pub fn resolution(&self) -> Option<Loadable> {
        self.inner.resolution.borrow().clone()
    }

    fn settle(&self, settled: &Loadable) {
        *self.inner.resolution.borrow_mut() = Some(settled.clone());
        self.inner.settled.dispatch(settled);
        self.inner.settled.clear();
    }

    pub fn ptr_eq(&self, other: &Loadable) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for Loadable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.inner.state, f)
    }
}

/// The cached snapshot and the value it was projected from.
struct Entry {
    /// `None` for error snapshots.
    source: Option<Value>,
    /// The owner's generation when the snapshot was taken.
    generation: u64,
    loadable: Loadable,
}

/// Identity-stable loadable cache shared by states and effects.
#[derive(Default)]
pub(crate) struct LoadableCache {
    entry: Rc<RefCell<Option<Entry>>>,
    drivers: TaskSet,
}

impl LoadableCache {
    /// Project `current` into a snapshot, reusing the cached one when the
    /// source has not changed.
    ///
    /// `generation` identifies the owner's cached result. Errors carry no
    /// identity, so an error snapshot is only reused within one generation.
    pub(crate) fn project(&self, current: Result<Value>, generation: u64) -> Loadable {
        if let Some(loadable) = self.cached(&current, generation) {
            return loadable;
        }

        let (source, loadable) = match current {
            Ok(Value::Async(pending)) => {
                let loadable = match pending.peek() {
                    Some(result) => Loadable::settled(result),
                    None => {
                        let loading = Loadable::loading();
                        self.drive(pending.clone(), loading.clone());
                        loading
                    }
                };
                (Some(Value::Async(pending)), loadable)
            }
            Ok(value) => (Some(value.clone()), Loadable::settled(Ok(value))),
            Err(error) => (None, Loadable::settled(Err(error))),
        };

        *self.entry.borrow_mut() = Some(Entry {
            source,
            generation,
            loadable: loadable.clone(),
        });
        loadable
    }

    fn cached(&self, current: &Result<Value>, generation: u64) -> Option<Loadable> {
        let mut entry = self.entry.borrow_mut();
        let entry = entry.as_mut()?;
        match (current, &entry.source) {
            (Ok(value), Some(source)) if value == source => {
                // Settled but the driver has not reported yet.
                if let (Value::Async(pending), true) = (value, entry.loadable.is_loading()) {
                    if let Some(result) = pending.peek() {
                        entry.loadable = Loadable::settled(result);
                    }
                }
                Some(entry.loadable.clone())
            }
            (Err(_), None) if entry.generation == generation => Some(entry.loadable.clone()),
            _ => None,
        }
    }

    fn drive(&self, pending: AsyncValue, loading: Loadable) {
        let entry: Weak<RefCell<Option<Entry>>> = Rc::downgrade(&self.entry);
        self.drivers.spawn(async move {
            let result = pending.future().await;
            debug!(ok = result.is_ok(), "loadable settled");

            let mut settled = Loadable::settled(result);
            if let Some(entry) = entry.upgrade() {
                let mut entry = entry.borrow_mut();
                if let Some(entry) = entry.as_mut() {
                    let current = matches!(&entry.source, Some(Value::Async(source)) if source.ptr_eq(&pending));
                    if current {
                        if entry.loadable.is_loading() {
                            entry.loadable = settled.clone();
                        } else {
                            settled = entry.loadable.clone();
                        }
                    }
                }
            }
            loading.settle(&settled);
        });
    }

    /// Forget the cached snapshot. In-flight settlement still fires.
    pub(crate) fn reset(&self) {
        self.entry.borrow_mut().take();
    }

    /// Forget the cached snapshot and stop every settlement driver.
    pub(crate) fn dispose(&self) {
        self.reset();
        self.drivers.abort_all();
    }

    #[cfg(test)]
    fn driver_count(&self) -> usize {
        self.drivers.len()
    }
}
