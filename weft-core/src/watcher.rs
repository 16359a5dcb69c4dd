//! Watchers
//!
//! A [`Watcher`] merges several states into one observable snapshot: the
//! tuple of their resolved values (or the single value, for one target).
//! `watch` listeners fire whenever an element of that tuple changes.
//!
//! # Asynchronous Targets
//!
//! `get` is synchronous. An in-flight async value is reported as the last
//! value resolved for that position (`Undefined` at first), and the
//! watcher's resolver callback is invoked once per distinct in-flight value
//! so callers can track outstanding reads. Once something is watching, the
//! watcher also drives those values itself and notifies when they settle.
//! `resolved().await` waits for every target instead.
//!
//! A [`LoadableWatcher`] reports each target's [`Loadable`] instead, and
//! notifies once per settlement.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use tracing::{trace, warn};

use crate::error::Result;
use crate::reactive::{AsyncValue, Loadable, Observable, State, Subscription, TaskSet};
use crate::value::Value;

/// Called once per distinct in-flight async value a watcher reads.
pub type AsyncResolver = Rc<dyn Fn(&AsyncValue)>;

struct Snapshot {
    parts: Vec<Value>,
    value: Value,
}

struct WatcherInner {
    targets: Vec<State>,
    single: bool,
    resolver: Option<AsyncResolver>,
    snapshot: RefCell<Option<Snapshot>>,
    changed: Observable<Value>,
    /// In-flight values already handed to the resolver.
    seen: RefCell<Vec<AsyncValue>>,
    /// In-flight values with a driver task.
    driven: RefCell<Vec<AsyncValue>>,
    sources: RefCell<Vec<Subscription>>,
    drivers: TaskSet,
    watching: Cell<bool>,
}

/// An observable snapshot over one or more states.
#[derive(Clone)]
pub struct Watcher {
    inner: Rc<WatcherInner>,
}

impl Watcher {
    fn build(targets: Vec<State>, single: bool, resolver: Option<AsyncResolver>) -> Self {
        Self {
            inner: Rc::new(WatcherInner {
                targets,
                single,
                resolver,
                snapshot: RefCell::new(None),
                changed: Observable::new(),
                seen: RefCell::new(Vec::new()),
                driven: RefCell::new(Vec::new()),
                sources: RefCell::new(Vec::new()),
                drivers: TaskSet::default(),
                watching: Cell::new(false),
            }),
        }
    }

    /// Watch a list of states. `get` returns a list value.
    pub fn new(targets: impl IntoIterator<Item = State>) -> Self {
        Self::build(targets.into_iter().collect(), false, None)
    }

    /// Watch a list of states, reporting in-flight values to `resolver`.
    pub fn with_resolver<F>(targets: impl IntoIterator<Item = State>, resolver: F) -> Self
    where
        F: Fn(&AsyncValue) + 'static,
    {
        Self::build(targets.into_iter().collect(), false, Some(Rc::new(resolver)))
    }

    /// Watch one state. `get` returns its value directly.
    pub fn single(target: State) -> Self {
        Self::build(vec![target], true, None)
    }

    /// Reuse `previous` if it watches the same states in the same order.
    pub fn reuse(previous: Option<&Watcher>, targets: &[State]) -> Watcher {
        match previous {
            Some(previous) if !previous.inner.single && previous.inner.targets.as_slice() == targets => previous.clone(),
            _ => Self::new(targets.iter().cloned()),
        }
    }

    pub fn targets(&self) -> &[State] {
        &self.inner.targets
    }

    /// The current resolved tuple (or single value).
    pub fn get(&self) -> Result<Value> {
        let parts = self.read()?;
        Ok(self.publish(parts))
    }

    /// Wait for every async target and return the settled tuple.
    pub async fn resolved(&self) -> Result<Value> {
        let mut parts = Vec::with_capacity(self.inner.targets.len());
        for target in &self.inner.targets {
            parts.push(match target.peek()? {
                Value::Async(pending) => pending.await?,
                value => value,
            });
        }
        Ok(self.publish(parts))
    }

    /// Subscribe to changes of the resolved tuple.
    ///
    /// # Panics
    ///
    /// Panics outside a tokio `LocalSet` if a target holds an in-flight
    /// async value, since the watcher drives it with a local task.
    pub fn watch<F>(&self, listener: F) -> Result<Subscription>
    where
        F: Fn(&Value) + 'static,
    {
        if !self.inner.watching.replace(true) {
            let mut sources = Vec::with_capacity(self.inner.targets.len());
            for target in &self.inner.targets {
                let watcher: Weak<WatcherInner> = Rc::downgrade(&self.inner);
                sources.push(target.on(move |_| {
                    if let Some(inner) = watcher.upgrade() {
                        Watcher { inner }.refresh();
                    }
                })?);
            }
            *self.inner.sources.borrow_mut() = sources;
            // Establish the baseline and start driving in-flight values.
            self.refresh();
        }
        Ok(self.inner.changed.subscribe(listener))
    }

    /// Get the number of watch listeners.
    pub fn listener_count(&self) -> usize {
        self.inner.changed.len()
    }

    /// Stop following the targets and drop every listener.
    pub fn dispose(&self) {
        self.inner.sources.borrow_mut().clear();
        self.inner.changed.clear();
        self.inner.drivers.abort_all();
        self.inner.driven.borrow_mut().clear();
        self.inner.watching.set(false);
    }

    fn read(&self) -> Result<Vec<Value>> {
        let previous = self
            .inner
            .snapshot
            .borrow()
            .as_ref()
            .map(|snapshot| snapshot.parts.clone());

        let mut parts = Vec::with_capacity(self.inner.targets.len());
        for (index, target) in self.inner.targets.iter().enumerate() {
            let part = match target.peek()? {
                Value::Async(pending) => match pending.peek() {
                    Some(settled) => settled?,
                    None => {
                        self.track(&pending);
                        previous
                            .as_ref()
                            .and_then(|parts| parts.get(index).cloned())
                            .unwrap_or_default()
                    }
                },
                value => value,
            };
            parts.push(part);
        }
        Ok(parts)
    }

    /// Report a new in-flight value and, when watching, drive it.
    fn track(&self, pending: &AsyncValue) {
        if first_sighting(&self.inner.seen, pending) {
            if let Some(resolver) = &self.inner.resolver {
                resolver(pending);
            }
        }

        if self.inner.watching.get() && first_sighting(&self.inner.driven, pending) {
            let watcher: Weak<WatcherInner> = Rc::downgrade(&self.inner);
            let future = pending.future();
            self.inner.drivers.spawn(async move {
                let _ = future.await;
                if let Some(inner) = watcher.upgrade() {
                    trace!("watched value settled");
                    Watcher { inner }.refresh();
                }
            });
        }
    }

    /// Store `parts`, notifying listeners if an element changed.
    fn publish(&self, parts: Vec<Value>) -> Value {
        let (value, changed) = {
            let mut snapshot = self.inner.snapshot.borrow_mut();
            match snapshot.as_ref() {
                Some(current) if current.parts == parts => return current.value.clone(),
                _ => {}
            }
            let value = if self.inner.single {
                parts.first().cloned().unwrap_or_default()
            } else {
                Value::list(parts.iter().cloned())
            };
            let changed = snapshot.is_some();
            *snapshot = Some(Snapshot {
                parts,
                value: value.clone(),
            });
            (value, changed)
        };

        if changed && self.inner.watching.get() {
            self.inner.changed.dispatch(&value);
        }
        value
    }

    fn refresh(&self) {
        match self.read() {
            Ok(parts) => {
                self.publish(parts);
            }
            Err(error) => warn!(%error, "watched state failed, keeping the last snapshot"),
        }
    }
}

/// Record `pending` in `list`, pruning settled entries. False if already there.
fn first_sighting(list: &RefCell<Vec<AsyncValue>>, pending: &AsyncValue) -> bool {
    let mut list = list.borrow_mut();
    list.retain(|value| !value.is_settled());
    if list.iter().any(|value| value.ptr_eq(pending)) {
        return false;
    }
    list.push(pending.clone());
    true
}

impl fmt::Debug for Watcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Watcher")
            .field("targets", &self.inner.targets.len())
            .field("listeners", &self.inner.changed.len())
            .field("drivers", &self.inner.drivers.len())
            .field("watching", &self.inner.watching.get())
            .finish()
    }
}

struct LoadableWatcherInner {
    targets: Vec<State>,
    snapshot: RefCell<Option<Vec<Loadable>>>,
    changed: Observable<Vec<Loadable>>,
    sources: RefCell<Vec<Subscription>>,
    /// Settlement listeners for the loading snapshots currently shown.
    settlements: RefCell<Vec<(Loadable, Subscription)>>,
    watching: Cell<bool>,
}

/// A watcher over each target's loadable snapshot.
#[derive(Clone)]
pub struct LoadableWatcher {
    inner: Rc<LoadableWatcherInner>,
}

impl LoadableWatcher {
    pub fn new(targets: impl IntoIterator<Item = State>) -> Self {
        Self {
            inner: Rc::new(LoadableWatcherInner {
                targets: targets.into_iter().collect(),
                snapshot: RefCell::new(None),
                changed: Observable::new(),
                sources: RefCell::new(Vec::new()),
                settlements: RefCell::new(Vec::new()),
                watching: Cell::new(false),
            }),
        }
    }

    pub fn targets(&self) -> &[State] {
        &self.inner.targets
    }

    /// The current loadable of every target.
    pub fn get(&self) -> Result<Vec<Loadable>> {
        let loadables = self
            .inner
            .targets
            .iter()
            .map(State::loadable)
            .collect::<Result<Vec<_>>>()?;
        Ok(self.publish(loadables))
    }

    /// Subscribe to snapshot changes, including settlements.
    pub fn watch<F>(&self, listener: F) -> Result<Subscription>
    where
        F: Fn(&[Loadable]) + 'static,
    {
        if !self.inner.watching.replace(true) {
            let mut sources = Vec::with_capacity(self.inner.targets.len());
            for target in &self.inner.targets {
                let watcher: Weak<LoadableWatcherInner> = Rc::downgrade(&self.inner);
                sources.push(target.on(move |_| {
                    if let Some(inner) = watcher.upgrade() {
                        LoadableWatcher { inner }.refresh();
                    }
                })?);
            }
            *self.inner.sources.borrow_mut() = sources;
            self.get()?;
        }
        Ok(self.inner.changed.subscribe(move |loadables: &Vec<Loadable>| listener(loadables)))
    }

    pub fn dispose(&self) {
        self.inner.sources.borrow_mut().clear();
        self.inner.settlements.borrow_mut().clear();
        self.inner.changed.clear();
        self.inner.watching.set(false);
    }

    fn publish(&self, loadables: Vec<Loadable>) -> Vec<Loadable> {
        let changed = {
            let mut snapshot = self.inner.snapshot.borrow_mut();
            let same = snapshot.as_ref().is_some_and(|current| {
                current.len() == loadables.len() && current.iter().zip(&loadables).all(|(a, b)| a.ptr_eq(b))
            });
            if same {
                return loadables;
            }
            let changed = snapshot.is_some();
            *snapshot = Some(loadables.clone());
            changed
        };

        if self.inner.watching.get() {
            self.follow(&loadables);
            if changed {
                self.inner.changed.dispatch(&loadables);
            }
        }
        loadables
    }

    /// Listen for the settlement of every loading snapshot shown.
    fn follow(&self, loadables: &[Loadable]) {
        let unfollowed: Vec<Loadable> = {
            let mut settlements = self.inner.settlements.borrow_mut();
            settlements.retain(|(loadable, _)| loadables.iter().any(|l| l.ptr_eq(loadable)));
            loadables
                .iter()
                .filter(|l| l.is_loading())
                .filter(|l| !settlements.iter().any(|(followed, _)| followed.ptr_eq(l)))
                .cloned()
                .collect()
        };

        // `on_settled` may fire right away, so no borrow is held here.
        for loadable in unfollowed {
            let watcher: Weak<LoadableWatcherInner> = Rc::downgrade(&self.inner);
            let subscription = loadable.on_settled(move |_| {
                if let Some(inner) = watcher.upgrade() {
                    LoadableWatcher { inner }.refresh();
                }
            });
            self.inner.settlements.borrow_mut().push((loadable, subscription));
        }
    }

    fn refresh(&self) {
        if let Err(error) = self.get() {
            warn!(%error, "watched state failed, keeping the last snapshot");
        }
    }
}

impl fmt::Debug for LoadableWatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadableWatcher")
            .field("targets", &self.inner.targets.len())
            .field("listeners", &self.inner.changed.len())
            .finish()
    }
}
