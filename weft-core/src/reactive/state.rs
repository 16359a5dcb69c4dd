//! State Implementation
//!
//! A State is a lazily computed, cached, invalidatable value cell. Plain
//! states hold a value, derived states compute one from other states, and
//! asynchronous states hold an [`AsyncValue`](super::AsyncValue).
//!
//! # How States Work
//!
//! 1. Nothing is computed until the first read. The cache starts "unset".
//!
//! 2. A read runs the initializer inside a fresh evaluation scope. Every
//!    state read during that run subscribes this state to the source's
//!    change notifications. Errors are cached too, and every later read
//!    hands back the same error until the state is invalidated or set.
//!
//! 3. When a source changes, its readers are marked dirty and queued with
//!    the [scheduler](super::scheduler). Once the write's batch ends, each
//!    reader recomputes after its own sources are up to date, then notifies
//!    its listeners only if the new value differs by identity from the old
//!    one. Listeners never see a half-propagated graph.
//!
//! 4. `set_value` overrides derivation. The state forgets its dependencies
//!    and stays at the explicit value until `reset`.
//!
//! Dependencies are rediscovered on every computation, so the graph is
//! dynamic: a branch that stops reading a source stops depending on it.
//!
//! # Equality
//!
//! Change suppression uses [`Value`] equality, which is identity for lists,
//! maps and async values. Setting a structurally equal but distinct list
//! counts as a change.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use indexmap::IndexMap;
use smallvec::SmallVec;
use tracing::{debug, trace};

use super::family::{Family, FamilyInner};
use super::hooks::HookStore;
use super::loadable::{Loadable, LoadableCache};
use super::observable::{Observable, Subscription};
use super::runtime::Runtime;
use super::scheduler::{DirtyState, Scheduler};
use super::scope::Scope;
use crate::error::{Error, Result};
use crate::value::Value;

/// A family key: the arguments a member was created with.
pub type Key = SmallVec<[Value; 4]>;

/// Computes a member's value from its arguments.
pub(crate) type Initializer = Rc<dyn Fn(&[Value]) -> Result<Value>>;

/// Custom setter: `(current, next) -> stored`.
pub type Setter = Rc<dyn Fn(&Value, Value) -> Result<Value>>;

/// Construction options for a state family.
#[derive(Clone, Default)]
pub struct StateOptions {
    pub(crate) readonly: bool,
    pub(crate) name: Option<Rc<str>>,
    pub(crate) update: Option<Setter>,
}

impl StateOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject `set_value` and `update` with [`Error::ReadonlyStateMutation`].
    pub fn readonly(mut self) -> Self {
        self.readonly = true;
        self
    }

    /// Label the state in logs and `Debug` output.
    pub fn name(mut self, name: impl Into<Rc<str>>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Route every write through `setter`, storing what it returns.
    ///
    /// The setter sees the current value, or `Undefined` if the current
    /// computation failed.
    pub fn update<F>(mut self, setter: F) -> Self
    where
        F: Fn(&Value, Value) -> Result<Value> + 'static,
    {
        self.update = Some(Rc::new(setter));
        self
    }

    pub fn is_readonly(&self) -> bool {
        self.readonly
    }
}

impl fmt::Debug for StateOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateOptions")
            .field("readonly", &self.readonly)
            .field("name", &self.name)
            .field("update", &self.update.is_some())
            .finish()
    }
}

/// A change notification.
#[derive(Debug, Clone)]
pub struct Change {
    /// The previous value, `None` if the state had never been computed.
    pub old: Option<Result<Value>>,
    pub new: Result<Value>,
    /// The family key of the state that changed.
    pub key: Key,
}

/// The cached result of a computation.
enum Slot {
    Unset,
    Ready(Value),
    Failed(Error),
}

impl Slot {
    fn get(&self) -> Option<Result<Value>> {
        match self {
            Self::Unset => None,
            Self::Ready(value) => Some(Ok(value.clone())),
            Self::Failed(error) => Some(Err(error.clone())),
        }
    }

    fn into_result(self) -> Option<Result<Value>> {
        match self {
            Self::Unset => None,
            Self::Ready(value) => Some(Ok(value)),
            Self::Failed(error) => Some(Err(error)),
        }
    }

    fn store(result: &Result<Value>) -> Self {
        match result {
            Ok(value) => Self::Ready(value.clone()),
            Err(error) => Self::Failed(error.clone()),
        }
    }
}

/// A dependency edge to a state read by the latest computation.
struct Edge {
    source: State,
    /// Receives the source's dirty marks.
    _marks: Subscription,
}

struct Cache {
    slot: Slot,
    /// Set by `set_value`; suppresses re-derivation until `reset`.
    explicitly_set: bool,
    /// Edges to the states read by the latest computation, by source id.
    dependencies: IndexMap<u64, Edge>,
}

struct StateInner {
    id: u64,
    args: Key,
    init: Initializer,
    options: StateOptions,
    family: Weak<FamilyInner>,
    cache: RefCell<Cache>,
    changes: Observable<Change>,
    /// Dirty marks sent to the states that read this one.
    dependents: Observable<DirtyState>,
    mark: Cell<DirtyState>,
    /// Bumped whenever the cached result is replaced.
    generation: Cell<u64>,
    hooks: RefCell<HookStore>,
    loadable: LoadableCache,
    disposed: Cell<bool>,
}

/// A lazily computed, dependency-tracked value cell.
///
/// Cloning is cheap; clones refer to the same cell.
#[derive(Clone)]
pub struct State {
    inner: Rc<StateInner>,
}

impl State {
    pub(crate) fn new(init: Initializer, args: &[Value], options: StateOptions, family: Weak<FamilyInner>) -> Self {
        Self {
            inner: Rc::new(StateInner {
                id: Runtime::next_id(),
                args: args.iter().cloned().collect(),
                init,
                options,
                family,
                cache: RefCell::new(Cache {
                    slot: Slot::Unset,
                    explicitly_set: false,
                    dependencies: IndexMap::new(),
                }),
                changes: Observable::new(),
                dependents: Observable::new(),
                mark: Cell::new(DirtyState::Clean),
                generation: Cell::new(0),
                hooks: RefCell::new(HookStore::new()),
                loadable: LoadableCache::default(),
                disposed: Cell::new(false),
            }),
        }
    }

    /// Get the state's unique ID.
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn name(&self) -> Option<&str> {
        self.inner.options.name.as_deref()
    }

    /// The family key this state was created with. Empty for the default member.
    pub fn args(&self) -> &[Value] {
        &self.inner.args
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.get()
    }

    pub fn is_readonly(&self) -> bool {
        self.inner.options.readonly
    }

    fn ensure_live(&self) -> Result<()> {
        if self.is_disposed() {
            return Err(Error::DisposedAccess {
                kind: "state",
                id: self.id(),
            });
        }
        Ok(())
    }

    fn ensure_writable(&self) -> Result<()> {
        self.ensure_live()?;
        if self.is_readonly() {
            return Err(Error::ReadonlyStateMutation { id: self.id() });
        }
        Ok(())
    }

    /// Get the current value, computing it if necessary.
    ///
    /// Inside another state's evaluation, this records a dependency edge.
    pub fn value(&self) -> Result<Value> {
        self.ensure_live()?;
        Scope::track(self);
        self.compute()
    }

    /// Get the current value without recording a dependency.
    pub fn peek(&self) -> Result<Value> {
        self.ensure_live()?;
        self.compute()
    }

    fn compute(&self) -> Result<Value> {
        self.resolve();
        let cached = self.inner.cache.borrow().slot.get();
        if let Some(result) = cached {
            return result;
        }

        let result = self.evaluate();
        let mut cache = self.inner.cache.borrow_mut();
        // A write during evaluation wins over the computed value.
        if let Some(written) = cache.slot.get() {
            return written;
        }
        cache.slot = Slot::store(&result);
        self.bump_generation();
        result
    }

    fn bump_generation(&self) {
        self.inner.generation.set(self.inner.generation.get() + 1);
    }

    /// Run the initializer inside a fresh evaluation scope.
    fn evaluate(&self) -> Result<Value> {
        debug!(state = self.id(), name = self.name(), "evaluating state");
        let _scope = Scope::enter(self.clone());
        (self.inner.init)(&self.inner.args)
    }

    /// Subscribe this state to `source`'s dirty marks.
    pub(crate) fn add_dependency(&self, source: &State) {
        if self.inner.cache.borrow().dependencies.contains_key(&source.id()) {
            return;
        }

        let reader: Weak<StateInner> = Rc::downgrade(&self.inner);
        let marks = source.inner.dependents.subscribe(move |mark| {
            if let Some(inner) = reader.upgrade() {
                State { inner }.mark(*mark);
            }
        });

        trace!(reader = self.id(), source = source.id(), "dependency edge");
        self.inner.cache.borrow_mut().dependencies.insert(
            source.id(),
            Edge {
                source: source.clone(),
                _marks: marks,
            },
        );
    }

    /// Raise this state's dirty mark. The first mark queues the state and
    /// marks everything downstream as maybe dirty.
    fn mark(&self, mark: DirtyState) {
        if self.is_disposed() || self.inner.cache.borrow().explicitly_set {
            return;
        }
        let previous = self.inner.mark.get();
        if previous >= mark {
            return;
        }
        self.inner.mark.set(mark);
        if previous == DirtyState::Clean {
            Scheduler::enqueue(self.clone());
            self.inner.dependents.dispatch(&DirtyState::MaybeDirty);
        }
    }

    /// Bring a marked state up to date, sources first.
    pub(crate) fn resolve(&self) {
        if self.inner.mark.get() == DirtyState::Clean {
            return;
        }
        if self.is_disposed() {
            self.inner.mark.set(DirtyState::Clean);
            return;
        }

        let sources: Vec<State> = self
            .inner
            .cache
            .borrow()
            .dependencies
            .values()
            .map(|edge| edge.source.clone())
            .collect();
        // A source that changes marks this state dirty.
        for source in &sources {
            source.resolve();
        }

        if self.inner.mark.get() == DirtyState::Dirty {
            self.recompute();
        } else {
            self.inner.mark.set(DirtyState::Clean);
        }
    }

    /// A source changed: drop the edges, recompute and record the change.
    fn recompute(&self) {
        let (edges, old) = {
            let mut cache = self.inner.cache.borrow_mut();
            let edges = std::mem::take(&mut cache.dependencies);
            (edges, std::mem::replace(&mut cache.slot, Slot::Unset))
        };
        // Dropping the edges unsubscribes them; no borrow may be held.
        drop(edges);
        self.inner.mark.set(DirtyState::Clean);

        debug!(state = self.id(), name = self.name(), "dependency changed");
        let new = self.compute();
        self.record_change(old, new);
    }

    /// Mark readers dirty and queue a notification, if the value changed.
    fn record_change(&self, old: Slot, new: Result<Value>) {
        let changed = match (&old, &new) {
            (Slot::Ready(old), Ok(new)) => old != new,
            _ => true,
        };
        if !changed {
            return;
        }
        self.inner.dependents.dispatch(&DirtyState::Dirty);
        Scheduler::record(
            self.clone(),
            Change {
                old: old.into_result(),
                new,
                key: self.inner.args.clone(),
            },
        );
    }

    pub(crate) fn dispatch_change(&self, change: &Change) {
        if !self.is_disposed() {
            self.inner.changes.dispatch(change);
        }
    }

    /// Store `next` as the state's explicit value.
    ///
    /// Notifies listeners if the value changed by identity.
    pub fn set_value(&self, next: impl Into<Value>) -> Result<()> {
        self.assign(next.into()).map(|_| ())
    }

    /// Replace the value with `reducer(current)`.
    ///
    /// If the current value is still in flight, the reducer runs once it
    /// settles and the stored value is itself asynchronous.
    pub fn update<F>(&self, reducer: F) -> Result<Value>
    where
        F: FnOnce(Value) -> Result<Value> + 'static,
    {
        self.ensure_writable()?;
        let next = match self.compute()? {
            Value::Async(pending) => Value::Async(pending.then(reducer)),
            current => reducer(current)?,
        };
        self.assign(next)
    }

    /// Store `next` through the custom setter, returning what was stored.
    pub(crate) fn assign(&self, next: Value) -> Result<Value> {
        self.ensure_writable()?;
        let next = match &self.inner.options.update {
            Some(setter) => {
                let current = self.compute().unwrap_or(Value::Undefined);
                setter(&current, next)?
            }
            None => next,
        };

        let (edges, old) = {
            let mut cache = self.inner.cache.borrow_mut();
            cache.explicitly_set = true;
            let edges = std::mem::take(&mut cache.dependencies);
            (edges, std::mem::replace(&mut cache.slot, Slot::Ready(next.clone())))
        };
        drop(edges);
        self.inner.mark.set(DirtyState::Clean);
        self.bump_generation();

        trace!(state = self.id(), "value set");
        Scheduler::batch(|| self.record_change(old, Ok(next.clone())));
        Ok(next)
    }

    /// Go back to deriving the value from the initializer.
    pub fn reset(&self) -> Result<()> {
        self.ensure_live()?;
        let (edges, old) = {
            let mut cache = self.inner.cache.borrow_mut();
            cache.explicitly_set = false;
            let edges = std::mem::take(&mut cache.dependencies);
            (edges, std::mem::replace(&mut cache.slot, Slot::Unset))
        };
        drop(edges);
        self.inner.mark.set(DirtyState::Clean);

        if matches!(old, Slot::Unset) {
            return Ok(());
        }
        debug!(state = self.id(), name = self.name(), "state reset");
        Scheduler::batch(|| {
            let new = self.compute();
            self.record_change(old, new);
        });
        Ok(())
    }

    /// Subscribe to change notifications.
    pub fn on<F>(&self, listener: F) -> Result<Subscription>
    where
        F: Fn(&Change) + 'static,
    {
        self.ensure_live()?;
        Ok(self.inner.changes.subscribe(listener))
    }

    /// A new read-only state holding `mapper(value)`.
    ///
    /// Asynchronous values are mapped once they settle.
    pub fn map<F>(&self, mapper: F) -> Result<State>
    where
        F: Fn(Value) -> Result<Value> + 'static,
    {
        self.ensure_live()?;
        let source = self.clone();
        let mapper = Rc::new(mapper);
        let derived = Family::new(
            move |_| match source.value()? {
                Value::Async(pending) => {
                    let mapper = Rc::clone(&mapper);
                    Ok(Value::Async(pending.then(move |value| mapper(value))))
                }
                value => mapper(value),
            },
            StateOptions::new().readonly(),
        );
        Ok(derived.default_member())
    }

    /// A point-in-time snapshot of the value's loading state.
    ///
    /// While an async value is in flight, repeated calls return the same
    /// snapshot instance.
    ///
    /// # Panics
    ///
    /// Panics outside a tokio `LocalSet` if the value is still in flight,
    /// since settlement is driven by a local task.
    pub fn loadable(&self) -> Result<Loadable> {
        self.ensure_live()?;
        Scope::track(self);
        let current = self.compute();
        Ok(self.inner.loadable.project(current, self.inner.generation.get()))
    }

    /// Detach this state from its family. The next lookup with the same
    /// arguments creates a fresh member.
    pub fn remove(&self) -> bool {
        match self.inner.family.upgrade() {
            Some(family) => family.forget(self),
            None => false,
        }
    }

    /// Release listeners, dependency edges and settlement plumbing.
    ///
    /// Every later operation fails with [`Error::DisposedAccess`].
    pub fn dispose(&self) {
        if self.inner.disposed.replace(true) {
            return;
        }
        debug!(state = self.id(), name = self.name(), "state disposed");

        self.inner.changes.clear();
        self.inner.dependents.clear();
        let edges = std::mem::take(&mut self.inner.cache.borrow_mut().dependencies);
        drop(edges);
        self.inner.loadable.dispose();
        self.inner.hooks.borrow_mut().clear();
    }

    /// Get the number of change listeners.
    pub fn listener_count(&self) -> usize {
        self.inner.changes.len()
    }

    /// Get the number of states the latest computation read.
    pub fn dependency_count(&self) -> usize {
        self.inner.cache.borrow().dependencies.len()
    }

    pub(crate) fn with_hooks<R>(&self, f: impl FnOnce(&mut HookStore) -> R) -> R {
        f(&mut self.inner.hooks.borrow_mut())
    }

    pub fn ptr_eq(&self, other: &State) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl PartialEq for State {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl Eq for State {}

impl fmt::Debug for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let cache = self.inner.cache.borrow();
        let slot = match &cache.slot {
            Slot::Unset => "unset",
            Slot::Ready(_) => "ready",
            Slot::Failed(_) => "failed",
        };
        f.debug_struct("State")
            .field("id", &self.inner.id)
            .field("name", &self.inner.options.name)
            .field("args", &self.inner.args)
            .field("slot", &slot)
            .field("dependencies", &cache.dependencies.len())
            .field("disposed", &self.inner.disposed.get())
            .finish()
    }
}
