//! Middleware
//!
//! Middleware sees every state and effect as it is constructed and may
//! wrap, decorate or replace it before the caller gets it.
//!
//! # How the Chain Runs
//!
//! Registered middleware is folded around an identity terminal, in
//! registration order: the first registered middleware runs outermost and
//! decides whether (and with what) to call `next`.
//!
//! ```rust,ignore
//! let _logging = middleware::register_fn(|instance, next| {
//!     if let Instance::State(state) = &instance {
//!         tracing::info!(state = state.id(), "state created");
//!     }
//!     next(instance)
//! });
//! ```
//!
//! Registration is thread-local, matching the rest of the engine. The
//! chain is snapshotted before it runs, so middleware may register or
//! unregister middleware (or construct states) without affecting the
//! construction in progress.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use tracing::{debug, warn};

use crate::effect::Effect;
use crate::reactive::{Runtime, State};

/// A freshly constructed instance passing through the chain.
#[derive(Debug, Clone)]
pub enum Instance {
    State(State),
    Effect(Effect),
}

impl Instance {
    fn kind(&self) -> &'static str {
        match self {
            Self::State(_) => "state",
            Self::Effect(_) => "effect",
        }
    }
}

/// A decorator around instance construction.
pub trait Middleware {
    /// Transform `instance`, usually by passing it (or a replacement) to `next`.
    fn apply(&self, instance: Instance, next: &dyn Fn(Instance) -> Instance) -> Instance;
}

impl<F> Middleware for F
where
    F: Fn(Instance, &dyn Fn(Instance) -> Instance) -> Instance,
{
    fn apply(&self, instance: Instance, next: &dyn Fn(Instance) -> Instance) -> Instance {
        self(instance, next)
    }
}

struct Entry {
    /// The registration this entry belongs to.
    registration: u64,
    middleware: Rc<dyn Middleware>,
}

thread_local! {
    static REGISTRY: RefCell<Vec<Entry>> = const { RefCell::new(Vec::new()) };
}

/// Handle to a set of registered middleware.
///
/// Dropping it unregisters them, unless it was [detached](Registration::detach).
#[must_use = "dropping a registration unregisters its middleware"]
pub struct Registration {
    id: u64,
    active: Cell<bool>,
}

impl Registration {
    /// Remove exactly the middleware added by this registration. Later
    /// calls do nothing.
    pub fn unregister(&self) {
        if !self.active.replace(false) {
            return;
        }
        let id = self.id;
        let removed = REGISTRY.with(|registry| {
            let mut registry = registry.borrow_mut();
            let before = registry.len();
            registry.retain(|entry| entry.registration != id);
            before - registry.len()
        });
        debug!(registration = id, removed, "middleware unregistered");
    }

    pub fn is_active(&self) -> bool {
        self.active.get()
    }

    /// Keep the middleware registered for the rest of the thread's life.
    pub fn detach(self) {
        self.active.replace(false);
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.unregister();
    }
}

impl fmt::Debug for Registration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registration")
            .field("id", &self.id)
            .field("active", &self.is_active())
            .finish()
    }
}

/// Register middleware, appended after what is already registered.
pub fn register<I>(middleware: I) -> Registration
where
    I: IntoIterator<Item = Rc<dyn Middleware>>,
{
    let id = Runtime::next_id();
    let added = REGISTRY.with(|registry| {
        let mut registry = registry.borrow_mut();
        let before = registry.len();
        registry.extend(middleware.into_iter().map(|middleware| Entry {
            registration: id,
            middleware,
        }));
        registry.len() - before
    });
    debug!(registration = id, added, "middleware registered");

    Registration {
        id,
        active: Cell::new(true),
    }
}

/// Register a single closure.
pub fn register_fn<F>(middleware: F) -> Registration
where
    F: Fn(Instance, &dyn Fn(Instance) -> Instance) -> Instance + 'static,
{
    register([Rc::new(middleware) as Rc<dyn Middleware>])
}

/// Remove every registered middleware.
pub fn clear() {
    let removed = REGISTRY.with(|registry| std::mem::take(&mut *registry.borrow_mut()));
    drop(removed);
}

/// Get the number of registered middleware.
pub fn len() -> usize {
    REGISTRY.with(|registry| registry.borrow().len())
}

fn run(chain: &[Rc<dyn Middleware>], instance: Instance) -> Instance {
    match chain.split_first() {
        None => instance,
        Some((first, rest)) => first.apply(instance, &|instance| run(rest, instance)),
    }
}

/// Pass `instance` through a snapshot of the registered chain.
pub fn apply(instance: Instance) -> Instance {
    let chain: Vec<Rc<dyn Middleware>> = REGISTRY.with(|registry| {
        registry
            .borrow()
            .iter()
            .map(|entry| Rc::clone(&entry.middleware))
            .collect()
    });
    if chain.is_empty() {
        return instance;
    }
    run(&chain, instance)
}

/// Apply the chain to a new state.
///
/// A replacement of the wrong kind is ignored with a warning.
pub fn apply_state(state: State) -> State {
    match apply(Instance::State(state.clone())) {
        Instance::State(replaced) => replaced,
        other => {
            warn!(state = state.id(), found = other.kind(), "middleware replaced a state with another kind");
            state
        }
    }
}

/// Apply the chain to a new effect.
///
/// A replacement of the wrong kind is ignored with a warning.
pub fn apply_effect(effect: Effect) -> Effect {
    match apply(Instance::Effect(effect.clone())) {
        Instance::Effect(replaced) => replaced,
        other => {
            warn!(effect = effect.id(), found = other.kind(), "middleware replaced an effect with another kind");
            effect
        }
    }
}
