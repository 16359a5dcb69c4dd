//! Weft Core
//!
//! This crate provides the runtime for the Weft reactive state and effect
//! engine. It implements:
//!
//! - Reactive states with automatic dependency tracking
//! - Parameterized state families and per-state hooks
//! - Effects: declarative, interpreted write operations with cancellation
//! - Loadable snapshots and watchers for asynchronous values
//! - A middleware chain around state and effect construction
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `value`: The dynamic value type every state holds
//! - `reactive`: States, families, hooks, loadables and dependency tracking
//! - `effect`: Effect expressions, the interpreter and execution contexts
//! - `watcher`: Merged observation of several states
//! - `middleware`: Construction-time decorators
//!
//! The runtime is single-threaded. Anything asynchronous (effects awaiting
//! state changes, async values, debouncing) runs as local tasks and needs a
//! tokio `LocalSet`.
//!
//! # Example
//!
//! ```rust,ignore
//! use weft_core::{derived, effect, state, Expr, Value};
//!
//! let count = state(1);
//! let source = count.clone();
//! let doubled = derived(move || Ok(Value::from(source.value()?.as_f64().unwrap_or(0.0) * 2.0)));
//!
//! let add = effect(Expr::update(&count, |current, payload| {
//!     Ok(Value::from(current.as_f64().unwrap_or(0.0) + payload.as_f64().unwrap_or(0.0)))
//! }));
//! add.call(4)?;
//!
//! assert_eq!(doubled.value()?, Value::from(10));
//! ```

pub mod effect;
pub mod error;
pub mod middleware;
pub mod reactive;
pub mod value;
pub mod watcher;

pub use effect::{Body, Co, Effect, EffectOptions, Expr, RunStatus};
pub use error::{Error, Result};
pub use reactive::{AsyncValue, Family, Loadable, LoadableState, State, StateOptions, Subscription};
pub use value::Value;
pub use watcher::{LoadableWatcher, Watcher};

/// A plain state starting at `initial`.
pub fn state(initial: impl Into<Value>) -> Family {
    Family::state(initial)
}

/// A state computed from other states, recomputed when they change.
pub fn derived<F>(compute: F) -> Family
where
    F: Fn() -> Result<Value> + 'static,
{
    Family::derived(compute)
}

/// A parameterized family of states.
pub fn family<F>(init: F) -> Family
where
    F: Fn(&[Value]) -> Result<Value> + 'static,
{
    Family::family(init)
}

/// An effect running `body`.
pub fn effect(body: impl Into<Body>) -> Effect {
    Effect::new(body.into(), EffectOptions::default())
}
