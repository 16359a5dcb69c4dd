//! Reactive Primitives
//!
//! This module implements the state side of the engine: states, families,
//! hooks, loadables and the notification hub they are built on.
//!
//! # Concepts
//!
//! ## States
//!
//! A State is a lazily computed, cached value cell. When a state is read
//! while another state's initializer is running, the reader automatically
//! subscribes to the source's changes. When the source changes, the reader
//! recomputes and passes the change on only if its own value changed.
//!
//! ## Families
//!
//! A Family is a set of states sharing one initializer, keyed by an
//! argument tuple. The empty tuple is the default member.
//!
//! ## Hooks
//!
//! Hooks memoize sub-computations inside one state's evaluation, keyed by
//! an explicit id.
//!
//! ## Loadables
//!
//! A Loadable is a snapshot of a possibly asynchronous value: loading, has
//! a value, or has an error.
//!
//! # Implementation Notes
//!
//! Everything here is single-threaded (`Rc`/`RefCell`). The currently
//! evaluating state lives on a thread-local scope stack, which is what makes
//! dependency tracking automatic.

mod async_value;
mod family;
pub mod hooks;
mod instance_cache;
mod loadable;
mod observable;
mod runtime;
mod scheduler;
mod scope;
mod state;

pub use async_value::{AsyncValue, SharedResult};
pub use family::Family;
pub use hooks::{HookCell, HookKind};
pub use loadable::{Loadable, LoadableState};
pub(crate) use loadable::LoadableCache;
pub(crate) use runtime::TaskSet;
pub use observable::{Observable, Subscription, SubscriptionId};
pub use runtime::Runtime;
pub use state::{Change, Key, Setter, State, StateOptions};
