//! State Families
//!
//! A [`Family`] is the set of states sharing one initializer, keyed by an
//! argument tuple. Looking up the same (equal) arguments twice returns the
//! same [`State`]. The empty tuple addresses the default member, and the
//! family itself forwards the common operations to it, so a family with no
//! parameters reads like a single state.
//!
//! ```rust,ignore
//! let todo = Family::family(|args| fetch_todo(&args[0]));
//! let first = todo.member(&[1.into()]);
//! assert!(first.ptr_eq(&todo.member(&[1.into()])));
//! ```

use std::rc::Rc;

use tracing::debug;

use super::instance_cache::InstanceCache;
use super::loadable::Loadable;
use super::observable::Subscription;
use super::state::{Change, Initializer, State, StateOptions};
use crate::error::Result;
use crate::middleware;
use crate::value::Value;

pub(crate) struct FamilyInner {
    init: Initializer,
    options: StateOptions,
    members: InstanceCache<State>,
}

impl FamilyInner {
    /// Drop `state` from the member cache if it is still the cached member.
    pub(crate) fn forget(&self, state: &State) -> bool {
        match self.members.get(state.args()) {
            Some(cached) if cached.ptr_eq(state) => {
                self.members.delete(state.args());
                true
            }
            _ => false,
        }
    }
}

/// A family of states keyed by argument tuples.
#[derive(Clone)]
pub struct Family {
    inner: Rc<FamilyInner>,
}

impl Family {
    /// Create a family from an initializer over the member's arguments.
    pub fn new<F>(init: F, options: StateOptions) -> Self
    where
        F: Fn(&[Value]) -> Result<Value> + 'static,
    {
        Self {
            inner: Rc::new(FamilyInner {
                init: Rc::new(init),
                options,
                members: InstanceCache::new(),
            }),
        }
    }

    /// A plain state starting at `initial`.
    pub fn state(initial: impl Into<Value>) -> Self {
        Self::state_with(initial, StateOptions::default())
    }

    /// A plain state starting at `initial`, with options.
    pub fn state_with(initial: impl Into<Value>, options: StateOptions) -> Self {
        let initial = initial.into();
        Self::new(move |_| Ok(initial.clone()), options)
    }

    /// A state derived from other states.
    pub fn derived<F>(compute: F) -> Self
    where
        F: Fn() -> Result<Value> + 'static,
    {
        Self::new(move |_| compute(), StateOptions::default())
    }

    /// A parameterized family with default options.
    pub fn family<F>(init: F) -> Self
    where
        F: Fn(&[Value]) -> Result<Value> + 'static,
    {
        Self::new(init, StateOptions::default())
    }

    /// The member for `args`, created on first access.
    ///
    /// New members pass through the registered middleware.
    pub fn member(&self, args: &[Value]) -> State {
        self.inner.members.get_or_add(args, || {
            let state = State::new(
                Rc::clone(&self.inner.init),
                args,
                self.inner.options.clone(),
                Rc::downgrade(&self.inner),
            );
            debug!(state = state.id(), args = args.len(), "family member created");
            middleware::apply_state(state)
        })
    }

    /// The member for the empty argument tuple.
    pub fn default_member(&self) -> State {
        self.member(&[])
    }

    /// Detach the member for `args`, returning it. It is not disposed.
    pub fn remove(&self, args: &[Value]) -> Option<State> {
        self.inner.members.delete(args)
    }

    /// Get the number of live members.
    pub fn len(&self) -> usize {
        self.inner.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every live member, the default member first.
    pub fn members(&self) -> Vec<State> {
        self.inner.members.values()
    }

    pub fn options(&self) -> &StateOptions {
        &self.inner.options
    }

    /// Dispose and forget every member.
    pub fn dispose(&self) {
        for member in self.inner.members.clear() {
            member.dispose();
        }
    }

    pub fn value(&self) -> Result<Value> {
        self.default_member().value()
    }

    pub fn peek(&self) -> Result<Value> {
        self.default_member().peek()
    }

    pub fn set_value(&self, next: impl Into<Value>) -> Result<()> {
        self.default_member().set_value(next)
    }

    pub fn update<F>(&self, reducer: F) -> Result<Value>
    where
        F: FnOnce(Value) -> Result<Value> + 'static,
    {
        self.default_member().update(reducer)
    }

    pub fn reset(&self) -> Result<()> {
        self.default_member().reset()
    }

    pub fn on<F>(&self, listener: F) -> Result<Subscription>
    where
        F: Fn(&Change) + 'static,
    {
        self.default_member().on(listener)
    }

    pub fn map<F>(&self, mapper: F) -> Result<State>
    where
        F: Fn(Value) -> Result<Value> + 'static,
    {
        self.default_member().map(mapper)
    }

    pub fn loadable(&self) -> Result<Loadable> {
        self.default_member().loadable()
    }

    pub fn ptr_eq(&self, other: &Family) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl From<&Family> for State {
    fn from(family: &Family) -> Self {
        family.default_member()
    }
}

impl std::fmt::Debug for Family {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Family")
            .field("options", &self.inner.options)
            .field("members", &self.inner.members.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn equal_arguments_return_the_same_member() {
        let family = Family::family(|args| Ok(Value::from(format!("item-{}", args[0]))));

        let a = family.member(&[Value::from(1)]);
        let b = family.member(&[Value::from(1)]);
        let c = family.member(&[Value::from(2)]);

        assert!(a.ptr_eq(&b));
        assert!(!a.ptr_eq(&c));
        assert_eq!(a.args(), &[Value::from(1)]);
        assert_eq!(c.value().unwrap(), Value::from("item-2"));
        assert_eq!(family.len(), 2);
    }

    #[test]
    fn removed_members_are_rebuilt() {
        let built = Rc::new(Cell::new(0));
        let built_clone = built.clone();
        let family = Family::family(move |_| {
            built_clone.set(built_clone.get() + 1);
            Ok(Value::Null)
        });

        let first = family.member(&[Value::from("k")]);
        first.value().unwrap();
        assert!(first.remove());
        assert!(!first.remove());

        let second = family.member(&[Value::from("k")]);
        assert!(!first.ptr_eq(&second));
        second.value().unwrap();
        assert_eq!(built.get(), 2);

        assert!(family.remove(&[Value::from("k")]).is_some_and(|s| s.ptr_eq(&second)));
        assert!(family.is_empty());
    }

    #[test]
    fn family_root_forwards_to_default_member() {
        let count = Family::state(1);
        count.set_value(2).unwrap();
        assert_eq!(count.default_member().value().unwrap(), Value::from(2));
        assert_eq!(count.value().unwrap(), Value::from(2));
        assert_eq!(State::from(&count), count.default_member());
    }

    #[test]
    fn dispose_releases_every_member() {
        let family = Family::family(|args| Ok(args.first().cloned().unwrap_or_default()));
        let a = family.member(&[Value::from(1)]);
        let root = family.default_member();

        family.dispose();
        assert!(a.is_disposed());
        assert!(root.is_disposed());
        assert!(family.is_empty());
    }
}
