//! Hooks
//!
//! Hooks are memoized sub-computations that live inside a single state's
//! evaluation and survive its re-evaluations.
//!
//! Entries are keyed by an explicit id chosen by the caller rather than by
//! call order, so a hook inside a branch cannot shift its neighbours. An id
//! must always be used with the same hook kind; reusing it with another
//! kind is reported as [`Error::HookOrderViolation`]. Calling a hook outside
//! of a state evaluation fails with [`Error::NoActiveScope`].
//!
//! ```rust,ignore
//! let total = Family::derived(move || {
//!     let rate = hooks::memo("rate", &[currency.value()?], || expensive_lookup())?;
//!     Ok((price.value()?.as_f64().unwrap_or(0.0) * rate.as_f64().unwrap_or(1.0)).into())
//! });
//! ```

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use indexmap::IndexMap;
use tracing::trace;

use super::scope::Scope;
use super::State;
use crate::error::{Error, Result};
use crate::value::Value;

/// The kind of a hook entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookKind {
    /// A value recomputed when its dependency tuple changes.
    Memo,
    /// A persistent mutable slot.
    Cell,
}

impl fmt::Display for HookKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Memo => f.write_str("memo"),
            Self::Cell => f.write_str("cell"),
        }
    }
}

enum Slot {
    Memo { deps: Vec<Value>, value: Value },
    Cell(HookCell),
}

/// A stored hook entry.
pub(crate) struct HookEntry {
    /// Position of the call that created the entry.
    index: usize,
    slot: Slot,
}

impl HookEntry {
    fn kind(&self) -> HookKind {
        match self.slot {
            Slot::Memo { .. } => HookKind::Memo,
            Slot::Cell(_) => HookKind::Cell,
        }
    }
}

/// Per-state hook storage, in creation order.
pub(crate) type HookStore = IndexMap<String, HookEntry>;

/// A persistent mutable slot returned by [`cell`].
///
/// Writing to it does not trigger re-evaluation.
#[derive(Clone)]
pub struct HookCell(Rc<RefCell<Value>>);

impl HookCell {
    pub fn get(&self) -> Value {
        self.0.borrow().clone()
    }

    pub fn set(&self, value: impl Into<Value>) {
        *self.0.borrow_mut() = value.into();
    }

    /// Replace the value with `f(old)`, returning the new value.
    pub fn update(&self, f: impl FnOnce(&Value) -> Value) -> Value {
        let next = f(&self.0.borrow());
        *self.0.borrow_mut() = next.clone();
        next
    }
}

impl fmt::Debug for HookCell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("HookCell").field(&*self.0.borrow()).finish()
    }
}

fn violation(id: &str, entry: &HookEntry, found: HookKind) -> Error {
    Error::HookOrderViolation {
        id: id.to_owned(),
        index: entry.index,
        expected: entry.kind(),
        found,
    }
}

/// Memoize `compute` under `id`, recomputing when `deps` changes.
///
/// Dependencies are compared element-wise with [`Value`] equality.
pub fn memo<F>(id: &str, deps: &[Value], compute: F) -> Result<Value>
where
    F: FnOnce() -> Result<Value>,
{
    let (node, index) = Scope::next_hook()?;

    let cached = node.with_hooks(|hooks| match hooks.get(id) {
        Some(entry) => match &entry.slot {
            Slot::Memo { deps: cached, value } if cached.as_slice() == deps => Ok(Some(value.clone())),
            Slot::Memo { .. } => Ok(None),
            Slot::Cell(_) => Err(violation(id, entry, HookKind::Memo)),
        },
        None => Ok(None),
    })?;
    if let Some(value) = cached {
        trace!(state = node.id(), hook = id, "memo hit");
        return Ok(value);
    }

    // No borrow of the hook store is held while user code runs.
    let value = compute()?;
    node.with_hooks(|hooks| {
        hooks.insert(
            id.to_owned(),
            HookEntry {
                index,
                slot: Slot::Memo {
                    deps: deps.to_vec(),
                    value: value.clone(),
                },
            },
        );
    });
    Ok(value)
}

/// A persistent slot under `id`, created with `init` on first use.
pub fn cell<F>(id: &str, init: F) -> Result<HookCell>
where
    F: FnOnce() -> Value,
{
    let (node, index) = Scope::next_hook()?;

    let existing = node.with_hooks(|hooks| match hooks.get(id) {
        Some(entry) => match &entry.slot {
            Slot::Cell(cell) => Ok(Some(cell.clone())),
            Slot::Memo { .. } => Err(violation(id, entry, HookKind::Cell)),
        },
        None => Ok(None),
    })?;
    if let Some(cell) = existing {
        return Ok(cell);
    }

    let cell = HookCell(Rc::new(RefCell::new(init())));
    node.with_hooks(|hooks| {
        hooks.insert(
            id.to_owned(),
            HookEntry {
                index,
                slot: Slot::Cell(cell.clone()),
            },
        );
    });
    Ok(cell)
}

/// The state currently being evaluated, if any.
pub fn current() -> Option<State> {
    Scope::current()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::Family;
    use std::cell::Cell;

    #[test]
    fn hooks_fail_outside_evaluation() {
        assert!(matches!(memo("x", &[], || Ok(Value::Null)), Err(Error::NoActiveScope)));
        assert!(matches!(cell("x", || Value::Null), Err(Error::NoActiveScope)));
        assert!(current().is_none());
    }

    #[test]
    fn memo_reuses_value_until_deps_change() {
        let source = Family::state(1);
        let key = Family::state("a");
        let computed = Rc::new(Cell::new(0));

        let computed_clone = computed.clone();
        let (src, k) = (source.clone(), key.clone());
        let derived = Family::derived(move || {
            let key = k.value()?;
            let counter = computed_clone.clone();
            let label = memo("label", &[key.clone()], move || {
                counter.set(counter.get() + 1);
                Ok(format!("label-{key}").into())
            })?;
            Ok(Value::list([label, src.value()?]))
        });

        let first = derived.value().unwrap();
        assert_eq!(first.index(0), Some(&Value::from("label-a")));
        assert_eq!(computed.get(), 1);

        // Unrelated change: re-evaluates, memo is reused
        source.set_value(2).unwrap();
        let second = derived.value().unwrap();
        assert_eq!(second.index(1), Some(&Value::from(2)));
        assert_eq!(computed.get(), 1);

        // Dependency tuple changes: memo recomputes
        key.set_value("b").unwrap();
        let third = derived.value().unwrap();
        assert_eq!(third.index(0), Some(&Value::from("label-b")));
        assert_eq!(computed.get(), 2);
    }

    #[test]
    fn cell_persists_across_evaluations() {
        let source = Family::state(0);
        let src = source.clone();
        let runs = Family::derived(move || {
            src.value()?;
            let count = cell("runs", || Value::from(0))?;
            Ok(count.update(|v| Value::from(v.as_f64().unwrap_or(0.0) + 1.0)))
        });

        assert_eq!(runs.value().unwrap(), Value::from(1));
        source.set_value(1).unwrap();
        assert_eq!(runs.value().unwrap(), Value::from(2));
        source.set_value(2).unwrap();
        assert_eq!(runs.value().unwrap(), Value::from(3));
    }

    #[test]
    fn reusing_an_id_with_another_kind_is_a_violation() {
        let flip = Family::state(false);
        let f = flip.clone();
        let derived = Family::derived(move || {
            if f.value()?.as_bool().unwrap_or(false) {
                cell("slot", || Value::Null)?;
            } else {
                memo("slot", &[], || Ok(Value::Null))?;
            }
            Ok(Value::Null)
        });

        assert!(derived.value().is_ok());
        flip.set_value(true).unwrap();
        match derived.value() {
            Err(Error::HookOrderViolation { id, expected, found, .. }) => {
                assert_eq!(id, "slot");
                assert_eq!(expected, HookKind::Memo);
                assert_eq!(found, HookKind::Cell);
            }
            other => panic!("expected a hook violation, got {other:?}"),
        }
    }
}
