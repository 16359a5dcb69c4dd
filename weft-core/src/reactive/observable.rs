//! Observable Hub
//!
//! A minimal multi-subscriber broadcaster. Every other component (state
//! change events, effect dispatch events, loadable settlement, watchers)
//! is built on it.
//!
//! # Dispatch Semantics
//!
//! `dispatch` takes a snapshot of the listener list before calling anyone,
//! so listeners added or removed while a dispatch is running do not change
//! who receives that dispatch. Listeners run synchronously, in registration
//! order, and no internal borrow is held while they run: a listener may
//! freely subscribe, unsubscribe or dispatch again.

use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use super::runtime::Runtime;

/// Unique identifier for a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    /// Generate a new unique subscription ID.
    pub fn new() -> Self {
        Self(Runtime::next_id())
    }
}

impl Default for SubscriptionId {
    fn default() -> Self {
        Self::new()
    }
}

type Listener<A> = Rc<dyn Fn(&A)>;

struct ObservableInner<A> {
    listeners: RefCell<Vec<(SubscriptionId, Listener<A>)>>,
}

/// A set of listeners for events of type `A`.
///
/// Clones share the same listener set.
pub struct Observable<A> {
    inner: Rc<ObservableInner<A>>,
}

impl<A: 'static> Observable<A> {
    /// Create an observable with no listeners.
    pub fn new() -> Self {
        Self {
            inner: Rc::new(ObservableInner {
                listeners: RefCell::new(Vec::new()),
            }),
        }
    }

    /// Register a listener.
    ///
    /// The listener stays registered until the returned subscription is
    /// unsubscribed or dropped.
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&A) + 'static,
    {
        let id = SubscriptionId::new();
        self.inner
            .listeners
            .borrow_mut()
            .push((id, Rc::new(listener)));

        let weak: Weak<ObservableInner<A>> = Rc::downgrade(&self.inner);
        Subscription::new(id, move || {
            if let Some(inner) = weak.upgrade() {
                inner.listeners.borrow_mut().retain(|(entry, _)| *entry != id);
            }
        })
    }

    /// Call every listener registered at this moment.
    pub fn dispatch(&self, event: &A) {
        let snapshot: Vec<Listener<A>> = self
            .inner
            .listeners
            .borrow()
            .iter()
            .map(|(_, listener)| Rc::clone(listener))
            .collect();

        for listener in snapshot {
            listener(event);
        }
    }

    /// Remove every listener.
    pub fn clear(&self) {
        let removed = std::mem::take(&mut *self.inner.listeners.borrow_mut());
        drop(removed);
    }

    /// Get the number of listeners.
    pub fn len(&self) -> usize {
        self.inner.listeners.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<A: 'static> Default for Observable<A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A> Clone for Observable<A> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<A> fmt::Debug for Observable<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Observable")
            .field("listeners", &self.inner.listeners.borrow().len())
            .finish()
    }
}

/// Handle to a registered listener.
///
/// Unsubscribing is idempotent. Dropping the handle unsubscribes, unless it
/// was [detached](Subscription::detach).
#[must_use = "dropping a subscription unsubscribes its listener"]
pub struct Subscription {
    id: SubscriptionId,
    remove: RefCell<Option<Box<dyn FnOnce()>>>,
}

impl Subscription {
    pub(crate) fn new<F>(id: SubscriptionId, remove: F) -> Self
    where
        F: FnOnce() + 'static,
    {
        Self {
            id,
            remove: RefCell::new(Some(Box::new(remove))),
        }
    }

    /// A subscription that is not attached to anything.
    pub fn empty() -> Self {
        Self {
            id: SubscriptionId::new(),
            remove: RefCell::new(None),
        }
    }

    /// Get the subscription's unique ID.
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Remove the listener. Later calls do nothing.
    pub fn unsubscribe(&self) {
        let remove = self.remove.borrow_mut().take();
        if let Some(remove) = remove {
            remove();
        }
    }

    /// Check whether the listener is still registered through this handle.
    pub fn is_active(&self) -> bool {
        self.remove.borrow().is_some()
    }

    /// Keep the listener registered for as long as its source lives.
    pub fn detach(self) {
        self.remove.borrow_mut().take();
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("active", &self.is_active())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn subscription_ids_are_unique() {
        let id1 = SubscriptionId::new();
        let id2 = SubscriptionId::new();
        let id3 = SubscriptionId::new();

        assert_ne!(id1, id2);
        assert_ne!(id2, id3);
        assert_ne!(id1, id3);
    }

    #[test]
    fn dispatch_reaches_listeners_in_order() {
        let observable = Observable::<i32>::new();
        let seen = Rc::new(RefCell::new(Vec::new()));

        let seen_a = seen.clone();
        let _a = observable.subscribe(move |v| seen_a.borrow_mut().push(("a", *v)));
        let seen_b = seen.clone();
        let _b = observable.subscribe(move |v| seen_b.borrow_mut().push(("b", *v)));

        observable.dispatch(&7);
        assert_eq!(*seen.borrow(), vec![("a", 7), ("b", 7)]);
    }

    #[test]
    fn unsubscribe_is_idempotent() {
        let observable = Observable::<()>::new();
        let calls = Rc::new(Cell::new(0));

        let calls_clone = calls.clone();
        let subscription = observable.subscribe(move |_| calls_clone.set(calls_clone.get() + 1));
        let _other = observable.subscribe(|_| {});

        observable.dispatch(&());
        subscription.unsubscribe();
        subscription.unsubscribe();
        observable.dispatch(&());

        assert_eq!(calls.get(), 1);
        assert_eq!(observable.len(), 1);
        assert!(!subscription.is_active());
    }

    #[test]
    fn drop_unsubscribes_unless_detached() {
        let observable = Observable::<()>::new();

        drop(observable.subscribe(|_| {}));
        assert!(observable.is_empty());

        observable.subscribe(|_| {}).detach();
        assert_eq!(observable.len(), 1);
    }

    #[test]
    fn listeners_added_during_dispatch_wait_for_the_next_one() {
        let observable = Observable::<()>::new();
        let late_calls = Rc::new(Cell::new(0));
        let held = Rc::new(RefCell::new(Vec::new()));

        let obs = observable.clone();
        let late = late_calls.clone();
        let held_clone = held.clone();
        let _adder = observable.subscribe(move |_| {
            let late = late.clone();
            let subscription = obs.subscribe(move |_| late.set(late.get() + 1));
            held_clone.borrow_mut().push(subscription);
        });

        observable.dispatch(&());
        assert_eq!(late_calls.get(), 0);

        observable.dispatch(&());
        assert_eq!(late_calls.get(), 1);
    }

    #[test]
    fn listeners_removed_during_dispatch_still_see_it() {
        let observable = Observable::<()>::new();
        let calls = Rc::new(Cell::new(0));
        let victim: Rc<RefCell<Option<Subscription>>> = Rc::new(RefCell::new(None));

        let victim_clone = victim.clone();
        let _remover = observable.subscribe(move |_| {
            if let Some(subscription) = victim_clone.borrow().as_ref() {
                subscription.unsubscribe();
            }
        });
        let calls_clone = calls.clone();
        *victim.borrow_mut() = Some(observable.subscribe(move |_| calls_clone.set(calls_clone.get() + 1)));

        observable.dispatch(&());
        assert_eq!(calls.get(), 1);

        observable.dispatch(&());
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn clear_removes_everything() {
        let observable = Observable::<()>::new();
        let subscription = observable.subscribe(|_| {});
        observable.clear();
        assert!(observable.is_empty());

        // Unsubscribing after a clear is harmless.
        subscription.unsubscribe();
    }
}
