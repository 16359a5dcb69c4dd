//! Array-Keyed Instance Cache
//!
//! Maps an ordered tuple of [`Value`]s to one cached instance. Used to key
//! the members of a state family by their arguments.
//!
//! # Implementation
//!
//! A prefix trie: each argument position narrows to a nested map and the
//! terminal node holds the instance. The empty tuple is the default member
//! and is stored outside the trie so it needs no traversal.
//!
//! Deleting a key only clears the terminal slot. Intermediate nodes stay
//! behind, which is a small, slow-growing cost; a cleared slot is never
//! handed out for a different tuple.

use std::cell::{Cell, RefCell};

use indexmap::IndexMap;

use crate::value::Value;

struct TrieNode<T> {
    slot: Option<T>,
    children: IndexMap<Value, TrieNode<T>>,
}

impl<T> Default for TrieNode<T> {
    fn default() -> Self {
        Self {
            slot: None,
            children: IndexMap::new(),
        }
    }
}

impl<T: Clone> TrieNode<T> {
    fn find(&self, key: &[Value]) -> Option<&TrieNode<T>> {
        key.iter().try_fold(self, |node, arg| node.children.get(arg))
    }

    fn find_mut(&mut self, key: &[Value]) -> Option<&mut TrieNode<T>> {
        key.iter().try_fold(self, |node, arg| node.children.get_mut(arg))
    }

    fn collect(&self, out: &mut Vec<T>) {
        if let Some(value) = &self.slot {
            out.push(value.clone());
        }
        for child in self.children.values() {
            child.collect(out);
        }
    }
}

/// Cache of instances keyed by argument tuples.
pub(crate) struct InstanceCache<T> {
    default: RefCell<Option<T>>,
    root: RefCell<TrieNode<T>>,
    count: Cell<usize>,
}

impl<T: Clone> InstanceCache<T> {
    pub(crate) fn new() -> Self {
        Self {
            default: RefCell::new(None),
            root: RefCell::new(TrieNode::default()),
            count: Cell::new(0),
        }
    }

    pub(crate) fn get(&self, key: &[Value]) -> Option<T> {
        if key.is_empty() {
            return self.default.borrow().clone();
        }
        self.root.borrow().find(key).and_then(|node| node.slot.clone())
    }

    /// Return the cached instance, creating it with `factory` on first access.
    ///
    /// No borrow is held while `factory` runs, so it may use the cache.
    pub(crate) fn get_or_add<F>(&self, key: &[Value], factory: F) -> T
    where
        F: FnOnce() -> T,
    {
        if let Some(existing) = self.get(key) {
            return existing;
        }
        let created = factory();
        self.insert(key, created.clone());
        created
    }

    fn insert(&self, key: &[Value], value: T) {
        let previous = if key.is_empty() {
            self.default.borrow_mut().replace(value)
        } else {
            let mut root = self.root.borrow_mut();
            let node = key
                .iter()
                .fold(&mut *root, |node, arg| node.children.entry(arg.clone()).or_default());
            node.slot.replace(value)
        };
        if previous.is_none() {
            self.count.set(self.count.get() + 1);
        }
    }

    /// Clear the slot for `key`, returning what it held.
    pub(crate) fn delete(&self, key: &[Value]) -> Option<T> {
        let removed = if key.is_empty() {
            self.default.borrow_mut().take()
        } else {
            self.root.borrow_mut().find_mut(key).and_then(|node| node.slot.take())
        };
        if removed.is_some() {
            self.count.set(self.count.get() - 1);
        }
        removed
    }

    pub(crate) fn len(&self) -> usize {
        self.count.get()
    }

    /// Every cached instance, default first.
    pub(crate) fn values(&self) -> Vec<T> {
        let mut out = Vec::with_capacity(self.len());
        if let Some(value) = self.default.borrow().clone() {
            out.push(value);
        }
        self.root.borrow().collect(&mut out);
        out
    }

    /// Remove every instance and the trie structure.
    pub(crate) fn clear(&self) -> Vec<T> {
        let values = self.values();
        self.default.borrow_mut().take();
        *self.root.borrow_mut() = TrieNode::default();
        self.count.set(0);
        values
    }
}

impl<T: Clone> Default for InstanceCache<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::rc::Rc;

    fn key(parts: &[i32]) -> Vec<Value> {
        parts.iter().map(|p| Value::from(*p)).collect()
    }

    #[test]
    fn structurally_equal_keys_share_an_instance() {
        let cache = InstanceCache::<Rc<str>>::new();
        let a = cache.get_or_add(&key(&[1, 2]), || "a".into());
        let b = cache.get_or_add(&key(&[1, 2]), || "b".into());
        assert!(Rc::ptr_eq(&a, &b));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn prefixes_are_distinct_keys() {
        let cache = InstanceCache::<i32>::new();
        cache.get_or_add(&key(&[1]), || 1);
        cache.get_or_add(&key(&[1, 2]), || 12);
        cache.get_or_add(&[], || 0);

        assert_eq!(cache.get(&key(&[1])), Some(1));
        assert_eq!(cache.get(&key(&[1, 2])), Some(12));
        assert_eq!(cache.get(&[]), Some(0));
        assert_eq!(cache.get(&key(&[2])), None);
        assert_eq!(cache.values(), vec![0, 1, 12]);
    }

    #[test]
    fn delete_clears_only_the_terminal_slot() {
        let cache = InstanceCache::<i32>::new();
        cache.get_or_add(&key(&[1]), || 1);
        cache.get_or_add(&key(&[1, 2]), || 12);

        assert_eq!(cache.delete(&key(&[1])), Some(1));
        assert_eq!(cache.delete(&key(&[1])), None);
        assert_eq!(cache.get(&key(&[1, 2])), Some(12));
        assert_eq!(cache.len(), 1);

        // A deleted key is rebuilt by the next lookup.
        assert_eq!(cache.get_or_add(&key(&[1]), || 100), 100);
    }

    #[test]
    fn clear_empties_the_cache() {
        let cache = InstanceCache::<i32>::new();
        cache.get_or_add(&key(&[3]), || 3);
        cache.get_or_add(&[], || 0);
        assert_eq!(cache.clear(), vec![0, 3]);
        assert_eq!(cache.len(), 0);
        assert!(cache.get(&[]).is_none());
    }
}
