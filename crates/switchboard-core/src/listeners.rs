//! Keyed handler registry with stable handles.
//!
//! Handlers are kept in registration order. Each registration gets a
//! [`ListenerId`], and removal goes through that id, so two registrations of
//! the same closure are still told apart.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Handle returned for every registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

impl ListenerId {
    #[must_use]
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

struct Entry<K, H> {
    id: ListenerId,
    key: K,
    handler: H,
}

/// Ordered `key -> handler` bindings.
pub struct Registry<K, H> {
    next_id: AtomicU64,
    entries: Mutex<Vec<Entry<K, H>>>,
}

impl<K, H> Registry<K, H>
where
    K: PartialEq + Clone,
    H: Clone,
{
    #[must_use]
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            entries: Mutex::new(Vec::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Entry<K, H>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a handler under `key`.
    pub fn insert(&self, key: K, handler: H) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.lock().push(Entry { id, key, handler });
        id
    }

    /// Remove a single registration.
    ///
    /// Returns `true` if the registration existed.
    pub fn remove(&self, id: ListenerId) -> bool {
        let mut entries = self.lock();
        let before = entries.len();
        entries.retain(|e| e.id != id);
        entries.len() != before
    }

    /// Remove a registration only if it is bound under `key`.
    pub fn remove_under(&self, key: &K, id: ListenerId) -> bool {
        let mut entries = self.lock();
        let before = entries.len();
        entries.retain(|e| !(e.id == id && e.key == *key));
        entries.len() != before
    }

    /// Remove every registration under `key`, returning how many were removed.
    pub fn remove_key(&self, key: &K) -> usize {
        let mut entries = self.lock();
        let before = entries.len();
        entries.retain(|e| e.key != *key);
        before - entries.len()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    /// Handlers whose key satisfies `predicate`, in registration order.
    #[must_use]
    pub fn select(&self, predicate: impl Fn(&K) -> bool) -> Vec<H> {
        self.lock()
            .iter()
            .filter(|e| predicate(&e.key))
            .map(|e| e.handler.clone())
            .collect()
    }

    /// Handlers registered under exactly `key`.
    #[must_use]
    pub fn get(&self, key: &K) -> Vec<H> {
        self.select(|k| k == key)
    }

    #[must_use]
    pub fn contains(&self, id: ListenerId) -> bool {
        self.lock().iter().any(|e| e.id == id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

impl<K, H> Default for Registry<K, H>
where
    K: PartialEq + Clone,
    H: Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, H> fmt::Debug for Registry<K, H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let len = self
            .entries
            .lock()
            .map(|e| e.len())
            .unwrap_or_else(|p| p.into_inner().len());
        f.debug_struct("Registry").field("len", &len).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registration_order_is_kept() {
        let registry: Registry<&str, u32> = Registry::new();
        registry.insert("a", 1);
        registry.insert("b", 2);
        registry.insert("a", 3);

        assert_eq!(registry.get(&"a"), vec![1, 3]);
        assert_eq!(registry.select(|_| true), vec![1, 2, 3]);
    }

    #[test]
    fn test_identical_handlers_removed_by_id() {
        let registry: Registry<&str, u32> = Registry::new();
        let first = registry.insert("a", 7);
        let second = registry.insert("a", 7);
        assert_ne!(first, second);

        assert!(registry.remove(first));
        assert!(!registry.remove(first));
        assert!(registry.contains(second));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_remove_key_and_under() {
        let registry: Registry<&str, u32> = Registry::new();
        let a = registry.insert("a", 1);
        registry.insert("a", 2);
        registry.insert("b", 3);

        assert!(!registry.remove_under(&"b", a));
        assert!(registry.remove_under(&"a", a));
        assert_eq!(registry.remove_key(&"a"), 1);
        assert_eq!(registry.len(), 1);

        registry.clear();
        assert!(registry.is_empty());
    }
}
