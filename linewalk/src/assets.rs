use std::collections::HashMap;
use std::rc::{Rc, Weak};

/// Cache of shared, read-only data keyed by name.
///
/// Entries are held weakly: the cache never keeps anything alive by itself,
/// so once every user drops its handle the next lookup produces a fresh one.
pub struct AssetCache<T> {
    entries: HashMap<String, Weak<T>>,
}

impl<T> AssetCache<T> {
    /// Create a new cache with no entries.
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// Get a live handle by key, if one exists.
    pub fn get(&self, key: &str) -> Option<Rc<T>> {
        self.entries.get(key).and_then(Weak::upgrade)
    }

    /// Store `value` under `key`, replacing any earlier entry, and return the
    /// strong handle the caller must keep.
    pub fn insert(&mut self, key: &str, value: T) -> Rc<T> {
        let handle = Rc::new(value);
        self.entries.insert(key.to_string(), Rc::downgrade(&handle));
        handle
    }

    /// Return the cached handle for `key`, or produce, cache and return a new
    /// one.
    pub fn load_with<E>(&mut self, key: &str, produce: impl FnOnce(&str) -> Result<T, E>) -> Result<Rc<T>, E> {
        if let Some(handle) = self.get(key) {
            return Ok(handle);
        }
        let value = produce(key)?;
        Ok(self.insert(key, value))
    }

    /// Returns true if a live entry exists for `key`.
    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Drop entries nobody holds anymore.
    pub fn purge(&mut self) {
        self.entries.retain(|_, weak| weak.strong_count() > 0);
    }

    /// Number of entries, dead ones included until the next [`purge`](Self::purge).
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<T> Default for AssetCache<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hits_share_one_handle() {
        let mut cache = AssetCache::new();
        let first = cache.load_with("a", |_| Ok::<_, ()>(vec![1, 2])).unwrap();
        let second = cache
            .load_with("a", |_| -> Result<Vec<i32>, ()> { panic!("should be cached") })
            .unwrap();
        assert!(Rc::ptr_eq(&first, &second));
    }

    #[test]
    fn dropped_entries_are_produced_again() {
        let mut cache = AssetCache::new();
        let handle = cache.insert("a", 1);
        assert!(cache.contains("a"));
        drop(handle);
        assert!(!cache.contains("a"));
        let mut produced = false;
        let again = cache
            .load_with("a", |_| {
                produced = true;
                Ok::<_, ()>(2)
            })
            .unwrap();
        assert!(produced);
        assert_eq!(*again, 2);
    }

    #[test]
    fn purge_forgets_dead_entries() {
        let mut cache = AssetCache::new();
        let kept = cache.insert("kept", 1);
        drop(cache.insert("gone", 2));
        assert_eq!(cache.len(), 2);
        cache.purge();
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get("kept").as_deref(), Some(&*kept));
    }

    #[test]
    fn producer_errors_are_not_cached() {
        let mut cache: AssetCache<i32> = AssetCache::new();
        assert_eq!(cache.load_with("a", |key| Err(key.len())), Err(1));
        assert!(cache.is_empty());
    }
}
