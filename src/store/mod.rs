use bytes::Bytes;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
struct Entry {
    value: Bytes,
    expires_at: Option<Instant>,
}

impl Entry {
    /// A zero `ttl` means no expiration. So does one too large to represent.
    fn new(value: Bytes, ttl: Option<Duration>, now: Instant) -> Self {
        let expires_at = ttl
            .filter(|ttl| !ttl.is_zero())
            .and_then(|ttl| now.checked_add(ttl));
        Self { value, expires_at }
    }

    fn is_expired_at(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|expires_at| expires_at <= now)
    }
}

/// Shared key-value store with per-key expiration.
///
/// Cloning is cheap; all clones see the same data.
#[derive(Clone, Default)]
pub struct Store {
    data: Arc<RwLock<HashMap<Bytes, Entry>>>,
}

impl Store {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, key: Bytes, value: Bytes, ttl: Option<Duration>) {
        let entry = Entry::new(value, ttl, Instant::now());
        self.write().insert(key, entry);
    }

    /// Returns the live value for `key`, removing it if it has expired.
    pub fn get(&self, key: &[u8]) -> Option<Bytes> {
        let now = Instant::now();
        {
            let data = self.read();
            match data.get(key) {
                None => return None,
                Some(entry) if !entry.is_expired_at(now) => return Some(entry.value.clone()),
                Some(_) => {}
            }
        }

        // The entry may have been replaced or removed between the two locks.
        let mut data = self.write();
        if data.get(key).is_some_and(|entry| entry.is_expired_at(now)) {
            data.remove(key);
        }
        None
    }

    pub fn delete(&self, key: &[u8]) -> bool {
        self.write().remove(key).is_some()
    }

    /// Removes every expired entry and returns how many were dropped.
    pub fn sweep_expired(&self) -> usize {
        let now = Instant::now();
        let mut data = self.write();
        let before = data.len();
        data.retain(|_, entry| !entry.is_expired_at(now));
        before - data.len()
    }

    /// Number of stored entries, including expired ones not yet swept.
    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // A panic while holding the lock can't leave the map half-updated, so
    // poisoning is ignored.
    fn read(&self) -> RwLockReadGuard<'_, HashMap<Bytes, Entry>> {
        self.data.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<Bytes, Entry>> {
        self.data.write().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn key(s: &str) -> Bytes {
        Bytes::copy_from_slice(s.as_bytes())
    }

    #[test]
    fn set_then_get() {
        let store = Store::new();
        store.set(key("foo"), key("bar"), None);
        assert_eq!(store.get(b"foo"), Some(key("bar")));
    }

    #[test]
    fn missing_key() {
        let store = Store::new();
        assert_eq!(store.get(b"missing"), None);
    }

    #[test]
    fn entry_expires_at_its_deadline() {
        let now = Instant::now();
        let entry = Entry::new(key("x"), Some(Duration::from_secs(1)), now);
        assert!(!entry.is_expired_at(now));
        assert!(!entry.is_expired_at(now + Duration::from_millis(999)));
        assert!(entry.is_expired_at(now + Duration::from_secs(1)));
        assert!(entry.is_expired_at(now + Duration::from_secs(5)));
    }

    #[test]
    fn zero_or_huge_ttl_never_expires() {
        let now = Instant::now();
        let far = now + Duration::from_secs(10 * 365 * 24 * 3600);
        assert!(!Entry::new(key("x"), Some(Duration::ZERO), now).is_expired_at(far));
        assert!(!Entry::new(key("x"), Some(Duration::MAX), now).is_expired_at(far));
        assert!(!Entry::new(key("x"), None, now).is_expired_at(far));
    }

    #[test]
    fn expired_key_is_lazily_removed() {
        let store = Store::new();
        store.set(key("temp"), key("x"), Some(Duration::from_millis(20)));
        assert_eq!(store.get(b"temp"), Some(key("x")));

        thread::sleep(Duration::from_millis(40));
        assert_eq!(store.len(), 1);
        assert_eq!(store.get(b"temp"), None);
        assert!(store.is_empty());
    }

    #[test]
    fn overwrite_without_ttl_clears_expiration() {
        let store = Store::new();
        store.set(key("k"), key("v1"), Some(Duration::from_millis(20)));
        store.set(key("k"), key("v2"), None);

        thread::sleep(Duration::from_millis(40));
        assert_eq!(store.sweep_expired(), 0);
        assert_eq!(store.get(b"k"), Some(key("v2")));
    }

    #[test]
    fn sweep_only_removes_expired_entries() {
        let store = Store::new();
        store.set(key("short"), key("1"), Some(Duration::from_millis(10)));
        store.set(key("long"), key("2"), Some(Duration::from_secs(60)));
        store.set(key("forever"), key("3"), None);

        thread::sleep(Duration::from_millis(30));
        assert_eq!(store.sweep_expired(), 1);
        assert_eq!(store.len(), 2);
        assert_eq!(store.get(b"long"), Some(key("2")));
        assert_eq!(store.get(b"forever"), Some(key("3")));
    }

    #[test]
    fn delete_is_idempotent() {
        let store = Store::new();
        store.set(key("k"), key("v"), None);
        assert!(store.delete(b"k"));
        assert!(!store.delete(b"k"));
        assert!(!store.delete(b"never-set"));
        assert_eq!(store.get(b"k"), None);
    }

    #[test]
    fn concurrent_readers_race_on_expired_key() {
        let store = Store::new();
        store.set(key("k"), key("v"), Some(Duration::from_millis(5)));
        thread::sleep(Duration::from_millis(20));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = store.clone();
                thread::spawn(move || store.get(b"k"))
            })
            .collect();
        for handle in handles {
            assert_eq!(handle.join().unwrap(), None);
        }
        assert!(store.is_empty());
    }

    #[test]
    fn concurrent_writers_keep_keys_isolated() {
        let store = Store::new();
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let store = store.clone();
                thread::spawn(move || {
                    for n in 0..100 {
                        let k = key(&format!("key_{i}"));
                        let v = key(&format!("val_{i}_{n}"));
                        store.set(k.clone(), v.clone(), None);
                        assert_eq!(store.get(&k), Some(v));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(store.len(), 8);
    }
}
