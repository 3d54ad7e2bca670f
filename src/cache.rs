//! Process-lifetime memo store.
//!
//! Each slot remembers the value it was first created with. A reset puts that
//! original default back, regardless of later writes.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, OnceLock, PoisonError};

#[derive(Debug, Clone, PartialEq)]
pub struct CacheSlot<V> {
    pub value: V,
    pub default: V,
}

impl<V: Clone> CacheSlot<V> {
    fn new(value: V) -> Self {
        Self {
            default: value.clone(),
            value,
        }
    }
}

/// Keyed memo store, safe to share between threads.
#[derive(Debug)]
pub struct ProcessCache<V> {
    slots: Mutex<HashMap<String, CacheSlot<V>>>,
}

impl<V> Default for ProcessCache<V> {
    fn default() -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
        }
    }
}

impl<V: Clone> ProcessCache<V> {
    pub fn new() -> Self {
        Self::default()
    }

    // A panic while holding the lock cannot leave a slot half-written.
    fn slots(&self) -> MutexGuard<'_, HashMap<String, CacheSlot<V>>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// First access stores `default` as both value and remembered default.
    /// Later accesses return the live value, or the remembered default when
    /// `reset` is set. `default` is ignored once the slot exists.
    pub fn get(&self, key: &str, default: V, reset: bool) -> V {
        let mut slots = self.slots();
        match slots.get_mut(key) {
            Some(slot) => {
                if reset {
                    slot.value = slot.default.clone();
                }
                slot.value.clone()
            }
            None => {
                slots.insert(key.to_string(), CacheSlot::new(default.clone()));
                default
            }
        }
    }

    /// Live value for `key`, if the slot exists.
    pub fn current(&self, key: &str) -> Option<V> {
        self.slots().get(key).map(|slot| slot.value.clone())
    }

    /// Overwrite the live value. A new slot takes `value` as its default.
    pub fn set(&self, key: &str, value: V) {
        let mut slots = self.slots();
        match slots.get_mut(key) {
            Some(slot) => slot.value = value,
            None => {
                slots.insert(key.to_string(), CacheSlot::new(value));
            }
        }
    }

    /// Compute the value on first access only.
    pub fn get_or_insert_with(&self, key: &str, f: impl FnOnce() -> V) -> V {
        let mut slots = self.slots();
        slots
            .entry(key.to_string())
            .or_insert_with(|| CacheSlot::new(f()))
            .value
            .clone()
    }

    /// Like [`get_or_insert_with`](Self::get_or_insert_with); a failed
    /// computation leaves no slot behind.
    pub fn try_get_or_insert_with<E>(
        &self,
        key: &str,
        f: impl FnOnce() -> Result<V, E>,
    ) -> Result<V, E> {
        if let Some(value) = self.current(key) {
            return Ok(value);
        }
        let value = f()?;
        let mut slots = self.slots();
        Ok(slots
            .entry(key.to_string())
            .or_insert_with(|| CacheSlot::new(value))
            .value
            .clone())
    }

    /// Every live value. With `reset`, all defaults are restored first.
    pub fn get_all(&self, reset: bool) -> HashMap<String, V> {
        let mut slots = self.slots();
        if reset {
            for slot in slots.values_mut() {
                slot.value = slot.default.clone();
            }
        }
        slots
            .iter()
            .map(|(key, slot)| (key.clone(), slot.value.clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.slots().len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots().is_empty()
    }
}

impl ProcessCache<serde_json::Value> {
    /// Process-wide cache for callers that cannot hold their own instance.
    pub fn global() -> &'static Self {
        static GLOBAL: OnceLock<ProcessCache<serde_json::Value>> = OnceLock::new();
        GLOBAL.get_or_init(ProcessCache::new)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_reset_restores_original_default() {
        let cache = ProcessCache::new();
        assert_eq!(cache.get("x", 10, false), 10);
        assert_eq!(cache.get("x", 999, true), 10);
        assert_eq!(cache.get("x", 0, false), 10);
    }

    #[test]
    fn test_reset_after_set() {
        let cache = ProcessCache::new();
        cache.get("x", 1, false);
        cache.set("x", 2);
        assert_eq!(cache.current("x"), Some(2));
        assert_eq!(cache.get("x", 0, true), 1);
    }

    #[test]
    fn test_get_all_with_reset() {
        let cache = ProcessCache::new();
        cache.get("a", 1, false);
        cache.get("b", 2, false);
        cache.set("a", 5);

        assert_eq!(cache.get_all(false)["a"], 5);
        let all = cache.get_all(true);
        assert_eq!(all.len(), 2);
        assert_eq!(all["a"], 1);
        assert_eq!(all["b"], 2);
    }

    #[test]
    fn test_get_or_insert_with_runs_once() {
        let cache = ProcessCache::new();
        let mut calls = 0;
        cache.get_or_insert_with("k", || {
            calls += 1;
            "v".to_string()
        });
        let value = cache.get_or_insert_with("k", || {
            calls += 1;
            "other".to_string()
        });
        assert_eq!(value, "v");
        assert_eq!(calls, 1);
    }

    #[test]
    fn test_failed_computation_not_cached() {
        let cache: ProcessCache<i32> = ProcessCache::new();
        let err: Result<i32, &str> = cache.try_get_or_insert_with("k", || Err("nope"));
        assert!(err.is_err());
        assert!(cache.is_empty());
        assert_eq!(cache.try_get_or_insert_with::<()>("k", || Ok(3)), Ok(3));
    }

    #[test]
    fn test_global_cache_is_shared() {
        ProcessCache::global().set("cache-test-shared", json!({"n": 1}));
        assert_eq!(
            ProcessCache::global().current("cache-test-shared"),
            Some(json!({"n": 1}))
        );
    }
}
