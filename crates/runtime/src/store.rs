use crate::path::{find_key_by_suffix, is_forbidden, StateMap};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

/// The flat state map plus the per-key bookkeeping the DOM-write guards need.
#[derive(Debug, Default)]
pub struct StateStore {
    values: StateMap,
    in_flight: HashSet<String>,
    last_edit: HashMap<String, Instant>,
}

impl StateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn values(&self) -> &StateMap {
        &self.values
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub(crate) fn get_mut(&mut self, key: &str) -> Option<&mut Value> {
        self.values.get_mut(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    /// Store `value` under `key`. Forbidden paths are refused.
    pub fn set(&mut self, key: &str, value: Value) -> bool {
        if is_forbidden(key) {
            log::warn!("Refusing to store forbidden key {key:?}");
            return false;
        }
        self.values.insert(key.to_string(), value);
        true
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.values.shift_remove(key)
    }

    /// Drop everything; used on route transitions.
    pub fn clear(&mut self) {
        self.values.clear();
        self.in_flight.clear();
        self.last_edit.clear();
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Real key a script or argument name refers to: the exact key, else the
    /// first key whose final segment matches, else the name itself.
    pub fn real_key(&self, name: &str) -> String {
        find_key_by_suffix(&self.values, name)
            .cloned()
            .unwrap_or_else(|| name.to_string())
    }

    pub fn mark_in_flight(&mut self, key: &str) {
        self.in_flight.insert(key.to_string());
    }

    pub fn clear_in_flight(&mut self, key: &str) {
        self.in_flight.remove(key);
    }

    pub fn is_in_flight(&self, key: &str) -> bool {
        self.in_flight.contains(key)
    }

    pub fn in_flight_keys(&self) -> impl Iterator<Item = &String> {
        self.in_flight.iter()
    }

    pub fn record_edit(&mut self, key: &str) {
        self.last_edit.insert(key.to_string(), Instant::now());
    }

    /// True if the user edited `key` less than `window` ago.
    pub fn edited_within(&self, key: &str, window: Duration) -> bool {
        self.last_edit
            .get(key)
            .is_some_and(|at| at.elapsed() < window)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn forbidden_keys_are_not_stored() {
        let mut store = StateStore::new();
        assert!(!store.set("a.__proto__", json!(1)));
        assert!(store.is_empty());
    }

    #[test]
    fn real_key_falls_back_to_suffix_match() {
        let mut store = StateStore::new();
        store.set("Counter#2.count", json!(1));
        assert_eq!(store.real_key("count"), "Counter#2.count");
        assert_eq!(store.real_key("other"), "other");
    }

    #[test]
    fn edit_window() {
        let mut store = StateStore::new();
        store.record_edit("q");
        assert!(store.edited_within("q", Duration::from_secs(60)));
        assert!(!store.edited_within("q", Duration::ZERO));
        assert!(!store.edited_within("other", Duration::from_secs(60)));
    }

    #[test]
    fn clear_forgets_bookkeeping() {
        let mut store = StateStore::new();
        store.set("a", json!(1));
        store.mark_in_flight("a");
        store.clear();
        assert!(!store.is_in_flight("a"));
        assert!(store.get("a").is_none());
    }
}
