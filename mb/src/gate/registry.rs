//! Observable registration map
//!
//! Holds one readiness flag per declared participant. The key set is fixed when
//! the map is seeded and flags only ever move from `false` to `true`. Every
//! successful `set` hands listeners an immutable snapshot, synchronously and in
//! the order the listeners were added, before `set` returns.

use std::collections::BTreeMap;

use tracing::debug;

/// Errors returned by [`RegistrationMap::set`]
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("Unknown participant: {0}")]
    UnknownKey(String),

    #[error("Participant {0} is already registered and cannot be reset")]
    Revert(String),
}

/// Result of a successful [`RegistrationMap::set`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetOutcome {
    Changed,
    Unchanged,
}

/// Identifies a listener for later removal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type Listener = Box<dyn Fn(&RegistrationSnapshot) + Send + Sync>;

/// Point-in-time copy of the registration flags
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegistrationSnapshot {
    entries: BTreeMap<String, bool>,
}

impl RegistrationSnapshot {
    /// True when every participant has registered (vacuously true when empty)
    pub fn all_ready(&self) -> bool {
        self.entries.values().all(|ready| *ready)
    }

    pub fn missing(&self) -> Vec<String> {
        self.entries
            .iter()
            .filter(|(_, ready)| !**ready)
            .map(|(id, _)| id.clone())
            .collect()
    }

    pub fn registered(&self) -> Vec<String> {
        self.entries
            .iter()
            .filter(|(_, ready)| **ready)
            .map(|(id, _)| id.clone())
            .collect()
    }

    pub fn get(&self, key: &str) -> Option<bool> {
        self.entries.get(key).copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, bool)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), *v))
    }

    pub fn into_map(self) -> BTreeMap<String, bool> {
        self.entries
    }
}

/// Fixed-key readiness map with synchronous change listeners
pub struct RegistrationMap {
    entries: BTreeMap<String, bool>,
    listeners: Vec<(ListenerId, Listener)>,
    next_listener: u64,
}

impl RegistrationMap {
    /// Create a map with every id present and not yet registered
    pub fn seeded<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let entries: BTreeMap<String, bool> = ids.into_iter().map(|id| (id.into(), false)).collect();
        debug!(count = entries.len(), "RegistrationMap::seeded: called");
        Self {
            entries,
            listeners: Vec::new(),
            next_listener: 0,
        }
    }

    pub fn get(&self, key: &str) -> Option<bool> {
        self.entries.get(key).copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn snapshot(&self) -> RegistrationSnapshot {
        RegistrationSnapshot {
            entries: self.entries.clone(),
        }
    }

    /// Store a flag and notify every listener
    pub fn set(&mut self, key: &str, value: bool) -> Result<SetOutcome, RegistryError> {
        debug!(%key, %value, "RegistrationMap::set: called");
        let Some(current) = self.entries.get_mut(key) else {
            return Err(RegistryError::UnknownKey(key.to_string()));
        };
        if *current && !value {
            return Err(RegistryError::Revert(key.to_string()));
        }
        let outcome = if *current == value {
            SetOutcome::Unchanged
        } else {
            *current = value;
            SetOutcome::Changed
        };

        if !self.listeners.is_empty() {
            let snapshot = self.snapshot();
            for (_, listener) in &self.listeners {
                listener(&snapshot);
            }
        }
        Ok(outcome)
    }

    pub fn add_listener<F>(&mut self, listener: F) -> ListenerId
    where
        F: Fn(&RegistrationSnapshot) + Send + Sync + 'static,
    {
        let id = ListenerId(self.next_listener);
        self.next_listener += 1;
        self.listeners.push((id, Box::new(listener)));
        debug!(listener = id.0, "RegistrationMap::add_listener: added");
        id
    }

    pub fn remove_listener(&mut self, id: ListenerId) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|(lid, _)| *lid != id);
        before != self.listeners.len()
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }
}

impl std::fmt::Debug for RegistrationMap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistrationMap")
            .field("entries", &self.entries)
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn test_seeded_all_false() {
        let map = RegistrationMap::seeded(["a", "b"]);
        assert_eq!(map.len(), 2);
        assert_eq!(map.get("a"), Some(false));
        assert_eq!(map.get("c"), None);
        assert!(!map.snapshot().all_ready());
        assert_eq!(map.snapshot().missing(), vec!["a", "b"]);
    }

    #[test]
    fn test_empty_map_is_ready() {
        let map = RegistrationMap::seeded(Vec::<String>::new());
        assert!(map.is_empty());
        assert!(map.snapshot().all_ready());
    }

    #[test]
    fn test_set_outcomes() {
        let mut map = RegistrationMap::seeded(["a"]);
        assert_eq!(map.set("a", true), Ok(SetOutcome::Changed));
        assert_eq!(map.set("a", true), Ok(SetOutcome::Unchanged));
        assert_eq!(map.set("a", false), Err(RegistryError::Revert("a".to_string())));
        assert_eq!(map.set("zz", true), Err(RegistryError::UnknownKey("zz".to_string())));
        assert_eq!(map.get("a"), Some(true));
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn test_snapshot_splits_registered_and_missing() {
        let mut map = RegistrationMap::seeded(["lamp", "hall", "remote"]);
        map.set("hall", true).unwrap();
        let snapshot = map.snapshot();
        assert_eq!(snapshot.registered(), vec!["hall"]);
        assert_eq!(snapshot.missing(), vec!["lamp", "remote"]);
    }

    #[test]
    fn test_listener_sees_post_mutation_snapshot() {
        let mut map = RegistrationMap::seeded(["a", "b"]);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        map.add_listener(move |snap| sink.lock().unwrap().push(snap.all_ready()));

        map.set("a", true).unwrap();
        map.set("b", true).unwrap();
        assert_eq!(*seen.lock().unwrap(), vec![false, true]);
    }

    #[test]
    fn test_listeners_called_in_order() {
        let mut map = RegistrationMap::seeded(["a"]);
        let order = Arc::new(Mutex::new(Vec::new()));
        for n in 0..3 {
            let order = Arc::clone(&order);
            map.add_listener(move |_| order.lock().unwrap().push(n));
        }
        map.set("a", true).unwrap();
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
    }

    #[test]
    fn test_failed_set_does_not_notify() {
        let mut map = RegistrationMap::seeded(["a"]);
        let calls = Arc::new(Mutex::new(0));
        let counter = Arc::clone(&calls);
        map.add_listener(move |_| *counter.lock().unwrap() += 1);
        let _ = map.set("unknown", true);
        assert_eq!(*calls.lock().unwrap(), 0);
    }

    #[test]
    fn test_remove_listener() {
        let mut map = RegistrationMap::seeded(["a"]);
        let calls = Arc::new(Mutex::new(0));
        let counter = Arc::clone(&calls);
        let id = map.add_listener(move |_| *counter.lock().unwrap() += 1);
        assert!(map.remove_listener(id));
        assert!(!map.remove_listener(id));
        map.set("a", true).unwrap();
        assert_eq!(*calls.lock().unwrap(), 0);
        assert_eq!(map.listener_count(), 0);
    }

    proptest! {
        #[test]
        fn prop_keys_fixed_and_monotonic(
            ids in proptest::collection::btree_set("[a-e]", 0..5),
            ops in proptest::collection::vec(("[a-g]", any::<bool>()), 0..30),
        ) {
            let mut map = RegistrationMap::seeded(ids.iter().cloned());
            let mut ever_true = std::collections::BTreeSet::new();
            for (key, value) in ops {
                let _ = map.set(&key, value);
                if map.get(&key) == Some(true) {
                    ever_true.insert(key.clone());
                }
                prop_assert_eq!(map.len(), ids.len());
                for id in &ever_true {
                    prop_assert_eq!(map.get(id), Some(true));
                }
            }
            let snapshot = map.snapshot();
            prop_assert_eq!(snapshot.all_ready(), snapshot.missing().is_empty());
        }
    }
}
