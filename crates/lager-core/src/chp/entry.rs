// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The CHP entry data model and the replicated map both the server and
//! client mirror, per `spec.md` §3.

use super::ids::Uuid;
use std::collections::HashMap;

/// A single CHP entry.
///
/// `properties` is reserved (`spec.md` §3: "empty string in current
/// revision") and carried only so the wire shape round-trips; nothing reads
/// it yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub value: String,
    pub sequence: u64,
    pub owner_uuid: Uuid,
    pub properties: String,
}

/// The replicated key/value map, shared by the server's authoritative copy
/// and every client's mirror.
///
/// Invariants enforced here (`spec.md` §3):
/// - an update with `sequence <= current local sequence` for that mutation
///   stream is rejected outright;
/// - an empty value means "delete this key", never "store an empty string".
#[derive(Debug, Default, Clone)]
pub struct ChpMap {
    entries: HashMap<String, Entry>,
}

/// Outcome of applying a single incoming update to a [`ChpMap`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    Inserted,
    Updated,
    Removed,
    /// The update's sequence did not exceed the entry's current sequence
    /// and was discarded, per the monotonicity invariant.
    Rejected,
    /// A delete for a key that was not present; a no-op, but not an error.
    NoSuchKey,
}

impl ChpMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&Entry> {
        self.entries.get(key)
    }

    /// Applies an update, honoring the monotonicity and empty-value-deletes
    /// invariants. `sequence` must be strictly greater than the entry's
    /// current sequence (if any) for the update to take effect.
    pub fn apply(&mut self, key: &str, value: &str, sequence: u64, owner_uuid: Uuid) -> ApplyOutcome {
        if let Some(existing) = self.entries.get(key) {
            if sequence <= existing.sequence {
                return ApplyOutcome::Rejected;
            }
        }

        if value.is_empty() {
            return match self.entries.remove(key) {
                Some(_) => ApplyOutcome::Removed,
                None => ApplyOutcome::NoSuchKey,
            };
        }

        let outcome = if self.entries.contains_key(key) {
            ApplyOutcome::Updated
        } else {
            ApplyOutcome::Inserted
        };

        self.entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                sequence,
                owner_uuid,
                properties: String::new(),
            },
        );

        outcome
    }

    /// A plain `key -> value` snapshot, the shape `get_map()` returns to callers.
    pub fn to_value_map(&self) -> HashMap<String, String> {
        self.entries
            .iter()
            .map(|(k, e)| (k.clone(), e.value.clone()))
            .collect()
    }

    /// A `owner_uuid -> key` index, the shape `get_uuid_map()` returns (used
    /// by the mug to resolve a sample's UUID to its registered topic name).
    pub fn to_uuid_map(&self) -> HashMap<Uuid, String> {
        self.entries
            .iter()
            .map(|(k, e)| (e.owner_uuid, k.clone()))
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Entry)> {
        self.entries.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_then_update_then_delete() {
        let mut map = ChpMap::new();
        let owner = Uuid::nil();

        assert_eq!(map.apply("k", "v1", 1, owner), ApplyOutcome::Inserted);
        assert_eq!(map.get("k").unwrap().value, "v1");

        assert_eq!(map.apply("k", "v2", 2, owner), ApplyOutcome::Updated);
        assert_eq!(map.get("k").unwrap().value, "v2");

        assert_eq!(map.apply("k", "", 3, owner), ApplyOutcome::Removed);
        assert!(map.get("k").is_none());
    }

    #[test]
    fn stale_sequence_is_rejected() {
        let mut map = ChpMap::new();
        let owner = Uuid::nil();
        map.apply("k", "v1", 5, owner);
        assert_eq!(map.apply("k", "v2", 5, owner), ApplyOutcome::Rejected);
        assert_eq!(map.apply("k", "v2", 4, owner), ApplyOutcome::Rejected);
        assert_eq!(map.get("k").unwrap().value, "v1");
    }

    #[test]
    fn deleting_missing_key_is_a_noop() {
        let mut map = ChpMap::new();
        assert_eq!(
            map.apply("nope", "", 1, Uuid::nil()),
            ApplyOutcome::NoSuchKey
        );
    }

    #[test]
    fn uuid_map_indexes_by_owner() {
        let mut map = ChpMap::new();
        let owner = Uuid::nil();
        map.apply("topic/a", "<xml/>", 1, owner);
        let uuid_map = map.to_uuid_map();
        assert_eq!(uuid_map.get(&owner), Some(&"topic/a".to_string()));
    }
}
