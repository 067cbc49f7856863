//! Stable `uid` numbering for version entries.
//!
//! Composer v1 clients key cached versions by `uid`, so a version keeps the
//! uid it was first served with. The sequence remembers every assignment and
//! is persisted between runs.

use crate::error::{RepositoryError, Result};
use cantata_core::{JsonMap, JsonValue};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::io::Write;
use std::path::Path;

/// Monotonic uid allocator keyed by `name@version`.
///
/// Allocation wraps back to 1 past `u64::MAX` and skips every uid already
/// in use, so an upstream uid near the top of the range never overflows.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UidSequence {
    next: u64,
    assigned: BTreeMap<String, u64>,
    #[serde(skip)]
    taken: HashSet<u64>,
    #[serde(skip)]
    dirty: bool,
}

impl UidSequence {
    /// Empty sequence starting at 1.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a persisted sequence; a missing file yields an empty one.
    ///
    /// # Errors
    /// Returns error if the file exists but cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        match std::fs::read(path) {
            Ok(bytes) => {
                let mut seq: Self = sonic_rs::from_slice(&bytes)
                    .map_err(|e| RepositoryError::parse(path.display().to_string(), e))?;
                seq.taken = seq.assigned.values().copied().collect();
                Ok(seq)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::new()),
            Err(e) => Err(RepositoryError::io(path, e)),
        }
    }

    /// Persist the sequence if it changed since the last save.
    ///
    /// # Errors
    /// Returns error if the file cannot be written.
    pub fn save(&mut self, path: &Path) -> Result<()> {
        if !self.dirty {
            return Ok(());
        }
        let parent = path.parent().unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(parent).map_err(|e| RepositoryError::io(parent, e))?;
        let encoded = sonic_rs::to_vec(&*self).map_err(|e| RepositoryError::io(path, e))?;
        let mut temp =
            tempfile::NamedTempFile::new_in(parent).map_err(|e| RepositoryError::io(parent, e))?;
        temp.write_all(&encoded)
            .map_err(|e| RepositoryError::io(path, e))?;
        temp.persist(path)
            .map_err(|e| RepositoryError::io(path, e.error))?;
        self.dirty = false;
        Ok(())
    }

    /// A copy holding everything assigned so far, or `None` when nothing
    /// changed since the last call. The sequence itself is marked clean.
    #[must_use]
    pub fn take_changes(&mut self) -> Option<Self> {
        if !self.dirty {
            return None;
        }
        let snapshot = self.clone();
        self.dirty = false;
        Some(snapshot)
    }

    /// Flag the sequence for saving again, after a failed write.
    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    /// Number of versions with a uid.
    #[must_use]
    pub fn len(&self) -> usize {
        self.assigned.len()
    }

    /// Whether nothing was assigned yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.assigned.is_empty()
    }

    /// The uid for a version, allocating one on first sight.
    pub fn uid_for(&mut self, name: &str, version: &str) -> u64 {
        let key = format!("{}@{version}", name.to_lowercase());
        if let Some(uid) = self.assigned.get(&key) {
            return *uid;
        }
        let mut uid = self.next.max(1);
        while self.taken.contains(&uid) {
            uid = uid.checked_add(1).unwrap_or(1);
        }
        self.next = uid.checked_add(1).unwrap_or(1);
        self.assigned.insert(key, uid);
        self.taken.insert(uid);
        self.dirty = true;
        uid
    }

    /// Record a uid that upstream already assigned, so it is never handed
    /// out again.
    fn observe(&mut self, name: &str, version: &str, uid: u64) {
        let key = format!("{}@{version}", name.to_lowercase());
        if !self.assigned.contains_key(&key) {
            self.assigned.insert(key, uid);
            self.dirty = true;
        }
        self.taken.insert(uid);
        if uid >= self.next
            && let Some(next) = uid.checked_add(1)
        {
            self.next = next;
            self.dirty = true;
        }
    }

    /// Stamp every version entry lacking a `uid` in a v1 `packages` map
    /// (`{name: {version: meta}}`). Existing uids are kept as they are.
    pub fn stamp_packages(&mut self, packages: &mut JsonMap) {
        for (name, versions) in packages.iter_mut() {
            let Some(versions) = versions.as_object_mut() else {
                continue;
            };
            for (version, meta) in versions.iter_mut() {
                self.stamp_entry(name, version, meta);
            }
        }
    }

    /// Stamp one version entry.
    pub fn stamp_entry(&mut self, name: &str, version: &str, meta: &mut JsonValue) {
        let Some(entry) = meta.as_object_mut() else {
            return;
        };
        match entry.get("uid").and_then(JsonValue::as_u64) {
            Some(existing) => self.observe(name, version, existing),
            None => {
                let uid = self.uid_for(name, version);
                entry.insert("uid".to_string(), JsonValue::from(uid));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn packages(value: JsonValue) -> JsonMap {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn stamps_missing_uids_only() {
        let mut seq = UidSequence::new();
        let mut doc = packages(json!({
            "acme/foo": {
                "1.0.0": {"name": "acme/foo"},
                "1.1.0": {"name": "acme/foo", "uid": 41}
            }
        }));
        seq.stamp_packages(&mut doc);
        assert_eq!(doc["acme/foo"]["1.1.0"]["uid"], json!(41));
        let new_uid = doc["acme/foo"]["1.0.0"]["uid"].as_u64().unwrap();
        assert_ne!(new_uid, 41);

        let next = seq.uid_for("acme/bar", "1.0.0");
        assert!(next > 41);
    }

    #[test]
    fn same_version_same_uid() {
        let mut seq = UidSequence::new();
        let a = seq.uid_for("acme/foo", "1.0.0");
        let b = seq.uid_for("acme/bar", "1.0.0");
        assert_ne!(a, b);
        assert_eq!(seq.uid_for("ACME/Foo", "1.0.0"), a);
    }

    #[test]
    fn save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("uids/m.json");
        let mut seq = UidSequence::new();
        let uid = seq.uid_for("acme/foo", "1.0.0");
        seq.save(&path).unwrap();

        let mut loaded = UidSequence::load(&path).unwrap();
        assert_eq!(loaded.uid_for("acme/foo", "1.0.0"), uid);
        assert!(loaded.uid_for("acme/foo", "2.0.0") > uid);
        assert!(UidSequence::load(&dir.path().join("missing.json")).unwrap().is_empty());
    }

    #[test]
    fn changes_are_taken_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("m.json");
        let mut seq = UidSequence::new();
        assert!(seq.take_changes().is_none());

        let uid = seq.uid_for("acme/foo", "1.0.0");
        let mut snapshot = seq.take_changes().unwrap();
        assert!(seq.take_changes().is_none());
        snapshot.save(&path).unwrap();
        assert_eq!(UidSequence::load(&path).unwrap().uid_for("acme/foo", "1.0.0"), uid);

        seq.mark_dirty();
        assert!(seq.take_changes().is_some());
    }

    #[test]
    fn upstream_uid_at_the_top_of_the_range() {
        let mut seq = UidSequence::new();
        let mut doc = packages(json!({
            "acme/foo": {
                "1.0.0": {"uid": u64::MAX - 1},
                "1.1.0": {"uid": u64::MAX},
                "2.0.0": {}
            }
        }));
        seq.stamp_packages(&mut doc);
        assert_eq!(doc["acme/foo"]["1.1.0"]["uid"], json!(u64::MAX));
        assert_eq!(doc["acme/foo"]["2.0.0"]["uid"], json!(1));
        assert_eq!(seq.uid_for("acme/bar", "1.0.0"), 2);
    }

    #[test]
    fn wrapped_allocation_skips_loaded_uids() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("m.json");
        let mut seq = UidSequence::new();
        let mut doc = packages(json!({
            "acme/foo": {"1.0.0": {}, "9.0.0": {"uid": u64::MAX}}
        }));
        seq.stamp_packages(&mut doc);
        assert_eq!(doc["acme/foo"]["1.0.0"]["uid"], json!(1));
        seq.save(&path).unwrap();

        let mut loaded = UidSequence::load(&path).unwrap();
        loaded.next = u64::MAX;
        assert_eq!(loaded.uid_for("acme/bar", "1.0.0"), 2);
    }

    proptest! {
        #[test]
        fn uids_never_change_across_updates(
            first in proptest::collection::btree_set("[a-c]{1}/[a-c]{1,2}@[0-9]\\.[0-9]", 1..12),
            second in proptest::collection::btree_set("[a-c]{1}/[a-c]{1,2}@[0-9]\\.[0-9]", 1..12),
        ) {
            let mut seq = UidSequence::new();
            let mut seen = BTreeMap::new();
            for key in first.iter().chain(second.iter()) {
                let (name, version) = key.split_once('@').unwrap();
                let uid = seq.uid_for(name, version);
                if let Some(previous) = seen.insert(key.clone(), uid) {
                    prop_assert_eq!(previous, uid);
                }
            }
            let distinct: std::collections::BTreeSet<_> = seen.values().collect();
            prop_assert_eq!(distinct.len(), seen.len());
        }
    }
}
