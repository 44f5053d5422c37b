//! Sealed per-source snapshots.

use std::collections::BTreeMap;
use std::collections::btree_map::Entry;

use super::RecordKey;

/// An immutable set of record artifacts for one source.
///
/// Built through [`SnapshotBuilder`]; once sealed it can only be read.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Snapshot {
    source: String,
    records: BTreeMap<RecordKey, Vec<u8>>,
}

impl Snapshot {
    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, key: &RecordKey) -> Option<&[u8]> {
        self.records.get(key).map(Vec::as_slice)
    }

    pub fn contains(&self, key: &RecordKey) -> bool {
        self.records.contains_key(key)
    }

    /// Records in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&RecordKey, &[u8])> {
        self.records.iter().map(|(k, v)| (k, v.as_slice()))
    }

    pub fn keys(&self) -> impl Iterator<Item = &RecordKey> {
        self.records.keys()
    }
}

/// Collects records for a snapshot that is still being populated.
#[derive(Debug, Default)]
pub struct SnapshotBuilder {
    snapshot: Snapshot,
}

impl SnapshotBuilder {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            snapshot: Snapshot {
                source: source.into(),
                records: BTreeMap::new(),
            },
        }
    }

    /// Add a record. Returns `false` and keeps the existing content if the key
    /// is already present.
    pub fn insert(&mut self, key: RecordKey, content: Vec<u8>) -> bool {
        match self.snapshot.records.entry(key) {
            Entry::Vacant(slot) => {
                slot.insert(content);
                true
            }
            Entry::Occupied(_) => false,
        }
    }

    pub fn len(&self) -> usize {
        self.snapshot.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshot.records.is_empty()
    }

    pub fn seal(self) -> Snapshot {
        self.snapshot
    }
}

impl<const N: usize> From<(&str, [(RecordKey, &[u8]); N])> for Snapshot {
    fn from((source, records): (&str, [(RecordKey, &[u8]); N])) -> Self {
        let mut builder = SnapshotBuilder::new(source);
        for (key, content) in records {
            builder.insert(key, content.to_vec());
        }
        builder.seal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicate_key_keeps_first() {
        let key = RecordKey::new("bankX", "company", "A");
        let mut builder = SnapshotBuilder::new("bankX");
        assert!(builder.insert(key.clone(), b"v1".to_vec()));
        assert!(!builder.insert(key.clone(), b"v2".to_vec()));

        let snapshot = builder.seal();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot.get(&key), Some(&b"v1"[..]));
    }

    #[test]
    fn test_iteration_is_key_ordered() {
        let snapshot = Snapshot::from((
            "bankX",
            [
                (RecordKey::new("bankX", "company", "B"), &b"v2"[..]),
                (RecordKey::new("bankX", "company", "A"), &b"v1"[..]),
            ],
        ));
        let ids: Vec<_> = snapshot.keys().map(|k| k.record_id().to_string()).collect();
        assert_eq!(ids, vec!["A", "B"]);
    }
}
