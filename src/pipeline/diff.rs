//! Change detection between an accepted and a candidate snapshot.
//!
//! Every key present on either side is classified exactly once. Equality is
//! structural for JSON artifacts (object key order is ignored) and byte-wise
//! for anything else. The result is ordered by key, so the same inputs always
//! produce the same change set.

use std::collections::BTreeSet;
use std::fmt;

use serde_json::Value;

use crate::models::{RecordKey, Snapshot};
use crate::utils::digest;

/// Classification of one key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeKind {
    Added,
    Removed,
    Modified,
    Unchanged,
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ChangeKind::Added => "added",
            ChangeKind::Removed => "removed",
            ChangeKind::Modified => "modified",
            ChangeKind::Unchanged => "unchanged",
        };
        f.write_str(name)
    }
}

/// One classified key with content digests of both sides.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEntry {
    pub key: RecordKey,
    pub kind: ChangeKind,
    /// Digest of the accepted content
    pub old_ref: Option<String>,
    /// Digest of the candidate content
    pub new_ref: Option<String>,
}

/// Key-ordered classification of two snapshots.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeSet {
    entries: Vec<ChangeEntry>,
}

impl ChangeSet {
    pub fn entries(&self) -> &[ChangeEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries of one kind, in key order.
    pub fn of_kind(&self, kind: ChangeKind) -> impl Iterator<Item = &ChangeEntry> {
        self.entries.iter().filter(move |e| e.kind == kind)
    }

    pub fn count(&self, kind: ChangeKind) -> usize {
        self.of_kind(kind).count()
    }

    /// Whether anything other than `Unchanged` is present.
    pub fn has_changes(&self) -> bool {
        self.entries.iter().any(|e| e.kind != ChangeKind::Unchanged)
    }

    /// Total number of added, modified and removed keys.
    pub fn change_count(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| e.kind != ChangeKind::Unchanged)
            .count()
    }

    pub fn kind_of(&self, key: &RecordKey) -> Option<ChangeKind> {
        self.entries
            .binary_search_by(|e| e.key.cmp(key))
            .ok()
            .map(|i| self.entries[i].kind)
    }
}

/// Canonical form used for equality and digests.
fn canonical(content: &[u8]) -> Vec<u8> {
    match serde_json::from_slice::<Value>(content) {
        // `Value` objects are key-sorted maps, so re-serialising is order-free.
        Ok(value) => serde_json::to_vec(&value).unwrap_or_else(|_| content.to_vec()),
        Err(_) => content.to_vec(),
    }
}

/// Whether two stored artifacts carry the same content.
pub fn content_eq(a: &[u8], b: &[u8]) -> bool {
    a == b || canonical(a) == canonical(b)
}

/// Digest of an artifact's canonical form.
pub fn content_ref(content: &[u8]) -> String {
    digest(&canonical(content))
}

/// Classify every key of `accepted` and `candidate`.
///
/// A missing side yields no `Removed`/`Modified` entries: with no accepted
/// snapshot everything in the candidate is `Added`, with no candidate there
/// is nothing to compare.
pub fn diff(accepted: Option<&Snapshot>, candidate: Option<&Snapshot>) -> ChangeSet {
    let (accepted, candidate) = match (accepted, candidate) {
        (_, None) => return ChangeSet::default(),
        (None, Some(candidate)) => {
            let entries = candidate
                .iter()
                .map(|(key, content)| ChangeEntry {
                    key: key.clone(),
                    kind: ChangeKind::Added,
                    old_ref: None,
                    new_ref: Some(content_ref(content)),
                })
                .collect();
            return ChangeSet { entries };
        }
        (Some(accepted), Some(candidate)) => (accepted, candidate),
    };

    let keys: BTreeSet<&RecordKey> = accepted.keys().chain(candidate.keys()).collect();

    let entries = keys
        .into_iter()
        .filter_map(|key| {
            let old = accepted.get(key);
            let new = candidate.get(key);
            let kind = match (old, new) {
                (None, Some(_)) => ChangeKind::Added,
                (Some(_), None) => ChangeKind::Removed,
                (Some(a), Some(b)) if content_eq(a, b) => ChangeKind::Unchanged,
                (Some(_), Some(_)) => ChangeKind::Modified,
                (None, None) => return None,
            };
            Some(ChangeEntry {
                key: key.clone(),
                kind,
                old_ref: old.map(content_ref),
                new_ref: new.map(content_ref),
            })
        })
        .collect();

    ChangeSet { entries }
}
