//! Scraped record data structures.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::utils::sanitize_label;

/// Composite record identity: `source/category/record_id`.
///
/// Every component is sanitized on construction, so a key can be used as a
/// relative storage path as-is.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RecordKey {
    source: String,
    category: String,
    record_id: String,
}

impl RecordKey {
    pub fn new(source: &str, category: &str, record_id: &str) -> Self {
        Self {
            source: sanitize_label(source),
            category: sanitize_label(category),
            record_id: sanitize_label(record_id),
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn category(&self) -> &str {
        &self.category
    }

    pub fn record_id(&self) -> &str {
        &self.record_id
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.source, self.category, self.record_id)
    }
}

/// Stored payload of a record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordContent {
    /// Human-readable category label
    pub category: String,

    /// Source link the record was scraped from
    pub link: String,

    /// Extracted title, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    /// Free-text or markup body
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
}

impl RecordContent {
    pub fn new(category: impl Into<String>, link: impl Into<String>) -> Self {
        Self {
            category: category.into(),
            link: link.into(),
            title: None,
            body: None,
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Serialize into the on-disk artifact format.
    pub fn to_bytes(&self) -> crate::error::Result<Vec<u8>> {
        Ok(serde_json::to_vec_pretty(self)?)
    }
}

/// A record as produced by a fetcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub key: RecordKey,
    pub content: RecordContent,
}

impl Record {
    pub fn new(source: &str, record_id: &str, content: RecordContent) -> Self {
        Self {
            key: RecordKey::new(source, &content.category, record_id),
            content,
        }
    }
}
