//! Read models returned by cache-first queries.

use serde::{Deserialize, Serialize};

use crate::sync::OutboxMessage;

/// A cached row decoded into its typed payload. Every read returns a fresh copy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedRecord<T> {
    pub id: String,
    pub record: T,
    /// Local write timestamp (epoch milliseconds).
    pub updated_at: i64,
}

/// A persisted row whose payload could not be decoded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CorruptRow {
    pub id: String,
    pub reason: String,
}

/// Listing of a cache table, most recently written first.
///
/// Corrupt rows are reported next to the decoded ones so that a single bad row never hides
/// the rest of the table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheListing<T> {
    pub records: Vec<CachedRecord<T>>,
    pub corrupt_rows: Vec<CorruptRow>,
}

impl<T> Default for CacheListing<T> {
    fn default() -> Self {
        Self {
            records: Vec::new(),
            corrupt_rows: Vec::new(),
        }
    }
}

impl<T> CacheListing<T> {
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn ids(&self) -> Vec<&str> {
        self.records.iter().map(|row| row.id.as_str()).collect()
    }

    pub fn get(&self, id: &str) -> Option<&CachedRecord<T>> {
        self.records.iter().find(|row| row.id == id)
    }
}

/// Unsent outbox rows in replay order.
///
/// Rows whose payload no longer decodes cannot be sent; they are reported separately and never
/// block the rows behind them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboxListing {
    pub messages: Vec<OutboxMessage>,
    pub corrupt_rows: Vec<CorruptRow>,
}

impl OutboxListing {
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty() && self.corrupt_rows.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.messages.iter().any(|message| message.id == id)
    }
}
