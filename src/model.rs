use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A patch as persisted in the `entries` table.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Entry {
    pub name: String,
    pub title: String,
    /// Reserved; always empty today.
    pub description: String,
    pub created_at: DateTime<Utc>,
}

/// One data row of the upstream patch table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListingRow {
    pub name: String,
    pub title: String,
}

impl ListingRow {
    pub fn new(name: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            title: title.into(),
        }
    }
}

/// Published once per entry after the pass that inserted it has committed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryPersisted {
    pub entry: Entry,
}

/// Outcome of a successful sync pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Rows found in the upstream table.
    pub seen: usize,
    /// Entries that were new and got inserted, in listing order.
    pub inserted: Vec<Entry>,
}

impl SyncReport {
    pub fn skipped(&self) -> usize {
        self.seen - self.inserted.len()
    }
}
