//! Id to key-fragment lookup table for the table-driven mapping strategy.
//!
//! A [`LookupTable`] is built once from a [`Loader`] before scheduling
//! starts, then shared read-only (behind an `Arc`) by every task. It is
//! unloaded explicitly when the run completes.

mod loader;

use std::collections::{HashMap, HashSet};

use tracing::{debug, info};

pub use loader::{FileLoader, Loader};

use crate::error::RemediationResult;

/// Read-only mapping from numeric id string to key fragment.
#[derive(Debug, Default)]
pub struct LookupTable {
    entries: HashMap<String, String>,
    fragments: HashSet<String>,
}

impl LookupTable {
    /// Create an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a table from every entry produced by `loader`.
    pub fn load(loader: &dyn Loader) -> RemediationResult<Self> {
        let mut table = Self::new();
        for (id, fragment) in loader.load()? {
            table.insert(id, fragment);
        }
        info!(entries = table.len(), "lookup table loaded");
        Ok(table)
    }

    /// Insert an entry. A repeated id keeps the last fragment.
    pub fn insert(&mut self, id: impl Into<String>, fragment: impl Into<String>) {
        let id = id.into();
        let fragment = fragment.into();
        self.fragments.insert(fragment.clone());
        if let Some(previous) = self.entries.insert(id.clone(), fragment) {
            debug!(id = %id, previous = %previous, "duplicate lookup id replaced");
        }
    }

    /// Resolve the fragment for an id.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&str> {
        self.entries.get(id).map(String::as_str)
    }

    /// Whether `fragment` is the resolved value of some id.
    #[must_use]
    pub fn contains_fragment(&self, fragment: &str) -> bool {
        self.fragments.contains(fragment)
    }

    /// Number of ids in the table.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the table is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Clear every entry.
    pub fn unload(&mut self) {
        let entries = self.entries.len();
        self.entries.clear();
        self.fragments.clear();
        info!(entries, "lookup table unloaded");
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for LookupTable {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut table = Self::new();
        for (id, fragment) in iter {
            table.insert(id, fragment);
        }
        table
    }
}
