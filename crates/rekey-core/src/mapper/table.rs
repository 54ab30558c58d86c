//! Table-driven key mapping.
//!
//! `0400171120/v1/content/data/400171120.png` with the lookup entry
//! `400171120 -> 12887296` becomes `12887296/v1/content/data/400171120.png`.

use std::sync::Arc;

use tracing::warn;

use super::{KeyMapper, KeyMapping, PATH_SEPARATOR};
use crate::lookup::LookupTable;

/// Replaces a legacy numeric root id with a lookup-resolved fragment.
#[derive(Debug, Clone)]
pub struct LookupTableMapper {
    table: Arc<LookupTable>,
}

impl LookupTableMapper {
    /// Create a mapper over a loaded table.
    #[must_use]
    pub fn new(table: Arc<LookupTable>) -> Self {
        Self { table }
    }
}

impl KeyMapper for LookupTableMapper {
    fn name(&self) -> &'static str {
        "lookup"
    }

    fn map_key(&self, key: &str) -> KeyMapping {
        let Some((root, _)) = key.split_once(PATH_SEPARATOR) else {
            return KeyMapping::Unmappable(format!("key {key:?} has no root segment"));
        };

        // Ids may be zero-padded in keys but never in the table.
        let id = root.trim_start_matches('0');

        if let Some(fragment) = self.table.get(id) {
            let prefix = format!("{root}{PATH_SEPARATOR}");
            let replacement = format!("{fragment}{PATH_SEPARATOR}");
            return KeyMapping::Rename(key.replacen(&prefix, &replacement, 1));
        }

        if self.table.contains_fragment(root) {
            return KeyMapping::AlreadyCorrect;
        }

        warn!(id, key, "id not found in lookup table, skipping");
        KeyMapping::Unmappable(format!("id {id:?} not found in lookup table"))
    }
}
