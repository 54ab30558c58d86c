//! Self-describing key mapping.
//!
//! `12887301/v1/content/data/400171130.lfs` becomes
//! `1037/8821/12887301/v1/content/data/400171130.lfs`: the root id is
//! left-padded to eight digits, reversed, and split into two four-character
//! directory segments. The corrected key carries everything needed to
//! re-verify it, so no external table is involved.

use tracing::trace;

use super::{KeyMapper, KeyMapping, PATH_SEPARATOR, is_numeric, root_segment};

/// Width the root id is padded to before reversal.
const PADDED_WIDTH: usize = 8;

/// Width of each derived directory segment.
const SEGMENT_WIDTH: usize = 4;

/// Self-describing (reversible) key mapper.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReversedIdMapper {
    verify_only: bool,
}

impl ReversedIdMapper {
    /// Create a mapper that renames non-compliant keys.
    #[must_use]
    pub fn new() -> Self {
        Self { verify_only: false }
    }

    /// Create a mapper that only audits compliance and never proposes a rename.
    #[must_use]
    pub fn verify_only() -> Self {
        Self { verify_only: true }
    }
}

impl KeyMapper for ReversedIdMapper {
    fn name(&self) -> &'static str {
        "reversed-id"
    }

    fn map_key(&self, key: &str) -> KeyMapping {
        if verify_reversed_key(key) {
            return KeyMapping::AlreadyCorrect;
        }
        if self.verify_only {
            return KeyMapping::NonCompliant;
        }

        let root = root_segment(key);
        if !is_numeric(root) || root.parse::<u64>().is_err() {
            return KeyMapping::Unmappable(format!("root segment {root:?} is not a numeric id"));
        }

        let (first, second) = reversed_id_segments(root);
        let destination = format!("{first}{PATH_SEPARATOR}{second}{PATH_SEPARATOR}{key}");
        trace!(key, destination = %destination, "mapped key");
        KeyMapping::Rename(destination)
    }
}

/// Derive the two directory segments for a numeric root id.
///
/// Ids longer than eight digits are not padded; only their first eight
/// reversed characters are used.
///
/// # Examples
///
/// ```
/// use rekey_core::mapper::reversed_id_segments;
///
/// assert_eq!(reversed_id_segments("12887301"), ("1037".to_owned(), "8821".to_owned()));
/// assert_eq!(reversed_id_segments("42"), ("2400".to_owned(), "0000".to_owned()));
/// ```
#[must_use]
pub fn reversed_id_segments(id: &str) -> (String, String) {
    let padded = format!("{id:0>PADDED_WIDTH$}");
    let reversed: String = padded.chars().rev().take(PADDED_WIDTH).collect();
    let (first, second) = reversed.split_at(SEGMENT_WIDTH);
    (first.to_owned(), second.to_owned())
}

/// Whether `key` already has the `H1/H2/<id>/...` corrected form.
///
/// # Examples
///
/// ```
/// use rekey_core::mapper::verify_reversed_key;
///
/// assert!(verify_reversed_key("1037/8821/12887301/v1/content/data/400171130.lfs"));
/// assert!(!verify_reversed_key("12887301/v1/content/data/400171130.lfs"));
/// ```
#[must_use]
pub fn verify_reversed_key(key: &str) -> bool {
    let mut path = key.split(PATH_SEPARATOR);
    let (Some(first), Some(second), Some(id)) = (path.next(), path.next(), path.next()) else {
        return false;
    };
    if !is_segment(first) || !is_segment(second) || !is_numeric(id) {
        return false;
    }
    let (expected_first, expected_second) = reversed_id_segments(id);
    first == expected_first && second == expected_second
}

fn is_segment(value: &str) -> bool {
    value.len() == SEGMENT_WIDTH && is_numeric(value)
}
