//! Key mapping strategies.
//!
//! A [`KeyMapper`] decides, for a single object key, whether the object must
//! be renamed and to what. Two interchangeable strategies exist:
//!
//! - [`ReversedIdMapper`] -- self-describing, prefixes the key with two
//!   directory segments derived from its numeric root id
//! - [`LookupTableMapper`] -- replaces the numeric root id with a fragment
//!   resolved through a [`crate::lookup::LookupTable`]
//!
//! Mappers are pure and shared by every task of a run.

mod reversed;
mod table;

use std::fmt;

pub use reversed::{ReversedIdMapper, reversed_id_segments, verify_reversed_key};
pub use table::LookupTableMapper;

/// Path separator inside object keys.
pub const PATH_SEPARATOR: char = '/';

/// Decision produced by a [`KeyMapper`] for one key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyMapping {
    /// Rename the object to this key.
    Rename(String),
    /// The key is already in its corrected form.
    AlreadyCorrect,
    /// Verify-only mode found a key that is not in corrected form.
    NonCompliant,
    /// No destination can be derived; the object is left untouched.
    Unmappable(String),
}

/// A deterministic object-key mapping policy.
pub trait KeyMapper: Send + Sync + fmt::Debug {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Decide what to do with `key`.
    fn map_key(&self, key: &str) -> KeyMapping;
}

/// Return the first path segment of `key`, or the whole key if it has none.
///
/// # Examples
///
/// ```
/// use rekey_core::mapper::root_segment;
///
/// assert_eq!(root_segment("12887301/v1/data.lfs"), "12887301");
/// assert_eq!(root_segment("12887301"), "12887301");
/// ```
#[must_use]
pub fn root_segment(key: &str) -> &str {
    key.split_once(PATH_SEPARATOR).map_or(key, |(root, _)| root)
}

/// Whether `value` is a non-empty run of ASCII digits.
pub(crate) fn is_numeric(value: &str) -> bool {
    !value.is_empty() && value.bytes().all(|b| b.is_ascii_digit())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_should_extract_root_segment() {
        assert_eq!(root_segment("a/b/c"), "a");
        assert_eq!(root_segment("/b"), "");
        assert_eq!(root_segment(""), "");
    }

    #[test]
    fn test_should_detect_numeric_segments() {
        assert!(is_numeric("0042"));
        assert!(!is_numeric(""));
        assert!(!is_numeric("+42"));
        assert!(!is_numeric("4a"));
    }
}
