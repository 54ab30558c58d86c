//! Multipart copy planning.
//!
//! A source object of `size` bytes is split into contiguous ranges of
//! `part_size` bytes (the last one truncated) numbered from 1. Parts are
//! copied in parallel and may complete in any order; they are sorted by
//! number before the upload is finalized because the store rejects
//! out-of-order completion lists.

use std::fmt;

use crate::types::{CompletedPart, ObjectPart};

/// Maximum number of parts a multipart upload may have.
pub const MAX_PARTS: u64 = 10_000;

const MIB: u64 = 1024 * 1024;

/// Default part sizes of common upload tools.
const COMMON_PART_SIZES: [u64; 3] = [8 * MIB, 16 * MIB, 5 * MIB];

/// Inclusive byte range of one part, formatted as a copy-source range header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    /// First byte.
    pub start: u64,
    /// Last byte (inclusive).
    pub end: u64,
}

impl ByteRange {
    /// Range covered by `part` of an object of `size` bytes.
    #[must_use]
    pub fn for_part(part: ObjectPart, part_size: u64, size: u64) -> Self {
        let end = part
            .offset
            .saturating_add(part_size)
            .saturating_sub(1)
            .min(size.saturating_sub(1));
        Self {
            start: part.offset,
            end,
        }
    }

    /// Number of bytes in the range.
    #[must_use]
    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }

    /// Ranges are never empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        false
    }
}

impl fmt::Display for ByteRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "bytes={}-{}", self.start, self.end)
    }
}

/// Number of parts an object of `size` bytes needs.
///
/// # Examples
///
/// ```
/// use rekey_core::store::part_count;
///
/// assert_eq!(part_count(100, 50), 2);
/// assert_eq!(part_count(101, 50), 3);
/// assert_eq!(part_count(0, 50), 0);
/// ```
#[must_use]
pub fn part_count(size: u64, part_size: u64) -> u64 {
    if part_size == 0 {
        return 0;
    }
    size.div_ceil(part_size)
}

/// Partition `[0, size)` into 1-based, contiguous parts of `part_size` bytes.
///
/// Returns `None` when the object would need more than [`MAX_PARTS`] parts
/// or `part_size` is zero.
#[must_use]
pub fn plan_parts(size: u64, part_size: u64) -> Option<Vec<ObjectPart>> {
    let count = part_count(size, part_size);
    if part_size == 0 || count > MAX_PARTS {
        return None;
    }
    (0..count)
        .map(|i| {
            Some(ObjectPart {
                number: u32::try_from(i + 1).ok()?,
                offset: i * part_size,
            })
        })
        .collect()
}

/// Part size to use when copying an object that was uploaded in `parts` parts.
///
/// A multipart fingerprint is only reproducible when the copy uses the same
/// part boundaries as the original upload. The listing does not carry the
/// original part size, so candidates are tried in order: `preferred`, the
/// 8, 16 and 5 MiB tool defaults, the smallest whole-MiB size yielding
/// `parts` parts, then `ceil(size / parts)`.
/// When no candidate yields `parts` parts the last one is returned and the
/// fingerprint check flags the copy.
///
/// # Examples
///
/// ```
/// use rekey_core::store::source_part_size;
///
/// assert_eq!(source_part_size(80, 2, 40), 40);
/// assert_eq!(source_part_size(80, 8, 40), 10);
/// assert_eq!(source_part_size(20 * 1024 * 1024 + 7, 3, 50), 8 * 1024 * 1024);
/// assert_eq!(source_part_size(100 * 1024 * 1024, 3, 50), 34 * 1024 * 1024);
/// ```
#[must_use]
pub fn source_part_size(size: u64, parts: u32, preferred: u64) -> u64 {
    let parts = u64::from(parts);
    if parts == 0 || part_count(size, preferred) == parts {
        return preferred;
    }
    if let Some(common) = COMMON_PART_SIZES
        .into_iter()
        .find(|&candidate| part_count(size, candidate) == parts)
    {
        return common;
    }
    let smallest = size.div_ceil(parts);
    let whole_mib = smallest.next_multiple_of(MIB);
    if part_count(size, whole_mib) == parts {
        whole_mib
    } else {
        smallest
    }
}

/// Sort completed parts by ascending part number.
#[must_use]
pub fn order_completed_parts(mut parts: Vec<CompletedPart>) -> Vec<CompletedPart> {
    parts.sort_unstable_by_key(|p| p.number);
    parts
}
