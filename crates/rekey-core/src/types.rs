//! Core data model shared by the mapper, store and task layers.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// ObjectRecord
// ---------------------------------------------------------------------------

/// Immutable snapshot of one object as returned by a listing call.
///
/// The `etag` is kept exactly as the store reported it (possibly quoted);
/// comparisons go through [`crate::etag::normalize_etag`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectRecord {
    /// The object key.
    pub key: String,
    /// Opaque content fingerprint. Multipart uploads have the form
    /// `<hex-digest>-<partCount>`.
    pub etag: String,
    /// Object size in bytes.
    pub size: u64,
    /// Last modification time, when the listing provided one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<DateTime<Utc>>,
}

impl ObjectRecord {
    /// Create a record without a modification timestamp.
    #[must_use]
    pub fn new(key: impl Into<String>, etag: impl Into<String>, size: u64) -> Self {
        Self {
            key: key.into(),
            etag: etag.into(),
            size,
            last_modified: None,
        }
    }

    /// Attach a last-modified timestamp.
    #[must_use]
    pub fn with_last_modified(mut self, last_modified: DateTime<Utc>) -> Self {
        self.last_modified = Some(last_modified);
        self
    }
}

// ---------------------------------------------------------------------------
// Multipart parts
// ---------------------------------------------------------------------------

/// One fixed-size byte range of a source object being copied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObjectPart {
    /// 1-based, contiguous part number.
    pub number: u32,
    /// Byte offset of the first byte of this part.
    pub offset: u64,
}

/// A part whose copy succeeded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletedPart {
    /// The part number this fingerprint belongs to.
    pub number: u32,
    /// The part fingerprint, normalized (unquoted).
    pub etag: String,
}

// ---------------------------------------------------------------------------
// RenameOutcome
// ---------------------------------------------------------------------------

/// Per-object result of a remediation attempt.
///
/// Every object processed by a task yields exactly one outcome. Outcomes are
/// recorded, never retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RenameOutcome {
    /// Copied, verified and the source deleted.
    Success,
    /// Oversized object skipped because multipart copy is disabled, or a
    /// non-compliant key seen in verify-only mode.
    Skipped,
    /// A store call failed during copy or delete.
    ClientError,
    /// The destination fingerprint did not match the source. The source is kept.
    EtagMismatch,
    /// The key mapper could not produce a destination key.
    Unmappable,
    /// The key already has the corrected form.
    AlreadyCorrect,
    /// The object changed after the bucket was enumerated.
    ConcurrentModification,
}

impl RenameOutcome {
    /// All outcomes, in audit-code order.
    pub const ALL: [Self; 7] = [
        Self::Success,
        Self::Skipped,
        Self::ClientError,
        Self::EtagMismatch,
        Self::Unmappable,
        Self::AlreadyCorrect,
        Self::ConcurrentModification,
    ];

    /// Stable integer code written to the audit stream.
    #[must_use]
    pub fn code(self) -> i32 {
        match self {
            Self::Success => 0,
            Self::Skipped => 1,
            Self::ClientError => -1,
            Self::EtagMismatch => -2,
            Self::Unmappable => 2,
            Self::AlreadyCorrect => 3,
            Self::ConcurrentModification => 5,
        }
    }

    /// Short lowercase label.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Skipped => "skipped",
            Self::ClientError => "client_error",
            Self::EtagMismatch => "etag_mismatch",
            Self::Unmappable => "unmappable",
            Self::AlreadyCorrect => "already_correct",
            Self::ConcurrentModification => "concurrent_modification",
        }
    }

    pub(crate) fn index(self) -> usize {
        match self {
            Self::Success => 0,
            Self::Skipped => 1,
            Self::ClientError => 2,
            Self::EtagMismatch => 3,
            Self::Unmappable => 4,
            Self::AlreadyCorrect => 5,
            Self::ConcurrentModification => 6,
        }
    }
}

impl fmt::Display for RenameOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
