//! Object store port.
//!
//! Two layers live here:
//!
//! - [`StorageClient`] is the thin wire surface (list a page, copy, the
//!   multipart calls, delete). It has no protocol logic and is implemented by
//!   the S3 client in `rekey-s3` and by [`MemoryClient`].
//! - [`ObjectStore`] is the port the remediation task talks to: paginated
//!   listing, counting, the copy, verify, delete rename protocol and close.
//!   [`RemediationBucket`] implements it over any [`StorageClient`].

mod bucket;
mod memory;
mod multipart;

use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::BoxStream;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

pub use bucket::{BucketOptions, RemediationBucket};
pub use memory::{Faults, MemoryClient};
pub use multipart::{
    ByteRange, MAX_PARTS, order_completed_parts, part_count, plan_parts, source_part_size,
};

use crate::error::StoreError;
use crate::types::{CompletedPart, ObjectRecord, RenameOutcome};

/// Stream of listing pages.
pub type PageStream<'a> = BoxStream<'a, Result<Vec<ObjectRecord>, StoreError>>;

/// The bucket abstraction used by remediation tasks.
#[async_trait]
pub trait ObjectStore: Send + Sync + 'static {
    /// Lazily list every object, one bounded page at a time.
    ///
    /// Pagination is exhaustive and follows store order. The stream is not
    /// resumable; call again to restart from the first page.
    fn pages(&self) -> PageStream<'_>;

    /// Total number of objects across all pages.
    async fn count(&self) -> Result<u64, StoreError>;

    /// Rename `source` to `destination_key`.
    ///
    /// Never fails: every store error is folded into the returned outcome.
    async fn rename(&self, source: &ObjectRecord, destination_key: &str) -> RenameOutcome;

    /// Release the handle. Idempotent.
    fn close(&self);
}

/// One page of a bucket listing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListPage {
    /// Objects in this page.
    pub objects: Vec<ObjectRecord>,
    /// Token for the next page, if the listing is truncated.
    pub next_continuation_token: Option<String>,
}

/// Arguments of a ranged part copy.
#[derive(Debug, Clone, Copy)]
pub struct PartCopy<'a> {
    /// Source object key.
    pub source_key: &'a str,
    /// Destination object key.
    pub destination_key: &'a str,
    /// Multipart upload the part belongs to.
    pub upload_id: &'a str,
    /// 1-based part number.
    pub part_number: u32,
    /// Source byte range.
    pub range: ByteRange,
}

/// Wire-level operations against one bucket.
///
/// Every method that returns a fingerprint returns it exactly as the store
/// reported it; callers normalize.
#[async_trait]
pub trait StorageClient: Send + Sync + 'static {
    /// Name of the bucket this client is bound to.
    fn bucket(&self) -> &str;

    /// Fetch one listing page of at most `max_keys` objects.
    async fn list_page(
        &self,
        max_keys: i32,
        continuation_token: Option<String>,
    ) -> Result<ListPage, StoreError>;

    /// Server-side copy of a whole object; returns the destination fingerprint.
    async fn copy_object(&self, source_key: &str, destination_key: &str)
    -> Result<String, StoreError>;

    /// Open a multipart upload; returns the upload id.
    async fn create_multipart_upload(&self, key: &str) -> Result<String, StoreError>;

    /// Copy one byte range of the source into an open upload; returns the
    /// part fingerprint.
    async fn upload_part_copy(&self, request: PartCopy<'_>) -> Result<String, StoreError>;

    /// Finalize an upload from parts in ascending order; returns the object
    /// fingerprint.
    async fn complete_multipart_upload(
        &self,
        key: &str,
        upload_id: &str,
        parts: &[CompletedPart],
    ) -> Result<String, StoreError>;

    /// Abort an open upload, discarding its parts.
    async fn abort_multipart_upload(&self, key: &str, upload_id: &str) -> Result<(), StoreError>;

    /// Delete an object.
    async fn delete_object(&self, key: &str) -> Result<(), StoreError>;

    /// Release pooled resources.
    fn close(&self) {}
}

/// Bound on concurrent part copies, shared by every store of a run.
#[derive(Debug, Clone)]
pub struct PartLimiter {
    semaphore: Arc<Semaphore>,
    permits: usize,
}

impl PartLimiter {
    /// Allow at most `permits` part copies in flight (at least one).
    #[must_use]
    pub fn new(permits: usize) -> Self {
        let permits = permits.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(permits)),
            permits,
        }
    }

    /// The configured bound.
    #[must_use]
    pub fn permits(&self) -> usize {
        self.permits
    }

    /// Number of part copies that could start right now.
    #[must_use]
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Wait for a free slot.
    pub async fn acquire(&self) -> Result<OwnedSemaphorePermit, StoreError> {
        Arc::clone(&self.semaphore)
            .acquire_owned()
            .await
            .map_err(|_| StoreError::Closed)
    }
}

impl Default for PartLimiter {
    fn default() -> Self {
        Self::new(16)
    }
}
