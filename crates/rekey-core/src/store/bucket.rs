//! The rename protocol over a [`StorageClient`].

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use futures::stream::{self, FuturesUnordered, StreamExt, TryStreamExt};
use tracing::{debug, error, info, trace, warn};
use typed_builder::TypedBuilder;

use super::multipart::{ByteRange, order_completed_parts, plan_parts, source_part_size};
use super::{ObjectStore, PageStream, PartCopy, PartLimiter, StorageClient};
use crate::config::RemediationConfig;
use crate::error::StoreError;
use crate::etag::{is_multipart_etag, multipart_part_count, normalize_etag};
use crate::types::{CompletedPart, ObjectPart, ObjectRecord, RenameOutcome};

/// Listing and copy tuning for one bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, TypedBuilder)]
pub struct BucketOptions {
    /// Objects per listing page.
    #[builder(default = 1000)]
    pub max_keys: i32,
    /// Bytes per multipart part.
    #[builder(default = 52_428_800)]
    pub max_part_size: u64,
    /// Objects at or above this size use the multipart protocol.
    #[builder(default = 104_857_600)]
    pub multipart_threshold: u64,
    /// Skip objects that would need the multipart protocol. This includes
    /// objects below the threshold whose listed ETag is already multipart.
    #[builder(default)]
    pub skip_multipart: bool,
}

impl Default for BucketOptions {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl From<&RemediationConfig> for BucketOptions {
    fn from(config: &RemediationConfig) -> Self {
        Self {
            max_keys: config.max_keys,
            max_part_size: config.max_part_size,
            multipart_threshold: config.multipart_threshold,
            skip_multipart: config.skip_multipart,
        }
    }
}

enum Copied {
    Verified,
    Mismatch,
}

enum Cursor {
    Start,
    Next(String),
    Done,
}

/// [`ObjectStore`] implementation backed by a wire client.
#[derive(Debug)]
pub struct RemediationBucket<C> {
    client: C,
    options: BucketOptions,
    part_limiter: PartLimiter,
    closed: AtomicBool,
}

impl<C: StorageClient> RemediationBucket<C> {
    /// Bind a client to the rename protocol.
    pub fn new(client: C, options: BucketOptions, part_limiter: PartLimiter) -> Self {
        Self {
            client,
            options,
            part_limiter,
            closed: AtomicBool::new(false),
        }
    }

    /// Whether [`ObjectStore::close`] has been called.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn ensure_open(&self) -> Result<(), StoreError> {
        if self.is_closed() {
            return Err(StoreError::Closed);
        }
        Ok(())
    }

    fn needs_multipart(&self, source: &ObjectRecord) -> bool {
        // A single copy of a multipart object yields a plain digest that can
        // never match the source fingerprint.
        source.size > 0
            && (source.size >= self.options.multipart_threshold
                || is_multipart_etag(&source.etag))
    }

    async fn copy(&self, source: &ObjectRecord, destination_key: &str) -> Result<Copied, StoreError> {
        let etag = self.client.copy_object(&source.key, destination_key).await?;
        if normalize_etag(&etag) == normalize_etag(&source.etag) {
            Ok(Copied::Verified)
        } else {
            warn!(
                key = %source.key,
                destination = destination_key,
                source_etag = %source.etag,
                destination_etag = %etag,
                "copy fingerprint mismatch, keeping source"
            );
            Ok(Copied::Mismatch)
        }
    }

    async fn multipart_copy(
        &self,
        source: &ObjectRecord,
        destination_key: &str,
    ) -> Result<Copied, StoreError> {
        let source_parts = multipart_part_count(&source.etag);
        let part_size = source_parts.map_or(self.options.max_part_size, |parts| {
            source_part_size(source.size, parts, self.options.max_part_size)
        });
        let parts = plan_parts(source.size, part_size).ok_or_else(|| {
            StoreError::client(
                "CreateMultipartUpload",
                format!(
                    "object of {} bytes cannot be split into {part_size} byte parts",
                    source.size
                ),
            )
        })?;

        let upload_id = self.client.create_multipart_upload(destination_key).await?;
        debug!(
            key = %source.key,
            destination = destination_key,
            upload_id = %upload_id,
            parts = parts.len(),
            part_size,
            "started multipart copy"
        );

        let etag = match self
            .copy_parts(source, destination_key, &upload_id, &parts, part_size)
            .await
        {
            Ok(completed) => {
                let completed = order_completed_parts(completed);
                self.client
                    .complete_multipart_upload(destination_key, &upload_id, &completed)
                    .await
            }
            Err(e) => Err(e),
        };
        let etag = match etag {
            Ok(etag) => etag,
            Err(e) => {
                self.abort(destination_key, &upload_id).await;
                return Err(e);
            }
        };

        let expected = parts.len();
        let reported = multipart_part_count(&etag);
        if reported.is_none_or(|count| count as usize != expected) {
            warn!(
                key = %source.key,
                destination = destination_key,
                etag = %etag,
                expected,
                reported = ?reported,
                "multipart part count mismatch, keeping source"
            );
            return Ok(Copied::Mismatch);
        }
        // A plain source digest cannot be compared with a multipart one; the
        // part count is all that can be checked.
        if source_parts.is_some() && normalize_etag(&etag) != normalize_etag(&source.etag) {
            warn!(
                key = %source.key,
                destination = destination_key,
                source_etag = %source.etag,
                destination_etag = %etag,
                part_size,
                "multipart fingerprint mismatch, keeping source"
            );
            return Ok(Copied::Mismatch);
        }
        Ok(Copied::Verified)
    }

    async fn copy_parts(
        &self,
        source: &ObjectRecord,
        destination_key: &str,
        upload_id: &str,
        parts: &[ObjectPart],
        part_size: u64,
    ) -> Result<Vec<CompletedPart>, StoreError> {
        let mut pending: FuturesUnordered<_> = parts
            .iter()
            .map(|part| self.copy_part(source, destination_key, upload_id, *part, part_size))
            .collect();

        let mut completed = Vec::with_capacity(parts.len());
        while let Some(part) = pending.next().await {
            completed.push(part?);
        }
        Ok(completed)
    }

    async fn copy_part(
        &self,
        source: &ObjectRecord,
        destination_key: &str,
        upload_id: &str,
        part: ObjectPart,
        part_size: u64,
    ) -> Result<CompletedPart, StoreError> {
        let _permit = self.part_limiter.acquire().await?;
        let range = ByteRange::for_part(part, part_size, source.size);
        let etag = self
            .client
            .upload_part_copy(PartCopy {
                source_key: &source.key,
                destination_key,
                upload_id,
                part_number: part.number,
                range,
            })
            .await?;
        trace!(key = %source.key, part = part.number, %range, "copied part");
        Ok(CompletedPart {
            number: part.number,
            etag: normalize_etag(&etag).to_owned(),
        })
    }

    async fn abort(&self, destination_key: &str, upload_id: &str) {
        if let Err(e) = self
            .client
            .abort_multipart_upload(destination_key, upload_id)
            .await
        {
            warn!(
                destination = destination_key,
                upload_id,
                error = %e,
                "failed to abort multipart upload"
            );
        }
    }
}

#[async_trait]
impl<C: StorageClient> ObjectStore for RemediationBucket<C> {
    fn pages(&self) -> PageStream<'_> {
        stream::try_unfold(Cursor::Start, move |cursor| async move {
            let token = match cursor {
                Cursor::Start => None,
                Cursor::Next(token) => Some(token),
                Cursor::Done => return Ok(None),
            };
            self.ensure_open()?;
            let page = self.client.list_page(self.options.max_keys, token).await?;
            let next = page.next_continuation_token.map_or(Cursor::Done, Cursor::Next);
            Ok(Some((page.objects, next)))
        })
        .boxed()
    }

    async fn count(&self) -> Result<u64, StoreError> {
        self.pages()
            .try_fold(0u64, |total, page| async move { Ok(total + page.len() as u64) })
            .await
    }

    async fn rename(&self, source: &ObjectRecord, destination_key: &str) -> RenameOutcome {
        if destination_key == source.key {
            return RenameOutcome::AlreadyCorrect;
        }
        if self.ensure_open().is_err() {
            error!(key = %source.key, "rename attempted on a closed store");
            return RenameOutcome::ClientError;
        }

        let copied = if self.needs_multipart(source) {
            if self.options.skip_multipart {
                info!(
                    key = %source.key,
                    size = source.size,
                    "multipart copy disabled, skipping object"
                );
                return RenameOutcome::Skipped;
            }
            self.multipart_copy(source, destination_key).await
        } else {
            self.copy(source, destination_key).await
        };

        match copied {
            Ok(Copied::Verified) => {}
            Ok(Copied::Mismatch) => return RenameOutcome::EtagMismatch,
            Err(e) => {
                error!(
                    key = %source.key,
                    destination = destination_key,
                    error = %e,
                    "error while attempting to copy object"
                );
                return RenameOutcome::ClientError;
            }
        }

        if let Err(e) = self.client.delete_object(&source.key).await {
            error!(
                key = %source.key,
                destination = destination_key,
                error = %e,
                "error while attempting to delete source object"
            );
            return RenameOutcome::ClientError;
        }
        RenameOutcome::Success
    }

    fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.client.close();
            debug!(bucket = self.client.bucket(), "store closed");
        }
    }
}
