//! In-memory [`StorageClient`].
//!
//! Objects live in a key-ordered map so that listing pages come back in
//! lexicographic order like a real bucket. Fingerprints are computed the way
//! S3 computes them: the quoted MD5 for single uploads and
//! `md5(concat(part md5s))-n` for multipart uploads. Faults can be injected
//! to exercise every failure branch of the rename protocol.

use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, trace};

use super::{ListPage, PartCopy, StorageClient};
use crate::error::StoreError;
use crate::etag::{compute_etag, compute_md5, compute_multipart_etag, normalize_etag};
use crate::types::{CompletedPart, ObjectRecord};

/// Injected failures.
#[derive(Debug, Clone, Default)]
pub struct Faults {
    /// `CopyObject` reports a fingerprint that does not match the source.
    pub corrupt_copies: bool,
    /// `DeleteObject` fails.
    pub fail_deletes: bool,
    /// `UploadPartCopy` fails for this part number.
    pub fail_part: Option<u32>,
    /// Part `n` sleeps `latency / n`, so later parts finish first.
    pub part_latency: Option<Duration>,
    /// Added to the part count reported by `CompleteMultipartUpload`.
    pub part_count_skew: u32,
    /// `CompleteMultipartUpload` reports a digest that does not match the
    /// parts. The part count stays correct.
    pub corrupt_completions: bool,
}

#[derive(Debug, Clone)]
struct StoredObject {
    data: Bytes,
    etag: String,
    last_modified: DateTime<Utc>,
}

impl StoredObject {
    fn new(data: Bytes, etag: String) -> Self {
        Self {
            data,
            etag,
            last_modified: Utc::now(),
        }
    }

    fn record(&self, key: &str) -> ObjectRecord {
        ObjectRecord::new(key, self.etag.clone(), self.data.len() as u64)
            .with_last_modified(self.last_modified)
    }
}

#[derive(Debug)]
struct PendingUpload {
    key: String,
    parts: BTreeMap<u32, StoredPart>,
}

#[derive(Debug)]
struct StoredPart {
    data: Bytes,
    md5_hex: String,
}

#[derive(Debug)]
struct MemoryBucket {
    name: String,
    objects: RwLock<BTreeMap<String, StoredObject>>,
    uploads: DashMap<String, PendingUpload>,
    faults: RwLock<Faults>,
    mutations: AtomicU64,
    active_part_copies: AtomicUsize,
    peak_part_copies: AtomicUsize,
    completions: Mutex<Vec<Vec<u32>>>,
    closes: AtomicUsize,
}

/// Shared in-memory bucket. Clones are handles to the same bucket.
#[derive(Clone)]
pub struct MemoryClient {
    inner: Arc<MemoryBucket>,
}

impl std::fmt::Debug for MemoryClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryClient")
            .field("bucket", &self.inner.name)
            .field("objects_count", &self.inner.objects.read().len())
            .field("uploads_count", &self.inner.uploads.len())
            .finish_non_exhaustive()
    }
}

struct PartCopyGuard<'a>(&'a MemoryBucket);

impl Drop for PartCopyGuard<'_> {
    fn drop(&mut self) {
        self.0.active_part_copies.fetch_sub(1, Ordering::SeqCst);
    }
}

impl MemoryClient {
    /// Create an empty bucket.
    #[must_use]
    pub fn new(bucket: impl Into<String>) -> Self {
        let name = bucket.into();
        debug!(bucket = %name, "creating MemoryClient");
        Self {
            inner: Arc::new(MemoryBucket {
                name,
                objects: RwLock::new(BTreeMap::new()),
                uploads: DashMap::new(),
                faults: RwLock::new(Faults::default()),
                mutations: AtomicU64::new(0),
                active_part_copies: AtomicUsize::new(0),
                peak_part_copies: AtomicUsize::new(0),
                completions: Mutex::new(Vec::new()),
                closes: AtomicUsize::new(0),
            }),
        }
    }

    /// Store an object as a single upload. Not counted as a mutation.
    pub fn put_object(&self, key: impl Into<String>, data: impl Into<Bytes>) -> ObjectRecord {
        let key = key.into();
        let data = data.into();
        let etag = compute_etag(&data);
        self.insert(key, StoredObject::new(data, etag))
    }

    /// Store an object as if it had been uploaded in `part_size` chunks.
    pub fn put_multipart_object(
        &self,
        key: impl Into<String>,
        data: impl Into<Bytes>,
        part_size: usize,
    ) -> ObjectRecord {
        let key = key.into();
        let data = data.into();
        let md5s: Vec<String> = data.chunks(part_size.max(1)).map(compute_md5).collect();
        let etag = compute_multipart_etag(&md5s);
        self.insert(key, StoredObject::new(data, etag))
    }

    fn insert(&self, key: String, object: StoredObject) -> ObjectRecord {
        let record = object.record(&key);
        self.inner.objects.write().insert(key, object);
        record
    }

    /// Listing record of an object.
    #[must_use]
    pub fn record(&self, key: &str) -> Option<ObjectRecord> {
        self.inner.objects.read().get(key).map(|o| o.record(key))
    }

    /// Whether an object exists.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.inner.objects.read().contains_key(key)
    }

    /// Content of an object.
    #[must_use]
    pub fn object_data(&self, key: &str) -> Option<Bytes> {
        self.inner.objects.read().get(key).map(|o| o.data.clone())
    }

    /// All keys in listing order.
    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        self.inner.objects.read().keys().cloned().collect()
    }

    /// Number of objects.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.objects.read().len()
    }

    /// Whether the bucket is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.objects.read().is_empty()
    }

    /// Replace the injected faults.
    pub fn set_faults(&self, faults: Faults) {
        *self.inner.faults.write() = faults;
    }

    /// Number of mutating wire calls served so far.
    #[must_use]
    pub fn mutations(&self) -> u64 {
        self.inner.mutations.load(Ordering::SeqCst)
    }

    /// Highest number of part copies observed in flight at once.
    #[must_use]
    pub fn peak_part_copies(&self) -> usize {
        self.inner.peak_part_copies.load(Ordering::SeqCst)
    }

    /// Multipart uploads neither completed nor aborted.
    #[must_use]
    pub fn open_uploads(&self) -> usize {
        self.inner.uploads.len()
    }

    /// Part numbers of every completion request, in request order.
    #[must_use]
    pub fn completed_part_orders(&self) -> Vec<Vec<u32>> {
        self.inner.completions.lock().clone()
    }

    /// Number of times a handle to this bucket was closed.
    #[must_use]
    pub fn close_count(&self) -> usize {
        self.inner.closes.load(Ordering::SeqCst)
    }

    fn faults(&self) -> Faults {
        self.inner.faults.read().clone()
    }

    fn mutated(&self) {
        self.inner.mutations.fetch_add(1, Ordering::SeqCst);
    }

    fn track_part_copy(&self) -> PartCopyGuard<'_> {
        let active = self.inner.active_part_copies.fetch_add(1, Ordering::SeqCst) + 1;
        self.inner
            .peak_part_copies
            .fetch_max(active, Ordering::SeqCst);
        PartCopyGuard(&self.inner)
    }

    fn source(&self, key: &str) -> Result<StoredObject, StoreError> {
        self.inner
            .objects
            .read()
            .get(key)
            .cloned()
            .ok_or_else(|| StoreError::NoSuchKey {
                key: key.to_owned(),
            })
    }
}

#[async_trait]
impl StorageClient for MemoryClient {
    fn bucket(&self) -> &str {
        &self.inner.name
    }

    async fn list_page(
        &self,
        max_keys: i32,
        continuation_token: Option<String>,
    ) -> Result<ListPage, StoreError> {
        let limit = usize::try_from(max_keys).unwrap_or(0).max(1);
        let start = continuation_token.map_or(Bound::Unbounded, Bound::Excluded);

        let objects = self.inner.objects.read();
        let mut page: Vec<ObjectRecord> = objects
            .range::<String, _>((start, Bound::Unbounded))
            .take(limit + 1)
            .map(|(key, object)| object.record(key))
            .collect();
        let truncated = page.len() > limit;
        page.truncate(limit);

        let next_continuation_token = if truncated {
            page.last().map(|r| r.key.clone())
        } else {
            None
        };
        trace!(count = page.len(), truncated, "listed page");
        Ok(ListPage {
            objects: page,
            next_continuation_token,
        })
    }

    async fn copy_object(
        &self,
        source_key: &str,
        destination_key: &str,
    ) -> Result<String, StoreError> {
        self.mutated();
        let source = self.source(source_key)?;
        let etag = if self.faults().corrupt_copies {
            compute_etag(b"corrupted copy")
        } else {
            compute_etag(&source.data)
        };
        self.insert(
            destination_key.to_owned(),
            StoredObject::new(source.data, etag.clone()),
        );
        Ok(etag)
    }

    async fn create_multipart_upload(&self, key: &str) -> Result<String, StoreError> {
        self.mutated();
        let upload_id = uuid::Uuid::new_v4().simple().to_string();
        self.inner.uploads.insert(
            upload_id.clone(),
            PendingUpload {
                key: key.to_owned(),
                parts: BTreeMap::new(),
            },
        );
        Ok(upload_id)
    }

    async fn upload_part_copy(&self, request: PartCopy<'_>) -> Result<String, StoreError> {
        self.mutated();
        let _guard = self.track_part_copy();
        let faults = self.faults();

        if let Some(latency) = faults.part_latency {
            tokio::time::sleep(latency / request.part_number.max(1)).await;
        }
        if faults.fail_part == Some(request.part_number) {
            return Err(StoreError::client(
                "UploadPartCopy",
                "InternalError: injected part failure",
            ));
        }

        let source = self.source(request.source_key)?;
        let range_error = || StoreError::client("UploadPartCopy", "InvalidRange: range out of bounds");
        let start = usize::try_from(request.range.start).map_err(|_| range_error())?;
        let end = usize::try_from(request.range.end).map_err(|_| range_error())?;
        if start > end || end >= source.data.len() {
            return Err(range_error());
        }
        let data = source.data.slice(start..=end);
        let md5_hex = compute_md5(&data);

        let mut upload = self
            .inner
            .uploads
            .get_mut(request.upload_id)
            .ok_or_else(|| StoreError::NoSuchUpload {
                upload_id: request.upload_id.to_owned(),
            })?;
        upload.parts.insert(
            request.part_number,
            StoredPart {
                data,
                md5_hex: md5_hex.clone(),
            },
        );
        Ok(format!("\"{md5_hex}\""))
    }

    async fn complete_multipart_upload(
        &self,
        key: &str,
        upload_id: &str,
        parts: &[CompletedPart],
    ) -> Result<String, StoreError> {
        self.mutated();
        self.inner
            .completions
            .lock()
            .push(parts.iter().map(|p| p.number).collect());

        let (data, md5s) = {
            let upload = self
                .inner
                .uploads
                .get(upload_id)
                .ok_or_else(|| StoreError::NoSuchUpload {
                    upload_id: upload_id.to_owned(),
                })?;
            if upload.key != key {
                return Err(StoreError::NoSuchUpload {
                    upload_id: upload_id.to_owned(),
                });
            }

            let mut last = 0;
            let mut data = Vec::new();
            let mut md5s = Vec::with_capacity(parts.len());
            for part in parts {
                if part.number <= last {
                    return Err(StoreError::InvalidPartOrder);
                }
                last = part.number;
                let stored = upload.parts.get(&part.number).ok_or(StoreError::InvalidPart)?;
                if normalize_etag(&part.etag) != stored.md5_hex {
                    return Err(StoreError::InvalidPart);
                }
                data.extend_from_slice(&stored.data);
                md5s.push(stored.md5_hex.clone());
            }
            (Bytes::from(data), md5s)
        };
        self.inner.uploads.remove(upload_id);

        let faults = self.faults();
        let mut etag = if faults.corrupt_completions {
            format!("\"{}-{}\"", compute_md5(b"corrupted upload"), md5s.len())
        } else {
            compute_multipart_etag(&md5s)
        };
        let skew = faults.part_count_skew;
        if skew > 0 {
            let digest = normalize_etag(&etag)
                .rsplit_once('-')
                .map_or_else(String::new, |(digest, _)| digest.to_owned());
            etag = format!("\"{digest}-{}\"", md5s.len() + skew as usize);
        }

        self.insert(key.to_owned(), StoredObject::new(data, etag.clone()));
        Ok(etag)
    }

    async fn abort_multipart_upload(&self, _key: &str, upload_id: &str) -> Result<(), StoreError> {
        self.mutated();
        self.inner
            .uploads
            .remove(upload_id)
            .map(|_| ())
            .ok_or_else(|| StoreError::NoSuchUpload {
                upload_id: upload_id.to_owned(),
            })
    }

    async fn delete_object(&self, key: &str) -> Result<(), StoreError> {
        self.mutated();
        if self.faults().fail_deletes {
            return Err(StoreError::client(
                "DeleteObject",
                "AccessDenied: injected delete failure",
            ));
        }
        self.inner.objects.write().remove(key);
        Ok(())
    }

    fn close(&self) {
        self.inner.closes.fetch_add(1, Ordering::SeqCst);
    }
}
