//! The remediation unit of work.

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::debug;

use crate::audit::{AuditRecord, AuditSink};
use crate::mapper::{KeyMapper, KeyMapping};
use crate::store::ObjectStore;
use crate::types::{ObjectRecord, RenameOutcome};

/// A unit of work driven by a scheduler.
///
/// `execute` consumes the task and hands it back so the scheduler can call
/// `complete` on the same value once the work is done.
#[async_trait]
pub trait ProcessTask: Send + Sized + 'static {
    /// Run the task to completion.
    async fn execute(self) -> Self;

    /// Release resources held by the task.
    ///
    /// A task that panics or is cancelled is dropped without reaching
    /// `complete`, so anything that must be released on every exit path
    /// belongs in a `Drop` impl as well.
    fn complete(self);

    /// Diagnostic identifier, unique per task.
    fn id(&self) -> &str;
}

/// Remediates one partition of a bucket listing, object by object.
///
/// The store is closed by `complete` or, failing that, when the task is
/// dropped.
pub struct RemediationTask<S: ObjectStore> {
    id: String,
    store: S,
    mapper: Arc<dyn KeyMapper>,
    audit: Arc<dyn AuditSink>,
    objects: Vec<ObjectRecord>,
    started_at: Option<DateTime<Utc>>,
}

impl<S: ObjectStore> fmt::Debug for RemediationTask<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemediationTask")
            .field("id", &self.id)
            .field("mapper", &self.mapper.name())
            .field("objects", &self.objects.len())
            .field("started_at", &self.started_at)
            .finish_non_exhaustive()
    }
}

impl<S: ObjectStore> RemediationTask<S> {
    /// Create a task that owns `store` exclusively.
    pub fn new(
        store: S,
        mapper: Arc<dyn KeyMapper>,
        audit: Arc<dyn AuditSink>,
        objects: Vec<ObjectRecord>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            store,
            mapper,
            audit,
            objects,
            started_at: None,
        }
    }

    /// Refuse to rename objects modified after `started_at`.
    #[must_use]
    pub fn with_staleness_guard(mut self, started_at: DateTime<Utc>) -> Self {
        self.started_at = Some(started_at);
        self
    }

    fn is_stale(&self, object: &ObjectRecord) -> bool {
        match (self.started_at, object.last_modified) {
            (Some(started_at), Some(modified)) => modified > started_at,
            _ => false,
        }
    }

    async fn remediate(&self, object: &ObjectRecord) -> AuditRecord {
        let started = Instant::now();
        let (destination_key, outcome) = match self.mapper.map_key(&object.key) {
            KeyMapping::AlreadyCorrect => (Some(object.key.clone()), RenameOutcome::AlreadyCorrect),
            KeyMapping::NonCompliant => (Some(object.key.clone()), RenameOutcome::Skipped),
            KeyMapping::Unmappable(reason) => {
                debug!(key = %object.key, reason = %reason, "key left unmapped");
                (None, RenameOutcome::Unmappable)
            }
            KeyMapping::Rename(destination) if self.is_stale(object) => {
                debug!(
                    key = %object.key,
                    last_modified = ?object.last_modified,
                    "object modified after run start, not renaming"
                );
                (Some(destination), RenameOutcome::ConcurrentModification)
            }
            KeyMapping::Rename(destination) => {
                let outcome = self.store.rename(object, &destination).await;
                (Some(destination), outcome)
            }
        };

        AuditRecord {
            source_key: object.key.clone(),
            destination_key,
            etag: object.etag.clone(),
            size: object.size,
            outcome,
            elapsed: started.elapsed(),
        }
    }
}

#[async_trait]
impl<S: ObjectStore> ProcessTask for RemediationTask<S> {
    async fn execute(self) -> Self {
        debug!(task = %self.id, objects = self.objects.len(), "task started");
        for object in &self.objects {
            let record = self.remediate(object).await;
            self.audit.record(record);
        }
        debug!(task = %self.id, "task finished");
        self
    }

    fn complete(self) {
        self.store.close();
    }

    fn id(&self) -> &str {
        &self.id
    }
}

impl<S: ObjectStore> Drop for RemediationTask<S> {
    fn drop(&mut self) {
        self.store.close();
    }
}
