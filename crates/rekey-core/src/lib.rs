//! Bulk object-key remediation engine for rekey.
//!
//! This crate lists every object in a bucket, computes a corrected key for
//! each one through a [`mapper::KeyMapper`], and renames the object with a
//! copy, verify, delete protocol. Work is driven through a bounded task
//! scheduler so that no more than `parallelism` partitions are ever in flight.
//!
//! # Architecture
//!
//! ```text
//! bucket listing (paginated)
//!        |
//!        v
//!   partitions -> RemediationTask (one store handle each)
//!        |
//!        v
//!   TaskProcessor / ProcessTaskQueue (bounded in-flight set)
//!        |
//!        v
//!   KeyMapper decision -> RemediationBucket::rename -> AuditSink
//! ```

pub mod audit;
pub mod config;
pub mod error;
pub mod etag;
pub mod lookup;
pub mod mapper;
pub mod scheduler;
pub mod store;
pub mod task;
pub mod types;

pub use config::RemediationConfig;
pub use error::{RemediationError, RemediationResult, StoreError};
pub use types::{CompletedPart, ObjectPart, ObjectRecord, RenameOutcome};
