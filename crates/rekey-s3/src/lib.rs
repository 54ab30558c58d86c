//! Amazon S3 [`StorageClient`](rekey_core::store::StorageClient) for rekey.
//!
//! Wraps `aws-sdk-s3` with the handful of wire calls the rename protocol
//! needs: `ListObjectsV2`, `CopyObject`, the multipart copy calls
//! (`CreateMultipartUpload`, `UploadPartCopy`, `CompleteMultipartUpload`,
//! `AbortMultipartUpload`) and `DeleteObject`. SDK errors are flattened into
//! [`StoreError`](rekey_core::StoreError) with the S3 error code and message.

mod client;
mod convert;

pub use client::{S3Client, connect};
pub use convert::{copy_source, object_record};
