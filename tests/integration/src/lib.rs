//! Integration tests for rekey against an S3-compatible endpoint.
//!
//! These tests require an S3 emulator (or real S3 credentials) reachable at
//! `S3_ENDPOINT_URL`, `http://localhost:4566` by default. They are marked
//! `#[ignore]` so they don't run during normal `cargo test`.
//!
//! Run them with:
//! ```text
//! cargo test -p rekey-integration -- --ignored
//! ```

use std::sync::Once;

use aws_sdk_s3::config::{BehaviorVersion, Credentials, Region};
use aws_sdk_s3::primitives::ByteStream;
use rekey_core::ObjectRecord;
use rekey_core::store::{BucketOptions, PartLimiter, RemediationBucket};
use rekey_s3::S3Client;

static INIT: Once = Once::new();

/// Five MiB, the smallest part S3 accepts for all but the last part.
pub const MIN_PART_SIZE: u64 = 5 * 1024 * 1024;

/// Initialize tracing (once).
fn init_tracing() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
            )
            .with_test_writer()
            .init();
    });
}

/// Endpoint URL for the server.
fn endpoint_url() -> String {
    std::env::var("S3_ENDPOINT_URL").unwrap_or_else(|_| "http://localhost:4566".to_owned())
}

/// Create a configured S3 client pointing at the local server.
#[must_use]
pub fn s3_client() -> aws_sdk_s3::Client {
    init_tracing();

    let creds = Credentials::new("test", "test", None, None, "integration-test");

    let config = aws_sdk_s3::config::Builder::new()
        .behavior_version(BehaviorVersion::latest())
        .region(Region::new("us-east-1"))
        .credentials_provider(creds)
        .endpoint_url(endpoint_url())
        .force_path_style(true)
        .build();

    aws_sdk_s3::Client::from_conf(config)
}

/// Remediation store over `bucket`, sharing `client`.
#[must_use]
pub fn remediation_bucket(
    client: &aws_sdk_s3::Client,
    bucket: &str,
    options: BucketOptions,
) -> RemediationBucket<S3Client> {
    RemediationBucket::new(
        S3Client::new(client.clone(), bucket),
        options,
        PartLimiter::new(4),
    )
}

/// Generate a unique bucket name for a test.
#[must_use]
pub fn test_bucket_name(prefix: &str) -> String {
    let id = uuid::Uuid::new_v4().to_string()[..8].to_owned();
    format!("test-{prefix}-{id}")
}

/// Create a bucket and return its name. Caller is responsible for cleanup.
pub async fn create_test_bucket(client: &aws_sdk_s3::Client, prefix: &str) -> String {
    let name = test_bucket_name(prefix);
    client
        .create_bucket()
        .bucket(&name)
        .send()
        .await
        .unwrap_or_else(|e| panic!("failed to create bucket {name}: {e}"));
    name
}

/// Upload `data` under `key` and return the record a listing would produce.
pub async fn put_object(
    client: &aws_sdk_s3::Client,
    bucket: &str,
    key: &str,
    data: Vec<u8>,
) -> ObjectRecord {
    let size = data.len() as u64;
    let output = client
        .put_object()
        .bucket(bucket)
        .key(key)
        .body(ByteStream::from(data))
        .send()
        .await
        .unwrap_or_else(|e| panic!("failed to put {key}: {e}"));
    ObjectRecord::new(key, output.e_tag().unwrap_or_default(), size)
}

/// Every key in `bucket`, in listing order.
pub async fn list_keys(client: &aws_sdk_s3::Client, bucket: &str) -> Vec<String> {
    let mut keys = Vec::new();
    let mut continuation_token = None;
    loop {
        let resp = client
            .list_objects_v2()
            .bucket(bucket)
            .set_continuation_token(continuation_token.take())
            .send()
            .await
            .unwrap_or_else(|e| panic!("failed to list {bucket}: {e}"));
        keys.extend(resp.contents().iter().filter_map(|o| o.key().map(ToOwned::to_owned)));
        if resp.is_truncated() == Some(true) {
            continuation_token = resp.next_continuation_token().map(ToOwned::to_owned);
        } else {
            return keys;
        }
    }
}

/// Download the body stored under `key`.
pub async fn get_object(client: &aws_sdk_s3::Client, bucket: &str, key: &str) -> Vec<u8> {
    client
        .get_object()
        .bucket(bucket)
        .key(key)
        .send()
        .await
        .unwrap_or_else(|e| panic!("failed to get {key}: {e}"))
        .body
        .collect()
        .await
        .unwrap_or_else(|e| panic!("failed to read {key}: {e}"))
        .into_bytes()
        .to_vec()
}

/// Delete all objects in a bucket, then delete the bucket.
pub async fn cleanup_bucket(client: &aws_sdk_s3::Client, bucket: &str) {
    let mut continuation_token = None;
    loop {
        let Ok(resp) = client
            .list_objects_v2()
            .bucket(bucket)
            .set_continuation_token(continuation_token.take())
            .send()
            .await
        else {
            return; // Bucket may not exist.
        };

        for obj in resp.contents() {
            if let Some(key) = obj.key() {
                let _ = client.delete_object().bucket(bucket).key(key).send().await;
            }
        }

        if resp.is_truncated() == Some(true) {
            continuation_token = resp.next_continuation_token().map(ToOwned::to_owned);
        } else {
            break;
        }
    }

    // Abort uploads left behind by failed multipart copies.
    if let Ok(uploads) = client.list_multipart_uploads().bucket(bucket).send().await {
        for upload in uploads.uploads() {
            if let (Some(key), Some(id)) = (upload.key(), upload.upload_id()) {
                let _ = client
                    .abort_multipart_upload()
                    .bucket(bucket)
                    .key(key)
                    .upload_id(id)
                    .send()
                    .await;
            }
        }
    }

    let _ = client.delete_bucket().bucket(bucket).send().await;
}

mod test_rename;
mod test_task;
