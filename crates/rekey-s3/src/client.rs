//! `aws-sdk-s3` backed storage client.

use async_trait::async_trait;
use aws_sdk_s3::Client;
use aws_sdk_s3::config::{BehaviorVersion, Region};
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart as S3CompletedPart};
use rekey_core::config::RemediationConfig;
use rekey_core::store::{ListPage, PartCopy, StorageClient};
use rekey_core::{CompletedPart, StoreError};
use tracing::{debug, info};

use crate::convert::{copy_source, object_record, sdk_error};

/// S3 client bound to one bucket.
///
/// Cloning is cheap and shares the underlying connection pool, so every
/// remediation task can own its own handle.
#[derive(Debug, Clone)]
pub struct S3Client {
    client: Client,
    bucket: String,
}

/// Build a client from the run configuration.
///
/// Credentials come from the default provider chain. An endpoint override
/// points the client at an S3-compatible service.
pub async fn connect(config: &RemediationConfig) -> S3Client {
    let sdk_config = aws_config::defaults(BehaviorVersion::latest())
        .region(Region::new(config.region.clone()))
        .load()
        .await;

    let mut builder = aws_sdk_s3::config::Builder::from(&sdk_config);
    if let Some(endpoint) = &config.endpoint_override {
        builder = builder.endpoint_url(endpoint);
    }
    if config.force_path_style {
        builder = builder.force_path_style(true);
    }

    info!(
        bucket = %config.bucket_name,
        region = %config.region,
        endpoint = ?config.endpoint_override,
        force_path_style = config.force_path_style,
        "S3 client configured"
    );
    S3Client::new(Client::from_conf(builder.build()), &config.bucket_name)
}

impl S3Client {
    /// Bind an SDK client to `bucket`.
    #[must_use]
    pub fn new(client: Client, bucket: impl Into<String>) -> Self {
        Self {
            client,
            bucket: bucket.into(),
        }
    }

    /// Fail unless the bucket exists and is reachable.
    pub async fn check_bucket(&self) -> Result<(), StoreError> {
        self.client
            .head_bucket()
            .bucket(&self.bucket)
            .send()
            .await
            .map_err(|e| sdk_error("HeadBucket", &e))?;
        Ok(())
    }

    fn copy_source(&self, key: &str) -> String {
        copy_source(&self.bucket, key)
    }
}

fn part_number(operation: &'static str, number: u32) -> Result<i32, StoreError> {
    i32::try_from(number)
        .map_err(|_| StoreError::client(operation, format!("part number {number} out of range")))
}

#[async_trait]
impl StorageClient for S3Client {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn list_page(
        &self,
        max_keys: i32,
        continuation_token: Option<String>,
    ) -> Result<ListPage, StoreError> {
        let output = self
            .client
            .list_objects_v2()
            .bucket(&self.bucket)
            .max_keys(max_keys)
            .set_continuation_token(continuation_token)
            .send()
            .await
            .map_err(|e| sdk_error("ListObjectsV2", &e))?;

        let objects: Vec<_> = output.contents().iter().filter_map(object_record).collect();
        let next_continuation_token = if output.is_truncated() == Some(true) {
            output.next_continuation_token().map(str::to_owned)
        } else {
            None
        };
        debug!(
            bucket = %self.bucket,
            count = objects.len(),
            truncated = next_continuation_token.is_some(),
            "listed page"
        );
        Ok(ListPage {
            objects,
            next_continuation_token,
        })
    }

    async fn copy_object(
        &self,
        source_key: &str,
        destination_key: &str,
    ) -> Result<String, StoreError> {
        let output = self
            .client
            .copy_object()
            .bucket(&self.bucket)
            .copy_source(self.copy_source(source_key))
            .key(destination_key)
            .send()
            .await
            .map_err(|e| sdk_error("CopyObject", &e))?;
        output
            .copy_object_result()
            .and_then(|r| r.e_tag())
            .map(str::to_owned)
            .ok_or(StoreError::MissingField {
                operation: "CopyObject",
                field: "ETag",
            })
    }

    async fn create_multipart_upload(&self, key: &str) -> Result<String, StoreError> {
        let output = self
            .client
            .create_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| sdk_error("CreateMultipartUpload", &e))?;
        output
            .upload_id()
            .map(str::to_owned)
            .ok_or(StoreError::MissingField {
                operation: "CreateMultipartUpload",
                field: "UploadId",
            })
    }

    async fn upload_part_copy(&self, request: PartCopy<'_>) -> Result<String, StoreError> {
        let output = self
            .client
            .upload_part_copy()
            .bucket(&self.bucket)
            .copy_source(self.copy_source(request.source_key))
            .copy_source_range(request.range.to_string())
            .key(request.destination_key)
            .upload_id(request.upload_id)
            .part_number(part_number("UploadPartCopy", request.part_number)?)
            .send()
            .await
            .map_err(|e| sdk_error("UploadPartCopy", &e))?;
        output
            .copy_part_result()
            .and_then(|r| r.e_tag())
            .map(str::to_owned)
            .ok_or(StoreError::MissingField {
                operation: "UploadPartCopy",
                field: "ETag",
            })
    }

    async fn complete_multipart_upload(
        &self,
        key: &str,
        upload_id: &str,
        parts: &[CompletedPart],
    ) -> Result<String, StoreError> {
        let parts = parts
            .iter()
            .map(|part| {
                Ok(S3CompletedPart::builder()
                    .part_number(part_number("CompleteMultipartUpload", part.number)?)
                    .e_tag(&part.etag)
                    .build())
            })
            .collect::<Result<Vec<_>, StoreError>>()?;

        let output = self
            .client
            .complete_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .multipart_upload(
                CompletedMultipartUpload::builder()
                    .set_parts(Some(parts))
                    .build(),
            )
            .send()
            .await
            .map_err(|e| sdk_error("CompleteMultipartUpload", &e))?;
        output
            .e_tag()
            .map(str::to_owned)
            .ok_or(StoreError::MissingField {
                operation: "CompleteMultipartUpload",
                field: "ETag",
            })
    }

    async fn abort_multipart_upload(&self, key: &str, upload_id: &str) -> Result<(), StoreError> {
        self.client
            .abort_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .send()
            .await
            .map_err(|e| sdk_error("AbortMultipartUpload", &e))?;
        Ok(())
    }

    async fn delete_object(&self, key: &str) -> Result<(), StoreError> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| sdk_error("DeleteObject", &e))?;
        Ok(())
    }

    fn close(&self) {
        debug!(bucket = %self.bucket, "S3 client handle released");
    }
}
