//! Conversions between SDK types and the core data model.

use aws_sdk_s3::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_s3::types::Object;
use chrono::DateTime;
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use rekey_core::{ObjectRecord, StoreError};
use tracing::warn;

/// Characters left as-is in a copy source. Everything else is escaped.
const COPY_SOURCE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'/')
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// Build the `x-amz-copy-source` value for `key` in `bucket`.
///
/// # Examples
///
/// ```
/// use rekey_s3::copy_source;
///
/// assert_eq!(copy_source("drs", "12/v1/a b.png"), "drs/12/v1/a%20b.png");
/// ```
#[must_use]
pub fn copy_source(bucket: &str, key: &str) -> String {
    format!("{bucket}/{}", utf8_percent_encode(key, COPY_SOURCE))
}

/// Convert a listed object. Objects without a key are dropped.
#[must_use]
pub fn object_record(object: &Object) -> Option<ObjectRecord> {
    let Some(key) = object.key() else {
        warn!("listed object without a key, ignoring");
        return None;
    };
    let size = object
        .size()
        .and_then(|size| u64::try_from(size).ok())
        .unwrap_or_default();
    let mut record = ObjectRecord::new(key, object.e_tag().unwrap_or_default(), size);
    if let Some(modified) = object
        .last_modified()
        .and_then(|t| DateTime::from_timestamp(t.secs(), t.subsec_nanos()))
    {
        record = record.with_last_modified(modified);
    }
    Some(record)
}

/// Flatten an SDK error into a [`StoreError`] carrying the S3 error code.
pub(crate) fn sdk_error<E, R>(operation: &'static str, err: &SdkError<E, R>) -> StoreError
where
    E: ProvideErrorMetadata + std::error::Error + 'static,
    R: std::fmt::Debug,
{
    match err.as_service_error() {
        Some(service) => StoreError::client(
            operation,
            format!(
                "{}: {}",
                service.code().unwrap_or("unknown"),
                service.message().unwrap_or("no message")
            ),
        ),
        None => StoreError::client(operation, DisplayErrorContext(err).to_string()),
    }
}
