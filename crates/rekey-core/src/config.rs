//! Remediation run configuration.
//!
//! Provides [`RemediationConfig`]. Values are loaded from environment
//! variables, falling back to defaults that match the production deployment.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use typed_builder::TypedBuilder;

use crate::error::{RemediationError, RemediationResult};

/// Largest page size accepted by `ListObjectsV2`.
const MAX_KEYS_LIMIT: i32 = 1000;

/// Which key mapping strategy a deployment runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum KeyMappingStrategy {
    /// Prefix keys with two directory segments derived from the numeric root id.
    #[default]
    ReversedId,
    /// Replace the numeric root id with a fragment from a lookup table.
    Lookup,
}

impl KeyMappingStrategy {
    /// Return the configuration string for the strategy.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ReversedId => "reversed-id",
            Self::Lookup => "lookup",
        }
    }
}

impl fmt::Display for KeyMappingStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for KeyMappingStrategy {
    type Err = RemediationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "reversed-id" | "reversed" => Ok(Self::ReversedId),
            "lookup" | "table" => Ok(Self::Lookup),
            other => Err(RemediationError::Config(format!(
                "unknown key mapping strategy: {other}"
            ))),
        }
    }
}

/// Which scheduler drives the remediation tasks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SchedulerMode {
    /// Pull the next task from the listing when a slot frees.
    #[default]
    Iterating,
    /// Push every task into a bounded queue as listing pages arrive.
    Queue,
}

impl SchedulerMode {
    /// Return the configuration string for the mode.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Iterating => "iterating",
            Self::Queue => "queue",
        }
    }
}

impl fmt::Display for SchedulerMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SchedulerMode {
    type Err = RemediationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "iterating" | "pull" => Ok(Self::Iterating),
            "queue" | "push" => Ok(Self::Queue),
            other => Err(RemediationError::Config(format!(
                "unknown scheduler mode: {other}"
            ))),
        }
    }
}

/// Remediation run configuration.
///
/// # Examples
///
/// ```
/// use rekey_core::config::RemediationConfig;
///
/// let config = RemediationConfig::default();
/// assert_eq!(config.parallelism, 12);
/// assert_eq!(config.max_part_size, 52_428_800);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, TypedBuilder)]
#[serde(rename_all = "camelCase")]
pub struct RemediationConfig {
    /// Maximum number of remediation tasks in flight.
    #[builder(default = 12)]
    pub parallelism: usize,

    /// Report compliance only; never copy or delete.
    #[builder(default = false)]
    pub verify_only: bool,

    /// Key mapping strategy.
    #[builder(default)]
    pub key_mapping: KeyMappingStrategy,

    /// Scheduler variant.
    #[builder(default)]
    pub scheduler: SchedulerMode,

    /// Path of the lookup input (lookup strategy only).
    #[builder(default = String::from("./external/dump.txt"))]
    pub input_path: String,

    /// Line pattern of the lookup input; group 1 is the id, group 2 the fragment.
    #[builder(default = String::from(r"^\d+ : (\d+) .*:(\d+)$"))]
    pub input_pattern: String,

    /// Number of header lines to skip in the lookup input.
    #[builder(default = 2)]
    pub input_skip: usize,

    /// Bucket to remediate.
    #[builder(default = String::from("harvard-drs-delivery"))]
    pub bucket_name: String,

    /// Optional endpoint override (e.g. a local S3 emulator).
    #[builder(default)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint_override: Option<String>,

    /// Region used to sign requests.
    #[builder(default = String::from("us-east-1"))]
    pub region: String,

    /// Use path-style addressing.
    #[builder(default = false)]
    pub force_path_style: bool,

    /// Maximum keys per listing page.
    #[builder(default = 1000)]
    pub max_keys: i32,

    /// Byte size of each multipart copy part.
    #[builder(default = 52_428_800)]
    pub max_part_size: u64,

    /// Objects at or above this size are copied with the multipart protocol.
    #[builder(default = 104_857_600)]
    pub multipart_threshold: u64,

    /// Skip oversized objects instead of copying them in parts.
    #[builder(default = false)]
    pub skip_multipart: bool,

    /// Maximum number of part copies in flight across the whole run.
    #[builder(default = 16)]
    pub part_concurrency: usize,

    /// Skip objects modified after the run started.
    #[builder(default = true)]
    pub skip_modified_after_start: bool,

    /// Seconds to wait for residual tasks once the scheduler drains.
    #[builder(default = 15)]
    pub drain_timeout_secs: u64,

    /// Capacity of the waiting queue of the push scheduler.
    #[builder(default = 512)]
    pub queue_capacity: usize,

    /// Log level filter string (e.g. `"info"`, `"debug"`).
    #[builder(default = String::from("info"))]
    pub log_level: String,
}

impl Default for RemediationConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl RemediationConfig {
    /// Load configuration from environment variables.
    ///
    /// | Variable | Default |
    /// |----------|---------|
    /// | `PARALLELISM` | `12` |
    /// | `VERIFY_ONLY` | `false` |
    /// | `KEY_MAPPING` | `reversed-id` |
    /// | `SCHEDULER` | `iterating` |
    /// | `INPUT_PATH` | `./external/dump.txt` |
    /// | `INPUT_PATTERN` | `^\d+ : (\d+) .*:(\d+)$` |
    /// | `INPUT_SKIP` | `2` |
    /// | `AWS_BUCKET_NAME` | `harvard-drs-delivery` |
    /// | `AWS_ENDPOINT_OVERRIDE` | *(unset)* |
    /// | `AWS_REGION` | `us-east-1` |
    /// | `AWS_FORCE_PATH_STYLE` | `false` |
    /// | `AWS_MAX_KEYS` | `1000` |
    /// | `AWS_MAX_PART_SIZE` | `52428800` |
    /// | `AWS_MULTIPART_THRESHOLD` | `104857600` |
    /// | `AWS_SKIP_MULTIPART` | `false` |
    /// | `AWS_PART_CONCURRENCY` | `16` |
    /// | `SKIP_MODIFIED_AFTER_START` | `true` |
    /// | `DRAIN_TIMEOUT_SECS` | `15` |
    /// | `QUEUE_CAPACITY` | `512` |
    /// | `LOG_LEVEL` | `info` |
    ///
    /// Unknown strategy or scheduler names are reported by [`Self::validate`]
    /// callers through [`Self::try_from_env`].
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Like [`Self::from_env`] but rejects unknown enum values and then validates.
    pub fn try_from_env() -> RemediationResult<Self> {
        let config = Self::from_env();
        if let Ok(v) = std::env::var("KEY_MAPPING") {
            v.parse::<KeyMappingStrategy>()?;
        }
        if let Ok(v) = std::env::var("SCHEDULER") {
            v.parse::<SchedulerMode>()?;
        }
        config.validate()?;
        Ok(config)
    }

    /// Build a configuration from an arbitrary variable source.
    pub(crate) fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(n) = parse_number(var("PARALLELISM")) {
            config.parallelism = n;
        }
        if let Some(v) = var("VERIFY_ONLY") {
            config.verify_only = parse_bool(&v);
        }
        if let Some(s) = var("KEY_MAPPING").and_then(|v| v.parse().ok()) {
            config.key_mapping = s;
        }
        if let Some(s) = var("SCHEDULER").and_then(|v| v.parse().ok()) {
            config.scheduler = s;
        }
        if let Some(v) = var("INPUT_PATH") {
            config.input_path = v;
        }
        if let Some(v) = var("INPUT_PATTERN") {
            config.input_pattern = v;
        }
        if let Some(n) = parse_number(var("INPUT_SKIP")) {
            config.input_skip = n;
        }
        if let Some(v) = var("AWS_BUCKET_NAME") {
            config.bucket_name = v;
        }
        if let Some(v) = var("AWS_ENDPOINT_OVERRIDE") {
            config.endpoint_override = Some(v).filter(|v| !v.is_empty());
        }
        if let Some(v) = var("AWS_REGION") {
            config.region = v;
        }
        if let Some(v) = var("AWS_FORCE_PATH_STYLE") {
            config.force_path_style = parse_bool(&v);
        }
        if let Some(n) = parse_number(var("AWS_MAX_KEYS")) {
            config.max_keys = n;
        }
        if let Some(n) = parse_number(var("AWS_MAX_PART_SIZE")) {
            config.max_part_size = n;
        }
        if let Some(n) = parse_number(var("AWS_MULTIPART_THRESHOLD")) {
            config.multipart_threshold = n;
        }
        if let Some(v) = var("AWS_SKIP_MULTIPART") {
            config.skip_multipart = parse_bool(&v);
        }
        if let Some(n) = parse_number(var("AWS_PART_CONCURRENCY")) {
            config.part_concurrency = n;
        }
        if let Some(v) = var("SKIP_MODIFIED_AFTER_START") {
            config.skip_modified_after_start = parse_bool(&v);
        }
        if let Some(n) = parse_number(var("DRAIN_TIMEOUT_SECS")) {
            config.drain_timeout_secs = n;
        }
        if let Some(n) = parse_number(var("QUEUE_CAPACITY")) {
            config.queue_capacity = n;
        }
        if let Some(v) = var("LOG_LEVEL") {
            config.log_level = v;
        }

        config
    }

    /// Check the values a run cannot start without.
    pub fn validate(&self) -> RemediationResult<()> {
        if self.parallelism == 0 {
            return Err(RemediationError::Config(
                "parallelism must be at least 1".to_owned(),
            ));
        }
        if self.max_part_size == 0 {
            return Err(RemediationError::Config(
                "max part size must be at least 1 byte".to_owned(),
            ));
        }
        if self.part_concurrency == 0 {
            return Err(RemediationError::Config(
                "part concurrency must be at least 1".to_owned(),
            ));
        }
        if !(1..=MAX_KEYS_LIMIT).contains(&self.max_keys) {
            return Err(RemediationError::Config(format!(
                "max keys must be between 1 and {MAX_KEYS_LIMIT}, got {}",
                self.max_keys
            )));
        }
        if self.bucket_name.trim().is_empty() {
            return Err(RemediationError::Config(
                "bucket name must not be empty".to_owned(),
            ));
        }
        if let Some(endpoint) = &self.endpoint_override {
            validate_endpoint(endpoint)?;
        }
        Ok(())
    }

    /// Residual-task wait once the scheduler drains.
    #[must_use]
    pub fn drain_timeout(&self) -> Duration {
        Duration::from_secs(self.drain_timeout_secs)
    }
}

fn validate_endpoint(endpoint: &str) -> RemediationResult<()> {
    let rest = endpoint
        .strip_prefix("http://")
        .or_else(|| endpoint.strip_prefix("https://"))
        .ok_or_else(|| {
            RemediationError::Config(format!(
                "endpoint override must start with http:// or https://: {endpoint}"
            ))
        })?;
    let host = rest.split(['/', '?']).next().unwrap_or_default();
    if host.is_empty() || host.contains(char::is_whitespace) {
        return Err(RemediationError::Config(format!(
            "endpoint override has no valid host: {endpoint}"
        )));
    }
    Ok(())
}

/// Parse a string as a boolean, accepting `"1"` and `"true"` (case-insensitive).
fn parse_bool(value: &str) -> bool {
    value == "1" || value.eq_ignore_ascii_case("true")
}

fn parse_number<T: FromStr>(value: Option<String>) -> Option<T> {
    value.and_then(|v| v.trim().parse().ok())
}
