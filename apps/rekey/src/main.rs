//! rekey - bulk object-key remediation for S3 buckets.
//!
//! Lists every object of the configured bucket, computes a corrected key for
//! each one and renames it with a copy, verify, delete protocol. One audit
//! line per object is written on the `remediation` log target.
//!
//! # Usage
//!
//! ```text
//! AWS_BUCKET_NAME=harvard-drs-delivery PARALLELISM=12 rekey [ENDPOINT]
//! ```
//!
//! The optional positional `ENDPOINT` overrides `AWS_ENDPOINT_OVERRIDE`.
//!
//! # Environment Variables
//!
//! See [`RemediationConfig::from_env`] for the full table. The most common:
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `PARALLELISM` | `12` | Remediation tasks in flight |
//! | `KEY_MAPPING` | `reversed-id` | `reversed-id` or `lookup` |
//! | `SCHEDULER` | `iterating` | `iterating` or `queue` |
//! | `VERIFY_ONLY` | `false` | Audit compliance without renaming |
//! | `LOG_LEVEL` | `info` | Log level filter |
//! | `RUST_LOG` | *(unset)* | Fine-grained tracing filter (overrides `LOG_LEVEL`) |

use std::future::ready;
use std::num::NonZeroUsize;
use std::pin::pin;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use futures::{Stream, StreamExt};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use rekey_core::audit::TracingAuditSink;
use rekey_core::config::{KeyMappingStrategy, RemediationConfig, SchedulerMode};
use rekey_core::lookup::{FileLoader, LookupTable};
use rekey_core::mapper::{KeyMapper, LookupTableMapper, ReversedIdMapper};
use rekey_core::scheduler::{ProcessTaskQueue, RunSummary, TaskProcessor};
use rekey_core::store::{BucketOptions, ObjectStore, PartLimiter, RemediationBucket};
use rekey_core::task::{ProcessTask, RemediationTask};

/// Version reported at startup.
const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Initialize the tracing subscriber.
///
/// Uses `RUST_LOG` if set, otherwise falls back to the `LOG_LEVEL` config value.
fn init_tracing(log_level: &str) -> Result<()> {
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        EnvFilter::try_new(log_level)
            .with_context(|| format!("invalid log level filter: {log_level}"))?
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();

    Ok(())
}

/// Load configuration, applying the positional endpoint override.
fn load_config() -> Result<RemediationConfig> {
    let mut config = RemediationConfig::try_from_env().context("invalid configuration")?;
    if let Some(endpoint) = std::env::args().nth(1) {
        config.endpoint_override = Some(endpoint);
        config
            .validate()
            .context("invalid endpoint argument")?;
    }
    Ok(config)
}

/// Build the configured key mapper. The lookup table, when one is loaded,
/// is returned as well so it can be unloaded after the run.
fn build_mapper(config: &RemediationConfig) -> Result<(Arc<dyn KeyMapper>, Option<Arc<LookupTable>>)> {
    match config.key_mapping {
        KeyMappingStrategy::ReversedId => {
            let mapper = if config.verify_only {
                ReversedIdMapper::verify_only()
            } else {
                ReversedIdMapper::new()
            };
            Ok((Arc::new(mapper), None))
        }
        KeyMappingStrategy::Lookup => {
            if config.verify_only {
                warn!("VERIFY_ONLY applies to the reversed-id strategy only, ignoring");
            }
            let loader =
                FileLoader::new(&config.input_path, &config.input_pattern, config.input_skip)
                    .context("invalid lookup input pattern")?;
            let table = Arc::new(
                LookupTable::load(&loader)
                    .with_context(|| format!("failed to load lookup table from {}", config.input_path))?,
            );
            Ok((Arc::new(LookupTableMapper::new(Arc::clone(&table))), Some(table)))
        }
    }
}

/// Resolve when Ctrl-C is received. Never resolves if the handler cannot be installed.
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "failed to install Ctrl-C handler");
        std::future::pending::<()>().await;
    }
    info!("received shutdown signal, draining tasks");
}

fn report(summary: &RunSummary, audit: &TracingAuditSink) {
    info!(
        elapsed_secs = summary.elapsed.as_secs_f64(),
        objects = audit.tally().total(),
        outcomes = %audit.tally(),
        %summary,
        "remediation finished"
    );
}

/// Drive tasks through the push queue, submitting as listing pages arrive.
async fn run_queue<T, S>(config: &RemediationConfig, tasks: S, audit: Arc<TracingAuditSink>) -> RunSummary
where
    T: ProcessTask,
    S: Stream<Item = T>,
{
    let queue = ProcessTaskQueue::new(config.parallelism, config.queue_capacity, move |summary| {
        report(summary, &audit);
    });
    let mut tasks = pin!(tasks);
    let mut shutdown = pin!(shutdown_signal());

    loop {
        let next = tokio::select! {
            biased;
            () = &mut shutdown => return queue.shutdown(config.drain_timeout()).await,
            next = tasks.next() => next,
        };
        let Some(task) = next else {
            break;
        };
        if let Err(e) = queue.submit(task).await {
            warn!(error = %e, "task refused by queue");
            e.into_task().complete();
        }
    }

    queue.close();
    tokio::select! {
        summary = queue.wait() => summary,
        () = &mut shutdown => queue.shutdown(config.drain_timeout()).await,
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = load_config()?;

    init_tracing(&config.log_level)?;

    info!(
        version = VERSION,
        available_parallelism = std::thread::available_parallelism().map_or(1, NonZeroUsize::get),
        "starting rekey"
    );
    info!(
        config = %serde_json::to_string(&config).context("failed to serialize configuration")?,
        "effective configuration"
    );

    let started_at = Utc::now();
    let (mapper, lookup) = build_mapper(&config)?;

    let client = rekey_s3::connect(&config).await;
    client
        .check_bucket()
        .await
        .with_context(|| format!("bucket {} is not reachable", config.bucket_name))?;

    let options = BucketOptions::from(&config);
    let part_limiter = PartLimiter::new(config.part_concurrency);
    let listing = RemediationBucket::new(client.clone(), options, part_limiter.clone());
    let audit = Arc::new(TracingAuditSink::new());

    // A listing failure ends the source; tasks already pulled still finish.
    let pages = listing
        .pages()
        .scan((), |_, page| {
            ready(match page {
                Ok(objects) => Some(objects),
                Err(e) => {
                    error!(error = %e, "listing failed, no further pages will be scheduled");
                    None
                }
            })
        })
        .filter(|objects| ready(!objects.is_empty()));

    let tasks = {
        let mapper = Arc::clone(&mapper);
        let audit = Arc::clone(&audit);
        let skip_modified = config.skip_modified_after_start;
        pages.map(move |objects| {
            let store = RemediationBucket::new(client.clone(), options, part_limiter.clone());
            let task = RemediationTask::new(store, Arc::clone(&mapper), audit.clone(), objects);
            if skip_modified {
                task.with_staleness_guard(started_at)
            } else {
                task
            }
        })
    };

    let summary = match config.scheduler {
        SchedulerMode::Iterating => {
            let processor = TaskProcessor::new(config.parallelism, config.drain_timeout());
            processor
                .run_until(tasks, shutdown_signal(), |summary| report(summary, &audit))
                .await
        }
        SchedulerMode::Queue => run_queue(&config, tasks, Arc::clone(&audit)).await,
    };

    match listing.count().await {
        Ok(count) => info!(count, "objects in bucket after remediation"),
        Err(e) => warn!(error = %e, "failed to count bucket objects"),
    }

    drop(mapper);
    if let Some(table) = lookup {
        match Arc::try_unwrap(table) {
            Ok(mut table) => table.unload(),
            Err(_) => warn!("lookup table still referenced, not unloaded"),
        }
    }
    listing.close();

    if summary.failed > 0 || summary.cancelled > 0 {
        warn!(%summary, "run did not complete every task");
    }
    Ok(())
}
