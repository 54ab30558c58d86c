//! Per-object audit records.
//!
//! Every object a task processes produces exactly one [`AuditRecord`], handed
//! to an [`AuditSink`]. Sinks are shared by all running tasks and must accept
//! concurrent appends.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tracing::info;

use crate::types::RenameOutcome;

/// Logger target of the audit stream.
pub const AUDIT_TARGET: &str = "remediation";

/// What happened to one object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditRecord {
    /// Key the object was listed under.
    pub source_key: String,
    /// Resolved destination key, when mapping produced one.
    pub destination_key: Option<String>,
    /// Source fingerprint as listed.
    pub etag: String,
    /// Source size in bytes.
    pub size: u64,
    /// Result of the attempt.
    pub outcome: RenameOutcome,
    /// Time spent on this object.
    pub elapsed: Duration,
}

impl fmt::Display for AuditRecord {
    /// `sourceKey,destinationKey,sourceFingerprint,sourceSize,outcomeCode,elapsedMillis`
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{},{},{},{},{},{:.3}",
            self.source_key,
            self.destination_key.as_deref().unwrap_or_default(),
            self.etag,
            self.size,
            self.outcome.code(),
            self.elapsed.as_secs_f64() * 1000.0
        )
    }
}

/// Consumer of audit records.
pub trait AuditSink: Send + Sync + fmt::Debug {
    /// Append one record.
    fn record(&self, record: AuditRecord);
}

/// Per-outcome counters.
#[derive(Debug, Default)]
pub struct OutcomeTally {
    counts: [AtomicU64; RenameOutcome::ALL.len()],
}

impl OutcomeTally {
    /// Count one outcome.
    pub fn add(&self, outcome: RenameOutcome) {
        self.counts[outcome.index()].fetch_add(1, Ordering::Relaxed);
    }

    /// Number of times `outcome` was counted.
    #[must_use]
    pub fn get(&self, outcome: RenameOutcome) -> u64 {
        self.counts[outcome.index()].load(Ordering::Relaxed)
    }

    /// Total across all outcomes.
    #[must_use]
    pub fn total(&self) -> u64 {
        RenameOutcome::ALL.iter().map(|o| self.get(*o)).sum()
    }
}

impl fmt::Display for OutcomeTally {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for outcome in RenameOutcome::ALL {
            let count = self.get(outcome);
            if count == 0 {
                continue;
            }
            if !first {
                f.write_str(", ")?;
            }
            write!(f, "{outcome}={count}")?;
            first = false;
        }
        if first {
            f.write_str("none")?;
        }
        Ok(())
    }
}

/// Emits each record as an `info` event on the [`AUDIT_TARGET`] target and
/// keeps a running tally.
#[derive(Debug, Default)]
pub struct TracingAuditSink {
    tally: OutcomeTally,
}

impl TracingAuditSink {
    /// Create a sink with an empty tally.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Counts so far.
    #[must_use]
    pub fn tally(&self) -> &OutcomeTally {
        &self.tally
    }
}

impl AuditSink for TracingAuditSink {
    fn record(&self, record: AuditRecord) {
        self.tally.add(record.outcome);
        info!(target: AUDIT_TARGET, "{record}");
    }
}

/// Keeps every record in memory.
#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    records: Mutex<Vec<AuditRecord>>,
}

impl MemoryAuditSink {
    /// Create an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every record so far, in append order.
    #[must_use]
    pub fn records(&self) -> Vec<AuditRecord> {
        self.records.lock().clone()
    }

    /// Outcomes recorded for `source_key`.
    #[must_use]
    pub fn outcomes_for(&self, source_key: &str) -> Vec<RenameOutcome> {
        self.records
            .lock()
            .iter()
            .filter(|r| r.source_key == source_key)
            .map(|r| r.outcome)
            .collect()
    }

    /// Number of records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    /// Whether nothing was recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }
}

impl AuditSink for MemoryAuditSink {
    fn record(&self, record: AuditRecord) {
        self.records.lock().push(record);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    fn record(outcome: RenameOutcome) -> AuditRecord {
        AuditRecord {
            source_key: "12887301/v1/data.bin".to_owned(),
            destination_key: Some("1037/8821/12887301/v1/data.bin".to_owned()),
            etag: "\"abc\"".to_owned(),
            size: 42,
            outcome,
            elapsed: Duration::from_micros(1500),
        }
    }

    #[test]
    fn test_should_format_audit_line() {
        assert_eq!(
            record(RenameOutcome::EtagMismatch).to_string(),
            "12887301/v1/data.bin,1037/8821/12887301/v1/data.bin,\"abc\",42,-2,1.500"
        );
        let unmapped = AuditRecord {
            destination_key: None,
            ..record(RenameOutcome::Unmappable)
        };
        assert_eq!(unmapped.to_string(), "12887301/v1/data.bin,,\"abc\",42,2,1.500");
    }

    #[test]
    fn test_should_tally_outcomes() {
        let sink = TracingAuditSink::new();
        sink.record(record(RenameOutcome::Success));
        sink.record(record(RenameOutcome::Success));
        sink.record(record(RenameOutcome::ClientError));
        assert_eq!(sink.tally().get(RenameOutcome::Success), 2);
        assert_eq!(sink.tally().get(RenameOutcome::ClientError), 1);
        assert_eq!(sink.tally().total(), 3);
        assert_eq!(sink.tally().to_string(), "success=2, client_error=1");
        assert_eq!(OutcomeTally::default().to_string(), "none");
    }

    #[test]
    fn test_should_accept_concurrent_appends() {
        let sink = Arc::new(MemoryAuditSink::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let sink = Arc::clone(&sink);
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        sink.record(record(RenameOutcome::AlreadyCorrect));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().expect("join");
        }
        assert_eq!(sink.len(), 800);
    }
}
