//! Audit events, the audit-sink contract, and scheduler job identity
//!
//! Every stage outcome is recorded as exactly one immutable [`AuditEvent`]
//! handed to an external, append-only sink. The sink returns an opaque
//! record id, which is the stage's local "did this succeed" signal. The
//! sink's own persistence and schema are out of scope here; the default
//! implementation writes through tracing so interactive runs and tests
//! need no repository connection.

use async_trait::async_trait;
use bulkline_common::Result;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Mutex;
use tracing::{info, warn};

/// Maximum detail-message length the audit sink accepts.
pub const AUDIT_DETAIL_LIMIT: usize = 1023;

/// Placeholder used when the scheduler did not provide a job name.
pub const JOB_NAME_PLACEHOLDER: &str = "Job Name Not Found";
/// Placeholder used when the scheduler did not provide a task name.
pub const TASK_NAME_PLACEHOLDER: &str = "Task Name Not Found";

/// Sink-side status letter for an audit record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Info,
    Warning,
    Error,
}

impl Severity {
    /// Single-letter status code stored by the sink.
    pub fn code(self) -> char {
        match self {
            Severity::Info => 'I',
            Severity::Warning => 'W',
            Severity::Error => 'E',
        }
    }
}

/// One immutable record of a stage outcome.
#[derive(Debug, Clone)]
pub struct AuditEvent {
    pub severity: Severity,
    pub message: String,
    /// Source-subsystem code (e.g. the warehouse driver identifier)
    pub subsystem_code: String,
    /// Source-subsystem detail, truncated to the sink's size limit
    pub subsystem_detail: String,
    pub job_key: i64,
    pub task_key: i64,
    pub sequence: i64,
}

impl AuditEvent {
    /// Build an event for the given job, sanitizing and truncating the
    /// detail text to the sink's message-size limit.
    pub fn new(
        severity: Severity,
        message: impl Into<String>,
        subsystem_code: impl Into<String>,
        subsystem_detail: &str,
        job: &JobEnv,
    ) -> Self {
        Self {
            severity,
            message: message.into(),
            subsystem_code: subsystem_code.into(),
            subsystem_detail: truncate_detail(subsystem_detail),
            job_key: job.job_key,
            task_key: job.task_key,
            sequence: job.sequence,
        }
    }
}

/// Flatten newlines, neutralize quotes, and clamp to the sink limit.
pub fn truncate_detail(detail: &str) -> String {
    let cleaned: String = detail
        .replace('\n', " ")
        .replace('\'', "`")
        .chars()
        .take(AUDIT_DETAIL_LIMIT)
        .collect();
    cleaned
}

/// Trait for audit sinks (dependency injection)
#[async_trait]
pub trait AuditSink: Send + Sync {
    /// Record an audit event, returning the sink's opaque record id.
    async fn record(&self, event: &AuditEvent) -> Result<i64>;
}

/// Default sink: logs events through tracing and hands back a
/// process-local record id. Used for interactive runs and as the fallback
/// when no repository sink is configured.
#[derive(Debug, Default)]
pub struct TracingAuditSink {
    next_id: AtomicI64,
}

impl TracingAuditSink {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AuditSink for TracingAuditSink {
    async fn record(&self, event: &AuditEvent) -> Result<i64> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        match event.severity {
            Severity::Error => warn!(
                status = %event.severity.code(),
                job_key = event.job_key,
                task_key = event.task_key,
                sequence = event.sequence,
                detail = %event.subsystem_detail,
                "{}", event.message
            ),
            _ => info!(
                status = %event.severity.code(),
                job_key = event.job_key,
                task_key = event.task_key,
                sequence = event.sequence,
                detail = %event.subsystem_detail,
                "{}", event.message
            ),
        }
        Ok(id)
    }
}

/// In-memory sink that captures events for assertions in tests.
#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    events: Mutex<Vec<AuditEvent>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl AuditSink for MemoryAuditSink {
    async fn record(&self, event: &AuditEvent) -> Result<i64> {
        let mut events = self
            .events
            .lock()
            .map_err(|_| bulkline_common::BulklineError::Unknown("audit sink poisoned".into()))?;
        events.push(event.clone());
        Ok(events.len() as i64)
    }
}

/// External parameter store contract (read/write named values with a
/// comment). The store's persistence is out of scope.
#[async_trait]
pub trait ParameterStore: Send + Sync {
    async fn read(&self, name: &str) -> Result<(String, String)>;
    async fn write(&self, name: &str, value: &str, comment: &str) -> Result<()>;
}

#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
struct ParameterEntry {
    value: String,
    comment: String,
}

/// Parameter store backed by a JSON file, used when no repository-side
/// store is configured. Reads and writes go through the whole file; the
/// store holds a handful of job bookmarks, not bulk data.
#[derive(Debug)]
pub struct FileParameterStore {
    path: std::path::PathBuf,
}

impl FileParameterStore {
    pub fn new(path: impl Into<std::path::PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn load(&self) -> Result<std::collections::BTreeMap<String, ParameterEntry>> {
        if !self.path.exists() {
            return Ok(std::collections::BTreeMap::new());
        }
        let text = std::fs::read_to_string(&self.path)?;
        Ok(serde_json::from_str(&text)?)
    }
}

#[async_trait]
impl ParameterStore for FileParameterStore {
    async fn read(&self, name: &str) -> Result<(String, String)> {
        let entries = self.load()?;
        entries
            .get(name)
            .map(|e| (e.value.clone(), e.comment.clone()))
            .ok_or_else(|| {
                bulkline_common::BulklineError::Config(format!("parameter {} not found", name))
            })
    }

    async fn write(&self, name: &str, value: &str, comment: &str) -> Result<()> {
        let mut entries = self.load()?;
        entries.insert(
            name.to_string(),
            ParameterEntry {
                value: value.to_string(),
                comment: comment.to_string(),
            },
        );
        std::fs::write(&self.path, serde_json::to_string_pretty(&entries)?)?;
        Ok(())
    }
}

/// Scheduler-provided job identity, read from the environment.
///
/// The job scheduler exports these before invoking the process; absence of
/// any value is tolerated and substituted with a documented sentinel
/// (`-1` for numeric identifiers, a literal placeholder for names).
#[derive(Debug, Clone)]
pub struct JobEnv {
    pub job_key: i64,
    pub task_key: i64,
    pub sequence: i64,
    pub job_name: String,
    pub task_name: String,
}

impl JobEnv {
    /// Read job identity from `BULKLINE_JOB_KEY`, `BULKLINE_TASK_KEY`,
    /// `BULKLINE_SEQUENCE`, `BULKLINE_JOB_NAME`, `BULKLINE_TASK_NAME`.
    pub fn from_env() -> Self {
        Self {
            job_key: env_i64("BULKLINE_JOB_KEY"),
            task_key: env_i64("BULKLINE_TASK_KEY"),
            sequence: env_i64("BULKLINE_SEQUENCE"),
            job_name: env_name("BULKLINE_JOB_NAME", JOB_NAME_PLACEHOLDER),
            task_name: env_name("BULKLINE_TASK_NAME", TASK_NAME_PLACEHOLDER),
        }
    }

    /// Identity for an ad-hoc run with no job context.
    pub fn interactive() -> Self {
        Self {
            job_key: -1,
            task_key: -1,
            sequence: -1,
            job_name: JOB_NAME_PLACEHOLDER.to_string(),
            task_name: TASK_NAME_PLACEHOLDER.to_string(),
        }
    }

    /// A development or interactive invocation has no job context: the
    /// job key is absent or zero and the job name is still the
    /// placeholder. The exit contract maps every severity to status 0
    /// for such runs so ad-hoc executions never halt a shell on a
    /// warning.
    pub fn is_interactive(&self) -> bool {
        self.job_key <= 0 && self.job_name == JOB_NAME_PLACEHOLDER
    }
}

fn env_i64(var: &str) -> i64 {
    std::env::var(var)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(-1)
}

fn env_name(var: &str, placeholder: &str) -> String {
    std::env::var(var).unwrap_or_else(|_| placeholder.to_string())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_detail_truncation() {
        let long = "x".repeat(AUDIT_DETAIL_LIMIT + 200);
        assert_eq!(truncate_detail(&long).len(), AUDIT_DETAIL_LIMIT);

        let messy = "line one\nline 'two'";
        assert_eq!(truncate_detail(messy), "line one line `two`");
    }

    #[tokio::test]
    async fn test_memory_sink_returns_record_ids() {
        let sink = MemoryAuditSink::new();
        let job = JobEnv::interactive();
        let event = AuditEvent::new(Severity::Info, "stage done", "db_code3", "detail", &job);

        let first = sink.record(&event).await.unwrap();
        let second = sink.record(&event).await.unwrap();
        assert_eq!(first, 1);
        assert_eq!(second, 2);
        assert_eq!(sink.events().len(), 2);
    }

    #[test]
    fn test_interactive_sentinels() {
        let job = JobEnv::interactive();
        assert!(job.is_interactive());
        assert_eq!(job.job_key, -1);
        assert_eq!(job.job_name, JOB_NAME_PLACEHOLDER);
    }

    #[test]
    fn test_interactive_detection() {
        // A zero job key with the placeholder name is still a
        // development run.
        let mut job = JobEnv::interactive();
        job.job_key = 0;
        assert!(job.is_interactive());

        // A scheduler-assigned key is never interactive, even with the
        // placeholder name.
        job.job_key = 42;
        assert!(!job.is_interactive());

        // A real job name means a scheduled run regardless of the key.
        let mut named = JobEnv::interactive();
        named.job_name = "Load Customers".to_string();
        assert!(!named.is_interactive());
    }
}
