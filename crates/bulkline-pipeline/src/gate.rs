//! File-arrival gate
//!
//! Resolves a bounded wait for an expected file or trigger into a terminal
//! outcome. This is the only blocking/suspending operation in the core:
//! the wait proceeds in fixed 5-second increments up to the configured
//! maximum and is not cancellable mid-interval.

use crate::files::{find_files, normalize_path, FileSpec};
use bulkline_common::ReturnCode;
use std::path::Path;
use std::time::Duration;
use tracing::debug;

/// Seconds between existence checks while waiting.
const POLL_INTERVAL_SECS: u64 = 5;

/// What the gate resolves to when the wait limit is reached.
///
/// An unrecognized policy string resolves to `FatalError`: a bad policy
/// value is a misconfiguration and is treated as the worst case at every
/// call site, never silently ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutPolicy {
    Error,
    FatalError,
    Warning,
}

impl TimeoutPolicy {
    /// Parse scheduler configuration text. Unrecognized values map to
    /// `None`; [`await_file`] resolves that to a fatal timeout outcome.
    pub fn parse(text: &str) -> Option<Self> {
        match text.trim() {
            "Error" => Some(TimeoutPolicy::Error),
            "Fatal Error" => Some(TimeoutPolicy::FatalError),
            "Warning" => Some(TimeoutPolicy::Warning),
            _ => None,
        }
    }

    fn return_code(self) -> ReturnCode {
        match self {
            TimeoutPolicy::Error => ReturnCode::Error,
            TimeoutPolicy::FatalError => ReturnCode::FatalError,
            TimeoutPolicy::Warning => ReturnCode::Warning,
        }
    }
}

/// Parameters for one arrival wait.
#[derive(Debug, Clone)]
pub struct ArrivalWait {
    /// Directory the file is expected in
    pub directory: String,
    /// Trigger-file pattern; takes precedence over `file_pattern` when set
    pub trigger_pattern: String,
    /// Data-file pattern used when no trigger file is configured
    pub file_pattern: String,
    /// Maximum end-to-end wait in seconds
    pub max_wait_secs: u64,
    /// When set, the file must already exist: absence at call time is a
    /// fatal outcome and the polling loop is never entered
    pub must_exist: bool,
    pub timeout_policy: TimeoutPolicy,
}

/// Wait for a file to arrive, resolving to a terminal `(code, message)`.
///
/// - A missing directory fails immediately with `FatalError` and no
///   sleeping: it indicates misconfiguration, not transient latency.
/// - A file already present at call time returns `Success` with zero
///   elapsed polling.
/// - Otherwise existence is re-checked every 5 seconds until
///   `max_wait_secs` elapses, then the timeout policy decides the outcome.
pub async fn await_file(wait: &ArrivalWait) -> (ReturnCode, String) {
    await_file_with_policy(wait, Some(wait.timeout_policy)).await
}

/// Like [`await_file`] but with the policy as parsed from configuration:
/// `None` (an unrecognized policy value) resolves a timeout to
/// `FatalError`.
pub async fn await_file_with_policy(
    wait: &ArrivalWait,
    policy: Option<TimeoutPolicy>,
) -> (ReturnCode, String) {
    let directory = normalize_path(&wait.directory);
    let dir_path = Path::new(&directory);

    if !dir_path.exists() {
        let msg = format!("Folder {} was not found.", directory);
        debug!("{}", msg);
        return (ReturnCode::FatalError, msg);
    }

    // A configured trigger pattern is what we actually wait on.
    let wait_pattern = if wait.trigger_pattern.is_empty() {
        &wait.file_pattern
    } else {
        &wait.trigger_pattern
    };
    let spec = match FileSpec::parse(&format!("{}/{}", directory, wait_pattern)) {
        Ok(spec) => spec,
        Err(e) => return (ReturnCode::FatalError, e.to_string()),
    };

    debug!(
        pattern = %spec.file_pattern(),
        wait_secs = wait.max_wait_secs,
        "Waiting for file arrival"
    );

    if !find_files(dir_path, &spec.pattern, &spec.extension).is_empty() {
        let msg = format!("File {} was found.", spec.file_pattern());
        debug!("{}", msg);
        return (ReturnCode::Success, msg);
    }

    if wait.must_exist {
        let msg = format!(
            "File {} was not found in {} and waiting is disabled.",
            spec.file_pattern(),
            directory
        );
        debug!("{}", msg);
        return (ReturnCode::FatalError, msg);
    }

    let mut elapsed = 0u64;
    while elapsed < wait.max_wait_secs {
        tokio::time::sleep(Duration::from_secs(POLL_INTERVAL_SECS)).await;
        elapsed += POLL_INTERVAL_SECS;

        if !find_files(dir_path, &spec.pattern, &spec.extension).is_empty() {
            let msg = format!("File {} was found.", spec.file_pattern());
            debug!("{}", msg);
            return (ReturnCode::Success, msg);
        }
        debug!(
            elapsed,
            remaining = wait.max_wait_secs.saturating_sub(elapsed),
            "File not present yet"
        );
    }

    match policy {
        Some(policy) => {
            let msg = format!(
                "Maximum wait time of {} seconds expired and no file matching {} was found.",
                wait.max_wait_secs,
                spec.file_pattern()
            );
            debug!("{}", msg);
            (policy.return_code(), msg)
        },
        None => {
            let msg =
                "Invalid wait-response value was specified and the wait time limit was reached"
                    .to_string();
            debug!("{}", msg);
            (ReturnCode::FatalError, msg)
        },
    }
}
