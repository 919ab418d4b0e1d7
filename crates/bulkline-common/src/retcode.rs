//! Return-code taxonomy shared by every pipeline stage
//!
//! Each stage resolves to a `(ReturnCode, message)` pair. The driver folds
//! stage codes by severity: the job's final code is the worst code seen,
//! and that code's numeric value is what the upstream scheduler receives
//! as the process exit status.

use serde::{Deserialize, Serialize};

/// Severity-ordered outcome of a pipeline stage or of the whole job.
///
/// Numeric codes follow the scheduler contract: `1` success, `-1` warning,
/// `-2` error (operator-retryable), `-3` fatal error (precondition
/// violation no retry can fix). `Unset` is the driver's initial state and
/// never leaves the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ReturnCode {
    /// No stage has reported yet.
    #[default]
    Unset,
    /// Operation completed.
    Success,
    /// Operation completed with caveats.
    Warning,
    /// Stage failed; the failure is operator-retryable.
    Error,
    /// A precondition is violated that no retry of this stage can fix.
    FatalError,
}

impl ReturnCode {
    /// Numeric code as understood by the scheduler.
    pub fn numeric(self) -> i32 {
        match self {
            ReturnCode::Unset => 0,
            ReturnCode::Success => 1,
            ReturnCode::Warning => -1,
            ReturnCode::Error => -2,
            ReturnCode::FatalError => -3,
        }
    }

    /// Severity rank for folding. Success < Warning < Error < FatalError.
    pub fn severity(self) -> u8 {
        match self {
            ReturnCode::Unset => 0,
            ReturnCode::Success => 1,
            ReturnCode::Warning => 2,
            ReturnCode::Error => 3,
            ReturnCode::FatalError => 4,
        }
    }

    pub fn is_success(self) -> bool {
        matches!(self, ReturnCode::Success)
    }

    /// Fold an iterator of codes into the worst severity observed.
    ///
    /// An empty iterator yields `Unset`.
    pub fn max_severity(codes: impl IntoIterator<Item = ReturnCode>) -> ReturnCode {
        codes
            .into_iter()
            .max_by_key(|code| code.severity())
            .unwrap_or(ReturnCode::Unset)
    }

    /// Process exit status handed to the scheduler.
    ///
    /// Success maps to 0; every other code propagates its numeric value.
    /// `Unset` also maps to 0 so a pipeline that ran no stages does not
    /// fail the job.
    pub fn exit_status(self) -> i32 {
        match self {
            ReturnCode::Unset | ReturnCode::Success => 0,
            other => other.numeric(),
        }
    }
}

impl std::fmt::Display for ReturnCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReturnCode::Unset => write!(f, "unset"),
            ReturnCode::Success => write!(f, "success"),
            ReturnCode::Warning => write!(f, "warning"),
            ReturnCode::Error => write!(f, "error"),
            ReturnCode::FatalError => write!(f, "fatal error"),
        }
    }
}

/// Render the operator-facing message for a finished job.
///
/// Messages are written to be read in a scheduler log: they name the
/// table/object involved and the corrective context.
pub fn job_message(code: ReturnCode, object_name: &str, detail: &str) -> String {
    match code {
        ReturnCode::Success => format!("{} into {} table", detail, object_name),
        ReturnCode::Warning => format!("{} to {} completed with warnings", detail, object_name),
        ReturnCode::Error => format!("Job {} failed.  Check logs due to {}", object_name, detail),
        ReturnCode::FatalError => format!(
            "Job {} experienced a fatal error due to {}",
            object_name, detail
        ),
        ReturnCode::Unset => format!(
            "Job {} failed.  The script failed to run.  Check the audit log for details due to {}",
            object_name, detail
        ),
    }
}

/// Thousands-separated count for audit messages, e.g. `1250` -> `"1,250"`.
pub fn format_count(n: u64) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_order_is_total() {
        let ordered = [
            ReturnCode::Success,
            ReturnCode::Warning,
            ReturnCode::Error,
            ReturnCode::FatalError,
        ];
        for pair in ordered.windows(2) {
            assert!(pair[0].severity() < pair[1].severity());
        }
    }

    #[test]
    fn test_max_severity_fold() {
        let codes = [
            ReturnCode::Success,
            ReturnCode::Error,
            ReturnCode::Warning,
            ReturnCode::Success,
        ];
        assert_eq!(ReturnCode::max_severity(codes), ReturnCode::Error);
        assert_eq!(ReturnCode::max_severity([]), ReturnCode::Unset);
    }

    #[test]
    fn test_exit_status_mapping() {
        assert_eq!(ReturnCode::Success.exit_status(), 0);
        assert_eq!(ReturnCode::Unset.exit_status(), 0);
        assert_eq!(ReturnCode::Warning.exit_status(), -1);
        assert_eq!(ReturnCode::Error.exit_status(), -2);
        assert_eq!(ReturnCode::FatalError.exit_status(), -3);
    }

    #[test]
    fn test_job_message_shapes() {
        let msg = job_message(ReturnCode::Success, "CUSTOMERS", "Inserted 1,250 rows");
        assert_eq!(msg, "Inserted 1,250 rows into CUSTOMERS table");

        let msg = job_message(ReturnCode::Error, "CUSTOMERS", "bad SQL");
        assert!(msg.contains("Job CUSTOMERS failed"));
        assert!(msg.contains("bad SQL"));

        let msg = job_message(ReturnCode::FatalError, "CUSTOMERS", "missing directory");
        assert!(msg.contains("fatal error"));
    }

    #[test]
    fn test_format_count() {
        assert_eq!(format_count(0), "0");
        assert_eq!(format_count(999), "999");
        assert_eq!(format_count(1250), "1,250");
        assert_eq!(format_count(1_234_567), "1,234,567");
    }
}
