//! Per-invocation pipeline context
//!
//! Exactly one pipeline instance runs per process invocation. Everything a
//! stage needs to know about the invocation lives in one context value,
//! constructed once and passed by reference; there is no module-level
//! mutable state.

use crate::audit::JobEnv;
use std::path::{Path, PathBuf};

/// Scratch-file extensions owned by one pipeline invocation.
pub const RAW_EXTENSION: &str = "dat";
pub const PARQUET_EXTENSION: &str = "parquet";
pub const SQL_SCRATCH_EXTENSION: &str = "sql_tmp";

/// Context for one pipeline invocation.
///
/// The working directory is exclusively owned by this invocation; scratch
/// filenames derive deterministically from the load table name, so no two
/// stages ever write the same file concurrently.
#[derive(Debug, Clone)]
pub struct PipelineContext {
    /// Working directory for raw and scratch files
    pub work_dir: PathBuf,

    /// Destination table; also the stem of every scratch filename
    pub load_table: String,

    /// Scheduler-provided job identity for audit events
    pub job: JobEnv,
}

impl PipelineContext {
    pub fn new(work_dir: impl Into<PathBuf>, load_table: impl Into<String>, job: JobEnv) -> Self {
        Self {
            work_dir: work_dir.into(),
            load_table: load_table.into(),
            job,
        }
    }

    /// `<work_dir>/<table>.dat`, the raw delimited extraction output.
    pub fn raw_path(&self) -> PathBuf {
        self.scratch_path(RAW_EXTENSION)
    }

    /// `<work_dir>/<table>.parquet`, the converted columnar file.
    pub fn parquet_path(&self) -> PathBuf {
        self.scratch_path(PARQUET_EXTENSION)
    }

    /// `<work_dir>/<table>.sql_tmp`, extraction SQL written to disk to
    /// avoid shell quoting hazards.
    pub fn sql_scratch_path(&self) -> PathBuf {
        self.scratch_path(SQL_SCRATCH_EXTENSION)
    }

    fn scratch_path(&self, extension: &str) -> PathBuf {
        self.work_dir
            .join(format!("{}.{}", self.load_table, extension))
    }

    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_scratch_paths_derive_from_table() {
        let ctx = PipelineContext::new("/tmp/work", "CUSTOMERS", JobEnv::interactive());
        assert_eq!(ctx.raw_path(), PathBuf::from("/tmp/work/CUSTOMERS.dat"));
        assert_eq!(
            ctx.parquet_path(),
            PathBuf::from("/tmp/work/CUSTOMERS.parquet")
        );
        assert_eq!(
            ctx.sql_scratch_path(),
            PathBuf::from("/tmp/work/CUSTOMERS.sql_tmp")
        );
    }
}
