//! Source-side bulk extraction
//!
//! Two interchangeable backends, selected by configuration, both produce a
//! raw file delimited by a control character and convert it to parquet:
//!
//! - **Bulk copy**: shells out to a `bcp`-style utility in query mode with
//!   a fixed option set; the row count is scraped from the tool's report.
//! - **ODBC tool**: writes the SQL to a scratch file first (avoiding shell
//!   quoting hazards), shells out to a metadata-tool extractor, then
//!   auto-detects the raw file's encoding before parsing, because
//!   different drivers emit different encodings.
//!
//! An external-process failure is reported as `Error`, never
//! `FatalError`: extraction failures are operator-retryable, unlike the
//! configuration faults the arrival gate treats as fatal.

use crate::audit::{AuditEvent, AuditSink, Severity};
use crate::context::PipelineContext;
use crate::convert::{delimited_to_parquet, FIELD_DELIMITER};
use crate::files::delete_file;
use bulkline_common::{format_count, ReturnCode};
use regex::Regex;
use tokio::process::Command;
use tracing::debug;

/// Subsystem code attached to extraction audit events.
const SUBSYSTEM: &str = "db_code3";

/// Default character set for the bulk-copy raw file when none is given.
const DEFAULT_BULK_COPY_CHARSET: &str = "ACP";

/// One extraction to run against the source database.
#[derive(Debug, Clone)]
pub struct ExtractionRequest {
    /// SQL text selecting the rows to extract
    pub sql: String,
    /// Source connection descriptor (DSN)
    pub source_dsn: String,
    /// Raw-file character encoding; empty means backend default, `auto`
    /// requests detection
    pub charset: String,
}

/// Which external tool performs the extraction.
#[derive(Debug, Clone)]
pub enum ExtractBackend {
    /// Bulk-copy utility in query mode
    BulkCopy {
        /// Tool binary, normally `bcp`
        tool: String,
    },
    /// Metadata-tool ODBC extractor
    OdbcTool {
        tool: String,
        dsn_arch: String,
        user: String,
        password: String,
    },
}

/// Run one extraction and convert its raw output to parquet.
///
/// Scratch files (`<table>.dat`, `<table>.sql_tmp`) are deleted only
/// after successful conversion; deletion is idempotent.
pub async fn extract(
    ctx: &PipelineContext,
    request: &ExtractionRequest,
    backend: &ExtractBackend,
    sink: &dyn AuditSink,
) -> (ReturnCode, String) {
    let raw_path = ctx.raw_path();

    let encoding_label = match backend {
        ExtractBackend::BulkCopy { tool } => {
            let charset = if request.charset.is_empty() {
                DEFAULT_BULK_COPY_CHARSET
            } else {
                &request.charset
            };
            let args = bulk_copy_args(
                &request.sql,
                &raw_path.to_string_lossy(),
                charset,
                &request.source_dsn,
            );
            debug!(tool = %tool, ?args, "Running bulk copy extraction");

            let output = match Command::new(tool).args(&args).output().await {
                Ok(output) => output,
                Err(e) => {
                    let msg = format!("Call to bulk copy failed to start: {}", e);
                    debug!("{}", msg);
                    return (ReturnCode::Error, msg);
                },
            };
            if !output.status.success() {
                let msg = format!(
                    "Call to bulk copy failed for {}: {}",
                    ctx.load_table,
                    String::from_utf8_lossy(&output.stderr).trim()
                );
                debug!("{}", msg);
                return (ReturnCode::Error, msg);
            }

            let report = rows_reported(&String::from_utf8_lossy(&output.stdout));
            let event = AuditEvent::new(
                Severity::Info,
                format!("Bulk copy completed successfully for {}", ctx.load_table),
                SUBSYSTEM,
                &report,
                &ctx.job,
            );
            if let Err(e) = sink.record(&event).await {
                return (ReturnCode::Error, format!("Audit sink failed: {}", e));
            }
            None
        },
        ExtractBackend::OdbcTool {
            tool,
            dsn_arch,
            user,
            password,
        } => {
            let sql_path = ctx.sql_scratch_path();
            if let Err(e) = std::fs::write(&sql_path, &request.sql) {
                return (
                    ReturnCode::Error,
                    format!("Failed to write extraction SQL to {}: {}", sql_path.display(), e),
                );
            }
            debug!(path = %sql_path.display(), "Extraction SQL written to scratch file");

            let args = odbc_tool_args(
                dsn_arch,
                &request.source_dsn,
                user,
                password,
                &sql_path.to_string_lossy(),
                &raw_path.to_string_lossy(),
            );
            debug!(tool = %tool, "Running ODBC tool extraction");

            let output = match Command::new(tool).args(&args).output().await {
                Ok(output) => output,
                Err(e) => {
                    let msg = format!("Call to ODBC tool failed to start: {}", e);
                    debug!("{}", msg);
                    return (ReturnCode::Error, msg);
                },
            };
            if !output.status.success() {
                let msg = format!(
                    "Call to ODBC tool failed for {}: {}",
                    ctx.load_table,
                    String::from_utf8_lossy(&output.stderr).trim()
                );
                debug!("{}", msg);
                return (ReturnCode::Error, msg);
            }

            let event = AuditEvent::new(
                Severity::Info,
                format!("ODBC tool completed successfully for {}", ctx.load_table),
                SUBSYSTEM,
                &String::from_utf8_lossy(&output.stdout),
                &ctx.job,
            );
            if let Err(e) = sink.record(&event).await {
                return (ReturnCode::Error, format!("Audit sink failed: {}", e));
            }
            Some("auto")
        },
    };

    let parquet_path = ctx.parquet_path();
    if let Err(e) = delimited_to_parquet(&raw_path, &parquet_path, encoding_label) {
        let msg = format!("Conversion to parquet failed for {}: {}", ctx.load_table, e);
        debug!("{}", msg);
        return (ReturnCode::Error, msg);
    }

    let event = AuditEvent::new(
        Severity::Info,
        format!("Parquet file created for {}", ctx.load_table),
        SUBSYSTEM,
        "",
        &ctx.job,
    );
    if let Err(e) = sink.record(&event).await {
        return (ReturnCode::Error, format!("Audit sink failed: {}", e));
    }

    // Scratch cleanup happens only after a successful conversion.
    delete_file(&raw_path);
    if matches!(backend, ExtractBackend::OdbcTool { .. }) {
        delete_file(&ctx.sql_scratch_path());
    }

    (
        ReturnCode::Success,
        format!("Extraction completed successfully for {}", ctx.load_table),
    )
}

/// Fixed bulk-copy option set: no header row, forced character set,
/// direct-DSN connect, query mode, control-character delimiter.
pub fn bulk_copy_args(sql: &str, data_file: &str, charset: &str, dsn: &str) -> Vec<String> {
    let delimiter = (FIELD_DELIMITER as char).to_string();
    vec![
        sql.replace('\n', " "),
        "queryout".to_string(),
        data_file.to_string(),
        "-a".to_string(),
        "32576".to_string(),
        "-c".to_string(),
        "-C".to_string(),
        charset.to_string(),
        "-t".to_string(),
        delimiter,
        "-T".to_string(),
        "-D".to_string(),
        "-S".to_string(),
        dsn.to_string(),
        "-q".to_string(),
    ]
}

/// Argument set for the metadata-tool ODBC extractor.
pub fn odbc_tool_args(
    dsn_arch: &str,
    dsn: &str,
    user: &str,
    password: &str,
    sql_file: &str,
    data_file: &str,
) -> Vec<String> {
    let delimiter = (FIELD_DELIMITER as char).to_string();
    vec![
        "/B".to_string(),
        "--meta-dsn-arch".to_string(),
        dsn_arch.to_string(),
        "/Z".to_string(),
        "/O".to_string(),
        dsn.to_string(),
        "/u".to_string(),
        user.to_string(),
        "/P".to_string(),
        password.to_string(),
        "/C".to_string(),
        sql_file.to_string(),
        format!("/D{}", delimiter),
        "/F".to_string(),
        data_file.to_string(),
    ]
}

/// Scrape the extracted row count from the bulk-copy tool's report.
///
/// Absence of a count is not a failure; it reports as zero rows.
pub fn rows_reported(tool_stdout: &str) -> String {
    let pattern = Regex::new(r"(\d+) rows (?:successfully bulk-copied|copied)")
        .unwrap_or_else(|_| unreachable!("row-count pattern is a literal"));
    let rows = pattern
        .captures_iter(tool_stdout)
        .last()
        .and_then(|cap| cap.get(1))
        .and_then(|m| m.as_str().parse::<u64>().ok())
        .unwrap_or(0);
    format!("Bulk copy extracted {} rows", format_count(rows))
}
