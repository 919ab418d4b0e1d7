//! Bulk loader
//!
//! Issues the COPY INTO command against the destination table and folds
//! its row-per-source-file result set into one aggregate outcome. A
//! zero-row result set is a valid outcome, not an error; it only means no
//! staged file matched.

use crate::audit::{AuditEvent, AuditSink, Severity};
use crate::context::PipelineContext;
use crate::warehouse::{CopyRow, WarehouseClient};
use bulkline_common::{format_count, ReturnCode};
use tracing::{debug, warn};

/// Subsystem code attached to load audit events.
const SUBSYSTEM: &str = "db_code3";

/// Aggregate outcome of one bulk-load command.
///
/// Created empty, fed one result row at a time, then finalized into a
/// single audit message.
#[derive(Debug, Clone, Default)]
pub struct LoadResult {
    pub rows_loaded: u64,
    pub files_loaded: u64,
    pub rows: Vec<CopyRow>,
}

impl LoadResult {
    pub fn absorb(&mut self, row: CopyRow) {
        self.rows_loaded += row.rows_loaded;
        self.files_loaded += 1;
        self.rows.push(row);
    }

    pub fn is_empty(&self) -> bool {
        self.files_loaded == 0
    }

    /// One operator-facing sentence describing the whole load.
    pub fn summary(&self, table: &str, namespace: &str) -> String {
        if self.is_empty() {
            format!(
                "Bulk load of {} from {} did not load any rows",
                table, namespace
            )
        } else {
            // The destination table is appended by the job-level message,
            // not repeated here.
            format!(
                "A total of {} rows were loaded from {} file(s)",
                format_count(self.rows_loaded),
                format_count(self.files_loaded)
            )
        }
    }
}

/// Build the bulk-load command for one staged namespace.
pub fn copy_command(table: &str, namespace: &str, file_format: &str, options: &str) -> String {
    format!(
        "COPY INTO {} FROM {} FILE_FORMAT = ({}) {}",
        table, namespace, file_format, options
    )
    .trim_end()
    .to_string()
}

/// Load the staged namespace into the destination table.
///
/// All paths emit exactly one audit event describing total rows loaded
/// across total files.
pub async fn load(
    ctx: &PipelineContext,
    namespace: &str,
    file_format: &str,
    options: &str,
    warehouse: &dyn WarehouseClient,
    sink: &dyn AuditSink,
) -> (ReturnCode, String) {
    let command = copy_command(&ctx.load_table, namespace, file_format, options);
    debug!(command = %command, "Issuing bulk load");

    let rows = match warehouse.copy_into(&command).await {
        Ok(rows) => rows,
        Err(e) => {
            // The server's three-part message is logged part by part
            // before being folded into one audit record.
            warn!(
                code = %e.code,
                query_id = %e.query_id,
                detail = %e.detail,
                "Bulk load of {} failed", ctx.load_table
            );
            let msg = format!("Load of {} failed: {}", ctx.load_table, e.detail);
            let event = AuditEvent::new(Severity::Error, &msg, SUBSYSTEM, &e.to_string(), &ctx.job);
            if let Err(sink_err) = sink.record(&event).await {
                warn!(error = %sink_err, "Audit sink failed while recording the load failure");
            }
            return (ReturnCode::Error, msg);
        },
    };

    let mut result = LoadResult::default();
    for row in rows {
        if row.errors_seen > 0 {
            warn!(
                file = %row.file,
                errors = row.errors_seen,
                first_error = %row.first_error,
                "Bulk load reported per-file errors"
            );
        }
        result.absorb(row);
    }

    let summary = result.summary(&ctx.load_table, namespace);
    let event = AuditEvent::new(Severity::Info, &summary, SUBSYSTEM, "", &ctx.job);
    if let Err(e) = sink.record(&event).await {
        return (ReturnCode::Error, format!("Audit sink failed: {}", e));
    }

    (ReturnCode::Success, summary)
}
