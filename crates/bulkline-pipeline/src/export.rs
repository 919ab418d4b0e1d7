//! Warehouse-to-file export
//!
//! The reverse direction of the load pipeline: run an export query
//! through a COPY INTO <stage> command, then optionally pull the staged
//! result files down to the local filesystem with a GET command. Both
//! steps resolve to the shared `(ReturnCode, message)` contract and
//! audit the same way the loader does; a failure is `Error`, retryable
//! by re-running the job.

use crate::audit::{AuditEvent, AuditSink, Severity};
use crate::context::PipelineContext;
use crate::files::normalize_path;
use crate::warehouse::WarehouseClient;
use bulkline_common::{format_count, ReturnCode};
use tracing::{debug, warn};

/// Subsystem code attached to export audit events.
const SUBSYSTEM: &str = "db_code3";

/// One export to run against the warehouse.
#[derive(Debug, Clone)]
pub struct ExportRequest {
    /// SQL text selecting the rows to export
    pub sql: String,
    /// Named stage the result files are written to
    pub stage: String,
    /// File name (or prefix) inside the stage
    pub file_name: String,
    /// FILE_FORMAT clause body, e.g. `TYPE = PARQUET`
    pub file_format: String,
    /// Extra COPY INTO options
    pub copy_options: String,
    /// When set, the staged files are pulled here with GET
    pub download_dir: Option<String>,
    /// Extra GET options
    pub get_options: String,
}

impl ExportRequest {
    /// The stage location the export writes to.
    pub fn destination(&self) -> String {
        format!("@{}/{}", self.stage, self.file_name)
    }
}

/// Build the COPY INTO export command.
pub fn export_command(request: &ExportRequest) -> String {
    format!(
        "COPY INTO {} FROM ({}) FILE_FORMAT = ({}) {}",
        request.destination(),
        request.sql,
        request.file_format,
        request.copy_options
    )
    .trim_end()
    .to_string()
}

/// Build the GET command pulling the staged files to a local directory.
pub fn get_command(request: &ExportRequest, download_dir: &str) -> String {
    format!(
        "GET {} file://{} {}",
        request.destination(),
        normalize_path(download_dir),
        request.get_options
    )
    .trim_end()
    .to_string()
}

/// Export query results to staged files, optionally downloading them.
pub async fn export(
    ctx: &PipelineContext,
    request: &ExportRequest,
    warehouse: &dyn WarehouseClient,
    sink: &dyn AuditSink,
) -> (ReturnCode, String) {
    let command = export_command(request);
    debug!(command = %command, "Issuing export");

    let destination = request.destination();
    let rows = match warehouse.copy_export(&command).await {
        Ok(rows) => rows,
        Err(e) => {
            warn!(
                code = %e.code,
                query_id = %e.query_id,
                detail = %e.detail,
                "Export to {} failed", destination
            );
            let msg = format!("Export to {} failed: {}", destination, e.detail);
            let event = AuditEvent::new(Severity::Error, &msg, SUBSYSTEM, &e.to_string(), &ctx.job);
            if let Err(sink_err) = sink.record(&event).await {
                warn!(error = %sink_err, "Audit sink failed while recording the export failure");
            }
            return (ReturnCode::Error, msg);
        },
    };

    let rows_unloaded: u64 = rows.iter().map(|r| r.rows_unloaded).sum();
    let exported = format!(
        "Exported {} rows to {}",
        format_count(rows_unloaded),
        destination
    );
    let event = AuditEvent::new(Severity::Info, &exported, SUBSYSTEM, "", &ctx.job);
    if let Err(e) = sink.record(&event).await {
        return (ReturnCode::Error, format!("Audit sink failed: {}", e));
    }

    let Some(download_dir) = &request.download_dir else {
        return (ReturnCode::Success, exported);
    };

    let command = get_command(request, download_dir);
    debug!(command = %command, "Issuing staged-file download");

    let files = match warehouse.get(&command).await {
        Ok(files) => files,
        Err(e) => {
            warn!(
                code = %e.code,
                query_id = %e.query_id,
                detail = %e.detail,
                "Download of {} failed", destination
            );
            let msg = format!("Download of {} failed: {}", destination, e.detail);
            let event = AuditEvent::new(Severity::Error, &msg, SUBSYSTEM, &e.to_string(), &ctx.job);
            if let Err(sink_err) = sink.record(&event).await {
                warn!(error = %sink_err, "Audit sink failed while recording the download failure");
            }
            return (ReturnCode::Error, msg);
        },
    };

    for file in &files {
        let event = AuditEvent::new(
            Severity::Info,
            format!("Downloaded {} to {}", file.file, download_dir),
            SUBSYSTEM,
            &format!("{} {}", file.status, file.message),
            &ctx.job,
        );
        if let Err(e) = sink.record(&event).await {
            return (ReturnCode::Error, format!("Audit sink failed: {}", e));
        }
    }

    (
        ReturnCode::Success,
        format!(
            "{} and downloaded {} file(s)",
            exported,
            format_count(files.len() as u64)
        ),
    )
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::audit::{JobEnv, MemoryAuditSink};
    use crate::warehouse::{ExportRow, GetRow, ScriptedWarehouse, WarehouseError};

    fn ctx() -> PipelineContext {
        PipelineContext::new("/work", "CUSTOMERS", JobEnv::interactive())
    }

    fn request() -> ExportRequest {
        ExportRequest {
            sql: "SELECT * FROM customers".to_string(),
            stage: "LANDING".to_string(),
            file_name: "customers.parquet".to_string(),
            file_format: "TYPE = PARQUET".to_string(),
            copy_options: String::new(),
            download_dir: None,
            get_options: String::new(),
        }
    }

    #[test]
    fn test_export_command_shape() {
        let cmd = export_command(&request());
        assert_eq!(
            cmd,
            "COPY INTO @LANDING/customers.parquet FROM (SELECT * FROM customers) \
             FILE_FORMAT = (TYPE = PARQUET)"
        );
    }

    #[test]
    fn test_get_command_normalizes_the_local_path() {
        let cmd = get_command(&request(), "C:\\data\\out ");
        assert_eq!(
            cmd,
            "GET @LANDING/customers.parquet file://C:/data/out"
        );
    }

    #[tokio::test]
    async fn test_export_sums_unloaded_rows() {
        let wh = ScriptedWarehouse::new();
        wh.queue_export(Ok(vec![
            ExportRow {
                rows_unloaded: 1000,
                ..ExportRow::default()
            },
            ExportRow {
                rows_unloaded: 250,
                ..ExportRow::default()
            },
        ]));
        let sink = MemoryAuditSink::new();

        let (code, msg) = export(&ctx(), &request(), &wh, &sink).await;

        assert_eq!(code, ReturnCode::Success);
        assert_eq!(msg, "Exported 1,250 rows to @LANDING/customers.parquet");
        assert_eq!(sink.events().len(), 1);
        // No download directory, so no GET was issued.
        assert_eq!(wh.commands().len(), 1);
    }

    #[tokio::test]
    async fn test_download_dir_issues_get_and_audits_per_file() {
        let wh = ScriptedWarehouse::new();
        wh.queue_export(Ok(vec![ExportRow {
            rows_unloaded: 42,
            ..ExportRow::default()
        }]));
        wh.queue_get(Ok(vec![GetRow {
            file: "customers.parquet".to_string(),
            size: 131072,
            status: "DOWNLOADED".to_string(),
            ..GetRow::default()
        }]));
        let sink = MemoryAuditSink::new();

        let mut request = request();
        request.download_dir = Some("/data/out".to_string());
        let (code, msg) = export(&ctx(), &request, &wh, &sink).await;

        assert_eq!(code, ReturnCode::Success);
        assert!(msg.contains("Exported 42 rows"));
        assert!(msg.contains("downloaded 1 file(s)"));
        // One export summary plus one per downloaded file.
        assert_eq!(sink.events().len(), 2);
        assert!(wh.commands()[1].starts_with("GET @LANDING/customers.parquet file:///data/out"));
    }

    #[tokio::test]
    async fn test_export_failure_is_error_with_audited_detail() {
        let wh = ScriptedWarehouse::new();
        wh.queue_export(Err(WarehouseError::from_server_message(
            "001757 (42601): 01b2: SQL compilation error near line 1",
        )));
        let sink = MemoryAuditSink::new();

        let (code, msg) = export(&ctx(), &request(), &wh, &sink).await;

        assert_eq!(code, ReturnCode::Error);
        assert!(msg.contains("Export to @LANDING/customers.parquet failed"));
        assert!(msg.contains("SQL compilation error"));
        assert_eq!(sink.events().len(), 1);
    }
}
