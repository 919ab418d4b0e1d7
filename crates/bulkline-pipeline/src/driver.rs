//! Pipeline driver
//!
//! Composes the stages into the extract, compress, stage, load sequence and
//! folds every stage outcome into the single job-level result handed to
//! the exit contract. The driver never drops a stage's code: the final
//! code is the maximum severity seen, the final message is the one
//! attached to that code (first occurrence on ties), and any outcome at
//! `Error` or worse short-circuits the remaining stages.

use crate::audit::{AuditSink, ParameterStore};
use crate::compress::{compress_folder, CompressMethod};
use crate::context::PipelineContext;
use crate::extract::{extract, ExtractBackend, ExtractionRequest};
use crate::files::FileSpec;
use crate::gate::{await_file, ArrivalWait};
use crate::load::load;
use crate::stage::{stage, StagingTarget};
use bulkline_common::{job_message, ReturnCode};
use chrono::Local;
use tracing::{info, warn};

/// Folds stage outcomes into one job-level code and message.
///
/// While everything succeeds, each stage's summary replaces the last, so
/// an all-success job reports the final stage (the load summary). From
/// `Warning` upward the first occurrence of the maximal severity keeps
/// its message.
#[derive(Debug, Default)]
pub struct OutcomeLedger {
    code: ReturnCode,
    message: String,
}

impl OutcomeLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, code: ReturnCode, message: impl Into<String>) {
        if code.severity() > self.code.severity() {
            self.code = code;
            self.message = message.into();
        } else if code == ReturnCode::Success && self.code == ReturnCode::Success {
            self.message = message.into();
        }
    }

    pub fn code(&self) -> ReturnCode {
        self.code
    }

    /// True once an outcome at `Error` or worse has been recorded.
    pub fn terminal(&self) -> bool {
        self.code.severity() >= ReturnCode::Error.severity()
    }

    pub fn into_outcome(self) -> PipelineOutcome {
        PipelineOutcome {
            code: self.code,
            message: self.message,
        }
    }
}

/// Optional compression pass between extraction and staging.
#[derive(Debug, Clone)]
pub struct CompressPlan {
    pub directory: String,
    pub file_pattern: String,
    pub method: CompressMethod,
    pub batch_size: usize,
}

/// Everything one pipeline invocation should do.
#[derive(Debug, Clone)]
pub struct PipelinePlan {
    /// Optional arrival gate before any work starts
    pub arrival: Option<ArrivalWait>,
    /// Optional source-side extraction
    pub extraction: Option<(ExtractionRequest, ExtractBackend)>,
    /// Optional compression pass over the working directory
    pub compression: Option<CompressPlan>,
    /// Path (or wildcard pattern) of the files to stage
    pub stage_files: String,
    pub staging_target: StagingTarget,
    pub upload_options: String,
    pub load_file_format: String,
    pub load_options: String,
}

/// The job-level result handed to the exit contract.
#[derive(Debug, Clone)]
pub struct PipelineOutcome {
    pub code: ReturnCode,
    pub message: String,
}

impl PipelineOutcome {
    /// The final message in the shape the scheduler log expects, naming
    /// the destination table.
    pub fn scheduler_message(&self, table: &str) -> String {
        job_message(self.code, table, &self.message)
    }
}

/// Run the full pipeline, short-circuiting after the first outcome at
/// `Error` or worse. On a successful load, the table's `_LAST_LOAD`
/// parameter is written for downstream jobs.
pub async fn run_pipeline(
    ctx: &PipelineContext,
    plan: &PipelinePlan,
    warehouse: &dyn crate::warehouse::WarehouseClient,
    sink: &dyn AuditSink,
    params: &dyn ParameterStore,
) -> PipelineOutcome {
    let mut ledger = OutcomeLedger::new();

    if let Some(wait) = &plan.arrival {
        let (code, msg) = await_file(wait).await;
        info!(code = %code, "Arrival gate: {}", msg);
        ledger.record(code, msg);
        if ledger.terminal() {
            return ledger.into_outcome();
        }
    }

    if let Some((request, backend)) = &plan.extraction {
        let (code, msg) = extract(ctx, request, backend, sink).await;
        info!(code = %code, "Extraction: {}", msg);
        ledger.record(code, msg);
        if ledger.terminal() {
            return ledger.into_outcome();
        }
    }

    if let Some(compression) = &plan.compression {
        match compress_folder(
            &compression.directory,
            &compression.file_pattern,
            compression.method.clone(),
            compression.batch_size,
        )
        .await
        {
            Ok(summary) if summary.failed > 0 => {
                ledger.record(
                    ReturnCode::Warning,
                    format!(
                        "Compression completed with {} failed file(s) out of {}",
                        summary.failed,
                        summary.succeeded + summary.failed
                    ),
                );
            },
            Ok(_) => {},
            Err(e) => {
                ledger.record(ReturnCode::Error, format!("Compression failed: {}", e));
                return ledger.into_outcome();
            },
        }
    }

    let files = match FileSpec::parse(&plan.stage_files) {
        Ok(files) => files,
        Err(e) => {
            // A pattern without an extension is a configuration fault no
            // retry of this stage can fix.
            ledger.record(ReturnCode::FatalError, e.to_string());
            return ledger.into_outcome();
        },
    };

    let (code, msg, namespace) = stage(
        ctx,
        &files,
        &plan.staging_target,
        &plan.upload_options,
        warehouse,
        sink,
    )
    .await;
    info!(code = %code, namespace = %namespace, "Staging: {}", msg);
    ledger.record(code, msg);
    if ledger.terminal() {
        return ledger.into_outcome();
    }

    let (code, msg) = load(
        ctx,
        &namespace,
        &plan.load_file_format,
        &plan.load_options,
        warehouse,
        sink,
    )
    .await;
    info!(code = %code, "Load: {}", msg);
    ledger.record(code, msg);

    if ledger.code() == ReturnCode::Success || ledger.code() == ReturnCode::Warning {
        let name = format!("{}_LAST_LOAD", ctx.load_table);
        let stamp = Local::now().format("%Y-%m-%d %H:%M:%S").to_string();
        if let Err(e) = params
            .write(&name, &stamp, "Last successful bulk load")
            .await
        {
            warn!(parameter = %name, "Failed to record last-load parameter: {}", e);
            ledger.record(
                ReturnCode::Warning,
                format!("Load succeeded but {} was not updated", name),
            );
        }
    }

    ledger.into_outcome()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::audit::{JobEnv, MemoryAuditSink};
    use crate::warehouse::{CopyRow, PutRow, ScriptedWarehouse, WarehouseError};
    use async_trait::async_trait;
    use bulkline_common::Result;
    use std::sync::Mutex;

    #[derive(Debug, Default)]
    struct MemoryParameterStore {
        written: Mutex<Vec<(String, String, String)>>,
    }

    #[async_trait]
    impl ParameterStore for MemoryParameterStore {
        async fn read(&self, _name: &str) -> Result<(String, String)> {
            Ok((String::new(), String::new()))
        }

        async fn write(&self, name: &str, value: &str, comment: &str) -> Result<()> {
            self.written.lock().unwrap().push((
                name.to_string(),
                value.to_string(),
                comment.to_string(),
            ));
            Ok(())
        }
    }

    fn plan() -> PipelinePlan {
        PipelinePlan {
            arrival: None,
            extraction: None,
            compression: None,
            stage_files: "/work/CUSTOMERS.parquet".to_string(),
            staging_target: StagingTarget::PerTable {
                table: "CUSTOMERS".to_string(),
            },
            upload_options: "OVERWRITE=TRUE".to_string(),
            load_file_format: "TYPE = PARQUET".to_string(),
            load_options: String::new(),
        }
    }

    fn ctx() -> PipelineContext {
        PipelineContext::new("/work", "CUSTOMERS", JobEnv::interactive())
    }

    #[test]
    fn test_ledger_keeps_first_maximal_message() {
        let mut ledger = OutcomeLedger::new();
        ledger.record(ReturnCode::Success, "extracted");
        ledger.record(ReturnCode::Error, "first error");
        ledger.record(ReturnCode::Error, "second error");
        ledger.record(ReturnCode::Warning, "late warning");

        let outcome = ledger.into_outcome();
        assert_eq!(outcome.code, ReturnCode::Error);
        assert_eq!(outcome.message, "first error");
    }

    #[test]
    fn test_success_messages_roll_forward_to_the_last_stage() {
        let mut ledger = OutcomeLedger::new();
        ledger.record(ReturnCode::Success, "extracted");
        ledger.record(ReturnCode::Success, "staged");
        ledger.record(ReturnCode::Success, "loaded");

        // An all-success job reports the last stage's summary.
        let outcome = ledger.into_outcome();
        assert_eq!(outcome.code, ReturnCode::Success);
        assert_eq!(outcome.message, "loaded");

        // Once a warning lands, later successes no longer touch it.
        let mut ledger = OutcomeLedger::new();
        ledger.record(ReturnCode::Warning, "defaulted options");
        ledger.record(ReturnCode::Success, "loaded");
        let outcome = ledger.into_outcome();
        assert_eq!(outcome.code, ReturnCode::Warning);
        assert_eq!(outcome.message, "defaulted options");
    }

    #[tokio::test]
    async fn test_stage_then_load_success_records_last_load() {
        let wh = ScriptedWarehouse::new();
        wh.queue_put(Ok(vec![PutRow {
            source: "CUSTOMERS.parquet".to_string(),
            source_size: 512,
            status: "UPLOADED".to_string(),
            ..PutRow::default()
        }]));
        wh.queue_copy(Ok(vec![CopyRow {
            file: "CUSTOMERS.parquet".to_string(),
            status: "LOADED".to_string(),
            rows_parsed: 1250,
            rows_loaded: 1250,
            ..CopyRow::default()
        }]));
        let sink = MemoryAuditSink::new();
        let params = MemoryParameterStore::default();

        let outcome = run_pipeline(&ctx(), &plan(), &wh, &sink, &params).await;

        assert_eq!(outcome.code, ReturnCode::Success);
        assert!(outcome
            .message
            .contains("A total of 1,250 rows were loaded from 1 file(s)"));
        assert_eq!(
            outcome.scheduler_message("CUSTOMERS"),
            "A total of 1,250 rows were loaded from 1 file(s) into CUSTOMERS table"
        );

        let written = params.written.lock().unwrap();
        assert_eq!(written.len(), 1);
        assert_eq!(written[0].0, "CUSTOMERS_LAST_LOAD");
    }

    #[tokio::test]
    async fn test_staging_error_short_circuits_load() {
        let wh = ScriptedWarehouse::new();
        wh.queue_put(Err(WarehouseError::from_server_message(
            "253006: 01b2: stage not found",
        )));
        let sink = MemoryAuditSink::new();
        let params = MemoryParameterStore::default();

        let outcome = run_pipeline(&ctx(), &plan(), &wh, &sink, &params).await;

        assert_eq!(outcome.code, ReturnCode::Error);
        assert!(outcome
            .scheduler_message("CUSTOMERS")
            .starts_with("Job CUSTOMERS failed.  Check logs due to "));
        // Only the failed PUT ran; COPY INTO was never issued.
        assert_eq!(wh.commands().len(), 1);
        assert!(params.written.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_missing_extension_is_fatal_before_any_command() {
        let wh = ScriptedWarehouse::new();
        let sink = MemoryAuditSink::new();
        let params = MemoryParameterStore::default();

        let mut bad = plan();
        bad.stage_files = "/work/CUSTOMERS".to_string();
        let outcome = run_pipeline(&ctx(), &bad, &wh, &sink, &params).await;

        assert_eq!(outcome.code, ReturnCode::FatalError);
        assert!(wh.commands().is_empty());
    }

    #[tokio::test]
    async fn test_defaulted_options_surface_as_warning_but_load_runs() {
        let wh = ScriptedWarehouse::new();
        wh.queue_put(Ok(vec![]));
        wh.queue_copy(Ok(vec![]));
        let sink = MemoryAuditSink::new();
        let params = MemoryParameterStore::default();

        let mut with_defaults = plan();
        with_defaults.upload_options = String::new();
        let outcome = run_pipeline(&ctx(), &with_defaults, &wh, &sink, &params).await;

        // Warning does not short-circuit; zero-row load stays non-fatal.
        assert_eq!(outcome.code, ReturnCode::Warning);
        assert_eq!(wh.commands().len(), 2);
        // The warning outcome arrived first and is the message kept.
        assert!(outcome.message.contains("staged to @%CUSTOMERS"));
    }
}
