//! Bulkline - batch bulk-load pipeline runner

use bulkline_cli::config::JobConfig;
use bulkline_cli::{exit, Cli, Commands};
use bulkline_common::logging::{init_logging, LogConfig, LogLevel};
use bulkline_common::ReturnCode;
use bulkline_pipeline::audit::{FileParameterStore, JobEnv, ParameterStore, TracingAuditSink};
use bulkline_pipeline::compress::{compress_folder, CompressMethod};
use bulkline_pipeline::files::{archive_files, create_trigger_file, delete_source_files};
use bulkline_pipeline::gate::{await_file_with_policy, ArrivalWait, TimeoutPolicy};
use bulkline_pipeline::warehouse::SqlToolClient;
use bulkline_pipeline::run_pipeline;
use clap::Parser;
use std::path::Path;
use std::process;
use tracing::info;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize logging based on verbose flag
    let log_level = if cli.verbose {
        LogLevel::Debug
    } else {
        LogLevel::Info
    };
    let log_config = LogConfig::builder()
        .level(log_level)
        .log_file_prefix("bulkline".to_string())
        .build();

    // Environment variables take precedence, but only for the values
    // they actually set; the flag-derived config is the base.
    let log_config = log_config
        .clone()
        .with_env_overrides()
        .unwrap_or(log_config);
    let _ = init_logging(&log_config);

    let job = JobEnv::from_env();
    let (code, message) = execute_command(cli.command).await;

    exit::report(code, &message);
    process::exit(exit::exit_code(code, &job));
}

async fn execute_command(command: Commands) -> (ReturnCode, String) {
    match command {
        Commands::Run { job: job_file } => {
            let config = match JobConfig::load(&job_file) {
                Ok(config) => config,
                Err(e) => return (ReturnCode::FatalError, format!("{:#}", e)),
            };

            let ctx = config.context();
            let plan = match config.plan() {
                Ok(plan) => plan,
                Err(e) => return (ReturnCode::FatalError, format!("{:#}", e)),
            };
            let warehouse =
                SqlToolClient::new(&config.warehouse.tool, &config.warehouse.connection);
            let sink = TracingAuditSink::new();
            let params = FileParameterStore::new(ctx.work_dir().join("parameters.json"));

            info!(table = %ctx.load_table, "Starting pipeline");
            let outcome = run_pipeline(&ctx, &plan, &warehouse, &sink, &params).await;
            let message = outcome.scheduler_message(&ctx.load_table);
            (outcome.code, message)
        },

        Commands::Export { job: job_file } => {
            let config = match JobConfig::load(&job_file) {
                Ok(config) => config,
                Err(e) => return (ReturnCode::FatalError, format!("{:#}", e)),
            };

            let request = match config.export_request() {
                Some(request) => request,
                None => {
                    return (
                        ReturnCode::FatalError,
                        format!("Job file {} has no export section", job_file),
                    )
                },
            };

            let ctx = config.context();
            let warehouse =
                SqlToolClient::new(&config.warehouse.tool, &config.warehouse.connection);
            let sink = TracingAuditSink::new();

            info!(destination = %request.destination(), "Starting export");
            bulkline_pipeline::export::export(&ctx, &request, &warehouse, &sink).await
        },

        Commands::Wait {
            directory,
            pattern,
            max_wait,
            timeout_policy,
            must_exist,
        } => {
            let policy = TimeoutPolicy::parse(&timeout_policy);
            let wait = ArrivalWait {
                directory,
                trigger_pattern: String::new(),
                file_pattern: pattern,
                max_wait_secs: max_wait,
                must_exist,
                timeout_policy: policy.unwrap_or(TimeoutPolicy::FatalError),
            };
            await_file_with_policy(&wait, policy).await
        },

        Commands::Compress {
            directory,
            pattern,
            method,
            batch_size,
        } => {
            let method = CompressMethod::parse(&method);
            match compress_folder(&directory, &pattern, method, batch_size).await {
                Ok(summary) if summary.failed > 0 => (
                    ReturnCode::Warning,
                    format!(
                        "Compressed {} file(s) in {} batch(es); {} failed",
                        summary.succeeded, summary.batches, summary.failed
                    ),
                ),
                Ok(summary) => (
                    ReturnCode::Success,
                    format!(
                        "Compressed {} file(s) in {} batch(es)",
                        summary.succeeded, summary.batches
                    ),
                ),
                Err(e) => (ReturnCode::Error, format!("Compression failed: {}", e)),
            }
        },

        Commands::Trigger {
            directory,
            template,
            delimiter,
            rows,
        } => match create_trigger_file(Path::new(&directory), &template, &delimiter, rows) {
            Ok(path) => (
                ReturnCode::Success,
                format!("Trigger file {} created", path.display()),
            ),
            Err(e) => (
                ReturnCode::Error,
                format!("OS error creating the trigger file {} with error: {}", template, e),
            ),
        },

        Commands::Archive {
            directory,
            pattern,
            archive_dir,
            template,
        } => match archive_files(
            &pattern,
            Path::new(&directory),
            Path::new(&archive_dir),
            &template,
        ) {
            Ok(moved) => (
                ReturnCode::Success,
                format!("Archived {} file(s) to {}", moved, archive_dir),
            ),
            Err(e) => (
                ReturnCode::Error,
                format!("Archiving {} failed: {}", pattern, e),
            ),
        },

        Commands::Clean {
            directory,
            pattern,
            compressed_ext,
        } => match delete_source_files(&pattern, Path::new(&directory), &compressed_ext) {
            Ok(deleted) => (
                ReturnCode::Success,
                format!("Deleted {} source file(s)", deleted),
            ),
            Err(e) => (
                ReturnCode::Error,
                format!("Source cleanup of {} failed: {}", pattern, e),
            ),
        },

        Commands::Param {
            store,
            name,
            value,
            comment,
        } => {
            let params = FileParameterStore::new(&store);
            match value {
                Some(value) => match params.write(&name, &value, &comment).await {
                    Ok(()) => (ReturnCode::Success, format!("Parameter {} set to {}", name, value)),
                    Err(e) => (
                        ReturnCode::Error,
                        format!("Failed to write parameter {}: {}", name, e),
                    ),
                },
                None => match params.read(&name).await {
                    Ok((value, comment)) if comment.is_empty() => {
                        (ReturnCode::Success, format!("{} = {}", name, value))
                    },
                    Ok((value, comment)) => {
                        (ReturnCode::Success, format!("{} = {} ({})", name, value, comment))
                    },
                    Err(e) => (ReturnCode::Error, e.to_string()),
                },
            }
        },
    }
}
