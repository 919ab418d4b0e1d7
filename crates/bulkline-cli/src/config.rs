//! Job configuration
//!
//! One YAML file describes everything a pipeline invocation should do.
//! A few operational values can be overridden from the environment so a
//! scheduler can point the same job file at another connection or working
//! directory without editing it.

use anyhow::{Context, Result};
use bulkline_pipeline::audit::JobEnv;
use bulkline_pipeline::compress::CompressMethod;
use bulkline_pipeline::driver::{CompressPlan, PipelinePlan};
use bulkline_pipeline::export::ExportRequest;
use bulkline_pipeline::extract::{ExtractBackend, ExtractionRequest};
use bulkline_pipeline::gate::{ArrivalWait, TimeoutPolicy};
use bulkline_pipeline::stage::StagingTarget;
use bulkline_pipeline::PipelineContext;
use serde::Deserialize;
use std::path::Path;

/// One pipeline job, as read from a YAML file.
#[derive(Debug, Clone, Deserialize)]
pub struct JobConfig {
    /// Destination table; also the stem of every scratch filename
    pub load_table: String,
    /// Working directory for raw and scratch files
    pub work_dir: String,
    pub warehouse: WarehouseConfig,
    #[serde(default)]
    pub arrival: Option<ArrivalConfig>,
    #[serde(default)]
    pub extraction: Option<ExtractionConfig>,
    #[serde(default)]
    pub compression: Option<CompressionConfig>,
    /// Required for `run`; an export-only job file may omit it
    #[serde(default)]
    pub staging: Option<StagingConfig>,
    #[serde(default)]
    pub load: LoadConfig,
    #[serde(default)]
    pub export: Option<ExportConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WarehouseConfig {
    /// Command-line SQL tool binary
    #[serde(default = "default_warehouse_tool")]
    pub tool: String,
    /// Named connection profile
    pub connection: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ArrivalConfig {
    pub directory: String,
    #[serde(default)]
    pub trigger_pattern: String,
    pub file_pattern: String,
    #[serde(default = "default_max_wait")]
    pub max_wait_secs: u64,
    #[serde(default)]
    pub must_exist: bool,
    /// `Error`, `Fatal Error`, or `Warning`; anything else resolves a
    /// timeout to a fatal outcome
    #[serde(default)]
    pub timeout_policy: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExtractionConfig {
    pub sql: String,
    pub source_dsn: String,
    #[serde(default)]
    pub charset: String,
    pub backend: BackendConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BackendConfig {
    BulkCopy {
        #[serde(default = "default_bulk_copy_tool")]
        tool: String,
    },
    OdbcTool {
        tool: String,
        dsn_arch: String,
        user: String,
        password: String,
    },
}

#[derive(Debug, Clone, Deserialize)]
pub struct CompressionConfig {
    pub directory: String,
    pub file_pattern: String,
    pub method: String,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StagingConfig {
    /// Path or wildcard pattern of the files to stage
    pub files: String,
    pub target: TargetConfig,
    #[serde(default)]
    pub options: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum TargetConfig {
    /// The table's own stage, `@%<table>`
    PerTable,
    /// A named stage partitioned by table and upload time
    PerBatchFolder { stage: String },
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExportConfig {
    /// SQL text selecting the rows to export
    pub sql: String,
    /// Named stage the result files land in
    pub stage: String,
    /// File name (or prefix) inside the stage
    pub file_name: String,
    #[serde(default = "default_file_format")]
    pub file_format: String,
    #[serde(default)]
    pub copy_options: String,
    /// When set, the staged files are downloaded here after the export
    #[serde(default)]
    pub download_dir: Option<String>,
    #[serde(default)]
    pub get_options: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoadConfig {
    #[serde(default = "default_file_format")]
    pub file_format: String,
    #[serde(default)]
    pub options: String,
}

impl Default for LoadConfig {
    fn default() -> Self {
        Self {
            file_format: default_file_format(),
            options: String::new(),
        }
    }
}

fn default_warehouse_tool() -> String {
    "snowsql".to_string()
}

fn default_bulk_copy_tool() -> String {
    "bcp".to_string()
}

fn default_max_wait() -> u64 {
    300
}

fn default_batch_size() -> usize {
    4
}

fn default_file_format() -> String {
    "TYPE = PARQUET".to_string()
}

impl JobConfig {
    /// Read a job file and apply environment overrides.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read job file {}", path.display()))?;
        let mut config: Self = serde_yaml::from_str(&text)
            .with_context(|| format!("failed to parse job file {}", path.display()))?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// `BULKLINE_CONNECTION` and `BULKLINE_WORK_DIR` take precedence over
    /// the job file so a scheduler can redirect a job without editing it.
    fn apply_env_overrides(&mut self) {
        if let Ok(connection) = std::env::var("BULKLINE_CONNECTION") {
            self.warehouse.connection = connection;
        }
        if let Ok(work_dir) = std::env::var("BULKLINE_WORK_DIR") {
            self.work_dir = work_dir;
        }
    }

    /// The per-invocation context, with job identity from the scheduler
    /// environment.
    pub fn context(&self) -> PipelineContext {
        PipelineContext::new(&self.work_dir, &self.load_table, JobEnv::from_env())
    }

    /// Translate the job file into the driver's plan. A `run` job needs
    /// a staging section; export-only job files do not have one.
    pub fn plan(&self) -> Result<PipelinePlan> {
        let staging = self
            .staging
            .as_ref()
            .context("job file has no staging section")?;
        Ok(PipelinePlan {
            arrival: self.arrival.as_ref().map(|a| ArrivalWait {
                directory: a.directory.clone(),
                trigger_pattern: a.trigger_pattern.clone(),
                file_pattern: a.file_pattern.clone(),
                max_wait_secs: a.max_wait_secs,
                must_exist: a.must_exist,
                timeout_policy: TimeoutPolicy::parse(&a.timeout_policy)
                    .unwrap_or(TimeoutPolicy::FatalError),
            }),
            extraction: self.extraction.as_ref().map(|e| {
                let request = ExtractionRequest {
                    sql: e.sql.clone(),
                    source_dsn: e.source_dsn.clone(),
                    charset: e.charset.clone(),
                };
                let backend = match &e.backend {
                    BackendConfig::BulkCopy { tool } => {
                        ExtractBackend::BulkCopy { tool: tool.clone() }
                    },
                    BackendConfig::OdbcTool {
                        tool,
                        dsn_arch,
                        user,
                        password,
                    } => ExtractBackend::OdbcTool {
                        tool: tool.clone(),
                        dsn_arch: dsn_arch.clone(),
                        user: user.clone(),
                        password: password.clone(),
                    },
                };
                (request, backend)
            }),
            compression: self.compression.as_ref().map(|c| CompressPlan {
                directory: c.directory.clone(),
                file_pattern: c.file_pattern.clone(),
                method: CompressMethod::parse(&c.method),
                batch_size: c.batch_size,
            }),
            stage_files: staging.files.clone(),
            staging_target: match &staging.target {
                TargetConfig::PerTable => StagingTarget::PerTable {
                    table: self.load_table.clone(),
                },
                TargetConfig::PerBatchFolder { stage } => StagingTarget::PerBatchFolder {
                    stage: stage.clone(),
                    table: self.load_table.clone(),
                },
            },
            upload_options: staging.options.clone(),
            load_file_format: self.load.file_format.clone(),
            load_options: self.load.options.clone(),
        })
    }

    /// Translate the job file's export section, when present.
    pub fn export_request(&self) -> Option<ExportRequest> {
        self.export.as_ref().map(|e| ExportRequest {
            sql: e.sql.clone(),
            stage: e.stage.clone(),
            file_name: e.file_name.clone(),
            file_format: e.file_format.clone(),
            copy_options: e.copy_options.clone(),
            download_dir: e.download_dir.clone(),
            get_options: e.get_options.clone(),
        })
    }
}
