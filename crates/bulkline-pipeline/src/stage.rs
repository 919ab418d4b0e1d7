//! Staging uploader
//!
//! Validates the upload-option grammar against a closed keyword schema,
//! computes the destination namespace, and issues the stage-transfer
//! command through the warehouse client. Option strings are never
//! evaluated; anything outside the schema is rejected with a message
//! naming the offending keyword and the full valid set.

use crate::audit::{AuditEvent, AuditSink, Severity};
use crate::context::PipelineContext;
use crate::files::FileSpec;
use crate::warehouse::WarehouseClient;
use bulkline_common::{format_count, ReturnCode};
use chrono::Local;
use tracing::{debug, warn};

/// Subsystem code attached to staging audit events.
const SUBSYSTEM: &str = "db_code3";

/// Closed keyword schema for the stage-transfer command.
///
/// `OVERWRITE` is the only keyword that may appear more than once; the
/// last occurrence wins on the warehouse side, so repeats are harmless.
const UPLOAD_KEYWORDS: [&str; 4] = ["PARALLEL", "OVERWRITE", "AUTO_COMPRESS", "SOURCE_COMPRESSION"];

const BOOL_VALUES: [&str; 2] = ["TRUE", "FALSE"];
const SOURCE_COMPRESSION_VALUES: [&str; 8] = [
    "AUTO_DETECT",
    "GZIP",
    "BZ2",
    "BROTLI",
    "ZSTD",
    "DEFLATE",
    "RAW_DEFLATE",
    "NONE",
];

/// Where staged files land in the warehouse.
#[derive(Debug, Clone)]
pub enum StagingTarget {
    /// The table's own stage, `@%<table>`
    PerTable { table: String },
    /// A named stage partitioned by table and upload time,
    /// `@<stage>/<table>/<timestamp>`
    PerBatchFolder { stage: String, table: String },
}

impl StagingTarget {
    /// The destination namespace, with the per-batch timestamp captured
    /// once at call time.
    pub fn namespace(&self) -> String {
        match self {
            StagingTarget::PerTable { table } => format!("@%{}", table),
            StagingTarget::PerBatchFolder { stage, table } => {
                let stamp = normalize_timestamp(&Local::now().format("%Y-%m-%d %H:%M:%S").to_string());
                format!("@{}/{}/{}", stage, table, stamp)
            },
        }
    }
}

/// Replace characters a stage path cannot carry.
pub fn normalize_timestamp(stamp: &str) -> String {
    stamp
        .chars()
        .map(|c| match c {
            ' ' | ':' | '-' => '_',
            other => other,
        })
        .collect()
}

/// Validated upload options, retained in normalized `KEY = VALUE` form.
#[derive(Debug, Clone, Default)]
pub struct UploadOptions {
    pairs: Vec<(String, String)>,
    /// Set when no options were supplied and the non-overwrite default
    /// was applied.
    pub defaulted: bool,
}

impl UploadOptions {
    /// Validate a comma-separated `KEY=VALUE` option string against the
    /// closed schema.
    ///
    /// An empty string yields the default "do not overwrite staged
    /// files", flagged so the caller can report it at warning level.
    pub fn parse(raw: &str) -> Result<Self, String> {
        if raw.trim().is_empty() {
            warn!("No upload options supplied; defaulting to OVERWRITE = FALSE");
            return Ok(Self {
                pairs: vec![("OVERWRITE".to_string(), "FALSE".to_string())],
                defaulted: true,
            });
        }

        let mut pairs = Vec::new();
        for clause in raw.split(',') {
            let mut halves = clause.splitn(2, '=');
            let keyword = halves.next().unwrap_or_default().trim().to_uppercase();
            let value = halves.next().unwrap_or_default().trim().to_uppercase();

            if !UPLOAD_KEYWORDS.contains(&keyword.as_str()) {
                return Err(format!(
                    "Invalid upload option keyword `{}`; valid keywords are {}",
                    keyword,
                    UPLOAD_KEYWORDS.join(", ")
                ));
            }
            if keyword != "OVERWRITE" && pairs.iter().any(|(k, _)| *k == keyword) {
                return Err(format!(
                    "Upload option keyword `{}` may only appear once",
                    keyword
                ));
            }

            let (valid, allowed) = match keyword.as_str() {
                "PARALLEL" => (
                    value.parse::<u32>().map(|n| n > 0).unwrap_or(false),
                    "a positive integer".to_string(),
                ),
                "OVERWRITE" | "AUTO_COMPRESS" => (
                    BOOL_VALUES.contains(&value.as_str()),
                    BOOL_VALUES.join(", "),
                ),
                "SOURCE_COMPRESSION" => (
                    SOURCE_COMPRESSION_VALUES.contains(&value.as_str()),
                    SOURCE_COMPRESSION_VALUES.join(", "),
                ),
                _ => (false, String::new()),
            };
            if !valid {
                return Err(format!(
                    "Invalid value `{}` for upload option `{}`; valid values are {}",
                    value, keyword, allowed
                ));
            }
            pairs.push((keyword, value));
        }

        Ok(Self {
            pairs,
            defaulted: false,
        })
    }

    /// The normalized option clause for the transfer command.
    pub fn option_string(&self) -> String {
        self.pairs
            .iter()
            .map(|(k, v)| format!("{} = {}", k, v))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Build the stage-transfer command for one file spec.
pub fn put_command(files: &FileSpec, namespace: &str, options: &UploadOptions) -> String {
    format!(
        "PUT file://{}/{} {} {}",
        files.directory.display(),
        files.file_pattern(),
        namespace,
        options.option_string()
    )
    .trim_end()
    .to_string()
}

/// Upload the matching files to the staging namespace.
///
/// Returns the stage outcome plus the namespace the loader should read
/// from. Transfer-layer failures resolve to `Error`; the operator can
/// retry the job.
pub async fn stage(
    ctx: &PipelineContext,
    files: &FileSpec,
    target: &StagingTarget,
    raw_options: &str,
    warehouse: &dyn WarehouseClient,
    sink: &dyn AuditSink,
) -> (ReturnCode, String, String) {
    let options = match UploadOptions::parse(raw_options) {
        Ok(options) => options,
        Err(msg) => {
            let event = AuditEvent::new(Severity::Error, &msg, SUBSYSTEM, raw_options, &ctx.job);
            if let Err(sink_err) = sink.record(&event).await {
                warn!(error = %sink_err, "Audit sink failed while recording the option rejection");
            }
            return (ReturnCode::Error, msg, String::new());
        },
    };

    let namespace = target.namespace();
    let command = put_command(files, &namespace, &options);
    debug!(command = %command, "Issuing stage transfer");

    let rows = match warehouse.put(&command).await {
        Ok(rows) => rows,
        Err(e) => {
            let msg = format!("Staging to {} failed: {}", namespace, e.detail);
            let event = AuditEvent::new(Severity::Error, &msg, SUBSYSTEM, &e.to_string(), &ctx.job);
            if let Err(sink_err) = sink.record(&event).await {
                warn!(error = %sink_err, "Audit sink failed while recording the staging failure");
            }
            return (ReturnCode::Error, msg, namespace);
        },
    };

    // Totals reflect bytes actually uploaded, after any tool-side
    // compression.
    let mut total_bytes: u64 = 0;
    for row in &rows {
        total_bytes += row.target_size;
        let event = AuditEvent::new(
            Severity::Info,
            format!("Staged {} to {}", row.source, row.target),
            SUBSYSTEM,
            &format!("{} {}", row.status, row.message),
            &ctx.job,
        );
        if let Err(e) = sink.record(&event).await {
            return (
                ReturnCode::Error,
                format!("Audit sink failed: {}", e),
                namespace,
            );
        }
    }

    let summary = format!(
        "A total of {} file(s) ({} bytes) staged to {}",
        format_count(rows.len() as u64),
        format_count(total_bytes),
        namespace
    );
    let event = AuditEvent::new(Severity::Info, &summary, SUBSYSTEM, "", &ctx.job);
    if let Err(e) = sink.record(&event).await {
        return (
            ReturnCode::Error,
            format!("Audit sink failed: {}", e),
            namespace,
        );
    }

    let code = if options.defaulted {
        ReturnCode::Warning
    } else {
        ReturnCode::Success
    };
    (code, summary, namespace)
}
