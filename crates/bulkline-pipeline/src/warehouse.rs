//! Warehouse client contract and the SQL-tool implementation
//!
//! Staging and loading both talk to the warehouse through one trait so the
//! pipeline never depends on a concrete driver. The production
//! implementation shells out to the warehouse's command-line SQL tool and
//! parses its tab-separated result rows; tests script the trait directly.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;
use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

/// Warehouse failure, split into the three parts the server reports.
///
/// The server formats every error as `code: query_id: detail`; keeping the
/// parts separate lets audit records carry the query id while user-facing
/// messages keep only the detail.
#[derive(Debug, Clone, Error)]
#[error("{code}: {query_id}: {detail}")]
pub struct WarehouseError {
    pub code: String,
    pub query_id: String,
    pub detail: String,
}

impl WarehouseError {
    /// Split a raw server message into its three parts. A message without
    /// the expected shape lands whole in `detail`.
    pub fn from_server_message(raw: &str) -> Self {
        let mut parts = raw.splitn(3, ':');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(code), Some(query_id), Some(detail)) => Self {
                code: code.trim().to_string(),
                query_id: query_id.trim().to_string(),
                detail: detail.trim().to_string(),
            },
            _ => Self {
                code: String::new(),
                query_id: String::new(),
                detail: raw.trim().to_string(),
            },
        }
    }
}

/// One result row of a stage-transfer (PUT) command.
#[derive(Debug, Clone, Default)]
pub struct PutRow {
    pub source: String,
    pub target: String,
    pub source_size: u64,
    pub target_size: u64,
    pub source_compression: String,
    pub target_compression: String,
    pub status: String,
    pub message: String,
}

/// One result row of a COPY INTO command (one row per staged file).
#[derive(Debug, Clone, Default)]
pub struct CopyRow {
    pub file: String,
    pub status: String,
    pub rows_parsed: u64,
    pub rows_loaded: u64,
    pub error_limit: u64,
    pub errors_seen: u64,
    pub first_error: String,
}

/// One result row of a COPY INTO <stage> export command.
#[derive(Debug, Clone, Default)]
pub struct ExportRow {
    pub rows_unloaded: u64,
    pub input_bytes: u64,
    pub output_bytes: u64,
}

/// One result row of a GET command (one row per downloaded file).
#[derive(Debug, Clone, Default)]
pub struct GetRow {
    pub file: String,
    pub size: u64,
    pub status: String,
    pub message: String,
}

/// Trait for warehouse access (dependency injection)
#[async_trait]
pub trait WarehouseClient: Send + Sync {
    /// Run a stage-transfer command, one result row per file transferred.
    async fn put(&self, command: &str) -> Result<Vec<PutRow>, WarehouseError>;

    /// Run a COPY INTO command, one result row per staged file consumed.
    async fn copy_into(&self, command: &str) -> Result<Vec<CopyRow>, WarehouseError>;

    /// Run a COPY INTO <stage> export command, one result row per unload.
    async fn copy_export(&self, command: &str) -> Result<Vec<ExportRow>, WarehouseError>;

    /// Run a GET command, one result row per file pulled to the local
    /// filesystem.
    async fn get(&self, command: &str) -> Result<Vec<GetRow>, WarehouseError>;
}

/// Production client: shells out to the warehouse's command-line SQL tool
/// and reads tab-separated result rows from stdout.
#[derive(Debug, Clone)]
pub struct SqlToolClient {
    /// Tool binary, e.g. `snowsql`
    pub tool: String,
    /// Named connection profile passed to the tool
    pub connection: String,
}

impl SqlToolClient {
    pub fn new(tool: impl Into<String>, connection: impl Into<String>) -> Self {
        Self {
            tool: tool.into(),
            connection: connection.into(),
        }
    }

    async fn run(&self, sql: &str) -> Result<Vec<Vec<String>>, WarehouseError> {
        debug!(tool = %self.tool, connection = %self.connection, "Running warehouse command");
        let output = Command::new(&self.tool)
            .args(sql_tool_args(&self.connection, sql))
            .output()
            .await
            .map_err(|e| WarehouseError {
                code: String::new(),
                query_id: String::new(),
                detail: format!("failed to start {}: {}", self.tool, e),
            })?;

        if !output.status.success() {
            let raw = String::from_utf8_lossy(&output.stderr);
            return Err(WarehouseError::from_server_message(raw.trim()));
        }

        Ok(parse_tsv_rows(&String::from_utf8_lossy(&output.stdout)))
    }
}

/// Fixed tool invocation: quiet, headerless, tab-separated output.
pub fn sql_tool_args(connection: &str, sql: &str) -> Vec<String> {
    vec![
        "-c".to_string(),
        connection.to_string(),
        "-o".to_string(),
        "friendly=false".to_string(),
        "-o".to_string(),
        "header=false".to_string(),
        "-o".to_string(),
        "timing=false".to_string(),
        "-o".to_string(),
        "output_format=tsv".to_string(),
        "-q".to_string(),
        sql.to_string(),
    ]
}

fn parse_tsv_rows(stdout: &str) -> Vec<Vec<String>> {
    stdout
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| line.split('\t').map(|f| f.trim().to_string()).collect())
        .collect()
}

fn field(row: &[String], index: usize) -> String {
    row.get(index).cloned().unwrap_or_default()
}

fn numeric_field(row: &[String], index: usize) -> u64 {
    row.get(index).and_then(|f| f.parse().ok()).unwrap_or(0)
}

fn copy_row(row: &[String]) -> CopyRow {
    CopyRow {
        file: field(row, 0),
        status: field(row, 1),
        rows_parsed: numeric_field(row, 2),
        rows_loaded: numeric_field(row, 3),
        error_limit: numeric_field(row, 4),
        errors_seen: numeric_field(row, 5),
        first_error: field(row, 6),
    }
}

fn export_row(row: &[String]) -> ExportRow {
    ExportRow {
        rows_unloaded: numeric_field(row, 0),
        input_bytes: numeric_field(row, 1),
        output_bytes: numeric_field(row, 2),
    }
}

fn get_row(row: &[String]) -> GetRow {
    GetRow {
        file: field(row, 0),
        size: numeric_field(row, 1),
        status: field(row, 2),
        message: field(row, 3),
    }
}

#[async_trait]
impl WarehouseClient for SqlToolClient {
    async fn put(&self, command: &str) -> Result<Vec<PutRow>, WarehouseError> {
        let rows = self.run(command).await?;
        Ok(rows
            .into_iter()
            .map(|row| PutRow {
                source: field(&row, 0),
                target: field(&row, 1),
                source_size: numeric_field(&row, 2),
                target_size: numeric_field(&row, 3),
                source_compression: field(&row, 4),
                target_compression: field(&row, 5),
                status: field(&row, 6),
                message: field(&row, 7),
            })
            .collect())
    }

    async fn copy_into(&self, command: &str) -> Result<Vec<CopyRow>, WarehouseError> {
        let rows = self.run(command).await?;
        Ok(rows.iter().map(|row| copy_row(row)).collect())
    }

    async fn copy_export(&self, command: &str) -> Result<Vec<ExportRow>, WarehouseError> {
        let rows = self.run(command).await?;
        Ok(rows.iter().map(|row| export_row(row)).collect())
    }

    async fn get(&self, command: &str) -> Result<Vec<GetRow>, WarehouseError> {
        let rows = self.run(command).await?;
        Ok(rows.iter().map(|row| get_row(row)).collect())
    }
}

/// Scripted client for tests: hands back queued responses in order and
/// records every command it was asked to run.
#[derive(Debug, Default)]
pub struct ScriptedWarehouse {
    puts: Mutex<VecDeque<Result<Vec<PutRow>, WarehouseError>>>,
    copies: Mutex<VecDeque<Result<Vec<CopyRow>, WarehouseError>>>,
    exports: Mutex<VecDeque<Result<Vec<ExportRow>, WarehouseError>>>,
    gets: Mutex<VecDeque<Result<Vec<GetRow>, WarehouseError>>>,
    commands: Mutex<Vec<String>>,
}

impl ScriptedWarehouse {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn queue_put(&self, response: Result<Vec<PutRow>, WarehouseError>) {
        if let Ok(mut q) = self.puts.lock() {
            q.push_back(response);
        }
    }

    pub fn queue_copy(&self, response: Result<Vec<CopyRow>, WarehouseError>) {
        if let Ok(mut q) = self.copies.lock() {
            q.push_back(response);
        }
    }

    pub fn queue_export(&self, response: Result<Vec<ExportRow>, WarehouseError>) {
        if let Ok(mut q) = self.exports.lock() {
            q.push_back(response);
        }
    }

    pub fn queue_get(&self, response: Result<Vec<GetRow>, WarehouseError>) {
        if let Ok(mut q) = self.gets.lock() {
            q.push_back(response);
        }
    }

    /// Every command executed, in order.
    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().map(|c| c.clone()).unwrap_or_default()
    }

    fn exhausted() -> WarehouseError {
        WarehouseError {
            code: String::new(),
            query_id: String::new(),
            detail: "no scripted response queued".to_string(),
        }
    }
}

#[async_trait]
impl WarehouseClient for ScriptedWarehouse {
    async fn put(&self, command: &str) -> Result<Vec<PutRow>, WarehouseError> {
        if let Ok(mut c) = self.commands.lock() {
            c.push(command.to_string());
        }
        self.puts
            .lock()
            .ok()
            .and_then(|mut q| q.pop_front())
            .unwrap_or_else(|| Err(Self::exhausted()))
    }

    async fn copy_into(&self, command: &str) -> Result<Vec<CopyRow>, WarehouseError> {
        if let Ok(mut c) = self.commands.lock() {
            c.push(command.to_string());
        }
        self.copies
            .lock()
            .ok()
            .and_then(|mut q| q.pop_front())
            .unwrap_or_else(|| Err(Self::exhausted()))
    }

    async fn copy_export(&self, command: &str) -> Result<Vec<ExportRow>, WarehouseError> {
        if let Ok(mut c) = self.commands.lock() {
            c.push(command.to_string());
        }
        self.exports
            .lock()
            .ok()
            .and_then(|mut q| q.pop_front())
            .unwrap_or_else(|| Err(Self::exhausted()))
    }

    async fn get(&self, command: &str) -> Result<Vec<GetRow>, WarehouseError> {
        if let Ok(mut c) = self.commands.lock() {
            c.push(command.to_string());
        }
        self.gets
            .lock()
            .ok()
            .and_then(|mut q| q.pop_front())
            .unwrap_or_else(|| Err(Self::exhausted()))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_server_message_splits_into_three_parts() {
        let err = WarehouseError::from_server_message(
            "001757 (42601): 01b2-0304: SQL compilation error near line 1",
        );
        assert_eq!(err.code, "001757 (42601)");
        assert_eq!(err.query_id, "01b2-0304");
        assert_eq!(err.detail, "SQL compilation error near line 1");
    }

    #[test]
    fn test_shapeless_message_lands_in_detail() {
        let err = WarehouseError::from_server_message("connection refused");
        assert!(err.code.is_empty());
        assert!(err.query_id.is_empty());
        assert_eq!(err.detail, "connection refused");
    }

    #[test]
    fn test_tsv_parsing_skips_blank_lines() {
        let rows = parse_tsv_rows("a\tb\t10\n\n c \td\t0\n");
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0], vec!["a", "b", "10"]);
        assert_eq!(rows[1][0], "c");
    }

    #[test]
    fn test_copy_row_carries_all_result_columns() {
        let fields: Vec<String> = [
            "CUSTOMERS.parquet",
            "PARTIALLY_LOADED",
            "1250",
            "1200",
            "1",
            "50",
            "NULL result in a non-nullable column",
        ]
        .into_iter()
        .map(String::from)
        .collect();

        let row = copy_row(&fields);
        assert_eq!(row.rows_parsed, 1250);
        assert_eq!(row.rows_loaded, 1200);
        assert_eq!(row.error_limit, 1);
        assert_eq!(row.errors_seen, 50);
        assert_eq!(row.first_error, "NULL result in a non-nullable column");
    }

    #[test]
    fn test_export_and_get_rows_carry_their_result_columns() {
        let fields: Vec<String> = ["1250", "524288", "131072"].into_iter().map(String::from).collect();
        let row = export_row(&fields);
        assert_eq!(row.rows_unloaded, 1250);
        assert_eq!(row.input_bytes, 524288);
        assert_eq!(row.output_bytes, 131072);

        let fields: Vec<String> = ["customers.parquet", "131072", "DOWNLOADED", ""]
            .into_iter()
            .map(String::from)
            .collect();
        let row = get_row(&fields);
        assert_eq!(row.file, "customers.parquet");
        assert_eq!(row.size, 131072);
        assert_eq!(row.status, "DOWNLOADED");
    }

    #[test]
    fn test_sql_tool_args_headerless_tsv() {
        let args = sql_tool_args("PROD", "PUT file://x @%t");
        assert!(args.contains(&"header=false".to_string()));
        assert!(args.contains(&"output_format=tsv".to_string()));
        assert_eq!(args.last().unwrap(), "PUT file://x @%t");
    }

    #[tokio::test]
    async fn test_scripted_client_replays_in_order() {
        let wh = ScriptedWarehouse::new();
        wh.queue_put(Ok(vec![PutRow {
            source: "t.parquet".to_string(),
            status: "UPLOADED".to_string(),
            ..PutRow::default()
        }]));

        let rows = wh.put("PUT file://t.parquet @%t").await.unwrap();
        assert_eq!(rows[0].status, "UPLOADED");
        assert!(wh.put("PUT again").await.is_err());
        assert_eq!(wh.commands().len(), 2);
    }
}
