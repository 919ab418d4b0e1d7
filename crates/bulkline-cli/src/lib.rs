//! Bulkline CLI
//!
//! Command definitions and the pieces the binary entry point composes:
//! job-file configuration and the scheduler exit contract.

#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod config;
pub mod exit;

use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "bulkline")]
#[command(author, version, about = "Batch bulk-load pipeline runner")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Verbose output
    #[arg(short, long)]
    pub verbose: bool,
}

#[derive(Parser, Debug)]
pub enum Commands {
    /// Run a full pipeline job from a job file
    Run {
        /// Path to the YAML job file
        #[arg(short, long)]
        job: String,
    },

    /// Export query results to staged files, optionally downloading them
    Export {
        /// Path to the YAML job file; must carry an `export` section
        #[arg(short, long)]
        job: String,
    },

    /// Wait for a file to arrive, then exit with the gate's outcome
    Wait {
        /// Directory the file is expected in
        #[arg(short, long)]
        directory: String,

        /// File name pattern (one `*` wildcard segment allowed)
        #[arg(short, long)]
        pattern: String,

        /// Maximum wait in seconds
        #[arg(short, long, default_value_t = 300)]
        max_wait: u64,

        /// Timeout policy: Error, "Fatal Error", or Warning
        #[arg(short, long, default_value = "Error")]
        timeout_policy: String,

        /// Fail immediately if the file is not already present
        #[arg(long)]
        must_exist: bool,
    },

    /// Compress or convert every matching file in a folder
    Compress {
        /// Directory to scan
        #[arg(short, long)]
        directory: String,

        /// File name pattern
        #[arg(short, long)]
        pattern: String,

        /// Method: gzip or parquet (anything else is a no-op)
        #[arg(short, long)]
        method: String,

        /// Files per concurrent batch
        #[arg(short, long, default_value_t = 4)]
        batch_size: usize,
    },

    /// Write a trigger file announcing a finished batch
    Trigger {
        /// Directory the trigger file is written to
        #[arg(short, long)]
        directory: String,

        /// Filename template; YYYY/MM/DD/HH/MI/SS and SEQUENCE expand
        #[arg(short, long)]
        template: String,

        /// Field delimiter between the timestamp and the row count
        #[arg(long, default_value = "|")]
        delimiter: String,

        /// Row count recorded in the trigger file
        #[arg(short, long, default_value_t = 0)]
        rows: u64,
    },

    /// Move processed files into an archive directory
    Archive {
        /// Directory holding the processed files
        #[arg(short, long)]
        directory: String,

        /// File name pattern to archive
        #[arg(short, long)]
        pattern: String,

        /// Archive directory, created when missing
        #[arg(short, long)]
        archive_dir: String,

        /// Archive filename template; SEQUENCE numbers each file
        #[arg(short, long)]
        template: String,
    },

    /// Delete source files (and their compressed twins) after a load
    Clean {
        /// Directory holding the source files
        #[arg(short, long)]
        directory: String,

        /// File name pattern to delete
        #[arg(short, long)]
        pattern: String,

        /// Extension of the compressed twins
        #[arg(short, long, default_value = "gz")]
        compressed_ext: String,
    },

    /// Read or write a job bookmark in the parameter store
    Param {
        /// Parameter store file
        #[arg(short, long)]
        store: String,

        /// Parameter name
        #[arg(short, long)]
        name: String,

        /// New value; omit to read the current value
        #[arg(long)]
        value: Option<String>,

        /// Comment recorded alongside a written value
        #[arg(short, long, default_value = "")]
        comment: String,
    },
}
