//! Bulkline Pipeline Library
//!
//! The staged extract-convert-upload-load pipeline. Data flows strictly
//! forward: source rows are bulk-extracted to a delimited raw file,
//! converted to columnar parquet, staged to a warehouse namespace, and
//! bulk-loaded into the destination table. Control flows backward only on
//! failure: every stage resolves to a `(ReturnCode, message)` pair and the
//! driver short-circuits the remaining stages on the first non-success.
//!
//! # Stages
//!
//! - [`gate`]: wait for an expected file/trigger to arrive
//! - [`compress`]: batch-parallel gzip/parquet conversion of a folder
//! - [`extract`]: source-side bulk extraction plus parquet conversion
//! - [`stage`]: option validation, namespace computation, staged upload
//! - [`load`]: warehouse bulk load with per-file result accounting
//! - [`export`]: the reverse direction, warehouse query to staged files
//! - [`driver`]: stage sequencing and return-code aggregation
//!
//! # Example
//!
//! ```no_run
//! use bulkline_pipeline::gate::{self, ArrivalWait, TimeoutPolicy};
//!
//! #[tokio::main]
//! async fn main() {
//!     let wait = ArrivalWait {
//!         directory: "/data/incoming".into(),
//!         trigger_pattern: String::new(),
//!         file_pattern: "orders_*.csv".to_string(),
//!         max_wait_secs: 300,
//!         must_exist: false,
//!         timeout_policy: TimeoutPolicy::Error,
//!     };
//!     let (code, message) = gate::await_file(&wait).await;
//!     println!("{}: {}", code, message);
//! }
//! ```

pub mod audit;
pub mod compress;
pub mod context;
pub mod convert;
pub mod driver;
pub mod export;
pub mod extract;
pub mod files;
pub mod gate;
pub mod load;
pub mod stage;
pub mod warehouse;

pub use context::PipelineContext;
pub use driver::{run_pipeline, PipelineOutcome, PipelinePlan};
