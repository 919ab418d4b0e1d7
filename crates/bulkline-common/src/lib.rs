//! Bulkline Common Library
//!
//! Shared types, utilities, and error handling for the bulkline workspace.
//!
//! # Overview
//!
//! This crate provides common functionality used across all bulkline
//! workspace members:
//!
//! - **Return Codes**: The four-level severity taxonomy every pipeline
//!   stage reports through, and its mapping to process exit status
//! - **Error Handling**: Custom error types and result types
//! - **Logging**: Centralized tracing initialization
//!
//! # Example
//!
//! ```no_run
//! use bulkline_common::retcode::ReturnCode;
//!
//! let stage_codes = [ReturnCode::Success, ReturnCode::Warning];
//! let final_code = ReturnCode::max_severity(stage_codes);
//! assert_eq!(final_code, ReturnCode::Warning);
//! assert_eq!(final_code.exit_status(), -1);
//! ```

#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod error;
pub mod logging;
pub mod retcode;

// Re-export commonly used types
pub use error::{BulklineError, Result};
pub use retcode::{format_count, job_message, ReturnCode};
