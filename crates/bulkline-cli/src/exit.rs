//! Process exit contract
//!
//! The upstream scheduler reads the process exit status: 0 for success,
//! otherwise the outcome's numeric severity code (-1, -2, -3). An
//! interactive invocation (no job context in the environment) always
//! exits 0 but still prints the code and message, so an ad-hoc run shows
//! its failures without halting a shell script.

use bulkline_common::ReturnCode;
use bulkline_pipeline::audit::JobEnv;

/// The status this process should exit with for the given outcome.
pub fn exit_code(code: ReturnCode, job: &JobEnv) -> i32 {
    if job.is_interactive() {
        0
    } else {
        code.exit_status()
    }
}

/// Print the outcome the way the scheduler log expects it.
pub fn report(code: ReturnCode, message: &str) {
    if code.severity() > ReturnCode::Success.severity() {
        eprintln!("{} ({}): {}", code, code.numeric(), message);
    } else {
        println!("{} ({}): {}", code, code.numeric(), message);
    }
}
