//! Terminal colors for CLI output.

use std::io::IsTerminal;

use polyrun_core::ExecutionStatus;

pub const RESET: &str = "\x1b[0m";
pub const BOLD: &str = "\x1b[1m";
pub const DIM: &str = "\x1b[2m";
pub const GREEN: &str = "\x1b[32m";
pub const YELLOW: &str = "\x1b[33m";
pub const RED: &str = "\x1b[31m";
pub const CYAN: &str = "\x1b[36m";

/// Whether output should be colored (`NO_COLOR` turns it off).
pub fn enabled() -> bool {
    std::env::var_os("NO_COLOR").is_none()
        && std::io::stdout().is_terminal()
        && std::io::stderr().is_terminal()
}

/// Wrap `text` in `color` when colors are enabled.
pub fn paint(color: &str, text: &str) -> String {
    if enabled() {
        format!("{}{}{}", color, text, RESET)
    } else {
        text.to_string()
    }
}

/// One-line summary of how a run ended.
pub fn status_line(status: &ExecutionStatus, elapsed: std::time::Duration) -> String {
    let secs = elapsed.as_secs_f64();
    match status {
        ExecutionStatus::Exited(0) => paint(DIM, &format!("[exited with code 0 in {:.2}s]", secs)),
        ExecutionStatus::Exited(code) => {
            paint(YELLOW, &format!("[exited with code {} in {:.2}s]", code, secs))
        }
        ExecutionStatus::Killed => paint(RED, &format!("[killed after {:.2}s]", secs)),
        ExecutionStatus::Failed(reason) => paint(RED, &format!("[failed: {}]", reason)),
        ExecutionStatus::Running => paint(DIM, "[running]"),
    }
}
