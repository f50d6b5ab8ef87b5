//! Line-oriented stdin forwarding.
//!
//! Reads happen on a plain thread: a blocking read on the runtime's pool
//! would keep the process alive after the command is done.

use std::io::BufRead;

use tokio::sync::mpsc;

/// Spawn a reader thread delivering stdin lines (with terminators).
///
/// The channel closes at EOF.
pub fn stdin_lines() -> mpsc::UnboundedReceiver<String> {
    let (tx, rx) = mpsc::unbounded_channel();
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        let mut lock = stdin.lock();
        loop {
            let mut line = String::new();
            match lock.read_line(&mut line) {
                Ok(0) => break,
                Ok(_) => {
                    if tx.send(line).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    tracing::debug!("stdin read failed: {}", e);
                    break;
                }
            }
        }
    });
    rx
}
