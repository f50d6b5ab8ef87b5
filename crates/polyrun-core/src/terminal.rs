//! Interactive terminal sessions.
//!
//! A session is a long-lived shell whose stdin is fed one command at a time.
//! Output uses the same merged stream as runs. The shell is never restarted
//! or killed between commands.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::process::{ChildStdin, Command};

use crate::config::{DEFAULT_KILL_GRACE_MS, StudioConfig};
use crate::error::{Error, Result};
use crate::language::resolve_program;
use crate::runner::supervisor::{Launch, launch};
use crate::runner::{ExecutionStatus, KillHandle, OutputStream, RunControl};

static SESSION_COUNTER: AtomicU64 = AtomicU64::new(1);

#[cfg(windows)]
const LINE_END: &str = "\r\n";
#[cfg(not(windows))]
const LINE_END: &str = "\n";

/// Shell process settings.
#[derive(Debug, Clone)]
pub struct ShellOptions {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub kill_grace: Duration,
}

impl Default for ShellOptions {
    fn default() -> Self {
        Self {
            program: default_shell(),
            args: Vec::new(),
            cwd: None,
            kill_grace: Duration::from_millis(DEFAULT_KILL_GRACE_MS),
        }
    }
}

impl ShellOptions {
    pub fn from_config(config: &StudioConfig) -> Self {
        Self {
            program: config.shell.clone().unwrap_or_else(default_shell),
            kill_grace: config.kill_grace(),
            ..Self::default()
        }
    }
}

#[cfg(windows)]
fn default_shell() -> String {
    "cmd.exe".to_string()
}

#[cfg(not(windows))]
fn default_shell() -> String {
    std::env::var("SHELL")
        .ok()
        .filter(|shell| !shell.is_empty())
        .unwrap_or_else(|| "sh".to_string())
}

/// Submitted commands with a recall cursor.
#[derive(Debug, Clone, Default)]
pub struct CommandHistory {
    entries: Vec<String>,
    /// Recall position; `entries.len()` means "past the newest entry".
    cursor: usize,
}

impl CommandHistory {
    pub fn push(&mut self, command: &str) {
        self.entries.push(command.to_string());
        self.cursor = self.entries.len();
    }

    pub fn entries(&self) -> &[String] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Step back to an older command (up arrow).
    pub fn recall_previous(&mut self) -> Option<&str> {
        if self.cursor == 0 {
            return None;
        }
        self.cursor -= 1;
        self.entries.get(self.cursor).map(String::as_str)
    }

    /// Step forward to a newer command (down arrow). `None` past the end.
    pub fn recall_next(&mut self) -> Option<&str> {
        if self.cursor >= self.entries.len() {
            return None;
        }
        self.cursor += 1;
        self.entries.get(self.cursor).map(String::as_str)
    }
}

/// A persistent shell process.
#[derive(Debug)]
pub struct TerminalSession {
    pub id: u64,
    pub pid: Option<u32>,
    cwd: PathBuf,
    history: CommandHistory,
    stdin: Option<ChildStdin>,
    output: Option<OutputStream>,
    control: KillHandle,
    kill_grace: Duration,
    closed: bool,
}

impl TerminalSession {
    /// Start a shell.
    ///
    /// # Errors
    /// [`Error::Spawn`] if the shell cannot be found or started.
    pub async fn open(options: ShellOptions) -> Result<Self> {
        let cwd = match options.cwd {
            Some(dir) => dir,
            None => std::env::current_dir()?,
        };
        let program = resolve_program(&options.program)?;

        let mut command = Command::new(&program);
        command
            .args(&options.args)
            .current_dir(&cwd)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        command.process_group(0);

        let child = command.spawn().map_err(|e| Error::Spawn {
            program: program.display().to_string(),
            message: e.to_string(),
        })?;

        let id = SESSION_COUNTER.fetch_add(1, Ordering::Relaxed);
        let (control, kill) = RunControl::new();
        let launched = launch(Launch {
            child,
            label: format!("terminal {}", id),
            timeout: None,
            kill_grace: options.kill_grace,
            artifact: None,
            control,
        });

        Ok(Self {
            id,
            pid: launched.pid,
            cwd,
            history: CommandHistory::default(),
            stdin: launched.stdin,
            output: Some(launched.output),
            control: kill,
            kill_grace: options.kill_grace,
            closed: false,
        })
    }

    /// Start the default shell in the current directory.
    pub async fn open_default() -> Result<Self> {
        Self::open(ShellOptions::default()).await
    }

    /// Send one command line to the shell.
    ///
    /// Blank commands are ignored. Nothing waits for the command to finish.
    ///
    /// # Errors
    /// [`Error::SessionClosed`] after `close` or once the shell has exited.
    pub async fn submit(&mut self, command: &str) -> Result<()> {
        if self.closed || !self.is_alive() {
            return Err(Error::SessionClosed(self.id));
        }
        let command = command.trim_end_matches(['\r', '\n']);
        if command.trim().is_empty() {
            return Ok(());
        }

        let stdin = self.stdin.as_mut().ok_or(Error::SessionClosed(self.id))?;
        let line = format!("{}{}", command, LINE_END);
        if let Err(e) = async {
            stdin.write_all(line.as_bytes()).await?;
            stdin.flush().await
        }
        .await
        {
            tracing::debug!("Terminal {} stdin write failed: {}", self.id, e);
            return Err(Error::SessionClosed(self.id));
        }

        self.history.push(command);
        self.track_cd(command);
        Ok(())
    }

    /// End the session. Calling it again does nothing.
    ///
    /// Asks the shell to exit, waits the grace period, then terminates it.
    pub async fn close(&mut self) -> ExecutionStatus {
        if self.closed {
            return self.control.status();
        }
        self.closed = true;

        if let Some(mut stdin) = self.stdin.take() {
            let _ = stdin.write_all(format!("exit{}", LINE_END).as_bytes()).await;
            let _ = stdin.flush().await;
        }

        match tokio::time::timeout(self.kill_grace, self.control.wait()).await {
            Ok(status) => status,
            Err(_) => self.control.cancel_and_wait().await,
        }
    }

    /// Take the output stream. Returns `None` after the first call.
    pub fn take_output(&mut self) -> Option<OutputStream> {
        self.output.take()
    }

    pub fn history(&self) -> &CommandHistory {
        &self.history
    }

    pub fn history_mut(&mut self) -> &mut CommandHistory {
        &mut self.history
    }

    /// Working directory as tracked from `cd` commands.
    pub fn cwd(&self) -> &Path {
        &self.cwd
    }

    /// Whether the shell process is still running.
    pub fn is_alive(&self) -> bool {
        self.control.status().is_running()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Wait for the shell to exit.
    pub async fn await_exit(&self) -> ExecutionStatus {
        self.control.wait().await
    }

    /// Handle for observing or killing the shell from another task.
    pub fn kill_handle(&self) -> KillHandle {
        self.control.clone()
    }

    fn track_cd(&mut self, command: &str) {
        let Some(target) = parse_cd(command) else {
            return;
        };
        let target = match target {
            Some(dir) => self.cwd.join(dir),
            None => match dirs::home_dir() {
                Some(home) => home,
                None => return,
            },
        };
        if target.is_dir()
            && let Ok(resolved) = target.canonicalize()
        {
            self.cwd = resolved;
        }
    }
}

impl Drop for TerminalSession {
    fn drop(&mut self) {
        if !self.closed {
            self.control.cancel();
        }
    }
}

/// Target of a plain `cd` command: `Some(None)` for bare `cd`.
///
/// Compound command lines are not tracked.
fn parse_cd(command: &str) -> Option<Option<&str>> {
    let command = command.trim();
    if command.contains(['&', ';', '|']) {
        return None;
    }
    let rest = command.strip_prefix("cd")?;
    if rest.is_empty() {
        return Some(None);
    }
    if !rest.starts_with(char::is_whitespace) {
        return None;
    }
    let target = rest.trim().trim_matches(['"', '\'']);
    if target.is_empty() || target == "~" {
        Some(None)
    } else {
        Some(Some(target))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_history_recall() {
        let mut history = CommandHistory::default();
        assert_eq!(history.recall_previous(), None);

        history.push("ls");
        history.push("pwd");
        assert_eq!(history.recall_previous(), Some("pwd"));
        assert_eq!(history.recall_previous(), Some("ls"));
        assert_eq!(history.recall_previous(), None);
        assert_eq!(history.recall_next(), Some("pwd"));
        assert_eq!(history.recall_next(), None);
        assert_eq!(history.recall_next(), None);

        history.push("echo hi");
        assert_eq!(history.recall_previous(), Some("echo hi"));
    }

    #[test]
    fn test_parse_cd() {
        assert_eq!(parse_cd("cd"), Some(None));
        assert_eq!(parse_cd("cd ~"), Some(None));
        assert_eq!(parse_cd("cd src"), Some(Some("src")));
        assert_eq!(parse_cd("cd \"my dir\""), Some(Some("my dir")));
        assert_eq!(parse_cd("cdrom"), None);
        assert_eq!(parse_cd("cd a && ls"), None);
        assert_eq!(parse_cd("ls"), None);
    }
}
