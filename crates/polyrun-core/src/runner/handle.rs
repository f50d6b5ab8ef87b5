//! Execution handles and their status.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use tokio::io::AsyncWriteExt;
use tokio::process::ChildStdin;
use tokio::sync::{Mutex, Notify, watch};

use crate::error::{Error, Result};

use super::output::{OutputStream, output_channel};

/// Category of a run that never started.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    UnknownLanguage,
    Io,
    Build,
    Spawn,
    Internal,
}

/// Why a run failed before (or instead of) executing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureReason {
    pub kind: FailureKind,
    pub message: String,
}

impl From<&Error> for FailureReason {
    fn from(err: &Error) -> Self {
        let kind = match err {
            Error::UnknownLanguage(_) => FailureKind::UnknownLanguage,
            Error::Scratch { .. } | Error::Io(_) => FailureKind::Io,
            Error::Build { .. } => FailureKind::Build,
            Error::Spawn { .. } => FailureKind::Spawn,
            _ => FailureKind::Internal,
        };
        Self {
            kind,
            message: err.to_string(),
        }
    }
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

/// Lifecycle state of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionStatus {
    Running,
    /// Exited on its own with this code.
    Exited(i32),
    /// Cancelled, timed out, or terminated by a signal.
    Killed,
    /// Never ran.
    Failed(FailureReason),
}

impl ExecutionStatus {
    pub fn is_running(&self) -> bool {
        matches!(self, Self::Running)
    }

    /// Exit code a CLI should mirror.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Running => 0,
            Self::Exited(code) => *code,
            Self::Killed => 137,
            Self::Failed(_) => 1,
        }
    }
}

/// Cancellation request shared between handles and the supervisor.
#[derive(Debug, Default)]
pub(crate) struct KillSignal {
    requested: AtomicBool,
    notify: Notify,
}

impl KillSignal {
    pub(crate) fn request(&self) {
        if !self.requested.swap(true, Ordering::SeqCst) {
            // notify_one keeps a permit if the supervisor is not waiting yet
            self.notify.notify_one();
        }
    }

    pub(crate) fn is_requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }

    /// Resolve once cancellation has been requested.
    pub(crate) async fn requested(&self) {
        if self.is_requested() {
            return;
        }
        self.notify.notified().await;
    }
}

/// Cloneable handle for cancelling a run from another task.
#[derive(Debug, Clone)]
pub struct KillHandle {
    signal: Arc<KillSignal>,
    status: watch::Receiver<ExecutionStatus>,
}

impl KillHandle {
    pub(crate) fn new(signal: Arc<KillSignal>, status: watch::Receiver<ExecutionStatus>) -> Self {
        Self { signal, status }
    }

    /// Request cancellation without waiting. No-op once the run has ended.
    pub fn cancel(&self) {
        if self.status.borrow().is_running() {
            self.signal.request();
        }
    }

    /// Whether cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.signal.is_requested()
    }

    /// Current status.
    pub fn status(&self) -> ExecutionStatus {
        self.status.borrow().clone()
    }

    /// Wait for the run to leave `Running`.
    pub async fn wait(&self) -> ExecutionStatus {
        let mut status = self.status.clone();
        if let Ok(final_status) = status.wait_for(|s| !s.is_running()).await {
            return final_status.clone();
        }
        // Sender gone without a final status
        status.borrow().clone()
    }

    /// Cancel and wait for the final status.
    pub async fn cancel_and_wait(&self) -> ExecutionStatus {
        self.cancel();
        self.wait().await
    }

    /// Whether both handles observe the same run.
    pub(crate) fn same_run(&self, other: &KillHandle) -> bool {
        Arc::ptr_eq(&self.signal, &other.signal)
    }
}

/// Owner side of a [`KillHandle`].
///
/// Created before the run is prepared so cancellation works during the
/// build step. Whoever holds it publishes the final status exactly once.
#[derive(Debug)]
pub(crate) struct RunControl {
    pub(crate) signal: Arc<KillSignal>,
    status: watch::Sender<ExecutionStatus>,
}

impl RunControl {
    /// A `Running` control and the handle observing it.
    pub(crate) fn new() -> (Self, KillHandle) {
        let (status, rx) = watch::channel(ExecutionStatus::Running);
        let signal = Arc::new(KillSignal::default());
        let handle = KillHandle::new(signal.clone(), rx);
        (Self { signal, status }, handle)
    }

    pub(crate) fn finish(self, status: ExecutionStatus) {
        self.status.send_replace(status);
    }
}

/// Shared child stdin; `None` once closed.
pub(crate) type SharedStdin = Arc<Mutex<Option<ChildStdin>>>;

/// A started (or failed) run.
///
/// Dropping the handle does not stop the run; call [`cancel`](Self::cancel)
/// or keep a [`KillHandle`].
#[derive(Debug)]
pub struct ExecutionHandle {
    pub run_id: u64,
    pub language: String,
    /// OS process id; `None` if the run never spawned.
    pub pid: Option<u32>,
    pub started_at: Instant,
    pub(crate) output: Option<OutputStream>,
    pub(crate) stdin: Option<SharedStdin>,
    pub(crate) control: KillHandle,
}

impl ExecutionHandle {
    /// Handle for a run that failed before spawning.
    ///
    /// Its stream carries the error text as a single diagnostic chunk.
    pub fn failed(run_id: u64, language: &str, err: &Error) -> Self {
        let (control, kill) = RunControl::new();
        Self::ended(
            run_id,
            language,
            &err.with_hint(),
            ExecutionStatus::Failed(err.into()),
            control,
            kill,
        )
    }

    /// Handle for a run that ended before spawning.
    pub(crate) fn ended(
        run_id: u64,
        language: &str,
        diagnostic: &str,
        status: ExecutionStatus,
        control: RunControl,
        kill: KillHandle,
    ) -> Self {
        let (sender, output) = output_channel();
        sender.diagnostic(diagnostic);
        control.finish(status);
        Self {
            run_id,
            language: language.to_string(),
            pid: None,
            started_at: Instant::now(),
            output: Some(output),
            stdin: None,
            control: kill,
        }
    }

    /// Status snapshot.
    pub fn status(&self) -> ExecutionStatus {
        self.control.status()
    }

    pub fn is_running(&self) -> bool {
        self.status().is_running()
    }

    /// Take the output stream. Returns `None` after the first call.
    pub fn take_output(&mut self) -> Option<OutputStream> {
        self.output.take()
    }

    /// Write bytes to the child's stdin.
    ///
    /// # Errors
    /// [`Error::InvalidOperation`] if the run has no interactive stdin or it
    /// was closed; [`Error::Io`] if the pipe is broken.
    pub async fn write(&self, bytes: &[u8]) -> Result<()> {
        let stdin = self
            .stdin
            .as_ref()
            .ok_or_else(|| Error::InvalidOperation("run was started without stdin".to_string()))?;
        let mut guard = stdin.lock().await;
        let pipe = guard
            .as_mut()
            .ok_or_else(|| Error::InvalidOperation("stdin already closed".to_string()))?;
        pipe.write_all(bytes).await?;
        pipe.flush().await?;
        Ok(())
    }

    /// Close stdin so the child sees EOF.
    pub async fn close_stdin(&self) {
        if let Some(stdin) = &self.stdin {
            stdin.lock().await.take();
        }
    }

    /// Cancel and wait for the final status.
    ///
    /// Cancelling a handle that has already ended returns its status.
    pub async fn cancel(&self) -> ExecutionStatus {
        self.control.cancel_and_wait().await
    }

    /// Wait for the run to end.
    pub async fn await_exit(&self) -> ExecutionStatus {
        self.control.wait().await
    }

    /// Cloneable cancellation handle.
    pub fn kill_handle(&self) -> KillHandle {
        self.control.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_failed_handle() {
        let err = Error::UnknownLanguage("cobol".to_string());
        let mut handle = ExecutionHandle::failed(7, "cobol", &err);

        match handle.status() {
            ExecutionStatus::Failed(reason) => assert_eq!(reason.kind, FailureKind::UnknownLanguage),
            other => panic!("unexpected status {:?}", other),
        }
        assert_eq!(handle.await_exit().await, handle.status());
        assert!(handle.write(b"x").await.is_err());

        let text = handle.take_output().unwrap().collect_text().await;
        assert!(text.contains("unknown language: cobol"));
        assert!(handle.take_output().is_none());
    }

    #[tokio::test]
    async fn test_kill_signal_permit() {
        let signal = KillSignal::default();
        signal.request();
        // Resolves even though nobody was waiting when requested
        signal.requested().await;
        assert!(signal.is_requested());
    }

    #[tokio::test]
    async fn test_control_publishes_final_status() {
        let (control, kill) = RunControl::new();
        assert!(kill.status().is_running());

        let waiter = tokio::spawn({
            let kill = kill.clone();
            async move { kill.cancel_and_wait().await }
        });
        control.signal.requested().await;
        control.finish(ExecutionStatus::Killed);

        assert_eq!(waiter.await.unwrap(), ExecutionStatus::Killed);
        assert!(kill.is_cancelled());
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(ExecutionStatus::Exited(3).exit_code(), 3);
        assert_eq!(ExecutionStatus::Killed.exit_code(), 137);
    }
}
