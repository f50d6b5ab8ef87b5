//! Per-process supervision task.
//!
//! Owns the child after spawn: pumps its pipes, waits for exit, a cancel
//! request or the deadline, then publishes the final status. The output
//! stream ends only after the status is published.

use std::process::ExitStatus;
use std::time::Duration;

use tokio::process::{Child, ChildStdin};
use tokio::task::JoinHandle;

use crate::materialize::Artifact;

use super::handle::{ExecutionStatus, FailureKind, FailureReason, RunControl};
use super::output::{Channel, OutputSender, OutputStream, output_channel, spawn_pump};
use super::terminate::{Termination, terminate, wait_group};

/// How long to wait for pipes to drain after the process is gone.
///
/// Bounds the wait when a detached grandchild still holds a pipe open.
const PUMP_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Everything the supervisor needs to take over a spawned child.
pub(crate) struct Launch {
    pub child: Child,
    pub label: String,
    pub timeout: Option<Duration>,
    pub kill_grace: Duration,
    /// Run directory, released after the process is reaped.
    pub artifact: Option<Artifact>,
    /// Status sender and kill signal; the matching handle is held by the caller.
    pub control: RunControl,
}

/// Caller side of a supervised process.
pub(crate) struct Launched {
    pub pid: Option<u32>,
    pub stdin: Option<ChildStdin>,
    pub output: OutputStream,
}

enum Outcome {
    Exited(std::io::Result<ExitStatus>),
    Cancelled,
    TimedOut(Duration),
}

/// Start pumping and supervising a freshly spawned child.
///
/// Must be called from within a tokio runtime.
pub(crate) fn launch(mut launch: Launch) -> Launched {
    let pid = launch.child.id();
    let stdin = launch.child.stdin.take();
    let (sender, output) = output_channel();

    let mut pumps = Vec::with_capacity(2);
    if let Some(stdout) = launch.child.stdout.take() {
        pumps.push(spawn_pump(stdout, Channel::Stdout, sender.clone()));
    }
    if let Some(stderr) = launch.child.stderr.take() {
        pumps.push(spawn_pump(stderr, Channel::Stderr, sender.clone()));
    }

    tracing::info!("Started {} (pid {:?})", launch.label, pid);
    tokio::spawn(supervise(launch, sender, pumps));

    Launched { pid, stdin, output }
}

async fn supervise(launch: Launch, sender: OutputSender, pumps: Vec<JoinHandle<()>>) {
    let Launch {
        mut child,
        label,
        timeout,
        kill_grace,
        artifact,
        control,
    } = launch;

    // Exit of the leader also takes down anything it left in its group
    let outcome = tokio::select! {
        result = wait_group(&mut child) => Outcome::Exited(result),
        _ = control.signal.requested() => Outcome::Cancelled,
        _ = deadline(timeout) => Outcome::TimedOut(timeout.unwrap_or_default()),
    };

    let status = match outcome {
        Outcome::Exited(Ok(exit)) => status_from_exit(exit),
        Outcome::Exited(Err(e)) => {
            tracing::warn!("Failed to wait for {}: {}", label, e);
            ExecutionStatus::Failed(FailureReason {
                kind: FailureKind::Internal,
                message: format!("wait failed: {}", e),
            })
        }
        Outcome::Cancelled => match terminate(&mut child, kill_grace).await {
            Termination::AlreadyExited(exit) => status_from_exit(exit),
            Termination::Terminated => ExecutionStatus::Killed,
        },
        Outcome::TimedOut(limit) => {
            sender.diagnostic(&format!(
                "[polyrun] run timed out after {:.1}s and was terminated",
                limit.as_secs_f64()
            ));
            match terminate(&mut child, kill_grace).await {
                Termination::AlreadyExited(exit) => status_from_exit(exit),
                Termination::Terminated => ExecutionStatus::Killed,
            }
        }
    };

    for pump in pumps {
        let abort = pump.abort_handle();
        if tokio::time::timeout(PUMP_DRAIN_TIMEOUT, pump).await.is_err() {
            tracing::debug!("{}: output pipe still open after exit, abandoning", label);
            abort.abort();
        }
    }

    drop(artifact);
    tracing::info!("{} finished: {:?}", label, status);
    control.finish(status);
    drop(sender);
}

async fn deadline(timeout: Option<Duration>) {
    match timeout {
        Some(limit) => tokio::time::sleep(limit).await,
        None => std::future::pending().await,
    }
}

/// Map an OS exit status; death by signal counts as killed.
fn status_from_exit(exit: ExitStatus) -> ExecutionStatus {
    match exit.code() {
        Some(code) => ExecutionStatus::Exited(code),
        None => ExecutionStatus::Killed,
    }
}
