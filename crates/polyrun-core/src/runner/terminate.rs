//! Two-phase process termination.
//!
//! Children are process group leaders. The group is always signalled while
//! the leader is still unreaped, so its pid cannot have been reused.

use std::process::ExitStatus;
use std::time::Duration;

use tokio::process::Child;

/// Fallback poll interval while waiting for the leader to exit.
#[cfg(unix)]
const EXIT_POLL: Duration = Duration::from_millis(50);

/// How a termination attempt ended.
#[derive(Debug)]
pub(crate) enum Termination {
    /// The child had already exited before we signalled it.
    AlreadyExited(ExitStatus),
    /// The child was stopped by our signals.
    Terminated,
}

/// Wait for the leader to exit, kill whatever it left in its group, then
/// reap it.
pub(crate) async fn wait_group(child: &mut Child) -> std::io::Result<ExitStatus> {
    #[cfg(unix)]
    if let Some(pid) = child.id() {
        leader_exited(pid).await;
        signal_group(Some(pid), Signal::Kill);
    }
    child.wait().await
}

/// Stop `child` and its process group: SIGTERM, wait `grace`, then SIGKILL.
///
/// Always reaps the child before returning.
pub(crate) async fn terminate(child: &mut Child, grace: Duration) -> Termination {
    if leader_has_exited(child) {
        return match wait_group(child).await {
            Ok(status) => Termination::AlreadyExited(status),
            Err(e) => {
                tracing::warn!("Failed to reap exited child: {}", e);
                Termination::Terminated
            }
        };
    }

    let pid = child.id();
    signal_group(pid, Signal::Term);
    #[cfg(not(unix))]
    let _ = child.start_kill();

    match tokio::time::timeout(grace, wait_group(child)).await {
        Ok(Ok(_)) => return Termination::Terminated,
        Ok(Err(e)) => tracing::warn!("Wait after SIGTERM failed: {}", e),
        Err(_) => tracing::debug!("Process {:?} ignored SIGTERM, killing", pid),
    }

    signal_group(pid, Signal::Kill);
    if let Err(e) = child.start_kill() {
        // Already exited between the timeout and here
        tracing::debug!("start_kill: {}", e);
    }
    if let Err(e) = child.wait().await {
        tracing::warn!("Failed to reap killed process {:?}: {}", pid, e);
    }
    Termination::Terminated
}

/// SIGKILL a group whose leader has not been reaped yet.
pub(crate) fn kill_group(pid: Option<u32>) {
    signal_group(pid, Signal::Kill);
}

#[cfg(unix)]
fn leader_has_exited(child: &mut Child) -> bool {
    child.id().is_none_or(has_exited)
}

#[cfg(not(unix))]
fn leader_has_exited(child: &mut Child) -> bool {
    !matches!(child.try_wait(), Ok(None))
}

/// Resolve once the leader has exited, leaving it unreaped.
#[cfg(unix)]
async fn leader_exited(pid: u32) {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigchld = match signal(SignalKind::child()) {
        Ok(stream) => Some(stream),
        Err(e) => {
            tracing::debug!("SIGCHLD stream unavailable, polling: {}", e);
            None
        }
    };
    while !has_exited(pid) {
        match sigchld.as_mut() {
            Some(stream) => {
                let _ = tokio::time::timeout(EXIT_POLL, stream.recv()).await;
            }
            None => tokio::time::sleep(EXIT_POLL).await,
        }
    }
}

/// Whether `pid` has exited, without reaping it.
#[cfg(unix)]
fn has_exited(pid: u32) -> bool {
    // SAFETY: waitid only writes into `info`
    let mut info: libc::siginfo_t = unsafe { std::mem::zeroed() };
    let rc = unsafe {
        libc::waitid(
            libc::P_PID,
            pid as libc::id_t,
            &mut info,
            libc::WEXITED | libc::WNOHANG | libc::WNOWAIT,
        )
    };
    if rc != 0 {
        // ECHILD: nothing left to wait for
        return true;
    }
    info.si_signo == libc::SIGCHLD
}

#[derive(Debug, Clone, Copy)]
enum Signal {
    Term,
    Kill,
}

#[cfg(unix)]
fn signal_group(pid: Option<u32>, signal: Signal) {
    let Some(pid) = pid else {
        return;
    };
    let signo = match signal {
        Signal::Term => libc::SIGTERM,
        Signal::Kill => libc::SIGKILL,
    };
    // Children are spawned as group leaders, so -pid addresses the group
    // SAFETY: kill has no memory-safety preconditions
    let rc = unsafe { libc::kill(-(pid as i32), signo) };
    if rc != 0 {
        let err = std::io::Error::last_os_error();
        if err.raw_os_error() != Some(libc::ESRCH) {
            tracing::warn!("Failed to signal process group {}: {}", pid, err);
        }
    }
}

#[cfg(not(unix))]
fn signal_group(_pid: Option<u32>, _signal: Signal) {}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::process::Stdio;
    use tokio::process::Command;

    fn spawn_sh(script: &str) -> Child {
        Command::new("sh")
            .args(["-c", script])
            .stdout(Stdio::null())
            .process_group(0)
            .kill_on_drop(true)
            .spawn()
            .unwrap()
    }

    #[tokio::test]
    async fn test_exited_child_is_not_signalled() {
        let mut child = spawn_sh("exit 3");
        child.wait().await.unwrap();

        match terminate(&mut child, Duration::from_millis(100)).await {
            Termination::AlreadyExited(status) => assert_eq!(status.code(), Some(3)),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_wait_group_kills_leftover_members() {
        let mut child = Command::new("sh")
            .args(["-c", "sleep 30 & echo $!"])
            .stdout(Stdio::piped())
            .process_group(0)
            .kill_on_drop(true)
            .spawn()
            .unwrap();
        let mut stdout = child.stdout.take().unwrap();

        let status = wait_group(&mut child).await.unwrap();
        assert_eq!(status.code(), Some(0));

        let mut text = String::new();
        tokio::io::AsyncReadExt::read_to_string(&mut stdout, &mut text)
            .await
            .unwrap();
        let pid: i32 = text.trim().parse().unwrap();
        // The member is gone, or at worst a zombie awaiting its new parent
        let state = std::fs::read_to_string(format!("/proc/{}/stat", pid)).unwrap_or_default();
        assert!(state.is_empty() || state.contains(") Z"), "{}", state);
    }

    #[tokio::test]
    async fn test_terminate_kills_members_that_ignore_sigterm() {
        use tokio::io::AsyncBufReadExt;

        let mut child = Command::new("sh")
            .args(["-c", "(trap '' TERM; exec sleep 30) & echo $!; wait"])
            .stdout(Stdio::piped())
            .process_group(0)
            .kill_on_drop(true)
            .spawn()
            .unwrap();
        let mut lines = tokio::io::BufReader::new(child.stdout.take().unwrap()).lines();
        let pid: i32 = lines.next_line().await.unwrap().unwrap().parse().unwrap();

        let result = terminate(&mut child, Duration::from_millis(200)).await;
        assert!(matches!(result, Termination::Terminated));

        // EOF means every writer in the group is gone
        let rest = tokio::time::timeout(Duration::from_secs(3), lines.next_line()).await;
        assert!(matches!(rest, Ok(Ok(None))), "member {} survived", pid);
    }

    #[tokio::test]
    async fn test_sigterm_ignored_escalates() {
        let mut child = spawn_sh("trap '' TERM; while true; do sleep 0.05; done");
        tokio::time::sleep(Duration::from_millis(100)).await;

        let started = std::time::Instant::now();
        let result = terminate(&mut child, Duration::from_millis(200)).await;
        assert!(matches!(result, Termination::Terminated));
        assert!(started.elapsed() >= Duration::from_millis(200));
        assert!(child.try_wait().unwrap().is_some());
    }
}
