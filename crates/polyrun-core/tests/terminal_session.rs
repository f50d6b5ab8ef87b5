//! Integration tests for persistent terminal sessions.

#![cfg(unix)]

use std::time::Duration;

use polyrun_core::{Error, OutputStream, ShellOptions, TerminalSession};
use tempfile::TempDir;

fn sh_in(dir: &std::path::Path) -> ShellOptions {
    ShellOptions {
        program: "sh".to_string(),
        args: Vec::new(),
        cwd: Some(dir.to_path_buf()),
        kill_grace: Duration::from_millis(500),
    }
}

/// Read chunks until the accumulated text contains `needle`.
async fn read_until(output: &mut OutputStream, needle: &str) -> String {
    let mut text = String::new();
    let found = tokio::time::timeout(Duration::from_secs(5), async {
        while let Some(chunk) = output.next_chunk().await {
            text.push_str(&chunk.text());
            if text.contains(needle) {
                return true;
            }
        }
        false
    })
    .await;
    assert_eq!(found, Ok(true), "never saw {:?} in {:?}", needle, text);
    text
}

#[tokio::test]
async fn test_commands_share_one_shell() {
    let temp = TempDir::new().unwrap();
    let mut session = TerminalSession::open(sh_in(temp.path())).await.unwrap();
    let mut output = session.take_output().unwrap();

    session.submit("GREETING=hello").await.unwrap();
    session.submit("echo \"$GREETING from $$\"").await.unwrap();
    let first = read_until(&mut output, "hello from").await;

    session.submit("echo \"again from $$\"").await.unwrap();
    let second = read_until(&mut output, "again from").await;

    let pid_of = |text: &str, prefix: &str| {
        text.lines()
            .find_map(|line| line.strip_prefix(prefix))
            .map(str::to_string)
    };
    assert_eq!(
        pid_of(&first, "hello from "),
        pid_of(&second, "again from ")
    );
    assert_eq!(session.history().len(), 3);

    session.close().await;
}

#[tokio::test]
async fn test_cd_is_tracked() {
    let temp = TempDir::new().unwrap();
    std::fs::create_dir(temp.path().join("sub")).unwrap();
    let mut session = TerminalSession::open(sh_in(temp.path())).await.unwrap();
    let mut output = session.take_output().unwrap();

    session.submit("cd sub").await.unwrap();
    session.submit("pwd").await.unwrap();
    let text = read_until(&mut output, "sub").await;

    let expected = temp.path().join("sub").canonicalize().unwrap();
    assert_eq!(session.cwd(), expected);
    assert!(text.contains(expected.to_str().unwrap()));

    // Unknown targets leave the tracked directory alone
    session.submit("cd does-not-exist").await.unwrap();
    assert_eq!(session.cwd(), expected);

    session.close().await;
}

#[tokio::test]
async fn test_blank_commands_are_ignored() {
    let temp = TempDir::new().unwrap();
    let mut session = TerminalSession::open(sh_in(temp.path())).await.unwrap();

    session.submit("").await.unwrap();
    session.submit("   ").await.unwrap();
    assert!(session.history().is_empty());

    session.close().await;
}

#[tokio::test]
async fn test_close_is_idempotent() {
    let temp = TempDir::new().unwrap();
    let mut session = TerminalSession::open(sh_in(temp.path())).await.unwrap();

    let first = session.close().await;
    assert!(!first.is_running());
    assert!(session.is_closed());
    assert!(!session.is_alive());

    let second = session.close().await;
    assert_eq!(first, second);
}

#[tokio::test]
async fn test_submit_after_close_fails() {
    let temp = TempDir::new().unwrap();
    let mut session = TerminalSession::open(sh_in(temp.path())).await.unwrap();
    session.close().await;

    let err = session.submit("echo hi").await.unwrap_err();
    assert!(matches!(err, Error::SessionClosed(id) if id == session.id));
}

#[tokio::test]
async fn test_shell_exit_is_detected() {
    let temp = TempDir::new().unwrap();
    let mut session = TerminalSession::open(sh_in(temp.path())).await.unwrap();

    session.submit("exit 4").await.unwrap();
    let status = tokio::time::timeout(Duration::from_secs(5), session.await_exit())
        .await
        .unwrap();
    assert_eq!(status.exit_code(), 4);
    assert!(!session.is_alive());
    assert!(matches!(
        session.submit("echo hi").await,
        Err(Error::SessionClosed(_))
    ));
}

#[tokio::test]
async fn test_missing_shell_is_a_spawn_error() {
    let temp = TempDir::new().unwrap();
    let mut options = sh_in(temp.path());
    options.program = "polyrun-no-such-shell".to_string();

    let err = TerminalSession::open(options).await.unwrap_err();
    assert!(matches!(err, Error::Spawn { .. }));
}
