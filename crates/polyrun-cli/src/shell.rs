//! `polyrun shell`: a line-based terminal session.
//!
//! Lines typed on stdin are submitted to a persistent shell. Two local
//! commands are handled here instead: `:history` lists submitted commands
//! and `:cwd` prints the tracked working directory.

use std::io::Write;

use polyrun_core::{Channel, ShellOptions, StudioConfig, TerminalSession};

use crate::colors;
use crate::input::stdin_lines;

pub async fn execute(config: &StudioConfig, shell: Option<String>) -> anyhow::Result<i32> {
    let mut options = ShellOptions::from_config(config);
    if let Some(shell) = shell {
        options.program = shell;
    }

    let mut session = TerminalSession::open(options.clone()).await?;
    eprintln!(
        "{}",
        colors::paint(
            colors::DIM,
            &format!(
                "[terminal {} running {} in {}; Ctrl-D to close]",
                session.id,
                options.program,
                session.cwd().display()
            )
        )
    );

    let printer = session.take_output().map(|mut output| {
        tokio::spawn(async move {
            while let Some(chunk) = output.next_chunk().await {
                match chunk.channel {
                    Channel::Stdout => {
                        let mut stdout = std::io::stdout().lock();
                        let _ = stdout.write_all(&chunk.bytes);
                        let _ = stdout.flush();
                    }
                    Channel::Stderr | Channel::Diagnostic => {
                        let mut stderr = std::io::stderr().lock();
                        let _ = stderr.write_all(&chunk.bytes);
                        let _ = stderr.flush();
                    }
                }
            }
        })
    });

    let shell_exit = session.kill_handle();
    let mut lines = stdin_lines();
    loop {
        tokio::select! {
            line = lines.recv() => {
                let Some(line) = line else { break };
                match line.trim() {
                    ":history" => {
                        for (i, entry) in session.history().entries().iter().enumerate() {
                            println!("{:>4}  {}", i + 1, entry);
                        }
                    }
                    ":cwd" => println!("{}", session.cwd().display()),
                    _ => match session.submit(&line).await {
                        Ok(()) => {}
                        Err(polyrun_core::Error::SessionClosed(_)) => break,
                        Err(e) => return Err(e.into()),
                    },
                }
            }
            _ = shell_exit.wait() => break,
        }
    }

    let status = session.close().await;
    if let Some(printer) = printer {
        let _ = printer.await;
    }
    tracing::debug!("Terminal {} ended: {:?}", session.id, status);
    Ok(status.exit_code())
}
