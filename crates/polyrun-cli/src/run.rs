//! `polyrun run`: execute a source file.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use polyrun_core::{
    Channel, ExecutionRequest, OutputChunk, ProcessRunner, RecipeKind, StudioConfig,
};

use crate::colors;
use crate::input::stdin_lines;

/// Options for a single run.
pub struct RunOptions {
    pub file: PathBuf,
    pub language: Option<String>,
    pub timeout_secs: Option<u64>,
    pub no_timeout: bool,
    pub keep_temp: bool,
    pub args: Vec<String>,
}

/// Run a file and return the exit code to mirror.
pub async fn execute(config: &StudioConfig, options: RunOptions) -> anyhow::Result<i32> {
    let source = std::fs::read_to_string(&options.file)
        .with_context(|| format!("failed to read {}", options.file.display()))?;

    let dirs = config.studio_dirs()?;
    let runner = ProcessRunner::from_config(config, &dirs)?;

    let language = match options.language {
        Some(language) => language,
        None => runner
            .registry()
            .by_path(&options.file)
            .map(|recipe| recipe.id.clone())
            .with_context(|| {
                format!(
                    "cannot detect the language of {}; pass --lang",
                    options.file.display()
                )
            })?,
    };
    let kind = runner.registry().resolve(&language)?.kind;

    let mut request = ExecutionRequest::new(language, source)
        .args(options.args)
        .keep_artifacts(options.keep_temp);
    if let Some(dir) = working_directory(&options.file) {
        request = request.working_directory(dir);
    }
    if options.no_timeout {
        request = request.without_timeout();
    } else if let Some(secs) = options.timeout_secs {
        request = request.timeout(Duration::from_secs(secs));
    }

    let started = Instant::now();
    let mut handle = runner.start(request).await?;
    tracing::debug!("Run {} started as pid {:?}", handle.run_id, handle.pid);
    if kind == RecipeKind::Render {
        eprintln!("{}", colors::paint(colors::CYAN, "Opening preview..."));
    }

    let mut output = handle
        .take_output()
        .context("output stream already taken")?;
    let handle = Arc::new(handle);
    let kill = handle.kill_handle();

    // Forward our stdin to the program
    let forwarder = {
        let handle = Arc::clone(&handle);
        tokio::spawn(async move {
            let mut lines = stdin_lines();
            while let Some(line) = lines.recv().await {
                if handle.write(line.as_bytes()).await.is_err() {
                    return;
                }
            }
            handle.close_stdin().await;
        })
    };

    let mut interrupted = false;
    loop {
        tokio::select! {
            chunk = output.next_chunk() => match chunk {
                Some(chunk) => print_chunk(&chunk),
                None => break,
            },
            _ = tokio::signal::ctrl_c(), if !interrupted => {
                interrupted = true;
                eprintln!("\n{}", colors::paint(colors::YELLOW, "Interrupted, stopping..."));
                kill.cancel();
            }
        }
    }

    let status = handle.await_exit().await;
    forwarder.abort();
    eprintln!("{}", colors::status_line(&status, started.elapsed()));
    Ok(status.exit_code())
}

/// Run programs next to their source file so relative paths work.
fn working_directory(file: &Path) -> Option<PathBuf> {
    let parent = file.parent()?;
    if parent.as_os_str().is_empty() {
        return None;
    }
    parent.canonicalize().ok()
}

fn print_chunk(chunk: &OutputChunk) {
    match chunk.channel {
        Channel::Stdout => {
            let mut stdout = std::io::stdout().lock();
            let _ = stdout.write_all(&chunk.bytes);
            let _ = stdout.flush();
        }
        Channel::Stderr => {
            let mut stderr = std::io::stderr().lock();
            let _ = stderr.write_all(&chunk.bytes);
            let _ = stderr.flush();
        }
        Channel::Diagnostic => {
            eprint!("{}", colors::paint(colors::YELLOW, &chunk.text()));
        }
    }
}
