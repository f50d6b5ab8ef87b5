//! Artifact materialization.
//!
//! Writes a source buffer into its own run directory under the scratch area
//! and, for compiled languages, runs the build step there. The returned
//! [`Artifact`] owns the directory and removes it when dropped.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::process::Command;

use crate::config::DEFAULT_BUILD_TIMEOUT_SECS;
use crate::error::{Error, Result};
use crate::language::{CleanupPolicy, LanguageRecipe, TemplateVars};
use crate::runner::terminate::kill_group;

/// Monotonic counter namespacing run directories within this process.
static RUN_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Allocate the next run id.
pub fn next_run_id() -> u64 {
    RUN_COUNTER.fetch_add(1, Ordering::Relaxed)
}

/// File name of the generated preview page for stylesheet runs.
const CSS_PREVIEW_NAME: &str = "index.html";

/// Writes artifacts into a scratch directory.
#[derive(Debug, Clone)]
pub struct Materializer {
    scratch_dir: PathBuf,
    build_timeout: Duration,
    keep_artifacts: bool,
}

impl Materializer {
    /// Create a materializer writing into `scratch_dir`.
    pub fn new(scratch_dir: impl Into<PathBuf>) -> Self {
        Self {
            scratch_dir: scratch_dir.into(),
            build_timeout: Duration::from_secs(DEFAULT_BUILD_TIMEOUT_SECS),
            keep_artifacts: false,
        }
    }

    /// Bound the build step.
    pub fn with_build_timeout(mut self, timeout: Duration) -> Self {
        self.build_timeout = timeout;
        self
    }

    /// Keep every artifact regardless of request or recipe.
    pub fn with_keep_artifacts(mut self, keep: bool) -> Self {
        self.keep_artifacts = keep;
        self
    }

    pub fn scratch_dir(&self) -> &Path {
        &self.scratch_dir
    }

    /// Materialize `source` for `recipe` under a fresh run id.
    pub async fn materialize(&self, source: &str, recipe: &LanguageRecipe) -> Result<Artifact> {
        self.materialize_run(next_run_id(), source, recipe, false).await
    }

    /// Materialize `source` into `run-<pid>-<run_id>/`.
    ///
    /// # Errors
    /// - [`Error::Scratch`] if the directory or files cannot be written
    /// - [`Error::Build`] if the build step exits nonzero or times out
    /// - [`Error::Spawn`] if the compiler cannot be started
    pub async fn materialize_run(
        &self,
        run_id: u64,
        source: &str,
        recipe: &LanguageRecipe,
        keep: bool,
    ) -> Result<Artifact> {
        self.materialize_until(run_id, source, recipe, keep, std::future::pending())
            .await
    }

    /// Like [`materialize_run`](Self::materialize_run), but gives up when
    /// `cancelled` resolves.
    ///
    /// A running build is killed along with its process group and the run
    /// directory is released.
    ///
    /// # Errors
    /// As `materialize_run`, plus [`Error::Cancelled`].
    pub async fn materialize_until(
        &self,
        run_id: u64,
        source: &str,
        recipe: &LanguageRecipe,
        keep: bool,
        cancelled: impl Future<Output = ()>,
    ) -> Result<Artifact> {
        let dir = self
            .scratch_dir
            .join(format!("run-{}-{}", std::process::id(), run_id));
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| Error::scratch(&dir, e))?;

        // From here on the guard owns the directory
        let retain = keep || self.keep_artifacts || recipe.cleanup_policy == CleanupPolicy::Retain;
        let source_path = dir.join(recipe.source_file_name());
        let mut artifact = Artifact {
            run_id,
            output_path: dir.join(recipe.output_file_name()),
            preview_path: source_path.clone(),
            source_path,
            dir,
            retain,
        };

        tokio::fs::write(&artifact.source_path, source)
            .await
            .map_err(|e| Error::scratch(&artifact.source_path, e))?;

        if recipe.id == "css" {
            let preview = artifact.dir.join(CSS_PREVIEW_NAME);
            let file_name = recipe.source_file_name();
            tokio::fs::write(&preview, css_preview(&file_name))
                .await
                .map_err(|e| Error::scratch(&preview, e))?;
            artifact.preview_path = preview;
        }

        if let Some(build) = &recipe.build_command {
            let resolved = build.resolve(&artifact.template_vars())?;
            tracing::debug!(
                "Building {} in {}: {} {:?}",
                recipe.id,
                artifact.dir.display(),
                resolved.program.display(),
                resolved.args
            );

            let mut command = Command::new(&resolved.program);
            command
                .args(&resolved.args)
                .current_dir(&artifact.dir)
                .stdin(Stdio::null())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .kill_on_drop(true);
            #[cfg(unix)]
            command.process_group(0);
            let child = command.spawn().map_err(|e| Error::Spawn {
                program: resolved.program.display().to_string(),
                message: e.to_string(),
            })?;
            let pid = child.id();

            // The group is killed before the wait future (and so the unreaped
            // leader) is dropped
            let build = tokio::time::timeout(self.build_timeout, child.wait_with_output());
            tokio::pin!(build);
            tokio::pin!(cancelled);
            let output = tokio::select! {
                result = &mut build => match result {
                    Ok(output) => output.map_err(|e| Error::scratch(&artifact.dir, e))?,
                    Err(_) => {
                        kill_group(pid);
                        return Err(Error::Build {
                            language: recipe.id.clone(),
                            diagnostics: format!(
                                "build timed out after {}s",
                                self.build_timeout.as_secs()
                            ),
                        });
                    }
                },
                _ = &mut cancelled => {
                    kill_group(pid);
                    tracing::info!("Build of run {} cancelled", run_id);
                    return Err(Error::Cancelled);
                }
            };

            if !output.status.success() {
                let stderr = String::from_utf8_lossy(&output.stderr);
                let diagnostics = if stderr.trim().is_empty() {
                    String::from_utf8_lossy(&output.stdout).into_owned()
                } else {
                    stderr.into_owned()
                };
                tracing::info!("Build of run {} failed ({})", run_id, output.status);
                return Err(Error::Build {
                    language: recipe.id.clone(),
                    diagnostics,
                });
            }
        }

        Ok(artifact)
    }
}

fn css_preview(stylesheet: &str) -> String {
    format!(
        "<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"utf-8\">\n\
         <link rel=\"stylesheet\" href=\"{stylesheet}\">\n</head>\n<body>\n\
         <h1>Heading</h1>\n<p>Paragraph with <a href=\"#\">a link</a>.</p>\n\
         <button>Button</button>\n</body>\n</html>\n"
    )
}

/// A materialized run directory.
///
/// Removes the directory on drop unless retained.
#[derive(Debug)]
pub struct Artifact {
    pub run_id: u64,
    pub dir: PathBuf,
    pub source_path: PathBuf,
    /// Build output; only exists for compiled recipes.
    pub output_path: PathBuf,
    /// Document opened for rendered recipes.
    pub preview_path: PathBuf,
    retain: bool,
}

impl Artifact {
    /// Placeholder values for this artifact.
    pub fn template_vars(&self) -> TemplateVars<'_> {
        TemplateVars {
            source: &self.source_path,
            output: &self.output_path,
            dir: &self.dir,
            stem: self
                .source_path
                .file_stem()
                .and_then(|stem| stem.to_str())
                .unwrap_or("main"),
            preview: &self.preview_path,
        }
    }

    pub fn is_retained(&self) -> bool {
        self.retain
    }

    /// Keep the directory after drop.
    pub fn retain(&mut self) {
        self.retain = true;
    }
}

impl Drop for Artifact {
    fn drop(&mut self) {
        if self.retain {
            tracing::debug!("Keeping run directory {}", self.dir.display());
            return;
        }
        if let Err(e) = std::fs::remove_dir_all(&self.dir)
            && e.kind() != std::io::ErrorKind::NotFound
        {
            tracing::warn!("Failed to remove {}: {}", self.dir.display(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::language::{CommandTemplate, LanguageRegistry};
    use tempfile::TempDir;

    fn failing_build() -> LanguageRecipe {
        LanguageRecipe {
            id: "broken".to_string(),
            display_name: "Broken".to_string(),
            file_extension: "txt".to_string(),
            source_file_name: None,
            build_command: Some(CommandTemplate::new(
                "sh",
                &["-c", "echo 'line 1: syntax error' >&2; exit 1"],
            )),
            run_command: CommandTemplate::new("{output}", &[]),
            cleanup_policy: CleanupPolicy::RemoveOnExit,
            kind: Default::default(),
            aliases: Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_source_written_and_removed_on_drop() {
        let temp = TempDir::new().unwrap();
        let materializer = Materializer::new(temp.path());
        let registry = LanguageRegistry::with_builtins();
        let recipe = registry.resolve("python").unwrap();

        let artifact = materializer.materialize("print('hi')", recipe).await.unwrap();
        let dir = artifact.dir.clone();
        assert!(dir.starts_with(temp.path()));
        assert!(
            dir.file_name()
                .unwrap()
                .to_string_lossy()
                .starts_with(&format!("run-{}-", std::process::id()))
        );
        assert_eq!(
            std::fs::read_to_string(&artifact.source_path).unwrap(),
            "print('hi')"
        );

        drop(artifact);
        assert!(!dir.exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_cancelled_build_is_killed_and_cleaned_up() {
        let temp = TempDir::new().unwrap();
        let materializer = Materializer::new(temp.path());
        let mut recipe = failing_build();
        recipe.build_command = Some(CommandTemplate::new("sh", &["-c", "sleep 5; exit 1"]));

        let started = std::time::Instant::now();
        let result = materializer
            .materialize_until(
                next_run_id(),
                "body",
                &recipe,
                false,
                tokio::time::sleep(std::time::Duration::from_millis(200)),
            )
            .await;

        assert!(matches!(result, Err(Error::Cancelled)));
        assert!(started.elapsed() < std::time::Duration::from_secs(3));
        assert_eq!(std::fs::read_dir(temp.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_runs_get_distinct_directories() {
        let temp = TempDir::new().unwrap();
        let materializer = Materializer::new(temp.path());
        let registry = LanguageRegistry::with_builtins();
        let recipe = registry.resolve("javascript").unwrap();

        let a = materializer.materialize("1", recipe).await.unwrap();
        let b = materializer.materialize("2", recipe).await.unwrap();
        assert_ne!(a.dir, b.dir);
    }

    #[tokio::test]
    async fn test_java_uses_fixed_file_name() {
        let temp = TempDir::new().unwrap();
        let materializer = Materializer::new(temp.path());
        let registry = LanguageRegistry::with_builtins();

        let artifact = materializer
            .materialize("class Main {}", registry.resolve("java").unwrap())
            .await
            .unwrap();
        assert!(artifact.source_path.ends_with("Main.java"));
    }

    #[tokio::test]
    async fn test_css_gets_preview_and_is_retained() {
        let temp = TempDir::new().unwrap();
        let materializer = Materializer::new(temp.path());
        let registry = LanguageRegistry::with_builtins();

        let artifact = materializer
            .materialize("body { color: red; }", registry.resolve("css").unwrap())
            .await
            .unwrap();
        let preview = std::fs::read_to_string(&artifact.preview_path).unwrap();
        assert!(preview.contains("href=\"main.css\""));

        let dir = artifact.dir.clone();
        drop(artifact);
        assert!(dir.exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_build_failure_reports_diagnostics_and_cleans_up() {
        let temp = TempDir::new().unwrap();
        let materializer = Materializer::new(temp.path());

        let err = materializer
            .materialize("whatever", &failing_build())
            .await
            .unwrap_err();
        match err {
            Error::Build { diagnostics, .. } => assert!(diagnostics.contains("syntax error")),
            other => panic!("expected build failure, got {:?}", other),
        }
        assert_eq!(std::fs::read_dir(temp.path()).unwrap().count(), 0);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_build_timeout() {
        let temp = TempDir::new().unwrap();
        let materializer =
            Materializer::new(temp.path()).with_build_timeout(Duration::from_millis(200));
        let mut recipe = failing_build();
        recipe.build_command = Some(CommandTemplate::new("sh", &["-c", "sleep 5"]));

        let err = materializer.materialize("", &recipe).await.unwrap_err();
        assert!(err.to_string().contains("timed out"));
    }

    #[tokio::test]
    async fn test_keep_artifacts() {
        let temp = TempDir::new().unwrap();
        let materializer = Materializer::new(temp.path()).with_keep_artifacts(true);
        let registry = LanguageRegistry::with_builtins();

        let artifact = materializer
            .materialize("print(1)", registry.resolve("python").unwrap())
            .await
            .unwrap();
        let dir = artifact.dir.clone();
        drop(artifact);
        assert!(dir.exists());
    }
}
