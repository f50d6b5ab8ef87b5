//! Process runner: request in, supervised child process out.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::process::{Child, Command};
use tokio::sync::Mutex;

use crate::config::{DEFAULT_KILL_GRACE_MS, DEFAULT_RUN_TIMEOUT_SECS, StudioConfig};
use crate::error::{Error, Result};
use crate::language::LanguageRegistry;
use crate::materialize::{Artifact, Materializer, next_run_id};
use crate::paths::StudioDirs;

use super::handle::{ExecutionHandle, ExecutionStatus, KillHandle, KillSignal, RunControl};
use super::supervisor::{Launch, launch};

/// What the child's stdin is connected to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StdinPolicy {
    /// Piped; writable through [`ExecutionHandle::write`].
    #[default]
    Interactive,
    /// Null device; reads see EOF immediately.
    Closed,
}

/// Wall-clock limit for one run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Deadline {
    /// Use the runner's configured default.
    #[default]
    Default,
    Unlimited,
    After(Duration),
}

/// One run of a source buffer.
#[derive(Debug, Clone)]
pub struct ExecutionRequest {
    pub source_text: String,
    pub language_id: String,
    /// Working directory of the child; defaults to the run directory.
    pub working_directory: Option<PathBuf>,
    pub stdin_policy: StdinPolicy,
    pub deadline: Deadline,
    /// Extra arguments appended to the run command.
    pub args: Vec<String>,
    pub keep_artifacts: bool,
}

impl ExecutionRequest {
    pub fn new(language_id: impl Into<String>, source_text: impl Into<String>) -> Self {
        Self {
            source_text: source_text.into(),
            language_id: language_id.into(),
            working_directory: None,
            stdin_policy: StdinPolicy::Interactive,
            deadline: Deadline::Default,
            args: Vec::new(),
            keep_artifacts: false,
        }
    }

    pub fn working_directory(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_directory = Some(dir.into());
        self
    }

    pub fn stdin(mut self, policy: StdinPolicy) -> Self {
        self.stdin_policy = policy;
        self
    }

    pub fn timeout(mut self, limit: Duration) -> Self {
        self.deadline = Deadline::After(limit);
        self
    }

    pub fn without_timeout(mut self) -> Self {
        self.deadline = Deadline::Unlimited;
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn keep_artifacts(mut self, keep: bool) -> Self {
        self.keep_artifacts = keep;
        self
    }
}

/// Runner-wide settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunnerOptions {
    /// Applied when a request uses [`Deadline::Default`].
    pub default_timeout: Option<Duration>,
    /// Delay between SIGTERM and SIGKILL.
    pub kill_grace: Duration,
}

impl Default for RunnerOptions {
    fn default() -> Self {
        Self {
            default_timeout: Some(Duration::from_secs(DEFAULT_RUN_TIMEOUT_SECS)),
            kill_grace: Duration::from_millis(DEFAULT_KILL_GRACE_MS),
        }
    }
}

impl From<&StudioConfig> for RunnerOptions {
    fn from(config: &StudioConfig) -> Self {
        Self {
            default_timeout: config.run_timeout(),
            kill_grace: config.kill_grace(),
        }
    }
}

/// Starts runs: resolve recipe, materialize, spawn, supervise.
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    registry: Arc<LanguageRegistry>,
    materializer: Materializer,
    options: RunnerOptions,
}

impl ProcessRunner {
    pub fn new(registry: Arc<LanguageRegistry>, materializer: Materializer) -> Self {
        Self {
            registry,
            materializer,
            options: RunnerOptions::default(),
        }
    }

    pub fn with_options(mut self, options: RunnerOptions) -> Self {
        self.options = options;
        self
    }

    /// Build a runner from user configuration.
    ///
    /// Merges the configured recipe table and applies the block editor
    /// target. Unless `keep_temp_files` is set, run directories left by
    /// processes that are no longer alive are removed.
    pub fn from_config(config: &StudioConfig, dirs: &StudioDirs) -> Result<Self> {
        let registry = LanguageRegistry::from_config(config)?;

        if !config.keep_temp_files
            && let Err(e) = dirs.clean_stale_runs()
        {
            tracing::warn!("Failed to clean stale run directories: {}", e);
        }

        let materializer = Materializer::new(&dirs.scratch_dir)
            .with_build_timeout(config.build_timeout())
            .with_keep_artifacts(config.keep_temp_files);

        Ok(Self::new(Arc::new(registry), materializer).with_options(config.into()))
    }

    pub fn registry(&self) -> &LanguageRegistry {
        &self.registry
    }

    pub fn options(&self) -> RunnerOptions {
        self.options
    }

    /// Start a run.
    ///
    /// Returns once the child is spawned; the run continues in the
    /// background.
    ///
    /// # Errors
    /// [`Error::UnknownLanguage`], [`Error::Scratch`], [`Error::Build`] or
    /// [`Error::Spawn`]. Nothing is left running on error.
    pub async fn start(&self, request: ExecutionRequest) -> Result<ExecutionHandle> {
        let run_id = next_run_id();
        let (control, kill) = RunControl::new();
        let prepared = self.prepare(run_id, &request, None).await?;
        Ok(self.launch_prepared(run_id, prepared, control, kill))
    }

    /// Start a run, turning pre-spawn errors into a failed handle.
    pub async fn start_or_fail(&self, request: ExecutionRequest) -> ExecutionHandle {
        let (control, kill) = RunControl::new();
        self.start_controlled(request, control, kill).await
    }

    /// Start a run whose kill handle already exists.
    ///
    /// Cancelling `kill` during the build stops the build and ends the run
    /// as [`ExecutionStatus::Killed`].
    pub(crate) async fn start_controlled(
        &self,
        request: ExecutionRequest,
        control: RunControl,
        kill: KillHandle,
    ) -> ExecutionHandle {
        let run_id = next_run_id();
        let language = request.language_id.clone();
        let signal = control.signal.clone();
        match self.prepare(run_id, &request, Some(&signal)).await {
            Ok(prepared) => self.launch_prepared(run_id, prepared, control, kill),
            Err(Error::Cancelled) => {
                tracing::info!("Run {} ({}) cancelled before start", run_id, language);
                ExecutionHandle::ended(
                    run_id,
                    &language,
                    "[polyrun] run cancelled before it started",
                    ExecutionStatus::Killed,
                    control,
                    kill,
                )
            }
            Err(e) => {
                tracing::info!("Run {} ({}) failed before start: {}", run_id, language, e);
                ExecutionHandle::ended(
                    run_id,
                    &language,
                    &e.with_hint(),
                    ExecutionStatus::Failed((&e).into()),
                    control,
                    kill,
                )
            }
        }
    }

    /// Resolve, materialize and spawn; nothing is supervised yet.
    async fn prepare(
        &self,
        run_id: u64,
        request: &ExecutionRequest,
        signal: Option<&KillSignal>,
    ) -> Result<Prepared> {
        let recipe = self.registry.resolve(&request.language_id)?;
        let cancelled = async {
            match signal {
                Some(signal) => signal.requested().await,
                None => std::future::pending().await,
            }
        };
        let artifact = self
            .materializer
            .materialize_until(
                run_id,
                &request.source_text,
                recipe,
                request.keep_artifacts,
                cancelled,
            )
            .await?;
        if signal.is_some_and(KillSignal::is_requested) {
            return Err(Error::Cancelled);
        }

        let resolved = recipe.run_command.resolve(&artifact.template_vars())?;
        let cwd = request
            .working_directory
            .clone()
            .unwrap_or_else(|| artifact.dir.clone());

        let mut command = Command::new(&resolved.program);
        command
            .args(&resolved.args)
            .args(&request.args)
            .current_dir(&cwd)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        command.stdin(match request.stdin_policy {
            StdinPolicy::Interactive => Stdio::piped(),
            StdinPolicy::Closed => Stdio::null(),
        });
        #[cfg(unix)]
        command.process_group(0);

        tracing::debug!(
            "Run {}: {} {:?} in {}",
            run_id,
            resolved.program.display(),
            resolved.args,
            cwd.display()
        );
        let child = command.spawn().map_err(|e| Error::Spawn {
            program: resolved.program.display().to_string(),
            message: e.to_string(),
        })?;

        let timeout = match request.deadline {
            Deadline::Default => self.options.default_timeout,
            Deadline::Unlimited => None,
            Deadline::After(limit) => Some(limit),
        };

        Ok(Prepared {
            child,
            artifact,
            language: recipe.id.clone(),
            timeout,
        })
    }

    fn launch_prepared(
        &self,
        run_id: u64,
        prepared: Prepared,
        control: RunControl,
        kill: KillHandle,
    ) -> ExecutionHandle {
        let launched = launch(Launch {
            child: prepared.child,
            label: format!("run {} ({})", run_id, prepared.language),
            timeout: prepared.timeout,
            kill_grace: self.options.kill_grace,
            artifact: Some(prepared.artifact),
            control,
        });

        ExecutionHandle {
            run_id,
            language: prepared.language,
            pid: launched.pid,
            started_at: Instant::now(),
            output: Some(launched.output),
            stdin: launched.stdin.map(|stdin| Arc::new(Mutex::new(Some(stdin)))),
            control: kill,
        }
    }
}

/// A spawned child waiting to be handed to the supervisor.
struct Prepared {
    child: Child,
    artifact: Artifact,
    language: String,
    timeout: Option<Duration>,
}
