//! Process (executable) extensions.
//!
//! Protocol:
//! - `<file> --describe` prints the JSON manifest on stdout and exits 0
//! - `<file> invoke <action>` reads the payload from stdin

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::error::{Error, Result};

use super::manifest::ExtensionManifest;

/// Default bound for one action invocation.
pub const DEFAULT_INVOKE_TIMEOUT: Duration = Duration::from_secs(30);

/// Captured result of an action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionOutput {
    pub code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ActionOutput {
    pub fn success(&self) -> bool {
        self.code == 0
    }
}

/// An executable speaking the describe/invoke protocol.
#[derive(Debug, Clone)]
pub struct ProcessExtension {
    path: PathBuf,
    manifest: ExtensionManifest,
    invoke_timeout: Duration,
}

impl ProcessExtension {
    /// Run `--describe` and parse the manifest.
    ///
    /// The child is killed if the returned future is dropped (e.g. by a
    /// load timeout).
    pub async fn describe(path: &Path) -> Result<Self> {
        let load_error = |message: String| Error::ExtensionLoad {
            path: path.to_path_buf(),
            message,
        };

        let output = Command::new(path)
            .arg("--describe")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| load_error(format!("failed to run --describe: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(load_error(format!(
                "--describe exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let manifest = ExtensionManifest::from_json(&stdout)?;
        tracing::debug!(
            "Described process extension {} at {}",
            manifest.id,
            path.display()
        );
        Ok(Self {
            path: path.to_path_buf(),
            manifest,
            invoke_timeout: DEFAULT_INVOKE_TIMEOUT,
        })
    }

    pub fn with_invoke_timeout(mut self, timeout: Duration) -> Self {
        self.invoke_timeout = timeout;
        self
    }

    pub fn manifest(&self) -> &ExtensionManifest {
        &self.manifest
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Run `invoke <action>` with `payload` on stdin.
    pub async fn invoke(&self, action: &str, payload: &str) -> Result<ActionOutput> {
        let mut child = Command::new(&self.path)
            .arg("invoke")
            .arg(action)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::Spawn {
                program: self.path.display().to_string(),
                message: e.to_string(),
            })?;

        // Payload write and wait share one deadline
        let stdin = child.stdin.take();
        let id = &self.manifest.id;
        let write = async move {
            if let Some(mut stdin) = stdin {
                // The extension may exit without reading; a broken pipe is fine
                if let Err(e) = stdin.write_all(payload.as_bytes()).await {
                    tracing::debug!("Payload write to {} failed: {}", id, e);
                }
            }
        };
        let exchange = async {
            let ((), output) = tokio::join!(write, child.wait_with_output());
            output
        };

        let output = tokio::time::timeout(self.invoke_timeout, exchange)
            .await
            .map_err(|_| {
                Error::InvalidOperation(format!(
                    "extension '{}' action '{}' timed out after {:.1}s",
                    self.manifest.id,
                    action,
                    self.invoke_timeout.as_secs_f64()
                ))
            })??;

        Ok(ActionOutput {
            code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}
