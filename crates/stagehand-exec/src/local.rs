//! Local command execution using `tokio::process`
//!
//! Used for hosts addressed as `localhost`, and handy for trying a recipe
//! without a server.

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, error, info, instrument};

use crate::error::ExecError;
use crate::result::{CommandResult, TransferSummary};
use crate::traits::RemoteExecutor;
use crate::transfer::TransferSource;

/// Local command executor
///
/// Executes commands on the local machine using `tokio::process::Command`.
#[derive(Debug, Clone)]
pub struct LocalExecutor;

impl LocalExecutor {
    /// Create a new local executor
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    #[instrument(skip(self), level = "debug")]
    async fn execute(&self, cmd: &str) -> Result<CommandResult, ExecError> {
        let start = Instant::now();

        debug!(command = %cmd, "executing local command");

        // Use shell to support pipes, redirections, etc.
        let child = Command::new("sh")
            .arg("-c")
            .arg(cmd)
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ExecError::SpawnError(e.to_string()))?;

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| ExecError::IoError(e.to_string()))?;

        let duration = start.elapsed();

        let status = output.status.code().unwrap_or(-1);
        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();

        debug!(
            command = %cmd,
            status = status,
            duration = ?duration,
            "command completed"
        );

        if !output.status.success() {
            error!(
                command = %cmd,
                status = status,
                stderr = %stderr,
                "command failed"
            );
        }

        Ok(CommandResult {
            status,
            stdout,
            stderr,
            duration,
        })
    }
}

impl Default for LocalExecutor {
    fn default() -> Self {
        Self::new()
    }
}

/// Expand `~` the way the remote shell would
fn local_target(remote: &str) -> PathBuf {
    crate::keys::expand_home(Path::new(remote))
}

fn copy_error(path: &Path, err: &std::io::Error) -> ExecError {
    ExecError::TransferFailed {
        path: path.display().to_string(),
        reason: err.to_string(),
    }
}

#[async_trait]
impl RemoteExecutor for LocalExecutor {
    #[instrument(skip(self), level = "debug")]
    async fn run(&self, cmd: &str) -> Result<CommandResult, ExecError> {
        self.execute(cmd).await
    }

    #[instrument(skip(self), level = "debug")]
    async fn run_with_timeout(
        &self,
        cmd: &str,
        timeout_duration: Duration,
    ) -> Result<CommandResult, ExecError> {
        let start = Instant::now();

        debug!(command = %cmd, timeout = ?timeout_duration, "executing with timeout");

        match timeout(timeout_duration, self.execute(cmd)).await {
            Ok(result) => result,
            Err(_) => {
                error!(
                    command = %cmd,
                    timeout = ?timeout_duration,
                    elapsed = ?start.elapsed(),
                    "command timed out"
                );
                Err(ExecError::Timeout {
                    timeout: timeout_duration,
                })
            }
        }
    }

    #[instrument(skip(self), level = "debug")]
    async fn upload(&self, local: &Path, remote: &str) -> Result<TransferSummary, ExecError> {
        let source = TransferSource::inspect(local)?;
        let remote_is_dir = tokio::fs::metadata(local_target(remote))
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false);
        let root = source.target_root(remote, remote_is_dir);
        let plan = source.entries(&root)?;

        for dir in &plan.dirs {
            let dir = local_target(dir);
            tokio::fs::create_dir_all(&dir)
                .await
                .map_err(|e| copy_error(&dir, &e))?;
        }

        let mut summary = TransferSummary::default();
        for file in plan.files {
            let target = local_target(&file.target);
            if let Some(parent) = target.parent() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| copy_error(parent, &e))?;
            }
            let copied = tokio::fs::copy(&file.source, &target)
                .await
                .map_err(|e| copy_error(&file.source, &e))?;
            tokio::fs::set_permissions(&target, std::fs::Permissions::from_mode(file.mode))
                .await
                .map_err(|e| copy_error(&target, &e))?;
            debug!(source = %file.source.display(), target = %target.display(), "copied file");
            summary.add_file(copied);
        }

        for link in &plan.links {
            let target = local_target(&link.target);
            // Same as `ln -sfn`: replace an existing link or file, never a directory
            if let Ok(existing) = tokio::fs::symlink_metadata(&target).await
                && !existing.is_dir()
            {
                tokio::fs::remove_file(&target)
                    .await
                    .map_err(|e| copy_error(&target, &e))?;
            }
            tokio::fs::symlink(&link.points_to, &target)
                .await
                .map_err(|e| copy_error(&target, &e))?;
            debug!(target = %target.display(), points_to = %link.points_to, "created symlink");
            summary.add_link();
        }

        info!(
            source = %local.display(),
            destination = %root,
            files = summary.files,
            links = summary.links,
            bytes = summary.bytes,
            "upload completed"
        );

        Ok(summary)
    }

    fn executor_type(&self) -> &'static str {
        "local"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_run_success() {
        let executor = LocalExecutor::new();
        let result = executor.run("echo hello").await.unwrap();

        assert!(result.success());
        assert_eq!(result.stdout.trim(), "hello");
    }

    #[tokio::test]
    async fn test_run_failure() {
        let executor = LocalExecutor::new();
        let result = executor.run("exit 42").await.unwrap();

        assert!(!result.success());
        assert_eq!(result.status, 42);
    }

    #[tokio::test]
    async fn test_run_timeout() {
        let executor = LocalExecutor::new();
        let result = executor
            .run_with_timeout("sleep 5", Duration::from_millis(100))
            .await;

        assert!(matches!(result, Err(ExecError::Timeout { .. })));
    }

    #[tokio::test]
    async fn test_run_with_stderr() {
        let executor = LocalExecutor::new();
        let result = executor.run("echo error >&2").await.unwrap();

        assert!(result.success());
        assert_eq!(result.stderr.trim(), "error");
    }

    #[tokio::test]
    async fn test_upload_file_into_directory() {
        let src_dir = tempfile::tempdir().unwrap();
        let dst_dir = tempfile::tempdir().unwrap();
        let file = src_dir.path().join("config.xml");
        std::fs::write(&file, "<config/>").unwrap();

        let executor = LocalExecutor::new();
        let summary = executor
            .upload(&file, dst_dir.path().to_str().unwrap())
            .await
            .unwrap();

        assert_eq!(summary.files, 1);
        assert_eq!(summary.bytes, 9);
        let copied = std::fs::read_to_string(dst_dir.path().join("config.xml")).unwrap();
        assert_eq!(copied, "<config/>");
    }

    #[tokio::test]
    async fn test_upload_directory_preserves_mode() {
        let src_dir = tempfile::tempdir().unwrap();
        let dst_dir = tempfile::tempdir().unwrap();
        let app = src_dir.path().join("imagesamenu");
        std::fs::create_dir(&app).unwrap();
        let bin = app.join("imageserver");
        std::fs::write(&bin, "#!/bin/sh\n").unwrap();
        std::fs::set_permissions(&bin, std::fs::Permissions::from_mode(0o755)).unwrap();

        let dest = dst_dir.path().join("srv");
        let executor = LocalExecutor::new();
        let summary = executor
            .upload(&app, dest.to_str().unwrap())
            .await
            .unwrap();

        assert_eq!(summary.files, 1);
        let copied = dest.join("imagesamenu/imageserver");
        let mode = std::fs::metadata(&copied).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o755);
    }

    #[tokio::test]
    async fn test_upload_directory_recreates_symlinks() {
        let src_dir = tempfile::tempdir().unwrap();
        let dst_dir = tempfile::tempdir().unwrap();
        let app = src_dir.path().join("imagesamenu");
        std::fs::create_dir(&app).unwrap();
        std::fs::write(app.join("real.bin"), "bin").unwrap();
        std::os::unix::fs::symlink("real.bin", app.join("current.bin")).unwrap();

        let executor = LocalExecutor::new();
        let dest = dst_dir.path().to_str().unwrap();
        let summary = executor.upload(&app, dest).await.unwrap();
        assert_eq!(summary.files, 1);
        assert_eq!(summary.links, 1);

        let link = dst_dir.path().join("imagesamenu/current.bin");
        assert!(std::fs::symlink_metadata(&link).unwrap().file_type().is_symlink());
        assert_eq!(std::fs::read_link(&link).unwrap(), Path::new("real.bin"));
        assert_eq!(std::fs::read_to_string(&link).unwrap(), "bin");

        // a second upload replaces the existing link
        let summary = executor.upload(&app, dest).await.unwrap();
        assert_eq!(summary.links, 1);
    }

    #[tokio::test]
    async fn test_upload_missing_source() {
        let executor = LocalExecutor::new();
        let result = executor
            .upload(Path::new("/nonexistent/config.xml"), "/tmp")
            .await;

        assert!(matches!(result, Err(ExecError::TransferFailed { .. })));
    }
}
