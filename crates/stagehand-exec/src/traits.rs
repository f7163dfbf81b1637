//! Remote executor trait

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::ExecError;
use crate::result::{CommandResult, TransferSummary};

/// Something that can run shell commands and receive files on a host
#[async_trait]
pub trait RemoteExecutor: Send + Sync {
    /// Run a shell command and wait for its exit status
    ///
    /// A non-zero exit status is not an error; check `CommandResult::success`.
    async fn run(&self, cmd: &str) -> Result<CommandResult, ExecError>;

    /// Like `run`, failing with `ExecError::Timeout` after `timeout`
    async fn run_with_timeout(
        &self,
        cmd: &str,
        timeout: Duration,
    ) -> Result<CommandResult, ExecError>;

    /// Copy a local file or directory to `remote`
    ///
    /// If `remote` is an existing directory the source lands inside it under
    /// its own name, otherwise `remote` is the destination path.
    async fn upload(&self, local: &Path, remote: &str) -> Result<TransferSummary, ExecError>;

    /// Release the underlying connection, if any
    async fn close(&self) -> Result<(), ExecError> {
        Ok(())
    }

    /// Whether a connection is currently held
    fn is_connected(&self) -> bool {
        true
    }

    fn executor_type(&self) -> &'static str;
}
