//! SSH command execution and file transfer using the russh crate

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use russh::keys::ssh_key;
use russh::keys::{PrivateKeyWithHashAlg, check_known_hosts, load_secret_key};
use russh::{Channel, ChannelMsg, Disconnect, client};
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, error, info, instrument, warn};

use crate::error::ExecError;
use crate::keys::{KeySource, ResolvedKey};
use crate::quote::{quote, quote_path};
use crate::result::{CommandResult, ConnectionInfo, TransferSummary};
use crate::traits::RemoteExecutor;
use crate::transfer::{TransferEntry, TransferLink, TransferSource, remote_parent};

/// Directories created per `mkdir -p` invocation during uploads
const MKDIR_BATCH: usize = 64;

/// SSH client handler for russh
#[derive(Debug)]
struct SshClientHandler {
    host: String,
    port: u16,
    strict_host_key_checking: bool,
    forward_agent: bool,
}

impl client::Handler for SshClientHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &ssh_key::PublicKey,
    ) -> Result<bool, Self::Error> {
        if !self.strict_host_key_checking {
            // Same as StrictHostKeyChecking=no
            return Ok(true);
        }

        match check_known_hosts(&self.host, self.port, server_public_key) {
            Ok(true) => Ok(true),
            Ok(false) => {
                warn!(host = %self.host, "host key not present in known_hosts");
                Ok(false)
            }
            Err(e) => {
                error!(host = %self.host, error = %e, "known_hosts verification failed");
                Ok(false)
            }
        }
    }

    async fn server_channel_open_agent_forward(
        &mut self,
        channel: Channel<client::Msg>,
        _session: &mut client::Session,
    ) -> Result<(), Self::Error> {
        if self.forward_agent {
            tokio::spawn(proxy_agent(channel));
        } else {
            warn!(host = %self.host, "server opened an agent channel without forwarding enabled");
        }
        Ok(())
    }
}

/// Pipe a forwarded agent channel to the local `SSH_AUTH_SOCK`
async fn proxy_agent(channel: Channel<client::Msg>) {
    let Ok(socket) = std::env::var("SSH_AUTH_SOCK") else {
        warn!("agent forwarding requested but SSH_AUTH_SOCK is not set");
        return;
    };

    let mut agent = match tokio::net::UnixStream::connect(&socket).await {
        Ok(agent) => agent,
        Err(e) => {
            warn!(socket = %socket, error = %e, "failed to reach local SSH agent");
            return;
        }
    };

    let mut stream = Box::pin(channel.into_stream());
    match tokio::io::copy_bidirectional(&mut stream, &mut agent).await {
        Ok((to_agent, from_agent)) => {
            debug!(to_agent, from_agent, "agent forwarding channel closed");
        }
        Err(e) => debug!(error = %e, "agent forwarding channel ended with error"),
    }
}

/// Exit status, stdout and stderr gathered from a channel
struct ChannelOutput {
    status: i32,
    stdout: Vec<u8>,
    stderr: Vec<u8>,
}

/// Drain a channel until the server closes it
async fn collect_output(channel: &mut Channel<client::Msg>) -> ChannelOutput {
    let mut output = ChannelOutput {
        status: -1,
        stdout: Vec::new(),
        stderr: Vec::new(),
    };

    loop {
        match channel.wait().await {
            Some(ChannelMsg::Data { data }) => {
                output.stdout.extend_from_slice(&data);
            }
            Some(ChannelMsg::ExtendedData { data, ext }) => {
                if ext == 1 {
                    // stderr
                    output.stderr.extend_from_slice(&data);
                }
            }
            Some(ChannelMsg::ExitStatus { exit_status }) => {
                // exit-status may arrive after EOF, so keep reading until close
                output.status = exit_status.cast_signed();
            }
            Some(ChannelMsg::Close) | None => break,
            _ => {}
        }
    }

    output
}

fn io_error(e: russh::Error) -> ExecError {
    ExecError::IoError(e.to_string())
}

/// SSH executor
///
/// Manages one SSH session for remote command execution and uploads.
/// The connection is established on first use and reused until `close`.
pub struct SshExecutor {
    /// Connection configuration
    conn_info: ConnectionInfo,
    /// Resolved SSH key
    key: ResolvedKey,
    /// SSH session (initialized on first use)
    session: Mutex<Option<client::Handle<SshClientHandler>>>,
}

impl std::fmt::Debug for SshExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SshExecutor")
            .field("conn_info", &self.conn_info)
            .field("key", &self.key)
            .field("connected", &self.is_connected())
            .finish_non_exhaustive()
    }
}

impl SshExecutor {
    /// Create a new SSH executor
    ///
    /// # Arguments
    /// * `conn_info` - Connection details (host, user, port, forwarding)
    /// * `key_source` - How to obtain the SSH key
    ///
    /// # Errors
    /// Returns `ExecError::SshKeyError` if key resolution fails
    pub fn new(conn_info: ConnectionInfo, key_source: &KeySource) -> Result<Self, ExecError> {
        let key = key_source
            .resolve()
            .map_err(|e| ExecError::SshKeyError(e.to_string()))?;

        Ok(Self {
            conn_info,
            key,
            session: Mutex::new(None),
        })
    }

    /// Connect to the remote host
    #[instrument(skip(self), fields(host = %self.conn_info.host))]
    async fn connect(&self) -> Result<(), ExecError> {
        let mut session_lock = self.session.lock().await;

        if session_lock.is_some() {
            return Ok(());
        }

        info!(
            host = %self.conn_info.host,
            port = self.conn_info.port,
            user = %self.conn_info.user,
            forward_agent = self.conn_info.forward_agent,
            "connecting to SSH"
        );

        let config = Arc::new(client::Config::default());

        let handler = SshClientHandler {
            host: self.conn_info.host.clone(),
            port: self.conn_info.port,
            strict_host_key_checking: self.conn_info.strict_host_key_checking,
            forward_agent: self.conn_info.forward_agent,
        };

        let mut session = client::connect(
            config,
            (&self.conn_info.host[..], self.conn_info.port),
            handler,
        )
        .await
        .map_err(|e| match e {
            russh::Error::UnknownKey => ExecError::HostKeyRejected(self.conn_info.host.clone()),
            other => ExecError::ConnectionFailed(other.to_string()),
        })?;

        let key_pair = load_secret_key(self.key.path(), None)
            .map_err(|e| ExecError::SshKeyError(e.to_string()))?;

        let hash_alg = session
            .best_supported_rsa_hash()
            .await
            .ok()
            .flatten()
            .flatten();
        let auth_res = session
            .authenticate_publickey(
                &self.conn_info.user,
                PrivateKeyWithHashAlg::new(Arc::new(key_pair), hash_alg),
            )
            .await
            .map_err(|e| ExecError::AuthenticationFailed(e.to_string()))?;

        if !auth_res.success() {
            return Err(ExecError::AuthenticationFailed(
                "Public key authentication failed".to_string(),
            ));
        }

        info!(host = %self.conn_info.host, "SSH connected and authenticated");

        *session_lock = Some(session);
        Ok(())
    }

    /// Open a session channel, requesting agent forwarding when configured
    async fn open_channel(
        &self,
        session: &client::Handle<SshClientHandler>,
    ) -> Result<Channel<client::Msg>, ExecError> {
        let channel = session.channel_open_session().await.map_err(io_error)?;

        if self.conn_info.forward_agent {
            channel.agent_forward(false).await.map_err(io_error)?;
        }

        Ok(channel)
    }

    /// Execute command on remote host
    #[instrument(skip(self, cmd), fields(host = %self.conn_info.host))]
    async fn execute_remote(&self, cmd: &str) -> Result<CommandResult, ExecError> {
        let session_lock = self.session.lock().await;

        let session = session_lock.as_ref().ok_or(ExecError::NotConnected)?;

        debug!(command = %cmd, "executing remote command");

        let start = Instant::now();

        let mut channel = self.open_channel(session).await?;
        channel.exec(true, cmd).await.map_err(io_error)?;

        let output = collect_output(&mut channel).await;

        let duration = start.elapsed();
        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();

        debug!(
            command = %cmd,
            status = output.status,
            duration = ?duration,
            "remote command completed"
        );

        Ok(CommandResult {
            status: output.status,
            stdout,
            stderr,
            duration,
        })
    }

    /// Stream one local file into `cat` on the remote side
    #[instrument(skip(self, entry), fields(host = %self.conn_info.host, target = %entry.target))]
    async fn send_file(&self, entry: &TransferEntry) -> Result<(), ExecError> {
        let transfer_failed = |reason: String| ExecError::TransferFailed {
            path: entry.source.display().to_string(),
            reason,
        };

        let target = quote_path(&entry.target);
        let mut script = String::new();
        if let Some(parent) = remote_parent(&entry.target) {
            script.push_str(&format!("mkdir -p {} && ", quote_path(parent)));
        }
        script.push_str(&format!(
            "cat > {target} && chmod {:o} {target}",
            entry.mode
        ));

        let file = tokio::fs::File::open(&entry.source)
            .await
            .map_err(|e| transfer_failed(e.to_string()))?;

        let session_lock = self.session.lock().await;
        let session = session_lock.as_ref().ok_or(ExecError::NotConnected)?;

        let mut channel = self.open_channel(session).await?;
        channel
            .exec(true, script)
            .await
            .map_err(|e| transfer_failed(e.to_string()))?;
        channel
            .data(file)
            .await
            .map_err(|e| transfer_failed(e.to_string()))?;
        channel
            .eof()
            .await
            .map_err(|e| transfer_failed(e.to_string()))?;

        let output = collect_output(&mut channel).await;
        if output.status != 0 {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(transfer_failed(format!(
                "remote side exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        debug!(bytes = entry.len, "file sent");
        Ok(())
    }

    /// Recreate a symlink with `ln -sfn`
    async fn send_link(&self, link: &TransferLink) -> Result<(), ExecError> {
        let target = quote_path(&link.target);
        let mut script = String::new();
        if let Some(parent) = remote_parent(&link.target) {
            script.push_str(&format!("mkdir -p {} && ", quote_path(parent)));
        }
        script.push_str(&format!("ln -sfn {} {target}", quote(&link.points_to)));

        let result = self.execute_remote(&script).await?;
        if !result.success() {
            return Err(ExecError::TransferFailed {
                path: link.target.clone(),
                reason: format!("ln failed: {}", result.stderr.trim()),
            });
        }
        debug!(target = %link.target, points_to = %link.points_to, "symlink created");
        Ok(())
    }

    /// Disconnect from remote host
    ///
    /// # Errors
    /// Returns `ExecError::IoError` if disconnection fails
    pub async fn disconnect(&self) -> Result<(), ExecError> {
        let mut session_lock = self.session.lock().await;

        if let Some(session) = session_lock.take() {
            session
                .disconnect(Disconnect::ByApplication, "", "English")
                .await
                .map_err(io_error)?;
            info!(host = %self.conn_info.host, "SSH disconnected");
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteExecutor for SshExecutor {
    #[instrument(skip(self), fields(host = %self.conn_info.host))]
    async fn run(&self, cmd: &str) -> Result<CommandResult, ExecError> {
        self.connect().await?;
        self.execute_remote(cmd).await
    }

    #[instrument(skip(self), fields(host = %self.conn_info.host))]
    async fn run_with_timeout(
        &self,
        cmd: &str,
        timeout_duration: Duration,
    ) -> Result<CommandResult, ExecError> {
        let start = Instant::now();

        debug!(command = %cmd, timeout = ?timeout_duration, "executing with timeout");

        // Ensure connection first (outside of timeout)
        self.connect().await?;

        match timeout(timeout_duration, self.execute_remote(cmd)).await {
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

    #[instrument(skip(self), fields(host = %self.conn_info.host))]
    async fn upload(&self, local: &Path, remote: &str) -> Result<TransferSummary, ExecError> {
        let source = TransferSource::inspect(local)?;

        self.connect().await?;

        let remote_is_dir = if source.is_dir() {
            false
        } else {
            self.execute_remote(&format!("test -d {}", quote_path(remote)))
                .await?
                .success()
        };
        let root = source.target_root(remote, remote_is_dir);
        let plan = source.entries(&root)?;

        for batch in plan.dirs.chunks(MKDIR_BATCH) {
            let quoted: Vec<String> = batch.iter().map(|d| quote_path(d)).collect();
            let result = self
                .execute_remote(&format!("mkdir -p {}", quoted.join(" ")))
                .await?;
            if !result.success() {
                return Err(ExecError::TransferFailed {
                    path: local.display().to_string(),
                    reason: format!("mkdir failed: {}", result.stderr.trim()),
                });
            }
        }

        let mut summary = TransferSummary::default();
        for entry in &plan.files {
            self.send_file(entry).await?;
            summary.add_file(entry.len);
        }
        for link in &plan.links {
            self.send_link(link).await?;
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

    async fn close(&self) -> Result<(), ExecError> {
        self.disconnect().await
    }

    fn is_connected(&self) -> bool {
        // Synchronous snapshot; the session may have dropped since
        let session_opt = self.session.try_lock();
        session_opt.map(|s| s.is_some()).unwrap_or(false)
    }

    fn executor_type(&self) -> &'static str {
        "ssh"
    }
}

/// Builder for `SshExecutor`
pub struct SshExecutorBuilder {
    conn_info: ConnectionInfo,
    key_source: KeySource,
}

impl SshExecutorBuilder {
    /// Create builder with required fields
    pub fn new(
        host: impl Into<String>,
        user: impl Into<String>,
        identity_file: impl Into<std::path::PathBuf>,
    ) -> Self {
        Self {
            conn_info: ConnectionInfo::new(host, user),
            key_source: KeySource::Path(identity_file.into()),
        }
    }

    /// Take the key from a base64 environment variable instead of the file
    #[must_use]
    pub fn with_env_key(mut self, var_name: impl Into<String>) -> Self {
        self.key_source = KeySource::Env(var_name.into());
        self
    }

    /// Set custom port
    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.conn_info.port = port;
        self
    }

    /// Request agent forwarding
    #[must_use]
    pub fn with_forward_agent(mut self, forward: bool) -> Self {
        self.conn_info.forward_agent = forward;
        self
    }

    /// Verify host keys against `known_hosts`
    #[must_use]
    pub fn with_strict_host_key_checking(mut self, strict: bool) -> Self {
        self.conn_info.strict_host_key_checking = strict;
        self
    }

    /// Build the executor
    ///
    /// # Errors
    /// Returns `ExecError::SshKeyError` if key resolution fails
    pub fn build(self) -> Result<SshExecutor, ExecError> {
        SshExecutor::new(self.conn_info, &self.key_source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_rejects_missing_identity() {
        let result = SshExecutorBuilder::new("194.67.112.124", "root", "/nonexistent/id_rsa")
            .with_forward_agent(true)
            .build();

        assert!(matches!(result, Err(ExecError::SshKeyError(_))));
    }

    #[tokio::test]
    #[ignore = "requires SSH server"]
    async fn test_ssh_roundtrip() {
        let executor = SshExecutorBuilder::new("127.0.0.1", "root", "~/.ssh/id_rsa")
            .build()
            .unwrap();
        let result = executor.run("echo ok").await.unwrap();
        assert_eq!(result.stdout.trim(), "ok");
        executor.close().await.unwrap();
    }
}
