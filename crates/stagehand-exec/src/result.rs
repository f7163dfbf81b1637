//! Result types for command execution

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Result of a command execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandResult {
    /// Exit status code (0 for success)
    pub status: i32,
    /// stdout output
    pub stdout: String,
    /// stderr output
    pub stderr: String,
    /// Time taken to execute
    pub duration: Duration,
}

impl CommandResult {
    /// Check if command succeeded (exit code 0)
    #[must_use]
    pub fn success(&self) -> bool {
        self.status == 0
    }

    /// Combine stdout and stderr
    #[must_use]
    pub fn combined_output(&self) -> String {
        if self.stderr.is_empty() {
            self.stdout.clone()
        } else {
            format!("{}\n{}", self.stdout, self.stderr)
        }
    }
}

/// Outcome of an upload
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TransferSummary {
    /// Number of regular files written
    pub files: u64,
    /// Total payload size in bytes
    pub bytes: u64,
    /// Number of symlinks recreated
    #[serde(default)]
    pub links: u64,
}

impl TransferSummary {
    pub(crate) fn add_file(&mut self, bytes: u64) {
        self.files += 1;
        self.bytes += bytes;
    }

    pub(crate) fn add_link(&mut self) {
        self.links += 1;
    }
}

/// Connection information for SSH
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionInfo {
    /// Host address
    pub host: String,
    /// Port (default 22)
    #[serde(default = "default_port")]
    pub port: u16,
    /// Username
    pub user: String,
    /// Request agent forwarding on every session channel
    #[serde(default)]
    pub forward_agent: bool,
    /// Verify the server key against `~/.ssh/known_hosts`
    #[serde(default)]
    pub strict_host_key_checking: bool,
}

fn default_port() -> u16 {
    22
}

impl ConnectionInfo {
    /// Create new connection info
    pub fn new(host: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: 22,
            user: user.into(),
            forward_agent: false,
            strict_host_key_checking: false,
        }
    }

    /// Set custom port
    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Enable or disable agent forwarding
    #[must_use]
    pub fn with_forward_agent(mut self, forward: bool) -> Self {
        self.forward_agent = forward;
        self
    }

    /// Enable or disable `known_hosts` verification
    #[must_use]
    pub fn with_strict_host_key_checking(mut self, strict: bool) -> Self {
        self.strict_host_key_checking = strict;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_combined_output() {
        let result = CommandResult {
            status: 1,
            stdout: "out".to_string(),
            stderr: "err".to_string(),
            duration: Duration::from_millis(3),
        };
        assert!(!result.success());
        assert_eq!(result.combined_output(), "out\nerr");
    }

    #[test]
    fn test_connection_info_defaults() {
        let info = ConnectionInfo::new("194.67.112.124", "root").with_forward_agent(true);
        assert_eq!(info.port, 22);
        assert!(info.forward_agent);
        assert!(!info.strict_host_key_checking);
    }
}
