//! Configuration types for hosts, tasks and deployment settings

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::graph::{TaskDescriptor, TaskKind};
use crate::template::{Template, Vars};

/// Host entry as written in the configuration file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostConfig {
    /// IP address or hostname for SSH connection
    pub address: String,
    /// Stage this host serves (e.g. `production`)
    pub stage: String,
    /// SSH user (defaults to root)
    #[serde(default = "default_user")]
    pub user: String,
    /// SSH port
    #[serde(default = "default_port")]
    pub port: u16,
    /// Path to SSH private key
    #[serde(default = "default_identity_file")]
    pub identity_file: PathBuf,
    /// Environment variable holding a base64 key, used instead of `identity_file`
    #[serde(default)]
    pub identity_env: Option<String>,
    /// Forward the local SSH agent to the host
    #[serde(default)]
    pub forward_agent: bool,
    /// Verify the host key against `known_hosts`
    #[serde(default)]
    pub strict_host_key_checking: bool,
    /// Deployment directory, may use `{{application}}`
    #[serde(default = "default_deploy_path")]
    pub deploy_path: Template,
}

fn default_user() -> String {
    "root".to_string()
}

fn default_port() -> u16 {
    22
}

fn default_identity_file() -> PathBuf {
    PathBuf::from("~/.ssh/id_rsa")
}

fn default_deploy_path() -> Template {
    Template::new("~/{{application}}")
}

/// Connection descriptor for one deployment target
///
/// Built once from a `HostConfig` and read-only afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostDescriptor {
    address: String,
    stage: String,
    user: String,
    port: u16,
    identity_file: PathBuf,
    identity_env: Option<String>,
    forward_agent: bool,
    strict_host_key_checking: bool,
    deploy_path: Template,
}

impl HostDescriptor {
    #[must_use]
    pub fn address(&self) -> &str {
        &self.address
    }

    #[must_use]
    pub fn stage(&self) -> &str {
        &self.stage
    }

    #[must_use]
    pub fn user(&self) -> &str {
        &self.user
    }

    #[must_use]
    pub fn port(&self) -> u16 {
        self.port
    }

    #[must_use]
    pub fn identity_file(&self) -> &Path {
        &self.identity_file
    }

    #[must_use]
    pub fn identity_env(&self) -> Option<&str> {
        self.identity_env.as_deref()
    }

    #[must_use]
    pub fn forward_agent(&self) -> bool {
        self.forward_agent
    }

    #[must_use]
    pub fn strict_host_key_checking(&self) -> bool {
        self.strict_host_key_checking
    }

    #[must_use]
    pub fn deploy_path_template(&self) -> &Template {
        &self.deploy_path
    }

    /// Whether commands should run on this machine instead of over SSH
    #[must_use]
    pub fn is_local(&self) -> bool {
        matches!(self.address.as_str(), "localhost" | "127.0.0.1")
    }

    /// Render the deploy path template
    ///
    /// # Errors
    /// Returns `CoreError::UndefinedVariable` if the template uses an unknown variable
    pub fn deploy_path(&self, vars: &Vars) -> Result<String, CoreError> {
        self.deploy_path.render(vars)
    }
}

impl From<HostConfig> for HostDescriptor {
    fn from(config: HostConfig) -> Self {
        Self {
            address: config.address,
            stage: config.stage,
            user: config.user,
            port: config.port,
            identity_file: config.identity_file,
            identity_env: config.identity_env,
            forward_agent: config.forward_agent,
            strict_host_key_checking: config.strict_host_key_checking,
            deploy_path: config.deploy_path,
        }
    }
}

/// Application-wide settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploySettings {
    /// Project name, available as `{{application}}`
    pub application: String,
    /// Source repository, available as `{{repository}}`
    #[serde(default)]
    pub repository: Option<String>,
    /// Release directories kept by `cleanup` (-1 keeps all)
    #[serde(default = "default_keep_releases")]
    pub keep_releases: i64,
    /// Task run once when a deployment fails
    #[serde(default)]
    pub failure_hook: Option<String>,
    /// Stage used when none is given on the command line
    #[serde(default)]
    pub default_stage: Option<String>,
    /// Extra template variables
    #[serde(default)]
    pub vars: BTreeMap<String, String>,
}

fn default_keep_releases() -> i64 {
    1
}

impl DeploySettings {
    pub fn new(application: impl Into<String>) -> Self {
        Self {
            application: application.into(),
            repository: None,
            keep_releases: default_keep_releases(),
            failure_hook: None,
            default_stage: None,
            vars: BTreeMap::new(),
        }
    }

    /// Set the failure hook task
    #[must_use]
    pub fn with_failure_hook(mut self, task: impl Into<String>) -> Self {
        self.failure_hook = Some(task.into());
        self
    }
}

/// Upload source and destination as written in the configuration file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadConfig {
    /// Local path, relative to the working directory
    pub from: Template,
    /// Remote path
    pub to: Template,
}

/// Task entry as written in the configuration file
///
/// Exactly one of `run`, `upload` and `sequence` must be set.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskConfig {
    /// Shell command
    #[serde(default)]
    pub run: Option<Template>,
    /// File transfer
    #[serde(default)]
    pub upload: Option<UploadConfig>,
    /// Names of tasks to run in order
    #[serde(default)]
    pub sequence: Option<Vec<String>>,
    /// Hidden from the task list and not directly invocable
    #[serde(default)]
    pub private: bool,
    /// One-line description
    #[serde(default)]
    pub desc: Option<String>,
}

impl TaskConfig {
    /// Convert into a graph entry
    ///
    /// # Errors
    /// Returns `CoreError::ConfigError` unless exactly one task kind is set
    pub fn into_descriptor(self, name: impl Into<String>) -> Result<TaskDescriptor, CoreError> {
        let name = name.into();
        let kind = match (self.run, self.upload, self.sequence) {
            (Some(command), None, None) => TaskKind::ShellCommand(command),
            (None, Some(upload), None) => TaskKind::Upload {
                local: upload.from,
                remote: upload.to,
            },
            (None, None, Some(names)) => TaskKind::CompositeSequence(names),
            (None, None, None) => {
                return Err(CoreError::ConfigError(format!(
                    "task {name} needs one of run, upload or sequence"
                )));
            }
            _ => {
                return Err(CoreError::ConfigError(format!(
                    "task {name} sets more than one of run, upload and sequence"
                )));
            }
        };

        let mut descriptor = TaskDescriptor::new(name, kind);
        descriptor.private = self.private;
        descriptor.description = self.desc;
        Ok(descriptor)
    }
}
