//! Configuration loading and types

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use eyre::WrapErr;
use serde::{Deserialize, Serialize};
use stagehand_core::{DeploySettings, HostConfig, HostRegistry, TaskConfig, TaskGraph, recipe};

/// Top-level `deploy.toml`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Application-wide settings and `[vars]`
    #[serde(flatten)]
    pub settings: DeploySettings,
    /// Logging settings
    #[serde(default)]
    pub log: LogConfig,
    /// Deployment targets, one per stage
    #[serde(default)]
    pub host: Vec<HostConfig>,
    /// User tasks; these replace built-in tasks of the same name
    #[serde(default)]
    pub tasks: BTreeMap<String, TaskConfig>,
}

/// Log output settings, overridden by `-v`, `--log-format` and `RUST_LOG`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl Config {
    /// Load configuration from file
    ///
    /// # Errors
    /// Returns error if file cannot be read or parsed
    pub fn load(path: &Path) -> eyre::Result<Self> {
        let content = std::fs::read_to_string(path)
            .wrap_err_with(|| format!("failed to read {}", path.display()))?;
        let config: Config =
            toml::from_str(&content).wrap_err_with(|| format!("invalid {}", path.display()))?;
        Ok(config)
    }

    /// Load from `$STAGEHAND_CONFIG` or the first default path that exists
    ///
    /// # Errors
    /// Returns error if no file is found or the file cannot be parsed
    pub fn load_default() -> eyre::Result<Self> {
        if let Ok(path) = std::env::var("STAGEHAND_CONFIG") {
            return Self::load(Path::new(&path));
        }

        let paths = [
            Some(PathBuf::from("deploy.toml")),
            dirs::config_dir().map(|p| p.join("stagehand/deploy.toml")),
        ];

        for path in paths.into_iter().flatten() {
            if path.exists() {
                tracing::debug!(path = %path.display(), "using configuration file");
                return Self::load(&path);
            }
        }

        eyre::bail!("no deploy.toml found (set STAGEHAND_CONFIG or pass --config)")
    }

    /// Hosts by stage
    ///
    /// # Errors
    /// Fails if two hosts share a stage
    pub fn registry(&self) -> eyre::Result<HostRegistry> {
        let mut registry = HostRegistry::new();
        for host in &self.host {
            registry.register(host.clone().into())?;
        }
        Ok(registry)
    }

    /// Built-in recipe plus the configured tasks
    ///
    /// # Errors
    /// Fails if a task entry does not set exactly one kind
    pub fn task_graph(&self) -> eyre::Result<TaskGraph> {
        let mut graph = recipe::common();
        for (name, task) in &self.tasks {
            if graph.get(name).is_some() {
                tracing::debug!(task = %name, "overriding built-in task");
            }
            graph.insert(task.clone().into_descriptor(name.as_str())?);
        }
        Ok(graph)
    }

    /// Stage from the command line, falling back to `default_stage`
    ///
    /// # Errors
    /// Fails if neither is set
    pub fn stage<'a>(&'a self, requested: Option<&'a str>) -> eyre::Result<&'a str> {
        requested
            .or(self.settings.default_stage.as_deref())
            .ok_or_else(|| eyre::eyre!("no stage given and no default_stage configured"))
    }
}

#[cfg(test)]
mod tests {
    use stagehand_core::{CoreError, TaskKind};

    use super::*;

    const SHIPPED: &str = include_str!("../../../deploy.toml");

    #[test]
    fn test_shipped_config_parses() {
        let config: Config = toml::from_str(SHIPPED).unwrap();

        assert_eq!(config.settings.application, "pisc");
        assert_eq!(config.settings.keep_releases, 1);
        assert_eq!(config.settings.failure_hook.as_deref(), Some("deploy:unlock"));
        assert_eq!(config.log.format, LogFormat::Text);

        let registry = config.registry().unwrap();
        let host = registry.resolve("production").unwrap();
        assert_eq!(host.address(), "194.67.112.124");
        assert_eq!(host.user(), "root");
        assert!(host.forward_agent());

        let graph = config.task_graph().unwrap();
        graph.validate().unwrap();
        assert!(graph.get("srv_stop").unwrap().private);
        assert!(graph.entry_point("deploy").is_ok());

        let leaves: Vec<&str> = graph
            .expand("deploy")
            .unwrap()
            .into_iter()
            .map(|t| t.name.as_str())
            .collect();
        assert_eq!(
            leaves,
            vec![
                "deploy:info",
                "deploy:prepare",
                "deploy:lock",
                "deploy:release",
                "srv_stop",
                "upload:imagesamenu",
                "upload:config",
                "srv_start",
                "deploy:unlock",
                "cleanup",
                "success",
            ]
        );
    }

    #[test]
    fn test_task_with_two_kinds_rejected() {
        let config: Config = toml::from_str(
            r#"
application = "pisc"

[tasks.broken]
run = "true"
sequence = ["deploy:info"]
"#,
        )
        .unwrap();

        let err = config.task_graph().unwrap_err();
        assert!(matches!(
            err.downcast_ref::<CoreError>(),
            Some(CoreError::ConfigError(_))
        ));
    }

    #[test]
    fn test_user_task_overrides_recipe() {
        let config: Config = toml::from_str(
            r#"
application = "pisc"

[tasks."deploy:unlock"]
run = "rm -f /tmp/pisc.lock"
"#,
        )
        .unwrap();

        let graph = config.task_graph().unwrap();
        assert!(matches!(
            &graph.get("deploy:unlock").unwrap().kind,
            TaskKind::ShellCommand(t) if t.as_str() == "rm -f /tmp/pisc.lock"
        ));
    }

    #[test]
    fn test_duplicate_stage_rejected() {
        let config: Config = toml::from_str(
            r#"
application = "pisc"

[[host]]
address = "10.0.0.1"
stage = "production"

[[host]]
address = "10.0.0.2"
stage = "production"
"#,
        )
        .unwrap();

        assert!(config.registry().is_err());
    }

    #[test]
    fn test_stage_fallback() {
        let mut config: Config = toml::from_str(r#"application = "pisc""#).unwrap();
        assert!(config.stage(None).is_err());
        assert_eq!(config.stage(Some("staging")).unwrap(), "staging");

        config.settings.default_stage = Some("production".to_string());
        assert_eq!(config.stage(None).unwrap(), "production");
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("deploy.toml");
        std::fs::write(&path, SHIPPED).unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.host.len(), 1);

        let missing = Config::load(&dir.path().join("missing.toml"));
        assert!(missing.is_err());
    }
}
