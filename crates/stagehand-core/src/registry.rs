//! Host registry: one deployment target per stage

use std::collections::BTreeMap;

use tracing::debug;

use crate::config::HostDescriptor;
use crate::error::CoreError;

/// Hosts by stage name
#[derive(Debug, Clone, Default)]
pub struct HostRegistry {
    hosts: BTreeMap<String, HostDescriptor>,
}

impl HostRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a host under its stage
    ///
    /// # Errors
    /// Returns `CoreError::DuplicateStage` if the stage already has a host
    pub fn register(&mut self, descriptor: HostDescriptor) -> Result<(), CoreError> {
        let stage = descriptor.stage().to_string();
        if self.hosts.contains_key(&stage) {
            return Err(CoreError::DuplicateStage(stage));
        }
        debug!(stage = %stage, address = %descriptor.address(), "host registered");
        self.hosts.insert(stage, descriptor);
        Ok(())
    }

    /// Find the host for a stage
    ///
    /// # Errors
    /// Returns `CoreError::UnknownStage` if no host matches
    pub fn resolve(&self, stage: &str) -> Result<&HostDescriptor, CoreError> {
        self.hosts
            .get(stage)
            .ok_or_else(|| CoreError::UnknownStage(stage.to_string()))
    }

    /// Registered stage names, sorted
    #[must_use]
    pub fn stages(&self) -> Vec<&str> {
        self.hosts.keys().map(String::as_str).collect()
    }

    /// All hosts, sorted by stage
    pub fn hosts(&self) -> impl Iterator<Item = &HostDescriptor> {
        self.hosts.values()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.hosts.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;
    use crate::config::HostConfig;
    use crate::template::Template;

    fn host(address: &str, stage: &str) -> HostDescriptor {
        HostConfig {
            address: address.to_string(),
            stage: stage.to_string(),
            user: "root".to_string(),
            port: 22,
            identity_file: PathBuf::from("~/.ssh/id_rsa"),
            identity_env: None,
            forward_agent: true,
            strict_host_key_checking: false,
            deploy_path: Template::new("~/{{application}}"),
        }
        .into()
    }

    #[test]
    fn test_resolve_registered_stage() {
        let mut registry = HostRegistry::new();
        registry
            .register(host("194.67.112.124", "production"))
            .unwrap();

        let resolved = registry.resolve("production").unwrap();
        assert_eq!(resolved.address(), "194.67.112.124");
        assert!(resolved.forward_agent());

        assert_eq!(
            registry.resolve("staging").unwrap_err(),
            CoreError::UnknownStage("staging".to_string())
        );
    }

    #[test]
    fn test_duplicate_stage_rejected() {
        let mut registry = HostRegistry::new();
        registry.register(host("10.0.0.1", "production")).unwrap();

        let err = registry.register(host("10.0.0.2", "production")).unwrap_err();
        assert_eq!(err, CoreError::DuplicateStage("production".to_string()));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_stages_sorted() {
        let mut registry = HostRegistry::new();
        registry.register(host("10.0.0.2", "staging")).unwrap();
        registry.register(host("10.0.0.1", "production")).unwrap();

        assert_eq!(registry.stages(), vec!["production", "staging"]);
    }
}
