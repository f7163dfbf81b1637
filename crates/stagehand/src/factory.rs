//! Executor factory for local and SSH hosts

use std::sync::Arc;

use async_trait::async_trait;
use stagehand_core::{ExecutorFactory, HostDescriptor};
use stagehand_exec::{ExecError, LocalExecutor, RemoteExecutor, SshExecutorBuilder};

/// Default implementation of `ExecutorFactory`
#[derive(Debug, Default)]
pub struct DefaultExecutorFactory;

impl DefaultExecutorFactory {
    pub fn new() -> Self {
        Self
    }

    fn create_executor_sync(host: &HostDescriptor) -> Result<Arc<dyn RemoteExecutor>, ExecError> {
        if host.is_local() {
            tracing::debug!(address = %host.address(), "using local executor");
            return Ok(Arc::new(LocalExecutor::new()));
        }

        let mut builder =
            SshExecutorBuilder::new(host.address(), host.user(), host.identity_file())
                .with_port(host.port())
                .with_forward_agent(host.forward_agent())
                .with_strict_host_key_checking(host.strict_host_key_checking());
        if let Some(var) = host.identity_env() {
            builder = builder.with_env_key(var);
        }

        Ok(Arc::new(builder.build()?))
    }
}

#[async_trait]
impl ExecutorFactory for DefaultExecutorFactory {
    async fn create_executor(
        &self,
        host: &HostDescriptor,
    ) -> Result<Arc<dyn RemoteExecutor>, ExecError> {
        Self::create_executor_sync(host)
    }
}
