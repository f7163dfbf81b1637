//! Runner: executes an expanded task against one host
//!
//! Everything that can be checked locally (task expansion, the failure
//! hook, template rendering) happens before the executor is created, so a
//! bad graph or configuration never touches the host.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use stagehand_exec::{ExecError, RemoteExecutor};
use tracing::{debug, error, info, instrument, warn};

use crate::config::{DeploySettings, HostDescriptor};
use crate::error::CoreError;
use crate::graph::{TaskGraph, TaskKind};
use crate::run::{DeploymentRun, release_name};
use crate::template::Vars;

/// Creates the executor a run talks to the host through
///
/// Allows swapping SSH for local or mock executors. Creation only does
/// local work such as key resolution; executors connect on first use.
#[async_trait]
pub trait ExecutorFactory: Send + Sync {
    /// Create an executor for the given host without contacting it
    async fn create_executor(
        &self,
        host: &HostDescriptor,
    ) -> Result<Arc<dyn RemoteExecutor>, ExecError>;
}

/// A rendered leaf action
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Shell { command: String },
    Upload { local: PathBuf, remote: String },
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Shell { command } => {
                let mut lines = command.lines();
                write!(f, "run {}", lines.next().unwrap_or_default())?;
                let more = lines.count();
                if more > 0 {
                    write!(f, " (+{more} lines)")?;
                }
                Ok(())
            }
            Action::Upload { local, remote } => {
                write!(f, "upload {} -> {remote}", local.display())
            }
        }
    }
}

/// One leaf task ready to execute
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step {
    pub task: String,
    pub action: Action,
}

/// Rendered steps for a run
#[derive(Debug, Clone)]
pub struct Plan {
    pub release_name: String,
    pub vars: Vars,
    pub steps: Vec<Step>,
    /// Steps of the failure hook; empty when none is configured
    pub failure_hook: Vec<Step>,
}

/// Sequential deployment runner
pub struct Runner {
    graph: TaskGraph,
    settings: DeploySettings,
    factory: Arc<dyn ExecutorFactory>,
}

impl fmt::Debug for Runner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runner")
            .field("tasks", &self.graph.len())
            .field("application", &self.settings.application)
            .finish_non_exhaustive()
    }
}

impl Runner {
    /// Create a runner
    ///
    /// # Errors
    /// Fails if any composite references an undefined task or forms a cycle,
    /// or if the configured failure hook cannot be expanded
    pub fn new(
        graph: TaskGraph,
        settings: DeploySettings,
        factory: Arc<dyn ExecutorFactory>,
    ) -> Result<Self, CoreError> {
        graph.validate()?;
        if let Some(hook) = &settings.failure_hook {
            graph.expand(hook)?;
        }

        Ok(Self {
            graph,
            settings,
            factory,
        })
    }

    #[must_use]
    pub fn graph(&self) -> &TaskGraph {
        &self.graph
    }

    #[must_use]
    pub fn settings(&self) -> &DeploySettings {
        &self.settings
    }

    /// Template variables for a run against `host`
    ///
    /// # Errors
    /// Returns `CoreError::UndefinedVariable` if the deploy path cannot be rendered
    pub fn vars(&self, host: &HostDescriptor, release: &str) -> Result<Vars, CoreError> {
        let mut vars = self.settings.vars.clone();

        let builtins = [
            ("application", self.settings.application.clone()),
            (
                "repository",
                self.settings.repository.clone().unwrap_or_default(),
            ),
            ("keep_releases", self.settings.keep_releases.to_string()),
            ("hostname", host.address().to_string()),
            ("stage", host.stage().to_string()),
            ("user", host.user().to_string()),
            ("release_name", release.to_string()),
        ];
        for (name, value) in builtins {
            if vars.insert(name.to_string(), value).is_some() {
                warn!(variable = name, "configured variable shadowed by built-in value");
            }
        }

        let deploy_path = host.deploy_path(&vars)?;
        vars.insert(
            "release_path".to_string(),
            format!("{}/releases/{release}", deploy_path.trim_end_matches('/')),
        );
        vars.insert("deploy_path".to_string(), deploy_path);

        Ok(vars)
    }

    /// Expand and render `root` without contacting the host
    ///
    /// # Errors
    /// Any construction-time `CoreError`
    pub fn plan(&self, host: &HostDescriptor, root: &str) -> Result<Plan, CoreError> {
        self.plan_release(host, root, &release_name(Utc::now()))
    }

    fn plan_release(
        &self,
        host: &HostDescriptor,
        root: &str,
        release: &str,
    ) -> Result<Plan, CoreError> {
        let vars = self.vars(host, release)?;
        let steps = self.render_steps(root, &vars)?;
        let failure_hook = match &self.settings.failure_hook {
            Some(hook) => self.render_steps(hook, &vars)?,
            None => Vec::new(),
        };

        Ok(Plan {
            release_name: release.to_string(),
            vars,
            steps,
            failure_hook,
        })
    }

    fn render_steps(&self, name: &str, vars: &Vars) -> Result<Vec<Step>, CoreError> {
        self.graph
            .expand(name)?
            .into_iter()
            .map(|task| -> Result<Step, CoreError> {
                let action = match &task.kind {
                    TaskKind::ShellCommand(command) => Action::Shell {
                        command: command.render(vars)?,
                    },
                    TaskKind::Upload { local, remote } => Action::Upload {
                        local: PathBuf::from(local.render(vars)?),
                        remote: remote.render(vars)?,
                    },
                    TaskKind::CompositeSequence(_) => {
                        unreachable!("expand only yields leaf tasks")
                    }
                };
                Ok(Step {
                    task: task.name.clone(),
                    action,
                })
            })
            .collect()
    }

    /// Run `root` against `host`
    ///
    /// Construction-time problems, including an executor that cannot be
    /// prepared, are returned as `Err` before any remote contact. Remote
    /// failures end the run early, run the failure hook once, and are
    /// reported through the returned run's `Failed` status.
    ///
    /// # Errors
    /// Any construction-time `CoreError`
    #[instrument(skip(self, host), fields(stage = %host.stage(), host = %host.address()))]
    pub async fn run(&self, host: &HostDescriptor, root: &str) -> Result<DeploymentRun, CoreError> {
        let mut run = DeploymentRun::start(host.stage(), root, Utc::now());
        let plan = self.plan_release(host, root, run.release_name())?;
        run.set_total(plan.steps.len());

        info!(
            application = %self.settings.application,
            release = %plan.release_name,
            steps = plan.steps.len(),
            "starting deployment"
        );

        let executor = self
            .factory
            .create_executor(host)
            .await
            .map_err(|e| CoreError::ExecutorSetup(e.to_string()))?;

        debug!(executor = executor.executor_type(), "executor ready");

        for (index, step) in plan.steps.iter().enumerate() {
            run.begin_task(index);
            info!(
                task = %step.task,
                step = index + 1,
                total = plan.steps.len(),
                "executing task"
            );

            if let Err(err) = execute_step(executor.as_ref(), step).await {
                error!(task = %step.task, error = %err, "task failed, aborting deployment");
                run.fail(err.to_string())?;
                run_failure_hook(executor.as_ref(), &plan.failure_hook).await;
                break;
            }

            run.complete_task();
        }

        if !run.status().is_terminal() {
            run.succeed()?;
            info!(release = %run.release_name(), "deployment succeeded");
        }

        if let Err(e) = executor.close().await {
            warn!(error = %e, "failed to close connection");
        }

        Ok(run)
    }
}

async fn execute_step(executor: &dyn RemoteExecutor, step: &Step) -> Result<(), CoreError> {
    match &step.action {
        Action::Shell { command } => {
            let result = executor.run(command).await.map_err(|e| {
                warn!(
                    task = %step.task,
                    retryable = e.is_retryable(),
                    error = %e,
                    "transport error"
                );
                CoreError::ConnectionFailure(e.to_string())
            })?;

            for line in result.stdout.lines().filter(|l| !l.trim().is_empty()) {
                info!(task = %step.task, "{line}");
            }

            if !result.success() {
                return Err(CoreError::RemoteCommandFailure {
                    task: step.task.clone(),
                    exit_code: result.status,
                    stderr: result.stderr.trim().to_string(),
                });
            }

            if !result.stderr.trim().is_empty() {
                debug!(task = %step.task, stderr = %result.stderr.trim(), "command wrote to stderr");
            }
        }
        Action::Upload { local, remote } => {
            let summary = executor
                .upload(local, remote)
                .await
                .map_err(|e| match e {
                    ExecError::TransferFailed { path, reason } => CoreError::TransferFailure {
                        task: step.task.clone(),
                        reason: format!("{path}: {reason}"),
                    },
                    other if other.is_connection_error() => {
                        CoreError::ConnectionFailure(other.to_string())
                    }
                    other => CoreError::TransferFailure {
                        task: step.task.clone(),
                        reason: other.to_string(),
                    },
                })?;

            debug!(
                task = %step.task,
                files = summary.files,
                bytes = summary.bytes,
                "upload finished"
            );
        }
    }

    Ok(())
}

/// Run the failure hook steps; a failing hook step is logged and ends the hook
async fn run_failure_hook(executor: &dyn RemoteExecutor, steps: &[Step]) {
    if steps.is_empty() {
        debug!("no failure hook configured");
        return;
    }

    info!(steps = steps.len(), "running failure hook");

    for step in steps {
        if let Err(err) = execute_step(executor, step).await {
            error!(task = %step.task, error = %err, "failure hook task failed");
            return;
        }
    }
}
