//! stagehand-core: Host registry, task graph and deployment runner
//!
//! Resolves a host by stage, flattens a composite task into leaf steps and
//! executes them in order, running a failure hook once if a step fails.

pub mod config;
pub mod error;
pub mod graph;
pub mod recipe;
pub mod registry;
pub mod run;
pub mod runner;
pub mod template;

pub use config::{DeploySettings, HostConfig, HostDescriptor, TaskConfig, UploadConfig};
pub use error::CoreError;
pub use graph::{TaskDescriptor, TaskGraph, TaskKind};
pub use registry::HostRegistry;
pub use run::{DeploymentRun, RunStatus};
pub use runner::{Action, ExecutorFactory, Plan, Runner, Step};
pub use template::{Template, Vars};
