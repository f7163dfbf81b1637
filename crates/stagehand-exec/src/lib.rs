//! stagehand-exec: Remote execution abstraction
//!
//! Provides the `RemoteExecutor` trait and implementations for running
//! commands and uploading files locally and remotely via SSH

pub mod error;
pub mod keys;
pub mod local;
pub mod quote;
pub mod result;
pub mod ssh;
pub mod traits;
pub mod transfer;

pub use error::ExecError;
pub use keys::{KeyError, KeySource, ResolvedKey};
pub use local::LocalExecutor;
pub use quote::{quote, quote_path};
pub use result::{CommandResult, ConnectionInfo, TransferSummary};
pub use ssh::{SshExecutor, SshExecutorBuilder};
pub use traits::RemoteExecutor;
pub use transfer::{TransferLink, TransferPlan};
