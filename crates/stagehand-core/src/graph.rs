//! Task graph: named tasks and their expansion into leaf steps

use std::collections::{BTreeMap, HashSet};

use tracing::debug;

use crate::error::CoreError;
use crate::template::Template;

/// What a task does
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskKind {
    /// Run a command through the remote shell
    ShellCommand(Template),
    /// Copy a local path to the host
    Upload {
        /// Local source
        local: Template,
        /// Remote destination
        remote: Template,
    },
    /// Run other tasks, in order
    CompositeSequence(Vec<String>),
}

impl TaskKind {
    #[must_use]
    pub fn is_leaf(&self) -> bool {
        !matches!(self, TaskKind::CompositeSequence(_))
    }
}

/// A named task
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskDescriptor {
    pub name: String,
    pub kind: TaskKind,
    /// Hidden from listings and not invocable on its own
    pub private: bool,
    pub description: Option<String>,
}

impl TaskDescriptor {
    pub fn new(name: impl Into<String>, kind: TaskKind) -> Self {
        Self {
            name: name.into(),
            kind,
            private: false,
            description: None,
        }
    }

    #[must_use]
    pub fn private(mut self) -> Self {
        self.private = true;
        self
    }

    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// All tasks known to a deployment, looked up by name
#[derive(Debug, Clone, Default)]
pub struct TaskGraph {
    tasks: BTreeMap<String, TaskDescriptor>,
}

impl TaskGraph {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Define a task, replacing any previous task with the same name
    pub fn define(&mut self, name: impl Into<String>, kind: TaskKind, private: bool) {
        let mut task = TaskDescriptor::new(name, kind);
        task.private = private;
        self.insert(task);
    }

    /// Add a fully built descriptor, replacing any previous task with the same name
    pub fn insert(&mut self, task: TaskDescriptor) {
        if let Some(previous) = self.tasks.insert(task.name.clone(), task) {
            debug!(task = %previous.name, "task redefined");
        }
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&TaskDescriptor> {
        self.tasks.get(name)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Look up a task that may be started directly
    ///
    /// # Errors
    /// `UndefinedTask` if missing, `PrivateTask` if it is private
    pub fn entry_point(&self, name: &str) -> Result<&TaskDescriptor, CoreError> {
        let task = self.tasks.get(name).ok_or_else(|| CoreError::UndefinedTask {
            name: name.to_string(),
            referenced_by: None,
        })?;
        if task.private {
            return Err(CoreError::PrivateTask(name.to_string()));
        }
        Ok(task)
    }

    /// Non-private tasks, sorted by name
    #[must_use]
    pub fn public_tasks(&self) -> Vec<&TaskDescriptor> {
        self.tasks.values().filter(|t| !t.private).collect()
    }

    /// Flatten `name` into its leaf tasks in declared order
    ///
    /// A leaf reachable through several composites is returned once, at its
    /// first position.
    ///
    /// # Errors
    /// `UndefinedTask` for a missing name, `CyclicReference` if a composite
    /// contains itself
    pub fn expand(&self, name: &str) -> Result<Vec<&TaskDescriptor>, CoreError> {
        let mut stack = Vec::new();
        let mut seen = HashSet::new();
        let mut leaves = Vec::new();
        self.expand_into(name, None, &mut stack, &mut seen, &mut leaves)?;
        Ok(leaves)
    }

    fn expand_into<'a>(
        &'a self,
        name: &str,
        parent: Option<&str>,
        stack: &mut Vec<&'a str>,
        seen: &mut HashSet<&'a str>,
        leaves: &mut Vec<&'a TaskDescriptor>,
    ) -> Result<(), CoreError> {
        if let Some(pos) = stack.iter().position(|n| *n == name) {
            let mut path: Vec<String> = stack[pos..].iter().map(ToString::to_string).collect();
            path.push(name.to_string());
            return Err(CoreError::CyclicReference { path });
        }

        let task = self.tasks.get(name).ok_or_else(|| CoreError::UndefinedTask {
            name: name.to_string(),
            referenced_by: parent.map(ToString::to_string),
        })?;

        match &task.kind {
            TaskKind::CompositeSequence(children) => {
                stack.push(task.name.as_str());
                for child in children {
                    self.expand_into(child, Some(task.name.as_str()), stack, seen, leaves)?;
                }
                stack.pop();
            }
            _ => {
                if seen.insert(task.name.as_str()) {
                    leaves.push(task);
                }
            }
        }

        Ok(())
    }

    /// Check every composite for undefined references and cycles
    ///
    /// # Errors
    /// The first `UndefinedTask` or `CyclicReference` found, in name order
    pub fn validate(&self) -> Result<(), CoreError> {
        for task in self.tasks.values() {
            if !task.kind.is_leaf() {
                self.expand(&task.name)?;
            }
        }
        Ok(())
    }
}
