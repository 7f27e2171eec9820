//! Registry builder from YAML configuration.
//!
//! This module merges workflow files into a [`WorkflowRegistry`] and
//! collects the command handlers the local runtime runs.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use super::error::ConfigError;
use super::yaml::{TaskConfig, WorkflowFileConfig, YamlLoader};
use crate::core::definition::WorkflowRegistry;
use crate::execution::{CommandHandler, LocalRuntime};

/// Everything loaded from a set of workflow files.
#[derive(Debug, Default)]
pub struct LoadedWorkflows {
    /// Merged task types and workflow definitions.
    pub registry: WorkflowRegistry,
    /// Command handlers keyed by task type, for tasks with a `command`.
    pub commands: Vec<(String, CommandHandler)>,
}

impl LoadedWorkflows {
    /// A local runtime with every configured command registered.
    pub fn local_runtime(&self, max_concurrent_tasks: usize) -> LocalRuntime {
        let mut runtime = LocalRuntime::new(max_concurrent_tasks);
        for (task_type, handler) in &self.commands {
            runtime.register(task_type.clone(), Arc::new(handler.clone()));
        }
        runtime
    }

    /// Task types declared without a command.
    pub fn tasks_without_command(&self) -> Vec<&str> {
        self.registry
            .task_types()
            .into_iter()
            .map(|t| t.name.as_str())
            .filter(|name| !self.commands.iter().any(|(t, _)| t == name))
            .collect()
    }
}

/// Builder for merging workflow files into one registry.
#[derive(Debug, Default)]
pub struct RegistryConfigBuilder {
    loaded: LoadedWorkflows,
}

impl RegistryConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one workflow file's definitions.
    pub fn add(mut self, config: WorkflowFileConfig) -> Result<Self, ConfigError> {
        for task in &config.tasks {
            self.loaded.registry.register_task_type(task.to_task_type())?;
            if let Some(handler) = Self::build_command(task) {
                self.loaded.commands.push((task.name.clone(), handler));
            }
        }
        for workflow in &config.workflows {
            self.loaded
                .registry
                .register_workflow(workflow.to_definition()?)?;
        }
        Ok(self)
    }

    /// Validate the merged registry and return it.
    pub fn build(self) -> Result<LoadedWorkflows, ConfigError> {
        self.loaded.registry.validate()?;
        Ok(self.loaded)
    }

    fn build_command(config: &TaskConfig) -> Option<CommandHandler> {
        let command = config.command.as_ref()?;
        let mut builder = CommandHandler::builder(command).args(config.args.iter().cloned());

        for (key, value) in &config.environment {
            builder = builder.env(key, value);
        }
        if let Some(dir) = &config.working_dir {
            builder = builder.working_dir(dir);
        }
        if let Some(secs) = config.timeout_secs {
            builder = builder.timeout(Duration::from_secs(secs));
        }

        Some(builder.build())
    }
}

/// Load all workflow files from a directory.
///
/// Every `*.yaml` and `*.yml` file is read in file-name order, merged into
/// one registry, and the registry is validated by building every workflow.
pub fn load_workflows_from_directory(
    dir: impl AsRef<Path>,
) -> Result<LoadedWorkflows, ConfigError> {
    let dir = dir.as_ref();

    if !dir.is_dir() {
        return Err(ConfigError::InvalidConfig(format!(
            "'{}' is not a directory",
            dir.display()
        )));
    }

    let read_err = |source: std::io::Error| ConfigError::DirReadError {
        path: dir.to_path_buf(),
        source,
    };
    let mut paths: Vec<PathBuf> = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(read_err)? {
        let path = entry.map_err(read_err)?.path();

        if let Some(ext) = path.extension()
            && (ext == "yaml" || ext == "yml")
        {
            paths.push(path);
        }
    }
    paths.sort();

    let mut builder = RegistryConfigBuilder::new();
    for path in &paths {
        let config = YamlLoader::load_workflow_file(path)?;
        tracing::debug!(
            path = %path.display(),
            tasks = config.tasks.len(),
            workflows = config.workflows.len(),
            "Loaded workflow file"
        );
        builder = builder.add(config)?;
    }

    builder.build()
}
