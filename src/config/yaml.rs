//! YAML configuration parsing.
//!
//! Parses workflow files and global configuration from YAML.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use super::error::ConfigError;
use crate::core::definition::{ArgRef, Statement, TaskType, WorkflowDefinition};

/// Global configuration (superflow.yaml).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GlobalConfig {
    /// Storage configuration.
    pub storage: Option<StorageConfig>,
    /// Default for deleting task records once a superjob completes.
    pub delete_records_on_completion: Option<bool>,
    /// Maximum tasks the local runtime runs at once.
    pub max_concurrent_tasks: Option<usize>,
    /// HTTP API settings.
    pub api: Option<ApiConfig>,
}

/// Storage configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum StorageConfig {
    /// In-memory storage (default, non-persistent).
    #[serde(rename = "memory")]
    #[default]
    Memory,
    /// SQLite storage.
    #[serde(rename = "sqlite")]
    Sqlite {
        /// Path to the database file.
        path: String,
    },
}

/// HTTP API configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8565
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl ApiConfig {
    /// `host:port` for binding.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// One workflow file: task types and workflow definitions.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkflowFileConfig {
    /// Task type declarations.
    #[serde(default)]
    pub tasks: Vec<TaskConfig>,
    /// Workflow definitions.
    #[serde(default)]
    pub workflows: Vec<WorkflowConfig>,
}

/// Task type configuration from YAML.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskConfig {
    /// Task type name.
    pub name: String,
    /// Declared parameter keys.
    #[serde(default)]
    pub params: Vec<String>,
    /// Program the local runtime runs for this task type.
    #[serde(default)]
    pub command: Option<String>,
    /// Arguments placed before the dispatched values.
    #[serde(default)]
    pub args: Vec<String>,
    /// Environment variables for the command.
    #[serde(default)]
    pub environment: BTreeMap<String, String>,
    /// Working directory for the command.
    #[serde(default)]
    pub working_dir: Option<String>,
    /// Timeout in seconds.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

impl TaskConfig {
    pub fn to_task_type(&self) -> TaskType {
        TaskType::new(&self.name, self.params.iter().cloned())
    }
}

/// Workflow configuration from YAML.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowConfig {
    pub name: String,
    #[serde(default)]
    pub params: Vec<String>,
    #[serde(default)]
    pub body: Vec<StatementConfig>,
}

impl WorkflowConfig {
    /// Convert into a workflow definition.
    pub fn to_definition(&self) -> Result<WorkflowDefinition, ConfigError> {
        let body = self
            .body
            .iter()
            .map(|s| s.to_statement(&self.name))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(WorkflowDefinition::new(&self.name, self.params.iter().cloned()).with_body(body))
    }
}

/// A statement: exactly one of `run` or `batch`, with an optional `then` body.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StatementConfig {
    /// Task type or workflow to call.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run: Option<String>,
    /// Plural → singular bindings to fan out over.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch: Option<IndexMap<String, String>>,
    /// Call arguments.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<ArgRef>,
    /// Nested body.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub then: Vec<StatementConfig>,
}

impl StatementConfig {
    /// Convert into a statement, checking its shape.
    pub fn to_statement(&self, workflow: &str) -> Result<Statement, ConfigError> {
        let statement = match (&self.run, &self.batch) {
            (Some(name), None) => {
                if name.is_empty() {
                    return Err(ConfigError::MissingField(format!(
                        "run (in workflow '{}')",
                        workflow
                    )));
                }
                Statement::call(name, self.args.iter().cloned())
            }
            (None, Some(bindings)) => {
                if !self.args.is_empty() {
                    return Err(ConfigError::InvalidConfig(format!(
                        "workflow '{}': batch statements take no args",
                        workflow
                    )));
                }
                Statement::batch(bindings.iter().map(|(p, s)| (p.clone(), s.clone())))
            }
            (Some(_), Some(_)) => {
                return Err(ConfigError::InvalidConfig(format!(
                    "workflow '{}': statement has both 'run' and 'batch'",
                    workflow
                )));
            }
            (None, None) => {
                return Err(ConfigError::InvalidConfig(format!(
                    "workflow '{}': statement needs 'run' or 'batch'",
                    workflow
                )));
            }
        };

        let body = self
            .then
            .iter()
            .map(|s| s.to_statement(workflow))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(statement.then(body))
    }
}

/// YAML configuration loader.
pub struct YamlLoader;

impl YamlLoader {
    /// Load global configuration from a file.
    pub fn load_global_config(path: impl AsRef<Path>) -> Result<GlobalConfig, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::FileReadError {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse_global_config(&content)
    }

    /// Parse global configuration from a YAML string.
    pub fn parse_global_config(yaml: &str) -> Result<GlobalConfig, ConfigError> {
        let config: GlobalConfig = serde_yaml::from_str(yaml)?;
        if config.max_concurrent_tasks == Some(0) {
            return Err(ConfigError::InvalidConfig(
                "max_concurrent_tasks cannot be zero".into(),
            ));
        }
        if let Some(StorageConfig::Sqlite { path }) = &config.storage
            && path.is_empty()
        {
            return Err(ConfigError::MissingField("storage.path".into()));
        }
        Ok(config)
    }

    /// Load a workflow file.
    pub fn load_workflow_file(path: impl AsRef<Path>) -> Result<WorkflowFileConfig, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::FileReadError {
            path: path.to_path_buf(),
            source,
        })?;
        let config: WorkflowFileConfig =
            serde_yaml::from_str(&content).map_err(|source| ConfigError::YamlFileError {
                path: path.to_path_buf(),
                source,
            })?;
        Self::validate_workflow_file(&config)?;
        Ok(config)
    }

    /// Parse a workflow file from a YAML string.
    pub fn parse_workflow_file(yaml: &str) -> Result<WorkflowFileConfig, ConfigError> {
        let config: WorkflowFileConfig = serde_yaml::from_str(yaml)?;
        Self::validate_workflow_file(&config)?;
        Ok(config)
    }

    /// Validate a workflow file.
    ///
    /// Cross-references (unknown tasks, arity, recursion) are checked once
    /// every file is loaded, by building the merged registry.
    fn validate_workflow_file(config: &WorkflowFileConfig) -> Result<(), ConfigError> {
        let mut names = HashSet::new();

        for task in &config.tasks {
            if task.name.is_empty() {
                return Err(ConfigError::MissingField("tasks[].name".into()));
            }
            if !names.insert(task.name.as_str()) {
                return Err(ConfigError::InvalidConfig(format!(
                    "duplicate name: {}",
                    task.name
                )));
            }
            if task.timeout_secs == Some(0) {
                return Err(ConfigError::InvalidConfig(format!(
                    "task '{}': timeout_secs cannot be zero",
                    task.name
                )));
            }
        }

        for workflow in &config.workflows {
            if workflow.name.is_empty() {
                return Err(ConfigError::MissingField("workflows[].name".into()));
            }
            if !names.insert(workflow.name.as_str()) {
                return Err(ConfigError::InvalidConfig(format!(
                    "duplicate name: {}",
                    workflow.name
                )));
            }
            if workflow.body.is_empty() {
                return Err(ConfigError::InvalidConfig(format!(
                    "workflow '{}' must have at least one statement",
                    workflow.name
                )));
            }
            workflow.to_definition()?;
        }

        Ok(())
    }
}
