//! Configuration loading and parsing.
//!
//! This module provides YAML-based configuration for workflow files and
//! global settings.

mod builder;
mod error;
mod yaml;

pub use builder::{LoadedWorkflows, RegistryConfigBuilder, load_workflows_from_directory};
pub use error::ConfigError;
pub use yaml::{
    ApiConfig, GlobalConfig, StatementConfig, StorageConfig, TaskConfig, WorkflowConfig,
    WorkflowFileConfig, YamlLoader,
};
