//! Errors raised while loading workflow and global configuration.

use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::core::error::WorkflowError;

/// Errors that can occur when loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A configuration file could not be read.
    #[error("failed to read file '{path}': {source}")]
    FileReadError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A workflow directory could not be listed.
    #[error("failed to read directory '{path}': {source}")]
    DirReadError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// YAML given as a string did not parse.
    #[error("YAML parse error: {0}")]
    YamlError(#[from] serde_yaml::Error),

    /// A YAML file did not parse.
    #[error("YAML parse error in '{path}': {source}")]
    YamlFileError {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// A value is out of range or a statement has the wrong shape.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// A required field is absent or empty.
    #[error("missing required field: {0}")]
    MissingField(String),

    /// The loaded definitions do not form a valid registry.
    #[error(transparent)]
    Workflow(#[from] WorkflowError),
}

impl ConfigError {
    /// The file or directory the error refers to, if any.
    pub fn path(&self) -> Option<&Path> {
        match self {
            ConfigError::FileReadError { path, .. }
            | ConfigError::DirReadError { path, .. }
            | ConfigError::YamlFileError { path, .. } => Some(path),
            _ => None,
        }
    }
}
