//! External command task handler.
//!
//! [`CommandHandler`] runs an external program for each dispatch. The
//! configured arguments come first, followed by the dispatch's argument
//! values: JSON strings are passed raw, every other value as its JSON text.
//!
//! ```rust
//! use superflow::execution::CommandHandler;
//! use std::time::Duration;
//!
//! let handler = CommandHandler::builder("python")
//!     .args(["-m", "jobs.fetch_user"])
//!     .env("LOG_LEVEL", "info")
//!     .timeout(Duration::from_secs(30))
//!     .build();
//! assert_eq!(handler.program(), "python");
//! ```
//!
//! The task key, workflow name and metadata are exported to the child as
//! `SUPERFLOW_TASK_KEY`, `SUPERFLOW_WORKFLOW` and `SUPERFLOW_META`.
//!
//! # Error Handling
//!
//! - **Non-zero exit code**: [`TaskError::CommandFailed`] with the exit code
//!   and stderr output
//! - **Timeout**: [`TaskError::Timeout`]; the child is killed when the
//!   command future is dropped
//! - **Spawn failure**: [`TaskError::ExecutionFailed`] (e.g., program not found)

use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;

use super::handler::{TaskError, TaskHandler};
use crate::engine::Dispatch;

/// A handler that executes an external command.
#[derive(Debug, Clone)]
pub struct CommandHandler {
    program: String,
    args: Vec<String>,
    env: BTreeMap<String, String>,
    working_dir: Option<PathBuf>,
    timeout: Option<Duration>,
}

impl CommandHandler {
    /// Create a new builder for a command handler.
    pub fn builder(program: impl Into<String>) -> CommandHandlerBuilder {
        CommandHandlerBuilder::new(program)
    }

    /// Get the program being executed.
    pub fn program(&self) -> &str {
        &self.program
    }

    /// Get the configured arguments.
    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// Get the timeout duration.
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// The full argument list for a dispatch.
    pub fn command_line(&self, dispatch: &Dispatch) -> Vec<String> {
        self.args
            .iter()
            .cloned()
            .chain(dispatch.args.iter().map(render_arg))
            .collect()
    }
}

fn render_arg(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[async_trait]
impl TaskHandler for CommandHandler {
    async fn run(&self, dispatch: &Dispatch) -> Result<(), TaskError> {
        let mut cmd = Command::new(&self.program);
        cmd.args(self.command_line(dispatch));

        for (key, value) in &self.env {
            cmd.env(key, value);
        }
        cmd.env("SUPERFLOW_TASK_KEY", dispatch.key.to_string());
        cmd.env("SUPERFLOW_WORKFLOW", &dispatch.workflow);
        if let Some(meta) = &dispatch.meta {
            cmd.env("SUPERFLOW_META", meta.to_string());
        }

        if let Some(ref dir) = self.working_dir {
            cmd.current_dir(dir);
        }

        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.kill_on_drop(true);

        let output = match self.timeout {
            Some(duration) => timeout(duration, cmd.output())
                .await
                .map_err(|_| TaskError::Timeout(duration))?
                .map_err(|e| TaskError::ExecutionFailed(e.to_string()))?,
            None => cmd
                .output()
                .await
                .map_err(|e| TaskError::ExecutionFailed(e.to_string()))?,
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        let code = output.status.code().unwrap_or(-1);

        tracing::debug!(
            key = %dispatch.key,
            program = %self.program,
            code,
            stdout = %stdout.trim(),
            "Command finished"
        );

        if output.status.success() {
            Ok(())
        } else {
            Err(TaskError::CommandFailed { code, stderr })
        }
    }
}

/// Builder for creating `CommandHandler` instances.
#[derive(Debug, Clone)]
pub struct CommandHandlerBuilder {
    program: String,
    args: Vec<String>,
    env: BTreeMap<String, String>,
    working_dir: Option<PathBuf>,
    timeout: Option<Duration>,
}

impl CommandHandlerBuilder {
    /// Create a new builder with the given program.
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: BTreeMap::new(),
            working_dir: None,
            timeout: None,
        }
    }

    /// Add a single argument.
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Add multiple arguments.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Add a single environment variable.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Set the working directory.
    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Set the execution timeout.
    pub fn timeout(mut self, duration: Duration) -> Self {
        self.timeout = Some(duration);
        self
    }

    /// Build the `CommandHandler`.
    pub fn build(self) -> CommandHandler {
        CommandHandler {
            program: self.program,
            args: self.args,
            env: self.env,
            working_dir: self.working_dir,
            timeout: self.timeout,
        }
    }
}
