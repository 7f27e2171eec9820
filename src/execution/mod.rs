//! Local task execution.
//!
//! This module provides an in-process [`JobRuntime`](crate::engine::JobRuntime)
//! that runs dispatched tasks through registered handlers, including
//! external command execution.

mod command;
mod handler;
mod runtime;

pub use command::{CommandHandler, CommandHandlerBuilder};
pub use handler::{FnHandler, TaskError, TaskHandler};
pub use runtime::LocalRuntime;
