//! superflow - composite workflows compiled into persisted task trees.
//!
//! A workflow is a small program of task calls, nested workflow calls and
//! batch fan-outs. Submitting it with arguments compiles it into a flat set
//! of task records (a superjob); the engine dispatches leaves to a job
//! runtime and propagates completion back up the tree.
//!
//! ```
//! use superflow::{ArgRef, Statement, TaskType, WorkflowDefinition, WorkflowRegistry};
//!
//! let mut registry = WorkflowRegistry::new();
//! registry.register_task_type(TaskType::new("fetch", ["user_id"])).unwrap();
//! registry
//!     .register_workflow(
//!         WorkflowDefinition::new("users", ["user_ids"]).statement(
//!             Statement::batch([("user_ids", "user_id")])
//!                 .then([Statement::call("fetch", [ArgRef::param("user_id")])]),
//!         ),
//!     )
//!     .unwrap();
//! registry.validate().unwrap();
//! ```

pub mod api;
pub mod config;
pub mod core;
pub mod engine;
pub mod events;
pub mod execution;
pub mod storage;
pub mod testing;

pub use core::compiler::compile;
pub use core::definition::{
    ArgRef, BatchBinding, Statement, StatementTarget, TaskType, WorkflowDefinition,
    WorkflowRegistry,
};
pub use core::error::WorkflowError;
pub use core::record::{TaskKind, TaskRecord, TaskStatus};
pub use core::tree::{TreeBuilder, TreeNode, WorkflowTree};
pub use core::types::{RecordId, SuperjobId, TaskKey};

pub use config::{ConfigError, GlobalConfig, LoadedWorkflows, YamlLoader, load_workflows_from_directory};
pub use engine::{
    CompletionListener, Dispatch, Engine, EngineError, JobRuntime, RuntimeError, SubmitOptions,
};
pub use events::{Event, EventBus, EventHandler};
pub use execution::{CommandHandler, FnHandler, LocalRuntime, TaskError, TaskHandler};
pub use storage::{InMemoryStorage, Storage, StorageError, StoredSuperjob, SuperjobStatus};
#[cfg(feature = "sqlite")]
pub use storage::SqliteStorage;
