//! superflow - composite workflows over a persisted task tree.
//!
//! Usage:
//!   superflow validate <workflows-dir>              Validate workflow files
//!   superflow list <workflows-dir>                  List workflows and task types
//!   superflow compile <workflows-dir> <workflow>    Print the activated records as JSON
//!   superflow run <workflows-dir> <workflow>        Run a workflow with the local runtime
//!   superflow serve <workflows-dir>                 Serve the HTTP API

use async_trait::async_trait;
use clap::{Parser, Subcommand};
use serde_json::Value;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use superflow::api::{create_api_state, start_server};
use superflow::config::{ApiConfig, StorageConfig};
use superflow::{
    Dispatch, Engine, Event, EventHandler, GlobalConfig, InMemoryStorage, JobRuntime,
    LoadedWorkflows, RuntimeError, Storage, SuperjobId, YamlLoader, load_workflows_from_directory,
};
use tracing::{error, info, warn};

/// superflow - composite workflows over a persisted task tree
#[derive(Parser)]
#[command(name = "superflow")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate workflow files without running anything
    Validate {
        /// Path to the directory containing workflow YAML files
        #[arg(value_name = "WORKFLOWS_DIR")]
        workflows_dir: PathBuf,
    },

    /// List workflows and task types
    List {
        /// Path to the directory containing workflow YAML files
        #[arg(value_name = "WORKFLOWS_DIR")]
        workflows_dir: PathBuf,
    },

    /// Compile a workflow and print its activated records as JSON
    Compile {
        /// Path to the directory containing workflow YAML files
        #[arg(value_name = "WORKFLOWS_DIR")]
        workflows_dir: PathBuf,

        /// Workflow to compile
        #[arg(value_name = "WORKFLOW")]
        workflow: String,

        /// Positional arguments as a JSON array
        #[arg(short, long, default_value = "[]")]
        args: String,
    },

    /// Run a workflow with the local command runtime and wait for it
    Run {
        /// Path to the directory containing workflow YAML files
        #[arg(value_name = "WORKFLOWS_DIR")]
        workflows_dir: PathBuf,

        /// Workflow to run
        #[arg(value_name = "WORKFLOW")]
        workflow: String,

        /// Positional arguments as a JSON array; a trailing object is read as options
        #[arg(short, long, default_value = "[]")]
        args: String,

        /// Global configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Maximum concurrent tasks (overrides the configuration)
        #[arg(short = 't', long)]
        max_tasks: Option<usize>,

        /// Give up waiting after this many seconds
        #[arg(long, default_value = "300")]
        timeout: u64,
    },

    /// Serve the HTTP API with the local command runtime
    Serve {
        /// Path to the directory containing workflow YAML files
        #[arg(value_name = "WORKFLOWS_DIR")]
        workflows_dir: PathBuf,

        /// Global configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Host to bind to (overrides the configuration)
        #[arg(long)]
        host: Option<String>,

        /// Port to bind to (overrides the configuration)
        #[arg(short, long)]
        port: Option<u16>,
    },
}

/// Logging event handler that prints lifecycle events.
struct LoggingHandler;

#[async_trait]
impl EventHandler for LoggingHandler {
    async fn handle(&self, event: &Event) {
        match event {
            Event::SuperjobSubmitted {
                superjob_id,
                workflow,
                records,
                ..
            } => {
                info!(
                    "Superjob {} submitted ({}, {} record(s))",
                    superjob_id, workflow, records
                );
            }
            Event::TaskDispatched { key, task_type, .. } => {
                info!("  Task {} ({}) dispatched", key, task_type);
            }
            Event::TaskCompleted { key, task_type, .. } => {
                info!("  Task {} ({}) completed", key, task_type);
            }
            Event::TaskFailed {
                key,
                task_type,
                error,
                ..
            } => {
                warn!("  Task {} ({}) failed: {}", key, task_type, error);
            }
            Event::SuperjobCompleted {
                superjob_id,
                duration,
                ..
            } => match duration {
                Some(d) => info!("Superjob {} completed in {:?}", superjob_id, d),
                None => info!("Superjob {} completed", superjob_id),
            },
            Event::SuperjobFailed {
                superjob_id, error, ..
            } => {
                error!("Superjob {} failed: {}", superjob_id, error);
            }
        }
    }
}

/// Event handler that signals when a superjob reaches a terminal state.
struct CompletionWatcher {
    completed: Arc<tokio::sync::Notify>,
    outcome: Mutex<Option<(SuperjobId, Result<(), String>)>>,
}

impl CompletionWatcher {
    fn new() -> Self {
        Self {
            completed: Arc::new(tokio::sync::Notify::new()),
            outcome: Mutex::new(None),
        }
    }

    fn outcome_for(&self, id: &SuperjobId) -> Option<Result<(), String>> {
        let outcome = self.outcome.lock().ok()?;
        match outcome.as_ref() {
            Some((done, result)) if done == id => Some(result.clone()),
            _ => None,
        }
    }
}

#[async_trait]
impl EventHandler for CompletionWatcher {
    async fn handle(&self, event: &Event) {
        let result = match event {
            Event::SuperjobCompleted { superjob_id, .. } => (superjob_id.clone(), Ok(())),
            Event::SuperjobFailed {
                superjob_id, error, ..
            } => (superjob_id.clone(), Err(error.clone())),
            _ => return,
        };
        if let Ok(mut outcome) = self.outcome.lock() {
            *outcome = Some(result);
        }
        self.completed.notify_one();
    }
}

/// A runtime that accepts every dispatch and runs nothing.
struct DryRunRuntime;

#[async_trait]
impl JobRuntime for DryRunRuntime {
    async fn dispatch(&self, _dispatch: Dispatch) -> Result<(), RuntimeError> {
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Validate { workflows_dir } => {
            validate_workflows(workflows_dir)?;
        }
        Commands::List { workflows_dir } => {
            list_workflows(workflows_dir)?;
        }
        Commands::Compile {
            workflows_dir,
            workflow,
            args,
        } => {
            compile_workflow(workflows_dir, workflow, parse_args(&args)?).await?;
        }
        Commands::Run {
            workflows_dir,
            workflow,
            args,
            config,
            max_tasks,
            timeout,
        } => {
            let loaded = load_workflows_from_directory(&workflows_dir)?;
            let global = load_global_config(config)?;
            let args = parse_args(&args)?;
            let max_tasks = max_tasks.or(global.max_concurrent_tasks).unwrap_or(4);
            let timeout = Duration::from_secs(timeout);
            match global.storage.clone().unwrap_or_default() {
                StorageConfig::Memory => {
                    let run = RunSettings::new(&global, max_tasks);
                    run_workflow(InMemoryStorage::new(), loaded, run, workflow, args, timeout)
                        .await?;
                }
                StorageConfig::Sqlite { path } => {
                    let storage = open_sqlite(&path).await?;
                    let run = RunSettings::new(&global, max_tasks);
                    run_workflow(storage, loaded, run, workflow, args, timeout).await?;
                }
            }
        }
        Commands::Serve {
            workflows_dir,
            config,
            host,
            port,
        } => {
            let loaded = load_workflows_from_directory(&workflows_dir)?;
            let global = load_global_config(config)?;
            let mut api = global.api.clone().unwrap_or_default();
            if let Some(host) = host {
                api.host = host;
            }
            if let Some(port) = port {
                api.port = port;
            }
            let run = RunSettings::new(&global, global.max_concurrent_tasks.unwrap_or(4));
            match global.storage.clone().unwrap_or_default() {
                StorageConfig::Memory => {
                    serve(InMemoryStorage::new(), loaded, run, api).await?;
                }
                StorageConfig::Sqlite { path } => {
                    let storage = open_sqlite(&path).await?;
                    serve(storage, loaded, run, api).await?;
                }
            }
        }
    }

    Ok(())
}

/// Engine settings taken from the global configuration.
struct RunSettings {
    max_tasks: usize,
    delete_records_on_completion: bool,
}

impl RunSettings {
    fn new(global: &GlobalConfig, max_tasks: usize) -> Self {
        Self {
            max_tasks,
            delete_records_on_completion: global.delete_records_on_completion.unwrap_or(false),
        }
    }
}

fn parse_args(args: &str) -> Result<Vec<Value>, Box<dyn std::error::Error>> {
    serde_json::from_str(args).map_err(|e| format!("--args must be a JSON array: {}", e).into())
}

fn load_global_config(path: Option<PathBuf>) -> Result<GlobalConfig, Box<dyn std::error::Error>> {
    match path {
        Some(path) => {
            info!("Loading configuration from: {}", path.display());
            Ok(YamlLoader::load_global_config(&path)?)
        }
        None => Ok(GlobalConfig::default()),
    }
}

#[cfg(feature = "sqlite")]
async fn open_sqlite(path: &str) -> Result<superflow::SqliteStorage, Box<dyn std::error::Error>> {
    info!("Opening SQLite storage at: {}", path);
    Ok(superflow::SqliteStorage::new(path).await?)
}

#[cfg(not(feature = "sqlite"))]
async fn open_sqlite(_path: &str) -> Result<InMemoryStorage, Box<dyn std::error::Error>> {
    Err("superflow was built without the sqlite feature".into())
}

/// Build an engine wired to the local runtime and a logging handler.
async fn build_engine<S: Storage + 'static>(
    storage: S,
    loaded: LoadedWorkflows,
    settings: &RunSettings,
) -> Arc<Engine<S>> {
    for task_type in loaded.tasks_without_command() {
        warn!(
            "Task type '{}' has no command; dispatches of it will fail",
            task_type
        );
    }

    let runtime = Arc::new(loaded.local_runtime(settings.max_tasks));
    let engine = Arc::new(
        Engine::new(loaded.registry, storage, runtime.clone())
            .with_delete_records_on_completion(settings.delete_records_on_completion),
    );
    runtime.attach(&engine);
    engine.event_bus().register(Arc::new(LoggingHandler)).await;
    engine
}

/// Validate workflow files without running.
fn validate_workflows(workflows_dir: PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    info!("Validating workflows in: {}", workflows_dir.display());

    match load_workflows_from_directory(&workflows_dir) {
        Ok(loaded) => {
            let workflows = loaded.registry.workflows();
            info!("All {} workflow(s) are valid:", workflows.len());
            for workflow in workflows {
                info!("  - {}({}): OK", workflow.name(), workflow.params().join(", "));
            }
            Ok(())
        }
        Err(e) => {
            match e.path() {
                Some(path) => error!(file = %path.display(), "Validation failed: {}", e),
                None => error!("Validation failed: {}", e),
            }
            Err(e.into())
        }
    }
}

/// List workflows and task types.
fn list_workflows(workflows_dir: PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    let loaded = load_workflows_from_directory(&workflows_dir)?;
    let workflows = loaded.registry.workflows();

    if workflows.is_empty() {
        println!("No workflows found in {}", workflows_dir.display());
        return Ok(());
    }

    println!("Workflows in {}:", workflows_dir.display());
    println!();
    for workflow in workflows {
        println!("{}({})", workflow.name(), workflow.params().join(", "));
        println!("  Statements: {}", workflow.body().len());
    }

    println!();
    println!("Task types:");
    for task_type in loaded.registry.task_types() {
        let command = loaded
            .commands
            .iter()
            .find(|(name, _)| name == &task_type.name)
            .map(|(_, handler)| handler.program().to_string())
            .unwrap_or_else(|| "no command".to_string());
        println!(
            "  - {}({}) [{}]",
            task_type.name,
            task_type.params.join(", "),
            command
        );
    }

    Ok(())
}

/// Compile a workflow and print the records as they stand after activation.
async fn compile_workflow(
    workflows_dir: PathBuf,
    workflow: String,
    args: Vec<Value>,
) -> Result<(), Box<dyn std::error::Error>> {
    let loaded = load_workflows_from_directory(&workflows_dir)?;
    let engine = Engine::new(loaded.registry, InMemoryStorage::new(), Arc::new(DryRunRuntime));

    let id = engine.submit_with_trailing_options(&workflow, args).await?;
    let records = engine.records(&id).await?;
    println!("{}", serde_json::to_string_pretty(&records)?);
    Ok(())
}

/// Run one workflow and wait for it to finish.
async fn run_workflow<S: Storage + 'static>(
    storage: S,
    loaded: LoadedWorkflows,
    settings: RunSettings,
    workflow: String,
    args: Vec<Value>,
    timeout: Duration,
) -> Result<(), Box<dyn std::error::Error>> {
    let engine = build_engine(storage, loaded, &settings).await;

    // Register the watcher before submitting so no terminal event is missed
    let watcher = Arc::new(CompletionWatcher::new());
    engine.event_bus().register(watcher.clone()).await;

    info!("Submitting workflow '{}'...", workflow);
    let id = engine.submit_with_trailing_options(&workflow, args).await?;

    let deadline = tokio::time::Instant::now() + timeout;
    let outcome = loop {
        if let Some(outcome) = watcher.outcome_for(&id) {
            break outcome;
        }
        tokio::select! {
            _ = watcher.completed.notified() => {}
            _ = tokio::signal::ctrl_c() => {
                info!("\nInterrupted; superjob {} left running", id);
                return Ok(());
            }
            _ = tokio::time::sleep_until(deadline) => {
                warn!("Superjob {} timed out after {:?}", id, timeout);
                return Err(format!("superjob {} did not finish in time", id).into());
            }
        }
    };

    match outcome {
        Ok(()) => {
            info!("Done!");
            Ok(())
        }
        Err(e) => Err(format!("superjob {} failed: {}", id, e).into()),
    }
}

/// Serve the HTTP API until Ctrl+C.
async fn serve<S: Storage + 'static>(
    storage: S,
    loaded: LoadedWorkflows,
    settings: RunSettings,
    api: ApiConfig,
) -> Result<(), Box<dyn std::error::Error>> {
    let engine = build_engine(storage, loaded, &settings).await;
    let server = start_server(&api, create_api_state(engine)).await?;

    info!("Press Ctrl+C to stop");
    tokio::signal::ctrl_c().await?;
    info!("\nShutting down...");
    server.abort();

    info!("Goodbye!");
    Ok(())
}
