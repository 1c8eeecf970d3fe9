use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use taskmaster::api::{ListTasksQuery, PriorityField, SubmitTaskRequest};
use taskmaster::client::ApiClient;
use taskmaster::config::{ExecutorConfig, NodeConfig, SchedulerConfig};
use taskmaster::node::Node;
use taskmaster::scheduler::{Task, TaskId, WorkerId};
use taskmaster::shutdown::install_shutdown_handler;
use taskmaster::worker::{ShellExecutor, WorkerRunner};

#[derive(Parser, Debug)]
#[command(name = "taskmaster")]
#[command(version)]
#[command(about = "A master/worker job scheduler with priority queueing")]
#[command(propagate_version = true)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Start the scheduler master
    Server(ServerArgs),

    /// Task management commands
    Task {
        #[command(flatten)]
        client: ClientArgs,

        #[command(subcommand)]
        command: TaskCommands,
    },

    /// Run a worker against a remote master
    Worker(WorkerArgs),
}

#[derive(Parser, Debug)]
struct ServerArgs {
    /// Address for the HTTP API
    #[arg(long, default_value = "127.0.0.1:8080")]
    listen: SocketAddr,

    /// Number of in-process workers to run alongside the master
    #[arg(long, default_value = "0")]
    local_workers: usize,

    /// Prefix for local worker IDs (defaults to $HOSTNAME, or "local")
    #[arg(long)]
    worker_id_prefix: Option<String>,

    /// Seconds without a heartbeat before a worker is evicted
    #[arg(long, default_value = "300")]
    worker_timeout_secs: u64,

    /// Seconds between stale-worker sweeps
    #[arg(long, default_value = "60")]
    sweep_interval_secs: u64,

    /// Times a task is requeued after losing its worker before it fails
    #[arg(long, default_value = "3")]
    max_retries: u32,

    /// Seconds finished tasks are kept for status queries
    #[arg(long, default_value = "3600")]
    retention_secs: u64,

    /// Seconds between local worker heartbeats
    #[arg(long, default_value = "10")]
    heartbeat_interval_secs: u64,

    /// Milliseconds between local worker polls for assignments
    #[arg(long, default_value = "1000")]
    poll_interval_ms: u64,

    /// Kill task commands running longer than this many seconds
    #[arg(long)]
    task_timeout_secs: Option<u64>,
}

// =============================================================================
// Client Arguments
// =============================================================================

#[derive(Parser, Debug)]
struct ClientArgs {
    /// Master API address
    #[arg(long, short = 'm', default_value = "http://127.0.0.1:8080")]
    master: String,

    /// Output format
    #[arg(long, short = 'o', default_value = "table")]
    output: OutputFormat,
}

#[derive(Debug, Clone, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

#[derive(clap::Subcommand, Debug)]
enum TaskCommands {
    /// Submit a shell command as a new task
    Submit {
        /// The command to execute (e.g., "echo hello")
        command: String,

        /// low, medium, high, critical or a level 0..3
        #[arg(long, short, default_value = "low")]
        priority: String,

        /// Task name (defaults to "task-<unix seconds>")
        #[arg(long, short)]
        name: Option<String>,

        #[arg(long, short, default_value = "")]
        description: String,
    },
    /// Get status of a specific task
    Status {
        /// The task ID
        task_id: String,
    },
    /// List tasks, optionally filtered
    List {
        /// Only tasks in this status (pending, assigned, running, ...)
        #[arg(long)]
        status: Option<String>,

        /// Only tasks of this priority
        #[arg(long)]
        priority: Option<String>,
    },
}

// =============================================================================
// Worker Arguments
// =============================================================================

#[derive(Parser, Debug)]
struct WorkerArgs {
    /// Master API address
    #[arg(long, short = 'm', default_value = "http://127.0.0.1:8080")]
    master: String,

    /// Worker ID (defaults to $HOSTNAME)
    #[arg(long)]
    worker_id: Option<String>,

    /// Seconds between heartbeats
    #[arg(long, default_value = "10")]
    heartbeat_interval_secs: u64,

    /// Milliseconds between polls for assignments
    #[arg(long, default_value = "1000")]
    poll_interval_ms: u64,

    /// Kill task commands running longer than this many seconds
    #[arg(long)]
    task_timeout_secs: Option<u64>,
}

impl ServerArgs {
    fn into_config(self) -> NodeConfig {
        let worker_id_prefix = self
            .worker_id_prefix
            .or_else(|| std::env::var("HOSTNAME").ok().filter(|h| !h.is_empty()))
            .unwrap_or_else(|| "local".to_string());

        NodeConfig {
            listen_addr: self.listen,
            local_workers: self.local_workers,
            worker_id_prefix,
            heartbeat_interval: Duration::from_secs(self.heartbeat_interval_secs),
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            scheduler: SchedulerConfig {
                worker_timeout: Duration::from_secs(self.worker_timeout_secs),
                sweep_interval: Duration::from_secs(self.sweep_interval_secs),
                max_retries: self.max_retries,
                finished_task_retention: Duration::from_secs(self.retention_secs),
            },
            executor: ExecutorConfig {
                timeout: self.task_timeout_secs.map(Duration::from_secs),
                ..Default::default()
            },
        }
    }
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
}

async fn run_server(args: ServerArgs) -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let config = args.into_config();
    tracing::info!(
        listen = %config.listen_addr,
        local_workers = config.local_workers,
        worker_timeout = ?config.scheduler.worker_timeout,
        sweep_interval = ?config.scheduler.sweep_interval,
        max_retries = config.scheduler.max_retries,
        "Starting taskmaster"
    );

    let node = Node::new(config)?;
    let shutdown = install_shutdown_handler()?;
    node.run(shutdown).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}

async fn run_worker(args: WorkerArgs) -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let worker_id = args
        .worker_id
        .or_else(|| std::env::var("HOSTNAME").ok().filter(|h| !h.is_empty()))
        .ok_or("no --worker-id given and $HOSTNAME is not set")?;
    let heartbeat_interval = Duration::from_secs(args.heartbeat_interval_secs);
    let poll_interval = Duration::from_millis(args.poll_interval_ms);
    if heartbeat_interval.is_zero() || poll_interval.is_zero() {
        return Err("heartbeat and poll intervals must be greater than zero".into());
    }

    let client = ApiClient::new(args.master)?;
    let executor = ShellExecutor::new(ExecutorConfig {
        timeout: args.task_timeout_secs.map(Duration::from_secs),
        ..Default::default()
    });
    tracing::info!(
        worker_id = %worker_id,
        master = %client.base_url(),
        heartbeat_interval = ?heartbeat_interval,
        "Starting remote worker"
    );

    let runner = WorkerRunner::new(
        WorkerId::from(worker_id),
        Arc::new(client),
        executor,
        heartbeat_interval,
        poll_interval,
    );
    let shutdown = install_shutdown_handler()?;
    runner.run(shutdown).await;
    Ok(())
}

// =============================================================================
// Task Command Handlers
// =============================================================================

#[derive(Serialize)]
struct TaskListOutput<'a> {
    tasks: &'a [Task],
    total_count: usize,
}

async fn run_task_command(
    client_args: ClientArgs,
    command: TaskCommands,
) -> Result<(), Box<dyn std::error::Error>> {
    let client = ApiClient::new(client_args.master)?;
    let output_format = client_args.output;

    match command {
        TaskCommands::Submit {
            command,
            priority,
            name,
            description,
        } => {
            let name = name.unwrap_or_else(|| format!("task-{}", chrono::Utc::now().timestamp()));
            let priority = match priority.parse::<i64>() {
                Ok(level) => PriorityField::Level(level),
                Err(_) => PriorityField::Name(priority),
            };
            let submission = client
                .submit(&SubmitTaskRequest {
                    name,
                    description,
                    command,
                    priority,
                })
                .await?;
            match output_format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&submission)?),
                OutputFormat::Table => {
                    println!("Task submitted successfully!");
                    println!("Task ID: {}", submission.task_id);
                    println!("Status:  {}", submission.status);
                }
            }
        }
        TaskCommands::Status { task_id } => {
            let task = client.get_task(&TaskId::from(task_id)).await?;
            match output_format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&task)?),
                OutputFormat::Table => print_task(&task),
            }
        }
        TaskCommands::List { status, priority } => {
            let tasks = client
                .list_tasks(&ListTasksQuery { status, priority })
                .await?;
            match output_format {
                OutputFormat::Json => {
                    let output = TaskListOutput {
                        tasks: &tasks,
                        total_count: tasks.len(),
                    };
                    println!("{}", serde_json::to_string_pretty(&output)?);
                }
                OutputFormat::Table => print_task_table(&tasks),
            }
        }
    }
    Ok(())
}

fn print_task(task: &Task) {
    println!("Task ID:     {}", task.id);
    println!("Name:        {}", task.name);
    if !task.description.is_empty() {
        println!("Description: {}", task.description);
    }
    println!("Command:     {}", task.command);
    println!("Priority:    {}", task.priority);
    println!("Status:      {}", task.status);
    println!("Retries:     {}", task.retry_count);
    if let Some(worker) = &task.assigned_worker {
        println!("Worker:      {}", worker);
    }
    println!("Created:     {}", task.created_at.to_rfc3339());
    if let Some(started_at) = task.started_at {
        println!("Started:     {}", started_at.to_rfc3339());
    }
    if let Some(completed_at) = task.completed_at {
        println!("Completed:   {}", completed_at.to_rfc3339());
    }
    if let Some(output) = task.output.as_deref().filter(|o| !o.is_empty()) {
        println!("Output:");
        for line in output.lines() {
            println!("  {}", line);
        }
    }
    if let Some(error) = task.error.as_deref().filter(|e| !e.is_empty()) {
        println!("Error:");
        for line in error.lines() {
            println!("  {}", line);
        }
    }
}

fn print_task_table(tasks: &[Task]) {
    if tasks.is_empty() {
        println!("No tasks found.");
        return;
    }

    println!(
        "{:<24} {:<10} {:<10} {:<16} COMMAND",
        "TASK ID", "PRIORITY", "STATUS", "WORKER"
    );
    println!("{}", "-".repeat(82));
    for task in tasks {
        let worker = task
            .assigned_worker
            .as_ref()
            .map(ToString::to_string)
            .unwrap_or_else(|| "-".to_string());
        // Truncate command if too long
        let command = if task.command.chars().count() > 20 {
            format!("{}...", task.command.chars().take(17).collect::<String>())
        } else {
            task.command.clone()
        };
        println!(
            "{:<24} {:<10} {:<10} {:<16} {}",
            task.id.to_string(),
            task.priority.to_string(),
            task.status.to_string(),
            worker,
            command
        );
    }
    println!();
    println!("Showing {} tasks", tasks.len());
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    match args.command {
        Commands::Server(server_args) => run_server(server_args).await,
        Commands::Task { client, command } => run_task_command(client, command).await,
        Commands::Worker(worker_args) => run_worker(worker_args).await,
    }
}
