mod summary;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use pomo::config::{self, Config};
use pomo::console::{self, Exit};
use pomo::{notify, Driver};
use pomo_ipc::{IpcClient, IpcError, Task, TaskId};

#[derive(Parser)]
#[command(name = "pomoctl")]
#[command(about = "Control the pomo session server", long_about = None)]
struct Cli {
    /// Config file (defaults to pomo.toml in the user config directory)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Socket path, overrides the config file
    #[arg(short, long, global = true)]
    socket: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a new task
    Create {
        /// What the task is about
        #[arg(short, long)]
        message: String,
        /// Length of each pomodoro, e.g. 25m, 1h30m, 90s
        #[arg(short, long, value_parser = parse_duration)]
        duration: Option<Duration>,
        /// Number of pomodoros
        #[arg(short, long)]
        pomodoros: Option<u32>,
        /// Tags, repeatable
        #[arg(short, long = "tag")]
        tags: Vec<String>,
        /// Start the task right away
        #[arg(long)]
        start: bool,
    },
    /// List tasks
    List {
        /// Print the tasks as JSON
        #[arg(short, long)]
        json: bool,
        /// Newest tasks first
        #[arg(long)]
        sort: bool,
        /// Show at most this many tasks
        #[arg(short = 'n', long)]
        limit: Option<usize>,
    },
    /// Delete a task and its pomodoros
    Delete { id: TaskId },
    /// Run a task's pomodoros in this terminal
    Start { id: TaskId },
    /// Show the status of the running session
    Status,
}

fn parse_duration(s: &str) -> Result<Duration, String> {
    config::parse_duration(s).ok_or_else(|| format!("invalid duration {s:?}"))
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match load(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {e:#}");
            return ExitCode::FAILURE;
        }
    };
    pomo::init_tracing(&config.logging.level);

    let client = IpcClient::new(&config.server.socket_path);
    match dispatch(cli.command, &config, &client).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            report(&e);
            ExitCode::FAILURE
        }
    }
}

fn load(cli: &Cli) -> Result<Config> {
    let mut config = config::load_config(cli.config.as_deref())?;
    if let Some(socket) = &cli.socket {
        config.server.socket_path = socket.clone();
    }
    Ok(config)
}

/// Connectivity problems get a hint; domain errors from the server are
/// printed as they came.
fn report(e: &anyhow::Error) {
    match e.downcast_ref::<IpcError>() {
        Some(ipc) if ipc.is_connectivity() => {
            eprintln!("Error: {ipc}");
            eprintln!("Is `pomo serve` running?");
        }
        Some(IpcError::Remote(message)) => eprintln!("Error: {message}"),
        _ => eprintln!("Error: {e:#}"),
    }
}

async fn dispatch(command: Commands, config: &Config, client: &IpcClient) -> Result<()> {
    match command {
        Commands::Create {
            message,
            duration,
            pomodoros,
            tags,
            start,
        } => {
            let task = Task::new(
                message,
                pomodoros.unwrap_or(config.session.default_pomodoros),
                duration.unwrap_or(config.session.default_duration),
            )
            .with_tags(tags);
            let id = client.create_task(task).await?;
            println!("{id}");
            if start {
                run(id, config, client).await?;
            }
        }
        Commands::List { json, sort, limit } => {
            let mut tasks = client.get_task_list().await?;
            if sort {
                tasks.reverse();
            }
            if let Some(limit) = limit {
                tasks.truncate(limit);
            }
            if json {
                println!("{}", serde_json::to_string_pretty(&tasks)?);
            } else {
                for task in &tasks {
                    println!("{}", summary::summarize(task, &config.session.datetime_format));
                }
            }
        }
        Commands::Delete { id } => {
            client.delete_task(id).await?;
            println!("deleted task {id}");
        }
        Commands::Start { id } => run(id, config, client).await?,
        Commands::Status => {
            let status = client.get_server_status().await?;
            println!("{status}");
        }
    }
    Ok(())
}

/// Drives the task here, persisting and reporting through the server.
async fn run(id: TaskId, config: &Config, client: &IpcClient) -> Result<()> {
    // get-task also wipes the task's earlier pomodoros
    let task = client.get_task(id).await?;
    println!(
        "{} ({} x {})",
        task.message,
        task.n_pomodoros,
        config::format_duration(task.duration)
    );

    let interval = config.session.status_interval();
    let driver = Driver::spawn(
        &task,
        Arc::new(client.clone()),
        notify::notifier(config.notifications.enabled),
        Some(Arc::new(client.clone())),
        interval,
    )
    .with_context(|| format!("Failed to start task {id}"))?;

    match console::run(driver, console::stdin_lines(), tokio::io::stdout(), interval).await? {
        Exit::Completed(status) => {
            println!("finished {}/{} pomodoros", status.count, status.n_pomodoros);
        }
        Exit::Quit(status) => {
            println!("stopped after {}/{} pomodoros", status.count, status.n_pomodoros);
        }
    }
    Ok(())
}
