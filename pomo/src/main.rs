use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use pomo::config::{self, Config};
use pomo::console::{self, Exit};
use pomo::{notify, open_store, Driver, Server, StoreSink};
use pomo_ipc::TaskId;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "pomo")]
#[command(about = "Pomodoro session server and runner", long_about = None)]
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
    /// Serve pomoctl requests until interrupted
    Serve,
    /// Run a session for a stored task in this terminal
    Run {
        /// Task to run; its recorded pomodoros are cleared first
        id: TaskId,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = config::load_config(cli.config.as_deref())?;
    if let Some(socket) = cli.socket {
        config.server.socket_path = socket;
    }
    pomo::init_tracing(&config.logging.level);
    config::ensure_dirs(&config)?;

    match cli.command {
        Commands::Serve => serve(&config).await,
        Commands::Run { id } => run(&config, id).await,
    }
}

async fn serve(config: &Config) -> Result<()> {
    let store = open_store(&config.database).context("Failed to open store")?;
    let server = Server::bind(&config.server.socket_path, store).await?;

    let handle = server.handle();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for ctrl-c: {}", e);
            return;
        }
        info!("interrupted, shutting down");
        handle.stop();
    });

    server.run().await?;
    Ok(())
}

/// Runs the session locally. An embedded server answers `pomoctl status`
/// with the live status for as long as the session runs.
async fn run(config: &Config, id: TaskId) -> Result<()> {
    let store = open_store(&config.database).context("Failed to open store")?;
    // bind before touching the task so a refused bind keeps its history
    let (server, task) =
        Server::bind_for_task(&config.server.socket_path, Arc::clone(&store), id)
            .await
            .with_context(|| format!("Failed to start task {id}"))?;
    let board = server.status_board();
    let handle = server.handle();
    let serving = tokio::spawn(server.run());

    println!(
        "{} ({} x {})",
        task.message,
        task.n_pomodoros,
        config::format_duration(task.duration)
    );
    let interval = config.session.status_interval();
    let driver = Driver::spawn(
        &task,
        Arc::new(StoreSink::new(store)),
        notify::notifier(config.notifications.enabled),
        Some(Arc::new(board)),
        interval,
    );

    let outcome = match driver {
        Ok(driver) => tokio::select! {
            outcome = console::run(
                driver,
                console::stdin_lines(),
                tokio::io::stdout(),
                interval,
            ) => Some(outcome),
            _ = tokio::signal::ctrl_c() => None,
        },
        Err(e) => Some(Err(e.into())),
    };

    handle.stop();
    serving.await.context("Server task failed")??;

    match outcome {
        Some(Ok(Exit::Completed(status))) => {
            println!("finished {}/{} pomodoros", status.count, status.n_pomodoros)
        }
        Some(Ok(Exit::Quit(status))) => {
            println!("stopped after {}/{} pomodoros", status.count, status.n_pomodoros)
        }
        Some(Err(e)) => return Err(e).context("Session failed"),
        None => println!("interrupted"),
    }
    Ok(())
}
