//! Stepscope CLI - watch, debug, and replay worker flows from a terminal.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::Level;
use tracing_subscriber::fmt::format::FmtSpan;

mod config;

use config::Config;
use stepscope_core::{Mode, WorkerRef};
use stepscope_engine::{Command, Engine, EngineConfig, EngineHandle};
use stepscope_render::StaticBackend;
use stepscope_stream::{HistoryProvider, HttpHistoryClient, HttpTransport};

/// Stepscope - visualize and control long-running worker flows.
#[derive(Parser, Debug)]
#[command(
    name = "stepscope",
    author,
    version,
    about = "Stepscope: watch, debug, and replay worker flows",
    long_about = None
)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
enum Commands {
    /// Observe a live worker without interfering.
    Observe {
        /// Worker identifier.
        worker: String,
    },

    /// Attach to a worker's step-debugging stream.
    Debug {
        /// Worker identifier.
        worker: String,
    },

    /// Replay a recorded run.
    Replay {
        /// Worker identifier.
        worker: String,

        /// Run to replay; defaults to the most recent one.
        #[arg(short, long)]
        run: Option<String>,

        /// Auto-advance interval in milliseconds.
        #[arg(long)]
        speed_ms: Option<u64>,
    },

    /// List recorded runs for a worker.
    Runs {
        /// Worker identifier.
        worker: String,
    },

    /// Manage CLI configuration.
    #[command(subcommand)]
    Config(ConfigCommands),
}

/// Configuration subcommands.
#[derive(Subcommand, Debug)]
enum ConfigCommands {
    /// Show current configuration.
    Show,

    /// Set a configuration value.
    Set {
        /// Configuration key.
        key: String,
        /// Configuration value.
        value: String,
    },

    /// Get a configuration value.
    Get {
        /// Configuration key.
        key: String,
    },

    /// Show path to config file.
    Path,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.quiet {
        Level::ERROR
    } else if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };

    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_span_events(FmtSpan::CLOSE)
        .with_target(false)
        .init();

    let config = Config::load()?;

    match cli.command {
        Commands::Observe { worker } => {
            let handle = boot_engine(&config, &worker, Mode::Observe).await?;
            watch(handle).await
        }

        Commands::Debug { worker } => {
            let handle = boot_engine(&config, &worker, Mode::DebugStream).await?;
            watch(handle).await
        }

        Commands::Replay {
            worker,
            run,
            speed_ms,
        } => {
            let worker_ref = WorkerRef::new(worker.clone());
            let history = HttpHistoryClient::new(&config.base_url);

            let run_id = match run {
                Some(run_id) => run_id,
                None => history
                    .list_runs(&worker_ref)
                    .await?
                    .first()
                    .map(|summary| summary.run_id.clone())
                    .context("no recorded runs for this worker")?,
            };

            let handle = boot_engine(&config, &worker, Mode::Replay).await?;
            if let Some(speed_ms) = speed_ms {
                handle.send(Command::SetReplaySpeed(Duration::from_millis(speed_ms)));
            }
            handle.send(Command::SelectRun(run_id));
            handle.send(Command::Play);
            watch(handle).await
        }

        Commands::Runs { worker } => {
            let history = HttpHistoryClient::new(&config.base_url);
            let runs = history.list_runs(&WorkerRef::new(worker)).await?;

            if runs.is_empty() {
                println!("No recorded runs.");
                return Ok(());
            }
            for run in runs {
                println!("{:<24} {:<10} {} steps", run.run_id, run.phase, run.step_count);
            }
            Ok(())
        }

        Commands::Config(command) => {
            let mut config = config;
            match command {
                ConfigCommands::Show => {
                    println!("{}", serde_json::to_string_pretty(&config)?);
                }
                ConfigCommands::Set { key, value } => {
                    config.set(&key, &value)?;
                    config.save()?;
                    println!("{key} = {value}");
                }
                ConfigCommands::Get { key } => match config.get(&key) {
                    Some(value) => println!("{value}"),
                    None => anyhow::bail!("unknown config key: {key}"),
                },
                ConfigCommands::Path => match Config::config_file_path() {
                    Some(path) => println!("{}", path.display()),
                    None => println!("(no config directory available)"),
                },
            }
            Ok(())
        }
    }
}

/// Fetch the worker's flow graph and boot the engine in the given mode.
async fn boot_engine(config: &Config, worker: &str, mode: Mode) -> Result<EngineHandle> {
    let worker_ref = WorkerRef::new(worker);
    let history = Arc::new(HttpHistoryClient::new(&config.base_url));

    let flow = history
        .fetch_flow(&worker_ref)
        .await
        .with_context(|| format!("failed to fetch flow graph for worker '{worker}'"))?;

    let mut engine_config = EngineConfig::new(
        worker_ref,
        flow,
        Arc::new(HttpTransport::new(&config.base_url)),
        history,
        Arc::new(StaticBackend::new()),
    );
    engine_config.initial_mode = mode;
    engine_config.trail_len = config.trail_length;
    engine_config.replay_interval = config.replay_interval();
    engine_config.cache_capacity = config.cache_capacity;
    engine_config.poll_interval = config.poll_interval();

    Ok(Engine::spawn(engine_config))
}

/// Print events as they arrive until Ctrl+C.
async fn watch(handle: EngineHandle) -> Result<()> {
    let mut events = handle.subscribe_events();

    println!("Watching (Ctrl+C to stop)...");
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,

            event = events.recv() => match event {
                Ok(event) => {
                    let when = event
                        .started_at
                        .and_then(|at| at.duration_since(std::time::UNIX_EPOCH).ok())
                        .map(|d| format!("{}", d.as_secs()))
                        .unwrap_or_else(|| "-".to_string());
                    println!(
                        "{} {:<32} {:<10} {}",
                        event.status.symbol(),
                        event.node_id,
                        event.status.label(),
                        when
                    );
                    if let Some(error) = &event.error_message {
                        println!("  error: {error}");
                    }
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!(missed = n, "event printer lagged");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    }

    let session = handle.session();
    println!();
    println!(
        "mode={} trail=[{}] cached_artifacts={}",
        session.mode.label(),
        session.trail.join(", "),
        session.cache_entries
    );
    if let Some(replay) = &session.replay {
        println!(
            "replay: run={} step {}/{}",
            replay.run_id.as_deref().unwrap_or("-"),
            replay.index + 1,
            replay.total
        );
    }

    handle.shutdown().await;
    Ok(())
}
