//! spindle CLI: start, stop or restart one of the three supervised
//! targets (scheduler, spider, seeder), each backed by a PID file next to
//! the working directory. The process log is the user surface; stderr
//! only carries lifecycle messages.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use log::info;
use tokio::sync::Mutex;

use spindle::config::Config;
use spindle::daemon;
use spindle::pipeline::{JsonlSink, PipelineEngine};
use spindle::scheduler::{HotSeeder, LinkSink, ProxyRefresher, SchedulerServer, SchedulerState, TopicSeeder};

#[derive(Parser)]
#[command(name = "spindle", about = "Distributed microblog crawler")]
struct Cli {
    /// Path to the JSON configuration file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Directory holding the PID files.
    #[arg(long, global = true, default_value = ".")]
    pid_dir: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a target in the foreground until SIGINT/SIGTERM.
    Start { target: Target },
    /// Signal a running target to shut down.
    Stop { target: Target },
    /// Stop then start.
    Restart { target: Target },
}

#[derive(Clone, Copy, ValueEnum)]
enum Target {
    /// The central scheduler service.
    Scheduler,
    /// The downloader fleet plus the pipeline engine.
    Spider,
    /// The seed-link daemons.
    Seeder,
}

impl Target {
    fn name(self) -> &'static str {
        match self {
            Target::Scheduler => "scheduler",
            Target::Spider => "spider",
            Target::Seeder => "seeder",
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();
    let config = Arc::new(Config::load_or_default(cli.config.as_deref())?);

    match cli.command {
        Command::Start { target } => start(target, &cli.pid_dir, config).await,
        Command::Stop { target } => {
            daemon::stop_target(&daemon::pid_file_path(&cli.pid_dir, target.name()))
        }
        Command::Restart { target } => {
            let pid_file = daemon::pid_file_path(&cli.pid_dir, target.name());
            if let Err(e) = daemon::stop_target(&pid_file) {
                eprintln!("stop before restart: {e}");
            } else {
                // Give the old instance a moment to release its PID file
                // and sockets.
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
            start(target, &cli.pid_dir, config).await
        }
    }
}

async fn start(target: Target, pid_dir: &std::path::Path, config: Arc<Config>) -> Result<()> {
    let pid_file = daemon::pid_file_path(pid_dir, target.name());
    daemon::write_pid_file(&pid_file)?;
    eprintln!("spindle {} starting (pid {})", target.name(), std::process::id());

    let result = match target {
        Target::Scheduler => run_scheduler(config).await,
        Target::Spider => run_spider(config).await,
        Target::Seeder => run_seeder(config).await,
    };

    daemon::remove_pid_file(&pid_file);
    eprintln!("spindle {} stopped", target.name());
    result
}

/// Scheduler target: RPC server plus the proxy refresher.
async fn run_scheduler(config: Arc<Config>) -> Result<()> {
    let (_tx, shutdown) = daemon::shutdown_flag();

    let state = Arc::new(Mutex::new(
        SchedulerState::open(&config.scheduler)
            .await
            .context("failed to open scheduler state")?,
    ));

    let refresher = ProxyRefresher::new(
        Arc::clone(&state),
        config.scheduler.proxy_provider.clone(),
        Duration::from_secs(config.scheduler.proxy_interval),
    );
    let refresher_handle = {
        let shutdown = shutdown.clone();
        tokio::spawn(async move { refresher.run(shutdown).await })
    };

    SchedulerServer::new(&config.scheduler, Arc::clone(&state))
        .run(shutdown)
        .await;

    refresher_handle.await.ok();
    Ok(())
}

/// Spider target: pipeline engine, fan-in sink and the downloader fleet.
async fn run_spider(config: Arc<Config>) -> Result<()> {
    let (_tx, shutdown) = daemon::shutdown_flag();

    let (links, sink_handle) = LinkSink::start(
        config.scheduler.bind_addr(),
        config.scheduler.client_failover(),
        shutdown.clone(),
    );
    let records = Arc::new(
        JsonlSink::open(&config.pipeline.records_path)
            .context("failed to open record sink")?,
    );
    let (engine, workers) = PipelineEngine::start(&config.pipeline, records, links.clone());

    let pipeline: Arc<dyn spindle::Pipeline> = engine.clone();
    let fleet = spindle::downloader::spawn_fleet(Arc::clone(&config), pipeline, shutdown.clone());

    let mut shutdown_wait = shutdown.clone();
    shutdown_wait.changed().await.ok();
    info!("spider shutting down");

    futures::future::join_all(fleet).await;
    // All feeders are gone; close the engine queue and drain the workers.
    drop(engine);
    futures::future::join_all(workers).await;
    links.stop();
    sink_handle.await.ok();
    Ok(())
}

/// Seeder target: the hot and topic seed daemons.
async fn run_seeder(config: Arc<Config>) -> Result<()> {
    let (_tx, shutdown) = daemon::shutdown_flag();

    let hot = HotSeeder::new(&config.scheduler);
    let topic = TopicSeeder::new(&config.scheduler);

    let hot_handle = {
        let shutdown = shutdown.clone();
        tokio::spawn(async move { hot.run(shutdown).await })
    };
    let topic_handle = {
        let shutdown = shutdown.clone();
        tokio::spawn(async move { topic.run(shutdown).await })
    };

    hot_handle.await.ok();
    topic_handle.await.ok();
    Ok(())
}
