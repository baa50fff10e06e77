mod cli;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Local;
use clap::Parser;
use tracing::info;

use cli::{Cli, Command};
use plate_scheduler::config::{SchedulerConfig, load_robot_setup};
use plate_scheduler::logging;
use plate_scheduler::peer_sim::{PeerOptions, PeerSimulator};
use plate_scheduler::status::StatusBoard;
use plate_scheduler::store::StateStore;
use plate_scheduler::watcher::AdmissionWatcher;
use plate_scheduler::SchedulerCore;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = SchedulerConfig::load(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    let _guard = logging::init(cli.verbose, config.log_file.as_deref())?;

    match cli.command {
        Command::Run { status_interval_ms } => run(&config, status_interval_ms).await,
        Command::Status => status(&config),
        Command::PeerSim {
            response_delay_ms,
            retry_delay_ms,
        } => {
            peer_sim(
                &config,
                PeerOptions {
                    response_delay: Duration::from_millis(response_delay_ms),
                    retry_delay: Duration::from_millis(retry_delay_ms),
                },
            )
            .await
        }
    }
}

async fn run(config: &SchedulerConfig, status_interval_ms: Option<u64>) -> Result<()> {
    let core = SchedulerCore::start(config)
        .await
        .context("starting scheduler")?;
    let watcher = AdmissionWatcher::start(&config.input_dir, &core, config.poll_interval())
        .with_context(|| format!("watching {}", config.input_dir.display()))?;
    core.attach_watcher(watcher);

    let ticker = status_interval_ms
        .filter(|ms| *ms > 0)
        .map(|ms| tokio::spawn(print_status(Arc::clone(&core), Duration::from_millis(ms))));

    info!(active = core.active_count(), "Scheduler running, press Ctrl-C to stop");
    tokio::signal::ctrl_c()
        .await
        .context("waiting for Ctrl-C")?;
    info!("Interrupt received, shutting down");

    if let Some(ticker) = ticker {
        ticker.abort();
    }
    core.shutdown().await;
    Ok(())
}

async fn print_status(core: Arc<SchedulerCore>, every: Duration) {
    let board = StatusBoard::new();
    let mut interval = tokio::time::interval(every);
    loop {
        interval.tick().await;
        print!("{}", board.render(&core.status(), Local::now()));
    }
}

fn status(config: &SchedulerConfig) -> Result<()> {
    let snapshots = StateStore::read_snapshots(&config.state_file)
        .with_context(|| format!("reading {}", config.state_file.display()))?;
    print!("{}", StatusBoard::new().render_checkpoint(&snapshots));
    Ok(())
}

async fn peer_sim(config: &SchedulerConfig, options: PeerOptions) -> Result<()> {
    let setup = load_robot_setup(&config.robot_setup_file)?;
    info!(robots = setup.len(), "Starting peer simulator");
    let sim = PeerSimulator::spawn(setup, options);
    tokio::signal::ctrl_c()
        .await
        .context("waiting for Ctrl-C")?;
    sim.stop().await;
    Ok(())
}
