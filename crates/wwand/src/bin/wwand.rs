//! wwand: WWAN modem connectivity supervisor daemon.
//!
//! Runs two long-lived activities for the process lifetime: the command
//! watchdog's monitor thread and the state machine's 1 Hz loop below.
//! The daemon never exits on its own; failures are absorbed by the state
//! machine and SIGINT is the only way out.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use crossbeam_channel::{bounded, select, tick};

use wwand::config::{Backend, SupervisorConfig};
use wwand::driver;
use wwand::health::PingProbe;
use wwand::logging;
use wwand::supervisor::Supervisor;
use wwand::watchdog::CommandWatchdog;

/// WWAN modem connectivity supervisor.
#[derive(Parser, Debug)]
#[command(name = "wwand", about = "WWAN modem connectivity supervisor")]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Write logs to a daily-rotated file instead of stdout.
    #[arg(long, default_value_t = false)]
    log_file: bool,

    /// Directory for rotated log files.
    #[arg(long, default_value = "/tmp")]
    log_dir: PathBuf,

    /// Override the configured driver backend.
    #[arg(long, value_enum)]
    backend: Option<Backend>,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let _log_guard = logging::init(cli.log_file.then_some(cli.log_dir.as_path()))?;

    let mut config = SupervisorConfig::load(cli.config.as_deref())?;
    if let Some(backend) = cli.backend {
        config.backend = backend;
    }

    tracing::info!(
        backend = %config.backend,
        interface = %config.interface,
        apn = %config.apn,
        probe_addr = %config.probe_addr,
        "wwand starting"
    );

    let watchdog = Arc::new(CommandWatchdog::spawn());
    let driver = driver::for_backend(config.backend, &config, watchdog.clone());
    let prober = Box::new(PingProbe::new(&config, watchdog));
    let mut supervisor = Supervisor::new(config, driver, prober);

    let ticks = tick(Duration::from_secs(1));
    let (stop_tx, stop_rx) = bounded::<()>(1);
    ctrlc::set_handler(move || {
        let _ = stop_tx.try_send(());
    })?;

    loop {
        select! {
            recv(ticks) -> _ => supervisor.tick(),
            recv(stop_rx) -> _ => break,
        }
    }

    tracing::info!("wwand stopped");
    Ok(())
}
