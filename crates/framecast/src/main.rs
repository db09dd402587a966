//! `framecast`: device daemon for the framecast display appliance.
//!
//! Loads the configuration in two phases (identity first, then the
//! rest), connects to the broker, drives the panel through an external
//! display command, and runs until a shutdown sequence completes: auto
//! shutdown, the hardware switch, or SIGINT/SIGTERM.

mod cli;
mod driver;
mod error;
mod hardware;

use clap::Parser;
use tracing::{debug, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use framecast_config::ConfigLoader;
use framecast_core::{
    Appliance, AuxHardware, ConfigStore, DisplayDriver, ShutdownReason, Transport,
};
use framecast_mqtt::MqttTransport;

use crate::cli::Cli;
use crate::driver::CommandDriver;
use crate::error::DaemonError;
use crate::hardware::SysfsHardware;

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let cli = Cli::parse();
    let guard = init_tracing(&cli);

    let result = run(cli).await;
    // Flush file logs before a possible `exit`.
    drop(guard);

    if let Err(err) = result {
        let code = err.exit_code();
        eprintln!("{:?}", miette::Report::new(err));
        std::process::exit(code);
    }
}

/// Install the subscriber. Logs go to stderr, or to `--log-file` through
/// a non-blocking writer whose guard must outlive the daemon.
fn init_tracing(cli: &Cli) -> Option<WorkerGuard> {
    let level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "warn,framecast={level},framecast_core={level},framecast_config={level},framecast_mqtt={level}"
        ))
    });
    let registry = tracing_subscriber::registry().with(filter);

    let Some(path) = &cli.log_file else {
        if cli.json {
            registry
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .init();
        } else {
            registry
                .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
                .init();
        }
        return None;
    };

    let dir = path.parent().unwrap_or(std::path::Path::new("."));
    let file = path
        .file_name()
        .unwrap_or(std::ffi::OsStr::new("framecast.log"));
    let (writer, guard) = tracing_appender::non_blocking(tracing_appender::rolling::never(dir, file));

    if cli.json {
        registry.with(fmt::layer().json().with_writer(writer)).init();
    } else {
        registry
            .with(fmt::layer().with_writer(writer).with_ansi(false))
            .init();
    }
    Some(guard)
}

async fn run(cli: Cli) -> Result<(), DaemonError> {
    let loader = ConfigLoader::new(cli.config);

    if cli.print_config {
        let config = loader
            .load_full()
            .map_err(|e| DaemonError::config(e, loader.path()))?;
        let rendered = config
            .to_redacted_toml()
            .map_err(|e| DaemonError::config(e, loader.path()))?;
        print!("{rendered}");
        return Ok(());
    }

    // Identity first: it scopes the topics and the client id.
    let identity = loader
        .identity()
        .map_err(|e| DaemonError::config(e, loader.path()))?;
    let config = loader
        .load_full()
        .map_err(|e| DaemonError::config(e, loader.path()))?;
    info!(
        device = %identity,
        config = %loader.path().display(),
        "framecast starting"
    );

    let mqtt = config
        .mqtt_settings(&identity)
        .map_err(|e| DaemonError::config(e, loader.path()))?;
    let (transport, events) = MqttTransport::new(&mqtt)?;
    let driver = CommandDriver::from_config(&config.display);
    let hardware = SysfsHardware::from_config(&config.switch, &config.shutdown);
    let store = ConfigStore::new(identity, config.initial_settings());

    let appliance = Appliance::new(
        config.core_config(),
        store,
        transport,
        events,
        driver,
        hardware,
    );
    tokio::spawn(forward_signals(appliance.clone()));

    let reason = appliance.run().await;
    info!(%reason, "framecast stopped");
    Ok(())
}

/// Turn SIGINT/SIGTERM into a signal shutdown. Later signals are
/// ignored while the sequence runs.
async fn forward_signals<T, D, H>(appliance: Appliance<T, D, H>)
where
    T: Transport,
    D: DisplayDriver,
    H: AuxHardware,
{
    use tokio::signal::unix::{SignalKind, signal};

    let mut terminate = match signal(SignalKind::terminate()) {
        Ok(stream) => stream,
        Err(e) => {
            warn!(error = %e, "cannot listen for SIGTERM, only Ctrl-C will stop the daemon");
            if tokio::signal::ctrl_c().await.is_ok() {
                appliance.request_shutdown(ShutdownReason::Signal);
            }
            return;
        }
    };

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = terminate.recv() => {}
        }
        if appliance.request_shutdown(ShutdownReason::Signal) {
            info!("termination signal received, shutting down");
        } else {
            debug!("signal ignored, shutdown already in progress");
        }
    }
}
