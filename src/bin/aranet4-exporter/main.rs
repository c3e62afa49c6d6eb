mod args;
mod ble;
mod http;

use std::env;
use std::io::IsTerminal as _;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context as _, Result, anyhow};
use aranet4_exporter::aranet::DeviceReader;
use aranet4_exporter::config::Config;
use aranet4_exporter::fleet::{Fleet, SHUTDOWN_GRACE, wait_for_shutdown};
use aranet4_exporter::homekit::{Bridge, StandbyServer, qr_code_url};
use aranet4_exporter::metrics::Publisher;
use args::Args;
use btleplug::api::Manager as _;
use btleplug::platform::Manager;
use clap::Parser as _;
use prometheus::Registry;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{error, info};
use tracing_subscriber::filter::EnvFilter;

use crate::ble::aranet4::BleTransport;

struct Exporter {
    fleet: Fleet,
    bridge: Option<Bridge>,
    publisher: Publisher,
}

#[tokio::main]
async fn main() -> ExitCode {
    let config = Config::from(Args::parse());
    init_tracing(config.verbose);
    config.log_config();

    let exporter = match setup(&config) {
        Ok(e) => e,
        Err(err) => {
            error!("{err:#}");
            return ExitCode::from(2);
        }
    };

    if let Err(err) = run(&config, exporter).await {
        error!("{err:#}");
        return ExitCode::from(1);
    }

    ExitCode::SUCCESS
}

/// Validates everything that can be checked before touching Bluetooth or the network.
fn setup(config: &Config) -> Result<Exporter> {
    let fleet = Fleet::new(config.devices.iter().cloned())?;

    let bridge = config
        .homekit
        .as_ref()
        .map(|h| Bridge::new(&h.state_dir, &h.pin, &h.setup_id, fleet.accessories()))
        .transpose()?;

    let publisher = Publisher::new(fleet.sensors(), config.report_old_data)?;

    Ok(Exporter {
        fleet,
        bridge,
        publisher,
    })
}

async fn run(config: &Config, exporter: Exporter) -> Result<()> {
    let Exporter {
        fleet,
        bridge,
        publisher,
    } = exporter;

    let registry = Registry::new();
    registry
        .register(Box::new(publisher))
        .context("failed to register aranet4 collector")?;
    #[cfg(target_os = "linux")]
    registry
        .register(Box::new(prometheus::process_collector::ProcessCollector::for_self()))
        .context("failed to register process collector")?;

    let manager = Manager::new()
        .await
        .context("failed to initialize Bluetooth manager")?;

    let adapters = manager
        .adapters()
        .await
        .context("failed to get Bluetooth adapters")?;

    let adapter = adapters
        .into_iter()
        .next()
        .ok_or_else(|| anyhow!("no Bluetooth adapters found"))?;

    let reader = DeviceReader::new(Arc::new(BleTransport::new(adapter)), config.fetch_timeout);
    let tracker = TaskTracker::new();
    let cancel = CancellationToken::new();

    info!(devices = fleet.len(), "starting pollers");
    fleet.spawn(&reader, &tracker, &cancel);

    let server = tracker.spawn({
        let registry = registry.clone();
        let cancel = cancel.clone();
        let listen = config.listen;
        async move {
            let result = http::serve(listen, registry, cancel.clone()).await;
            cancel.cancel();
            result
        }
    });

    if let Some(bridge) = bridge {
        info!(pin = %bridge.pin(), "homekit pairing code");
        info!("homekit pairing QR code: {}", qr_code_url(bridge.setup_uri()));

        let cancel = cancel.clone();
        tracker.spawn(async move {
            if let Err(err) = bridge.serve(&StandbyServer, cancel.child_token()).await {
                error!("homekit bridge failed: {err:#}");
            }
        });
    }

    tokio::select! {
        result = shutdown_signal() => {
            result?;
            info!("shutdown requested");
        }
        _ = cancel.cancelled() => {}
    }

    cancel.cancel();
    wait_for_shutdown(&tracker, SHUTDOWN_GRACE).await;

    if server.is_finished() {
        server.await.context("metrics server panicked")??;
    }

    Ok(())
}

#[cfg(unix)]
async fn shutdown_signal() -> Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut terminate =
        signal(SignalKind::terminate()).context("failed to install SIGTERM handler")?;

    tokio::select! {
        result = tokio::signal::ctrl_c() => result.context("failed to listen for ctrl-c"),
        _ = terminate.recv() => Ok(()),
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() -> Result<()> {
    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")
}

/// `RUST_LOG` wins when set. Otherwise `debug` with `--verbose`, `info` without.
fn init_tracing(verbose: bool) {
    let env_filter = if env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::fmt()
        .with_target(verbose)
        .with_env_filter(env_filter)
        .with_ansi(std::io::stderr().is_terminal())
        .with_writer(std::io::stderr)
        .compact()
        .init();
}
