use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use tracing::info;

use crate::aranet::Device;

/// Runtime configuration, assembled once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    pub devices: Vec<Device>,

    /// Address the Prometheus endpoint listens on.
    pub listen: SocketAddr,

    pub verbose: bool,

    /// Publish live values even when the reading is past its interval.
    pub report_old_data: bool,

    /// Bound on each of the connect and read phases of a fetch.
    pub fetch_timeout: Duration,

    pub homekit: Option<HomekitConfig>,
}

#[derive(Debug, Clone)]
pub struct HomekitConfig {
    pub state_dir: PathBuf,

    pub pin: String,

    pub setup_id: String,
}

impl Config {
    pub fn log_config(&self) {
        info!("Configuration loaded:");
        for device in &self.devices {
            info!("  device          : {} ({})", device.id, device.name);
        }
        info!("  listen          : {}", self.listen);
        info!("  verbose         : {}", self.verbose);
        info!("  report old data : {}", self.report_old_data);
        info!("  fetch timeout   : {:?}", self.fetch_timeout);
        match &self.homekit {
            Some(homekit) => info!("  homekit state   : {:?}", homekit.state_dir),
            None => info!("  homekit         : disabled"),
        }
    }
}
