use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use aranet4_exporter::aranet::Device;
use aranet4_exporter::config::{Config, HomekitConfig};
use clap::Parser;

#[derive(Debug, Parser)]
#[command(version, about)]
pub struct Args {
    /// Monitor an Aranet4 with format {ID} or {ID}={name}. May be specified multiple times.
    /// Examples: --device D8:9B:67:AA:BB:CC=bedroom --device D8:9B:67:AA:BB:DD
    #[arg(long = "device", value_name = "ID[=NAME]", required = true)]
    pub devices: Vec<Device>,

    /// Address to expose Prometheus metrics on
    #[arg(long, default_value = "0.0.0.0:9963")]
    pub listen: SocketAddr,

    /// Verbose logging
    #[arg(long)]
    pub verbose: bool,

    /// Enable HomeKit support
    #[arg(long)]
    pub homekit: bool,

    /// Directory to store persistent state
    #[arg(long = "state", env = "STATE_DIRECTORY", default_value = "./")]
    pub state_dir: PathBuf,

    /// Keep publishing readings that are past their measurement interval
    #[arg(long)]
    pub report_old_data: bool,

    #[arg(long, default_value = "12344321")]
    pub homekit_pin: String,

    #[arg(long, default_value = "RNDM")]
    pub homekit_setup_id: String,

    /// Give up on a connect or read after this many seconds
    #[arg(long, value_name = "SECS", default_value_t = 30)]
    pub fetch_timeout: u64,
}

impl From<Args> for Config {
    fn from(args: Args) -> Self {
        let homekit = args.homekit.then(|| HomekitConfig {
            state_dir: args.state_dir.join("homekit"),
            pin: args.homekit_pin,
            setup_id: args.homekit_setup_id,
        });

        Config {
            devices: args.devices,
            listen: args.listen,
            verbose: args.verbose,
            report_old_data: args.report_old_data,
            fetch_timeout: Duration::from_secs(args.fetch_timeout),
            homekit,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_repeated_devices() {
        let args = Args::try_parse_from([
            "aranet4-exporter",
            "--device",
            "D8:9B:67:AA:BB:CC=bedroom",
            "--device",
            "D8:9B:67:AA:BB:DD",
        ])
        .unwrap();

        let config = Config::from(args);
        assert_eq!(config.devices.len(), 2);
        assert_eq!(config.devices[0].name, "bedroom");
        assert_eq!(config.listen, "0.0.0.0:9963".parse().unwrap());
        assert_eq!(config.fetch_timeout, Duration::from_secs(30));
        assert!(config.homekit.is_none());
    }

    #[test]
    fn homekit_state_lives_under_state_dir() {
        let args = Args::try_parse_from([
            "aranet4-exporter",
            "--device",
            "D8:9B:67:AA:BB:CC",
            "--homekit",
            "--state",
            "/var/lib/aranet4",
        ])
        .unwrap();

        let homekit = Config::from(args).homekit.unwrap();
        assert_eq!(homekit.state_dir, PathBuf::from("/var/lib/aranet4/homekit"));
        assert_eq!(homekit.pin, "12344321");
        assert_eq!(homekit.setup_id, "RNDM");
    }

    #[test]
    fn rejects_invalid_device() {
        assert!(Args::try_parse_from(["aranet4-exporter", "--device", "bedroom"]).is_err());
        assert!(Args::try_parse_from(["aranet4-exporter"]).is_err());
    }
}
