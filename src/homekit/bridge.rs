use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context as _, Result};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::homekit::{
    Accessory, AccessoryState, IP_TRANSPORT_FLAG, Pin, SENSOR_CATEGORY, SetupId, setup_uri,
};

pub const BRIDGE_NAME: &str = "Aranet4 Exporter";
const BRIDGE_MANUFACTURER: &str = "aranet4-exporter";
const BRIDGE_MODEL: &str = "Aranet4 BLE bridge";
const STATE_FILE: &str = "bridge.json";

/// What a pairing server needs to announce the bridge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BridgeInfo {
    pub name: String,

    pub manufacturer: String,

    pub model: String,

    /// `XXX-XX-XXX`
    pub pin: String,

    pub setup_id: String,
}

/// Serves the accessory pairing protocol for a bridge until cancelled.
pub trait PairingServer: Send + Sync {
    fn serve(
        &self,
        bridge: &Bridge,
        cancel: CancellationToken,
    ) -> impl Future<Output = Result<()>> + Send;
}

/// HomeKit bridge exposing one accessory per monitored device.
#[derive(Debug)]
pub struct Bridge {
    state_dir: PathBuf,
    pin: Pin,
    setup_id: SetupId,
    setup_uri: String,
    accessories: Vec<Arc<Accessory>>,
}

impl Bridge {
    /// Fails on a malformed pin or setup id, before anything is opened.
    pub fn new(
        state_dir: impl Into<PathBuf>,
        pin: &str,
        setup_id: &str,
        accessories: Vec<Arc<Accessory>>,
    ) -> Result<Self> {
        let pin: Pin = pin.parse().context("failed homekit setup")?;
        let setup_id: SetupId = setup_id.parse().context("failed homekit setup")?;
        let setup_uri = setup_uri(
            SENSOR_CATEGORY,
            IP_TRANSPORT_FLAG,
            pin.as_str(),
            setup_id.as_str(),
        )
        .context("failed homekit setup")?;

        Ok(Self {
            state_dir: state_dir.into(),
            pin,
            setup_id,
            setup_uri,
            accessories,
        })
    }

    /// Human readable pin, `XXX-XX-XXX`.
    pub fn pin(&self) -> String {
        self.pin.formatted()
    }

    pub fn setup_uri(&self) -> &str {
        &self.setup_uri
    }

    pub fn state_dir(&self) -> &Path {
        &self.state_dir
    }

    pub fn accessories(&self) -> &[Arc<Accessory>] {
        &self.accessories
    }

    pub fn info(&self) -> BridgeInfo {
        BridgeInfo {
            name: BRIDGE_NAME.to_owned(),
            manufacturer: BRIDGE_MANUFACTURER.to_owned(),
            model: BRIDGE_MODEL.to_owned(),
            pin: self.pin(),
            setup_id: self.setup_id.to_string(),
        }
    }

    pub async fn serve<S: PairingServer>(&self, server: &S, cancel: CancellationToken) -> Result<()> {
        server.serve(self, cancel).await
    }
}

/// Link to a rendered QR code for the setup URI.
pub fn qr_code_url(uri: &str) -> String {
    format!("https://chart.googleapis.com/chart?cht=qr&chl={uri}&chs=400x400")
}

#[derive(Debug, Serialize)]
struct PersistedBridge {
    name: String,
    manufacturer: String,
    model: String,
    setup_id: String,
    accessories: Vec<PersistedAccessory>,
}

#[derive(Debug, Serialize)]
struct PersistedAccessory {
    name: &'static str,
    room: String,
    state: AccessoryState,
}

/// Records the bridge and its accessories in the state directory and holds
/// until cancelled, without speaking HAP on the network.
#[derive(Debug, Default)]
pub struct StandbyServer;

impl StandbyServer {
    async fn persist(&self, bridge: &Bridge) -> Result<PathBuf> {
        let info = bridge.info();
        let persisted = PersistedBridge {
            name: info.name,
            manufacturer: info.manufacturer,
            model: info.model,
            setup_id: info.setup_id,
            accessories: bridge
                .accessories()
                .iter()
                .map(|a| PersistedAccessory {
                    name: a.name(),
                    room: a.room().to_owned(),
                    state: a.snapshot(),
                })
                .collect(),
        };
        let json = serde_json::to_vec_pretty(&persisted).context("failed to encode bridge state")?;

        tokio::fs::create_dir_all(bridge.state_dir())
            .await
            .with_context(|| format!("failed to create state directory: {:?}", bridge.state_dir()))?;
        let path = bridge.state_dir().join(STATE_FILE);
        tokio::fs::write(&path, json)
            .await
            .with_context(|| format!("failed to write bridge state: {path:?}"))?;

        Ok(path)
    }
}

impl PairingServer for StandbyServer {
    async fn serve(&self, bridge: &Bridge, cancel: CancellationToken) -> Result<()> {
        let path = self.persist(bridge).await?;
        info!(?path, accessories = bridge.accessories().len(), "homekit bridge on standby");

        cancel.cancelled().await;

        self.persist(bridge).await?;
        Ok(())
    }
}
