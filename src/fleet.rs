use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Result, bail};
use indexmap::IndexMap;
use macaddr::MacAddr6;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{info, warn};

use crate::aranet::{Device, DeviceReader, Poller, ReadingCache, RoomSensor, Sensor, Transport};
use crate::homekit::Accessory;

pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug)]
struct Member {
    device: Device,
    cache: Arc<ReadingCache>,
    accessory: Arc<Accessory>,
}

/// Every configured device, each with its own cache and accessory mirror.
#[derive(Debug)]
pub struct Fleet {
    members: IndexMap<MacAddr6, Member>,
}

impl Fleet {
    /// Fails if two devices share an address or a name.
    pub fn new(devices: impl IntoIterator<Item = Device>) -> Result<Self> {
        let mut members = IndexMap::new();
        let mut names = HashSet::new();

        for device in devices {
            if members.contains_key(&device.id) {
                bail!("duplicate Bluetooth IDs are not allowed: {}", device.id);
            }
            if !names.insert(device.name.clone()) {
                bail!("duplicate device names are not allowed: {}", device.name);
            }

            let accessory = Arc::new(Accessory::new(device.name.clone()));
            members.insert(
                device.id,
                Member {
                    device,
                    cache: Arc::default(),
                    accessory,
                },
            );
        }

        if members.is_empty() {
            bail!("at least one device is required");
        }

        Ok(Self { members })
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Read handles for the publisher, in configuration order.
    pub fn sensors(&self) -> Vec<Arc<dyn RoomSensor>> {
        self.members
            .values()
            .map(|m| {
                Arc::new(Sensor::new(m.device.name.clone(), Arc::clone(&m.cache))) as Arc<dyn RoomSensor>
            })
            .collect()
    }

    pub fn accessories(&self) -> Vec<Arc<Accessory>> {
        self.members
            .values()
            .map(|m| Arc::clone(&m.accessory))
            .collect()
    }

    /// Starts one poller task per device. All of them stop when `cancel` fires.
    pub fn spawn<T: Transport>(
        &self,
        reader: &DeviceReader<T>,
        tracker: &TaskTracker,
        cancel: &CancellationToken,
    ) {
        for member in self.members.values() {
            let poller = Poller::new(
                member.device.id,
                member.device.name.clone(),
                Arc::clone(&member.cache),
                reader.clone(),
            )
            .with_sink(member.accessory.clone());

            tracker.spawn(poller.run(cancel.child_token()));
        }
    }
}

/// Waits up to `grace` for every tracked task. Returns `false` if the
/// deadline passed first; the tasks are left running in that case.
pub async fn wait_for_shutdown(tracker: &TaskTracker, grace: Duration) -> bool {
    tracker.close();

    match time::timeout(grace, tracker.wait()).await {
        Ok(()) => {
            info!("shutdown complete");
            true
        }
        Err(_) => {
            warn!("graceful shutdown did not finish within {grace:?}");
            false
        }
    }
}
