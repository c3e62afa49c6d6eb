use std::time::Duration;

use anyhow::{Context as _, Result, anyhow, bail};
use aranet4_exporter::aranet::{AirQuality, Handle, Reading, Transport};
use btleplug::api::{Central, CentralEvent, Characteristic, Peripheral as _, ScanFilter};
use btleplug::platform::{Adapter, Peripheral};
use chrono::{DateTime, TimeDelta, Utc};
use macaddr::MacAddr6;
use tokio::time;
use tokio_stream::StreamExt as _;
use tracing::{debug, warn};
use uuid::{Uuid, uuid};

// Ref: https://github.com/Anrijs/Aranet4-Python/blob/master/docs/UUIDs.md
const CURRENT_READINGS_DETAIL_UUID: Uuid = uuid!("f0cd3001-95da-4f4b-9ac8-aa55d312af0c");

const CURRENT_READINGS_DETAIL_LEN: usize = 13;

const SCAN_TIMEOUT: Duration = Duration::from_secs(20);

/// Reaches Aranet4 devices through the first Bluetooth adapter.
pub struct BleTransport {
    adapter: Adapter,
}

impl BleTransport {
    pub fn new(adapter: Adapter) -> Self {
        Self { adapter }
    }

    async fn find_peripheral(&self, id: MacAddr6) -> Result<Peripheral> {
        let peripherals = self
            .adapter
            .peripherals()
            .await
            .context("failed to get BLE peripherals")?;
        if let Some(peripheral) = peripherals.into_iter().find(|p| mac_address(p) == id) {
            return Ok(peripheral);
        }

        debug!(%id, "scanning for aranet4");
        let mut events = self
            .adapter
            .events()
            .await
            .context("failed to subscribe to BLE events")?;
        self.adapter
            .start_scan(ScanFilter::default())
            .await
            .context("failed to start BLE scan")?;
        let scan = ScanGuard(Some(self.adapter.clone()));

        let found: Result<Result<Peripheral>, _> = time::timeout(SCAN_TIMEOUT, async {
            while let Some(event) = events.next().await {
                let CentralEvent::DeviceDiscovered(peripheral_id) = event else {
                    continue;
                };
                let peripheral = self
                    .adapter
                    .peripheral(&peripheral_id)
                    .await
                    .with_context(|| format!("failed to get BLE peripheral: {peripheral_id:?}"))?;
                if mac_address(&peripheral) == id {
                    return Ok(peripheral);
                }
            }
            bail!("BLE event stream ended")
        })
        .await;

        scan.stop().await;

        found.map_err(|_| anyhow!("aranet4 not found within {SCAN_TIMEOUT:?}"))?
    }
}

impl Transport for BleTransport {
    type Handle = BleHandle;

    async fn connect(&self, id: MacAddr6) -> Result<BleHandle> {
        let peripheral = self.find_peripheral(id).await?;
        let link = LinkGuard(Some(peripheral.clone()));
        peripheral
            .connect()
            .await
            .context("failed to connect to BLE peripheral")?;

        match find_current_readings(&peripheral).await {
            Ok(characteristic) => {
                link.release();
                Ok(BleHandle {
                    peripheral,
                    characteristic,
                })
            }
            Err(err) => {
                link.disconnect().await;
                Err(err)
            }
        }
    }
}

/// Stops an active scan. Dropping it unawaited stops the scan in the background.
struct ScanGuard(Option<Adapter>);

impl ScanGuard {
    async fn stop(mut self) {
        if let Some(adapter) = self.0.take() {
            stop_scan(adapter).await;
        }
    }
}

impl Drop for ScanGuard {
    fn drop(&mut self) {
        if let Some(adapter) = self.0.take() {
            spawn_cleanup(stop_scan(adapter));
        }
    }
}

/// Disconnects a peripheral unless released into a [`BleHandle`]. Dropping it
/// unawaited, as a timed out connect does, disconnects in the background.
struct LinkGuard(Option<Peripheral>);

impl LinkGuard {
    fn release(mut self) {
        self.0 = None;
    }

    async fn disconnect(mut self) {
        if let Some(peripheral) = self.0.take() {
            disconnect(peripheral).await;
        }
    }
}

impl Drop for LinkGuard {
    fn drop(&mut self) {
        if let Some(peripheral) = self.0.take() {
            spawn_cleanup(disconnect(peripheral));
        }
    }
}

async fn stop_scan(adapter: Adapter) {
    if let Err(err) = adapter.stop_scan().await {
        warn!("failed to stop BLE scan: {err:#}");
    }
}

async fn disconnect(peripheral: Peripheral) {
    if let Err(err) = peripheral.disconnect().await {
        warn!(id = %mac_address(&peripheral), "failed to disconnect from aranet4: {err:#}");
    }
}

fn spawn_cleanup(cleanup: impl Future<Output = ()> + Send + 'static) {
    match tokio::runtime::Handle::try_current() {
        Ok(runtime) => {
            runtime.spawn(cleanup);
        }
        Err(_) => warn!("no runtime left to release BLE resources"),
    }
}

pub struct BleHandle {
    peripheral: Peripheral,
    characteristic: Characteristic,
}

impl Handle for BleHandle {
    async fn read(&mut self) -> Result<Reading> {
        let data = self
            .peripheral
            .read(&self.characteristic)
            .await
            .context("failed to read current readings")?;

        decode_current_readings(&data, Utc::now())
            .context("failed to decode Aranet4 current readings")
    }

    async fn close(self) -> Result<()> {
        self.peripheral
            .disconnect()
            .await
            .context("failed to disconnect from BLE peripheral")
    }
}

fn mac_address(peripheral: &Peripheral) -> MacAddr6 {
    peripheral.address().into_inner().into()
}

async fn find_current_readings(peripheral: &Peripheral) -> Result<Characteristic> {
    peripheral
        .discover_services()
        .await
        .context("failed to discover BLE services")?;

    peripheral
        .characteristics()
        .into_iter()
        .find(|c| c.uuid == CURRENT_READINGS_DETAIL_UUID)
        .ok_or_else(|| {
            anyhow!("Aranet4 current readings characteristic not found: {CURRENT_READINGS_DETAIL_UUID}")
        })
}

/// Decodes the detailed current readings characteristic.
///
/// Layout (little endian): CO2 u16, temperature u16 (1/20 °C), pressure u16
/// (1/10 hPa), humidity u8, battery u8, status u8, interval u16 (s), seconds
/// since the measurement u16. Out-of-range values are passed through for
/// consumers to check; an unknown status decodes as [`AirQuality::Unknown`].
pub fn decode_current_readings(data: &[u8], now: DateTime<Utc>) -> Result<Reading> {
    if data.len() < CURRENT_READINGS_DETAIL_LEN {
        bail!(
            "Aranet4 current readings too short: expected at least {CURRENT_READINGS_DETAIL_LEN} bytes, got {}",
            data.len()
        )
    }

    let co2_ppm = u16::from_le_bytes([data[0], data[1]]);
    let temperature_celsius = f64::from(u16::from_le_bytes([data[2], data[3]])) / 20f64;
    let pressure_hpa = f64::from(u16::from_le_bytes([data[4], data[5]])) / 10f64;
    let humidity_percent = f64::from(data[6]);
    let battery_percent = data[7];
    let quality = AirQuality::try_from(data[8]).unwrap_or_else(|err| {
        warn!("failed to decode status: {err:#}");
        AirQuality::Unknown
    });
    let interval = TimeDelta::seconds(i64::from(u16::from_le_bytes([data[9], data[10]])));
    let age = TimeDelta::seconds(i64::from(u16::from_le_bytes([data[11], data[12]])));

    Ok(Reading {
        temperature_celsius,
        humidity_percent,
        pressure_hpa,
        co2_ppm,
        battery_percent,
        quality,
        measured_at: now - age,
        interval,
    })
}
