use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Result, anyhow};
use aranet4_exporter::aranet::{AirQuality, Device, DeviceReader, Handle, Reading, Transport};
use aranet4_exporter::fleet::{Fleet, SHUTDOWN_GRACE, wait_for_shutdown};
use aranet4_exporter::metrics::{Metric, Publisher};
use chrono::{TimeDelta, Utc};
use macaddr::MacAddr6;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

/// Devices that answer with a fixed reading; anything else is out of range.
struct Bench {
    readings: HashMap<MacAddr6, Reading>,
}

struct BenchHandle(Reading);

impl Transport for Bench {
    type Handle = BenchHandle;

    async fn connect(&self, id: MacAddr6) -> Result<BenchHandle> {
        self.readings
            .get(&id)
            .map(|r| BenchHandle(*r))
            .ok_or_else(|| anyhow!("device out of range"))
    }
}

impl Handle for BenchHandle {
    async fn read(&mut self) -> Result<Reading> {
        Ok(self.0)
    }

    async fn close(self) -> Result<()> {
        Ok(())
    }
}

fn device(s: &str) -> Device {
    s.parse().unwrap()
}

#[tokio::test]
async fn publishes_reachable_devices_and_bookkeeping_for_the_rest() {
    let bedroom = device("D8:9B:67:AA:BB:CC=bedroom");
    let attic = device("D8:9B:67:AA:BB:DD=attic");
    let reading = Reading {
        temperature_celsius: 19.5,
        humidity_percent: 48.0,
        pressure_hpa: 1012.3,
        co2_ppm: 812,
        battery_percent: 64,
        quality: AirQuality::Amber,
        measured_at: Utc::now() - TimeDelta::seconds(20),
        interval: TimeDelta::minutes(5),
    };
    let transport = Arc::new(Bench {
        readings: HashMap::from([(bedroom.id, reading)]),
    });

    let fleet = Fleet::new([bedroom, attic]).unwrap();
    let publisher = Publisher::new(fleet.sensors(), false).unwrap();
    let reader = DeviceReader::new(transport, Duration::from_secs(1));
    let tracker = TaskTracker::new();
    let cancel = CancellationToken::new();

    fleet.spawn(&reader, &tracker, &cancel);

    let samples = time::timeout(Duration::from_secs(5), async {
        loop {
            let samples = publisher.samples(Utc::now());
            if samples.len() == 7 + 2 {
                return samples;
            }
            time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("bedroom reading was never published");

    let value = |metric, room: &str| {
        samples
            .iter()
            .find(|s| s.metric == metric && s.room == room)
            .map(|s| s.value)
    };
    assert_eq!(value(Metric::Co2, "bedroom"), Some(812.0));
    assert_eq!(value(Metric::Battery, "bedroom"), Some(64.0));
    assert_eq!(value(Metric::Co2, "attic"), None);
    assert_eq!(value(Metric::LastScrape, "attic"), Some(0.0));
    assert_eq!(value(Metric::NextScrape, "attic"), Some(0.0));

    let bedroom_accessory = &fleet.accessories()[0];
    assert_eq!(bedroom_accessory.room(), "bedroom");
    assert_eq!(bedroom_accessory.snapshot().air_quality, 3);

    cancel.cancel();
    assert!(wait_for_shutdown(&tracker, SHUTDOWN_GRACE).await);
}

#[test]
fn rejects_fleet_with_repeated_name() {
    let err = Fleet::new([
        device("D8:9B:67:AA:BB:CC=office"),
        device("D8:9B:67:AA:BB:DD=office"),
    ])
    .unwrap_err();

    assert!(err.to_string().contains("duplicate device names are not allowed"));
}
