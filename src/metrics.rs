use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context as _, Result};
use chrono::{DateTime, Utc};
use prometheus::core::{Collector, Desc};
use prometheus::proto::MetricFamily;
use prometheus::{GaugeVec, Opts};
use tracing::{error, warn};

use crate::aranet::RoomSensor;

const ROOM_LABEL: &str = "room";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Metric {
    Co2,
    Temperature,
    Humidity,
    Pressure,
    Battery,
    LastScrape,
    NextScrape,
}

impl Metric {
    pub const ALL: [Metric; 7] = [
        Metric::Co2,
        Metric::Temperature,
        Metric::Humidity,
        Metric::Pressure,
        Metric::Battery,
        Metric::LastScrape,
        Metric::NextScrape,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Metric::Co2 => "aranet4_co2_ppm",
            Metric::Temperature => "aranet4_temperature_c",
            Metric::Humidity => "aranet4_humidity_percent",
            Metric::Pressure => "aranet4_pressure_hpa",
            Metric::Battery => "aranet4_battery_percent",
            Metric::LastScrape => "aranet4_collector_last_scrape",
            Metric::NextScrape => "aranet4_collector_next_scrape",
        }
    }

    pub fn help(&self) -> &'static str {
        match self {
            Metric::Co2 => "CO2 level in parts per million.",
            Metric::Temperature => "Temperature in celcius.",
            Metric::Humidity => "Relative humidity as percentage.",
            Metric::Pressure => "Atmospheric pressure in hPa.",
            Metric::Battery => "Battery level as percentage.",
            Metric::LastScrape => "Last scrape time as unix time.",
            Metric::NextScrape => "Next scrape time as unix time.",
        }
    }

    fn opts(&self) -> Opts {
        Opts::new(self.name(), self.help())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub metric: Metric,

    pub room: String,

    pub value: f64,
}

/// Publishes the cached reading of every sensor on each scrape.
///
/// Live values are left out once a reading is older than 110% of its
/// interval, unless `report_old_data` is set. Last/next scrape times are
/// always published.
pub struct Publisher {
    sensors: Vec<Arc<dyn RoomSensor>>,
    report_old_data: bool,
    descs: Vec<Desc>,
}

impl Publisher {
    pub fn new(sensors: Vec<Arc<dyn RoomSensor>>, report_old_data: bool) -> Result<Self> {
        let descs = Metric::ALL
            .iter()
            .map(|m| {
                Desc::new(
                    m.name().to_owned(),
                    m.help().to_owned(),
                    vec![ROOM_LABEL.to_owned()],
                    HashMap::new(),
                )
                .with_context(|| format!("invalid metric description: {}", m.name()))
            })
            .collect::<Result<_>>()?;

        Ok(Self {
            sensors,
            report_old_data,
            descs,
        })
    }

    /// Samples for every sensor as of `now`. Each cache is read exactly once.
    pub fn samples(&self, now: DateTime<Utc>) -> Vec<Sample> {
        let mut samples = Vec::with_capacity(self.sensors.len() * Metric::ALL.len());

        for sensor in &self.sensors {
            let reading = sensor.current_reading();
            let room = sensor.room();
            let mut push = |metric, value| {
                samples.push(Sample {
                    metric,
                    room: room.to_owned(),
                    value,
                })
            };

            if self.report_old_data || reading.is_publishable(now) {
                push(Metric::Co2, f64::from(reading.co2_ppm));
                push(Metric::Temperature, reading.temperature_celsius);
                push(Metric::Humidity, reading.humidity_percent);
                push(Metric::Pressure, reading.pressure_hpa);
                push(Metric::Battery, f64::from(reading.battery_percent));
            }

            push(Metric::LastScrape, reading.measured_at.timestamp() as f64);
            push(
                Metric::NextScrape,
                reading.next_measurement_at().timestamp() as f64,
            );
        }

        samples
    }
}

impl Collector for Publisher {
    fn desc(&self) -> Vec<&Desc> {
        self.descs.iter().collect()
    }

    fn collect(&self) -> Vec<MetricFamily> {
        let gauges: HashMap<Metric, GaugeVec> = match Metric::ALL
            .iter()
            .map(|&m| GaugeVec::new(m.opts(), &[ROOM_LABEL]).map(|g| (m, g)))
            .collect::<prometheus::Result<_>>()
        {
            Ok(gauges) => gauges,
            Err(err) => {
                error!("failed to build aranet4 gauges: {err}");
                return Vec::new();
            }
        };

        for sample in self.samples(Utc::now()) {
            let Some(gauge) = gauges.get(&sample.metric) else {
                continue;
            };
            match gauge.get_metric_with_label_values(&[sample.room.as_str()]) {
                Ok(g) => g.set(sample.value),
                Err(err) => warn!(
                    metric = sample.metric.name(),
                    room = %sample.room,
                    "failed to publish sample: {err}"
                ),
            }
        }

        Metric::ALL
            .iter()
            .filter_map(|m| gauges.get(m))
            .flat_map(|g| g.collect())
            .collect()
    }
}
