use anyhow::{Error, bail};
use chrono::{DateTime, TimeDelta, Utc};

/// Device-reported air quality tier (the Aranet4 traffic light).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[repr(u8)]
pub enum AirQuality {
    #[default]
    Unknown = 0,
    Green = 1,
    Amber = 2,
    Red = 3,
}

impl TryFrom<u8> for AirQuality {
    type Error = Error;

    fn try_from(v: u8) -> Result<Self, Self::Error> {
        match v {
            0 => Ok(AirQuality::Unknown),
            1 => Ok(AirQuality::Green),
            2 => Ok(AirQuality::Amber),
            3 => Ok(AirQuality::Red),
            _ => bail!("unknown air quality tier: {v}"),
        }
    }
}

/// One snapshot of every sensor value of a device.
///
/// A reading is valid over `[measured_at, measured_at + interval]`. It is
/// never patched in place: a refresh always replaces the whole value.
/// `Default` is the zero reading held before the first successful fetch.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Reading {
    pub temperature_celsius: f64,

    pub humidity_percent: f64,

    pub pressure_hpa: f64,

    pub co2_ppm: u16,

    pub battery_percent: u8,

    pub quality: AirQuality,

    pub measured_at: DateTime<Utc>,

    pub interval: TimeDelta,
}

// Live values are published until 110% of the device interval has elapsed.
const PUBLISH_SLACK_NUMERATOR: i32 = 11;
const PUBLISH_SLACK_DENOMINATOR: i32 = 10;

impl Reading {
    pub fn age(&self, now: DateTime<Utc>) -> TimeDelta {
        now - self.measured_at
    }

    pub fn next_measurement_at(&self) -> DateTime<Utc> {
        self.measured_at + self.interval
    }

    /// Whether the device has (probably) produced a newer value than this one.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.age(now) >= self.interval
    }

    /// Whether the live values are still recent enough to be reported.
    pub fn is_publishable(&self, now: DateTime<Utc>) -> bool {
        let cutoff = self.interval * PUBLISH_SLACK_NUMERATOR / PUBLISH_SLACK_DENOMINATOR;
        self.age(now) < cutoff
    }
}
