use std::ops::RangeInclusive;
use std::sync::{Mutex, PoisonError};

use anyhow::{Result, bail};
use serde::Serialize;
use tracing::warn;

use crate::aranet::{AirQuality, Reading, ReadingSink};

const TEMPERATURE_RANGE: RangeInclusive<f64> = -270.0..=100.0;
const HUMIDITY_RANGE: RangeInclusive<f64> = 0.0..=100.0;
const CO2_RANGE: RangeInclusive<f64> = 0.0..=100_000.0;
const AIR_QUALITY_RANGE: RangeInclusive<u8> = 0..=5;
const BATTERY_RANGE: RangeInclusive<u8> = 0..=100;

/// Characteristic values of the HomeKit sensor accessory for one device.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AccessoryState {
    pub current_temperature: f64,

    pub carbon_dioxide_level: f64,

    /// HomeKit scale: 0 unknown, 1 excellent .. 5 poor.
    pub air_quality: u8,

    pub current_relative_humidity: f64,

    pub battery_level: u8,
}

/// Mirrors the latest reading of one device into HomeKit characteristics.
#[derive(Debug)]
pub struct Accessory {
    room: String,
    state: Mutex<AccessoryState>,
}

impl Accessory {
    pub fn new(room: impl Into<String>) -> Self {
        Self {
            room: room.into(),
            state: Mutex::default(),
        }
    }

    pub fn name(&self) -> &'static str {
        "Aranet4"
    }

    pub fn room(&self) -> &str {
        &self.room
    }

    pub fn snapshot(&self) -> AccessoryState {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Applies every characteristic independently; a value outside its valid
    /// range is logged and leaves the previous value in place.
    pub fn update(&self, reading: &Reading) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);

        let results = [
            (
                "temperature",
                set_checked(
                    &mut state.current_temperature,
                    reading.temperature_celsius,
                    TEMPERATURE_RANGE,
                ),
            ),
            (
                "carbon dioxide level",
                set_checked(
                    &mut state.carbon_dioxide_level,
                    f64::from(reading.co2_ppm),
                    CO2_RANGE,
                ),
            ),
            (
                "air quality",
                set_checked(
                    &mut state.air_quality,
                    homekit_air_quality(reading.quality),
                    AIR_QUALITY_RANGE,
                ),
            ),
            (
                "humidity",
                set_checked(
                    &mut state.current_relative_humidity,
                    reading.humidity_percent,
                    HUMIDITY_RANGE,
                ),
            ),
            (
                "battery level",
                set_checked(
                    &mut state.battery_level,
                    reading.battery_percent,
                    BATTERY_RANGE,
                ),
            ),
        ];

        for (characteristic, result) in results {
            if let Err(err) = result {
                warn!(room = %self.room, "failed to accept {characteristic}: {err:#}");
            }
        }
    }
}

impl ReadingSink for Accessory {
    fn accept(&self, reading: &Reading) {
        self.update(reading);
    }
}

fn homekit_air_quality(quality: AirQuality) -> u8 {
    match quality {
        AirQuality::Green => 1,
        AirQuality::Amber => 3,
        AirQuality::Red => 5,
        AirQuality::Unknown => 0,
    }
}

fn set_checked<T>(slot: &mut T, value: T, range: RangeInclusive<T>) -> Result<()>
where
    T: PartialOrd + Copy + std::fmt::Display,
{
    if !range.contains(&value) {
        bail!(
            "value {value} out of range {}..={}",
            range.start(),
            range.end()
        );
    }

    *slot = value;
    Ok(())
}
