use std::sync::Arc;

use crate::aranet::{Reading, ReadingCache};

/// Anything that can report a room label and its latest reading.
pub trait RoomSensor: Send + Sync {
    fn room(&self) -> &str;

    fn current_reading(&self) -> Reading;
}

/// The read side of a registered device. Shares its cache with the poller.
#[derive(Debug, Clone)]
pub struct Sensor {
    room: String,
    cache: Arc<ReadingCache>,
}

impl Sensor {
    pub fn new(room: impl Into<String>, cache: Arc<ReadingCache>) -> Self {
        Self {
            room: room.into(),
            cache,
        }
    }
}

impl RoomSensor for Sensor {
    fn room(&self) -> &str {
        &self.room
    }

    fn current_reading(&self) -> Reading {
        self.cache.get()
    }
}
