use std::sync::{PoisonError, RwLock};

use crate::aranet::Reading;

/// Single-slot store for the latest reading of one device.
///
/// One poller writes, any number of scrapes read. A reading is stored and
/// returned by value, so a reader never sees a half-written one.
#[derive(Debug, Default)]
pub struct ReadingCache {
    slot: RwLock<Reading>,
}

impl ReadingCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> Reading {
        // a panicking writer cannot leave a partial value behind
        *self.slot.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set(&self, reading: Reading) {
        *self.slot.write().unwrap_or_else(PoisonError::into_inner) = reading;
    }
}
