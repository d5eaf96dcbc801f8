// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Reading store abstraction
//!
//! Defines the persisted reading, the query filter, and the trait storage
//! backends implement (SQLite, in-memory).

use anyhow::{bail, Result};
use chrono::NaiveDateTime;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};

/// A persisted sensor reading
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reading {
    /// Device identifier (topic segment 0)
    #[serde(rename = "deviceName")]
    pub device: String,

    /// Sensor category, or field name for structured readings
    #[serde(rename = "sensorType")]
    pub sensor_type: String,

    /// Value as received, string-encoded
    pub value: String,

    /// Local time at which the reading was written
    pub timestamp: NaiveDateTime,
}

impl Reading {
    pub fn new(
        device: impl Into<String>,
        sensor_type: impl Into<String>,
        value: impl Into<String>,
        timestamp: NaiveDateTime,
    ) -> Self {
        Self {
            device: device.into(),
            sensor_type: sensor_type.into(),
            value: value.into(),
            timestamp,
        }
    }
}

/// Inclusive time window `[start, end]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeRange {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}

impl TimeRange {
    /// A range with `start > end` is valid and matches nothing.
    pub fn new(start: NaiveDateTime, end: NaiveDateTime) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, timestamp: NaiveDateTime) -> bool {
        self.start <= timestamp && timestamp <= self.end
    }
}

/// Query filter: device is mandatory, sensor type and time range optional.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadingFilter {
    pub device: String,
    pub sensor_type: Option<String>,
    pub range: Option<TimeRange>,
}

impl ReadingFilter {
    /// Match every reading of `device`
    pub fn device(device: impl Into<String>) -> Self {
        Self {
            device: device.into(),
            sensor_type: None,
            range: None,
        }
    }

    /// Restrict to one sensor type
    pub fn sensor_type(mut self, sensor_type: impl Into<String>) -> Self {
        self.sensor_type = Some(sensor_type.into());
        self
    }

    /// Restrict to `[start, end]`
    pub fn between(mut self, start: NaiveDateTime, end: NaiveDateTime) -> Self {
        self.range = Some(TimeRange::new(start, end));
        self
    }

    /// Restrict to `[start, end]` only when both bounds are given.
    pub fn bounds(self, start: Option<NaiveDateTime>, end: Option<NaiveDateTime>) -> Self {
        match (start, end) {
            (Some(start), Some(end)) => self.between(start, end),
            _ => self,
        }
    }

    /// Check a reading against this filter
    pub fn matches(&self, reading: &Reading) -> bool {
        reading.device == self.device
            && self
                .sensor_type
                .as_ref()
                .map_or(true, |t| *t == reading.sensor_type)
            && self
                .range
                .map_or(true, |range| range.contains(reading.timestamp))
    }
}

/// Reading store trait
///
/// Backend-agnostic interface for persisting and querying readings.
///
/// Query results are ordered by ascending timestamp; readings with equal
/// timestamps come back in insertion order.
///
/// # Implementations
///
/// - `SqliteStore` -- Default, file-backed
/// - `MemoryStore` -- Volatile, for tests and dry runs
pub trait ReadingStore: Send + Sync {
    /// Persist one reading
    fn save(&self, reading: &Reading) -> Result<()>;

    /// All readings matching `filter` (empty when nothing matches)
    fn query(&self, filter: &ReadingFilter) -> Result<Vec<Reading>>;

    /// Distinct device identifiers, sorted
    fn devices(&self) -> Result<Vec<String>>;

    /// Get total number of readings stored
    fn count(&self) -> Result<usize>;

    /// Clear all readings
    fn clear(&self) -> Result<()>;
}

/// In-memory reading store
///
/// Writes for sensor types registered with [`MemoryStore::fail_writes_for`]
/// are rejected, which lets tests exercise storage failures.
#[derive(Debug, Default)]
pub struct MemoryStore {
    readings: Mutex<Vec<Reading>>,
    failing: Mutex<HashSet<String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject every subsequent write whose sensor type is `sensor_type`
    pub fn fail_writes_for(&self, sensor_type: impl Into<String>) {
        self.failing.lock().insert(sensor_type.into());
    }

    /// Snapshot of everything stored, in insertion order
    pub fn all(&self) -> Vec<Reading> {
        self.readings.lock().clone()
    }
}

impl ReadingStore for MemoryStore {
    fn save(&self, reading: &Reading) -> Result<()> {
        if self.failing.lock().contains(&reading.sensor_type) {
            bail!("write rejected for sensor type '{}'", reading.sensor_type);
        }
        self.readings.lock().push(reading.clone());
        Ok(())
    }

    fn query(&self, filter: &ReadingFilter) -> Result<Vec<Reading>> {
        let mut matched: Vec<Reading> = self
            .readings
            .lock()
            .iter()
            .filter(|r| filter.matches(r))
            .cloned()
            .collect();

        // Stable: ties keep insertion order
        matched.sort_by_key(|r| r.timestamp);
        Ok(matched)
    }

    fn devices(&self) -> Result<Vec<String>> {
        let devices: BTreeSet<String> = self
            .readings
            .lock()
            .iter()
            .map(|r| r.device.clone())
            .collect();
        Ok(devices.into_iter().collect())
    }

    fn count(&self) -> Result<usize> {
        Ok(self.readings.lock().len())
    }

    fn clear(&self) -> Result<()> {
        self.readings.lock().clear();
        Ok(())
    }
}
