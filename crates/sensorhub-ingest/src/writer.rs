// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Reading writer
//!
//! Stamps a reading with the current local time and hands it to the store.
//! Sender-side timestamps are never trusted.

use crate::store::{Reading, ReadingStore};
use anyhow::Result;
use chrono::{Local, NaiveDateTime, SubsecRound};
use std::sync::Arc;

/// Source of write timestamps.
pub type Clock = fn() -> NaiveDateTime;

/// Local wall-clock time, truncated to the microsecond precision of the store.
pub fn local_now() -> NaiveDateTime {
    Local::now().naive_local().trunc_subsecs(6)
}

/// Persists one reading per call. No deduplication happens here.
pub struct ReadingWriter<S: ReadingStore> {
    store: Arc<S>,
    clock: Clock,
}

impl<S: ReadingStore> ReadingWriter<S> {
    /// Create a writer stamping readings with [`local_now`]
    pub fn new(store: Arc<S>) -> Self {
        Self::with_clock(store, local_now)
    }

    pub fn with_clock(store: Arc<S>, clock: Clock) -> Self {
        Self { store, clock }
    }

    /// Persist `(device, sensor_type, value)` stamped with the current time.
    pub fn write(&self, device: &str, sensor_type: &str, value: &str) -> Result<Reading> {
        let reading = Reading::new(device, sensor_type, value, (self.clock)());
        self.store.save(&reading)?;
        Ok(reading)
    }
}
