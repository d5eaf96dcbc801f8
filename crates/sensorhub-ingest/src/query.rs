// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Historical reading queries
//!
//! Both entry points build a [`ReadingFilter`] and run it once against the
//! store. A time range applies only when both bounds are given. An empty
//! result is not an error; the HTTP layer decides what "nothing" means.

use crate::store::{Reading, ReadingFilter, ReadingStore};
use anyhow::Result;
use chrono::NaiveDateTime;
use std::sync::Arc;

/// Read-only query service over a reading store.
pub struct QueryService<S: ReadingStore> {
    store: Arc<S>,
}

impl<S: ReadingStore> Clone for QueryService<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
        }
    }
}

impl<S: ReadingStore> QueryService<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Run an explicit filter.
    pub fn query(&self, filter: &ReadingFilter) -> Result<Vec<Reading>> {
        self.store.query(filter)
    }

    /// Readings of one sensor type on one device.
    pub fn query_by_device_and_type(
        &self,
        device: &str,
        sensor_type: &str,
        start: Option<NaiveDateTime>,
        end: Option<NaiveDateTime>,
    ) -> Result<Vec<Reading>> {
        let filter = ReadingFilter::device(device)
            .sensor_type(sensor_type)
            .bounds(start, end);
        self.query(&filter)
    }

    /// Readings of every sensor type on one device.
    pub fn query_by_device(
        &self,
        device: &str,
        start: Option<NaiveDateTime>,
        end: Option<NaiveDateTime>,
    ) -> Result<Vec<Reading>> {
        let filter = ReadingFilter::device(device).bounds(start, end);
        self.query(&filter)
    }

    /// Dispatch on an optional sensor type; `None` or `""` means every type.
    pub fn lookup(
        &self,
        device: &str,
        sensor_type: Option<&str>,
        start: Option<NaiveDateTime>,
        end: Option<NaiveDateTime>,
    ) -> Result<Vec<Reading>> {
        match sensor_type.filter(|t| !t.is_empty()) {
            Some(sensor_type) => self.query_by_device_and_type(device, sensor_type, start, end),
            None => self.query_by_device(device, start, end),
        }
    }

    /// Devices that have at least one stored reading.
    pub fn devices(&self) -> Result<Vec<String>> {
        self.store.devices()
    }
}
