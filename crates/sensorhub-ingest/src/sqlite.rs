// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! SQLite reading store
//!
//! Durable storage for readings; the schema is what dashboards read against.

use crate::store::{Reading, ReadingFilter, ReadingStore};
use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDateTime};
use parking_lot::Mutex;
use rusqlite::{params, Connection};

/// SQLite reading store
///
/// Thread-safe via internal Mutex (SQLite Connection is not Sync).
///
/// # Schema
///
/// ```sql
/// CREATE TABLE readings (
///     id INTEGER PRIMARY KEY AUTOINCREMENT,
///     device_name TEXT NOT NULL,
///     sensor_type TEXT NOT NULL,
///     value TEXT NOT NULL,
///     timestamp_us INTEGER NOT NULL
/// );
/// CREATE INDEX idx_device_sensor ON readings(device_name, sensor_type);
/// CREATE INDEX idx_timestamp ON readings(timestamp_us);
/// ```
///
/// `timestamp_us` holds the local wall-clock time as microseconds since
/// 1970-01-01T00:00:00 (no zone conversion).
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Create a new SQLite store with a file-based database
    pub fn new(path: &str) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open SQLite database at {}", path))?;

        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    /// Create an in-memory SQLite store (for testing)
    pub fn new_in_memory() -> Result<Self> {
        let conn =
            Connection::open_in_memory().context("Failed to create in-memory SQLite database")?;

        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.conn.lock();

        conn.execute(
            "CREATE TABLE IF NOT EXISTS readings (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                device_name TEXT NOT NULL,
                sensor_type TEXT NOT NULL,
                value TEXT NOT NULL,
                timestamp_us INTEGER NOT NULL
            )",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_device_sensor ON readings(device_name, sensor_type)",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_timestamp ON readings(timestamp_us)",
            [],
        )?;

        Ok(())
    }

    fn row_to_reading(row: &rusqlite::Row) -> rusqlite::Result<Reading> {
        let micros: i64 = row.get(3)?;
        let timestamp =
            from_micros(micros).ok_or(rusqlite::Error::IntegralValueOutOfRange(3, micros))?;

        Ok(Reading {
            device: row.get(0)?,
            sensor_type: row.get(1)?,
            value: row.get(2)?,
            timestamp,
        })
    }
}

fn to_micros(timestamp: NaiveDateTime) -> i64 {
    timestamp.and_utc().timestamp_micros()
}

fn from_micros(micros: i64) -> Option<NaiveDateTime> {
    DateTime::from_timestamp_micros(micros).map(|dt| dt.naive_utc())
}

impl ReadingStore for SqliteStore {
    fn save(&self, reading: &Reading) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO readings (device_name, sensor_type, value, timestamp_us)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                reading.device,
                reading.sensor_type,
                reading.value,
                to_micros(reading.timestamp),
            ],
        )
        .with_context(|| {
            format!(
                "Failed to insert reading {}/{}",
                reading.device, reading.sensor_type
            )
        })?;

        Ok(())
    }

    fn query(&self, filter: &ReadingFilter) -> Result<Vec<Reading>> {
        let conn = self.conn.lock();

        // One statement covers all four filter combinations: NULL parameters
        // disable their clause.
        let mut stmt = conn.prepare_cached(
            "SELECT device_name, sensor_type, value, timestamp_us
             FROM readings
             WHERE device_name = ?1
               AND (?2 IS NULL OR sensor_type = ?2)
               AND (?3 IS NULL OR timestamp_us BETWEEN ?3 AND ?4)
             ORDER BY timestamp_us ASC, id ASC",
        )?;

        let start = filter.range.map(|r| to_micros(r.start));
        let end = filter.range.map(|r| to_micros(r.end));

        let readings = stmt
            .query_map(
                params![filter.device, filter.sensor_type, start, end],
                Self::row_to_reading,
            )?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(readings)
    }

    fn devices(&self) -> Result<Vec<String>> {
        let conn = self.conn.lock();
        let mut stmt =
            conn.prepare("SELECT DISTINCT device_name FROM readings ORDER BY device_name ASC")?;

        let devices = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;

        Ok(devices)
    }

    fn count(&self) -> Result<usize> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM readings", [], |row| row.get(0))?;

        Ok(count as usize)
    }

    fn clear(&self) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute("DELETE FROM readings", [])?;
        Ok(())
    }
}
