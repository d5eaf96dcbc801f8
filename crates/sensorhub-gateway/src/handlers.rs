// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! HTTP request handlers for REST API.

use crate::AppState;
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Accepted `startDate`/`endDate` format
const DATE_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// API error response
#[derive(Serialize)]
pub struct ApiError {
    pub error: String,
    pub code: u16,
}

impl ApiError {
    fn bad_request(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            code: 400,
        }
    }

    fn internal() -> Self {
        Self {
            error: "Internal server error".into(),
            code: 500,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(self)).into_response()
    }
}

// Storage details stay in the log, not in the response
impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        tracing::error!("Query failed: {:#}", err);
        Self::internal()
    }
}

impl From<tokio::task::JoinError> for ApiError {
    fn from(err: tokio::task::JoinError) -> Self {
        tracing::error!("Query task failed: {}", err);
        Self::internal()
    }
}

/// Query string of `GET /api/sensor-data`
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SensorDataParams {
    pub device_name: String,
    pub sensor_type: Option<String>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
}

fn parse_date(name: &str, value: Option<&str>) -> Result<Option<NaiveDateTime>, ApiError> {
    match value.filter(|v| !v.is_empty()) {
        None => Ok(None),
        Some(v) => NaiveDateTime::parse_from_str(v, DATE_FORMAT)
            .map(Some)
            .map_err(|_| {
                ApiError::bad_request(format!(
                    "Invalid {} '{}': expected yyyy-MM-ddTHH:mm:ss",
                    name, v
                ))
            }),
    }
}

/// GET /api/sensor-data
///
/// 200 with the matching readings, 404 with a plain-text message when none match.
pub async fn sensor_data(
    State(state): State<Arc<AppState>>,
    Query(params): Query<SensorDataParams>,
) -> Result<Response, ApiError> {
    let start = parse_date("startDate", params.start_date.as_deref())?;
    let end = parse_date("endDate", params.end_date.as_deref())?;
    let sensor_type = params.sensor_type.filter(|t| !t.is_empty());

    let queries = state.queries().clone();
    let device = params.device_name.clone();
    let lookup_type = sensor_type.clone();
    let readings = tokio::task::spawn_blocking(move || {
        queries.lookup(&device, lookup_type.as_deref(), start, end)
    })
    .await??;

    if readings.is_empty() {
        let message = match sensor_type {
            Some(t) => format!(
                "No data found for device {} and sensor type {}",
                params.device_name, t
            ),
            None => format!("No data found for device {}", params.device_name),
        };
        return Ok((StatusCode::NOT_FOUND, message).into_response());
    }

    Ok((StatusCode::OK, Json(readings)).into_response())
}

#[derive(Serialize)]
struct DeviceEntry {
    name: String,
}

#[derive(Serialize)]
struct DeviceList {
    devices: Vec<DeviceEntry>,
}

/// GET /api/sensor-data/devices
pub async fn devices(State(state): State<Arc<AppState>>) -> Result<Response, ApiError> {
    let queries = state.queries().clone();
    let names = tokio::task::spawn_blocking(move || queries.devices()).await??;

    let list = DeviceList {
        devices: names.into_iter().map(|name| DeviceEntry { name }).collect(),
    };
    Ok((StatusCode::OK, Json(list)).into_response())
}

/// GET /api/v1/health
pub async fn health() -> Response {
    (StatusCode::OK, Json(serde_json::json!({ "status": "ok" }))).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::build_router;
    use chrono::NaiveDate;
    use sensorhub_ingest::{QueryService, Reading, ReadingStore, SqliteStore};
    use serde_json::Value;
    use std::net::SocketAddr;

    fn t(hour: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 5, 1)
            .unwrap()
            .and_hms_opt(hour, 0, 0)
            .unwrap()
    }

    async fn spawn_server() -> SocketAddr {
        let store = Arc::new(SqliteStore::new_in_memory().unwrap());
        let rows = [
            ("harbaoui", "temperature", "21.5", t(1)),
            ("harbaoui", "temperature", "22", t(5)),
            ("harbaoui", "motion", "1", t(6)),
            ("kitchen", "humidity", "40", t(2)),
        ];
        for (device, sensor_type, value, ts) in rows {
            store
                .save(&Reading::new(device, sensor_type, value, ts))
                .unwrap();
        }

        let state = Arc::new(AppState::new(QueryService::new(store)));
        let app = build_router(state);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        addr
    }

    async fn get(addr: SocketAddr, path: &str) -> reqwest::Response {
        reqwest::get(format!("http://{}{}", addr, path)).await.unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let addr = spawn_server().await;

        let resp = get(addr, "/api/v1/health").await;
        assert_eq!(resp.status().as_u16(), 200);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn test_sensor_data_by_device_and_type() {
        let addr = spawn_server().await;

        let resp = get(
            addr,
            "/api/sensor-data?deviceName=harbaoui&sensorType=temperature",
        )
        .await;
        assert_eq!(resp.status().as_u16(), 200);

        let body: Value = resp.json().await.unwrap();
        let readings = body.as_array().unwrap();
        assert_eq!(readings.len(), 2);
        assert_eq!(readings[0]["deviceName"], "harbaoui");
        assert_eq!(readings[0]["sensorType"], "temperature");
        assert_eq!(readings[0]["value"], "21.5");
        assert_eq!(readings[0]["timestamp"], "2025-05-01T01:00:00");
        assert_eq!(readings[1]["value"], "22");
    }

    #[tokio::test]
    async fn test_sensor_data_all_types_with_range() {
        let addr = spawn_server().await;

        let resp = get(
            addr,
            "/api/sensor-data?deviceName=harbaoui&sensorType=&startDate=2025-05-01T04:00:00&endDate=2025-05-01T06:00:00",
        )
        .await;
        assert_eq!(resp.status().as_u16(), 200);

        let body: Value = resp.json().await.unwrap();
        let types: Vec<&str> = body
            .as_array()
            .unwrap()
            .iter()
            .map(|r| r["sensorType"].as_str().unwrap())
            .collect();
        assert_eq!(types, vec!["temperature", "motion"]);
    }

    #[tokio::test]
    async fn test_single_date_bound_is_ignored() {
        let addr = spawn_server().await;

        let resp = get(
            addr,
            "/api/sensor-data?deviceName=harbaoui&startDate=2025-05-01T23:00:00",
        )
        .await;
        assert_eq!(resp.status().as_u16(), 200);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body.as_array().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_not_found_messages() {
        let addr = spawn_server().await;

        let resp = get(addr, "/api/sensor-data?deviceName=ghost").await;
        assert_eq!(resp.status().as_u16(), 404);
        assert_eq!(resp.text().await.unwrap(), "No data found for device ghost");

        let resp = get(addr, "/api/sensor-data?deviceName=harbaoui&sensorType=fall").await;
        assert_eq!(resp.status().as_u16(), 404);
        assert_eq!(
            resp.text().await.unwrap(),
            "No data found for device harbaoui and sensor type fall"
        );
    }

    #[tokio::test]
    async fn test_bad_requests() {
        let addr = spawn_server().await;

        let resp = get(
            addr,
            "/api/sensor-data?deviceName=harbaoui&startDate=yesterday&endDate=2025-05-01T06:00:00",
        )
        .await;
        assert_eq!(resp.status().as_u16(), 400);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["code"], 400);
        assert!(body["error"].as_str().unwrap().contains("startDate"));

        let resp = get(addr, "/api/sensor-data?sensorType=temperature").await;
        assert_eq!(resp.status().as_u16(), 400);
    }

    #[test]
    fn test_storage_errors_are_not_exposed() {
        let err = anyhow::anyhow!("disk I/O error").context("Failed to query readings.db");
        let api_error = ApiError::from(err);

        assert_eq!(api_error.code, 500);
        assert_eq!(api_error.error, "Internal server error");
        assert_eq!(api_error.into_response().status().as_u16(), 500);
    }

    #[tokio::test]
    async fn test_devices() {
        let addr = spawn_server().await;

        let resp = get(addr, "/api/sensor-data/devices").await;
        assert_eq!(resp.status().as_u16(), 200);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(
            body,
            serde_json::json!({ "devices": [{ "name": "harbaoui" }, { "name": "kitchen" }] })
        );
    }
}
