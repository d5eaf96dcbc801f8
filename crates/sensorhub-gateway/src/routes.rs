// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Route definitions for the REST API.

use crate::handlers;
use crate::AppState;
use axum::{routing::get, Router};
use std::sync::Arc;

/// API routes
pub fn api_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/sensor-data", get(handlers::sensor_data))
        .route("/api/sensor-data/devices", get(handlers::devices))
        .route("/api/v1/health", get(handlers::health))
}
