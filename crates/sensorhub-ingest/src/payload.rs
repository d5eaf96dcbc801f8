// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Payload decoding
//!
//! Nodes publish either a composite telemetry object under the reserved
//! `sensors_data` category, or a bare value (motion, fall, presence...) under
//! any other category. The branch is chosen from the category before the
//! payload is looked at.

use thiserror::Error;

/// Category whose payload is a JSON object of named scalar fields.
pub const STRUCTURED_CATEGORY: &str = "sensors_data";

/// Decoded message body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodedPayload {
    /// `(field, value)` pairs in document order
    Structured(Vec<(String, String)>),
    /// The whole body, untouched
    Scalar(String),
}

/// Structured payload decoding errors.
///
/// Any of these drops the whole message.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("structured payload is not a JSON object")]
    NotAnObject,

    #[error("field '{field}' is not a scalar value")]
    NonScalarField { field: String },
}

/// Decode `payload` according to `category`.
pub fn decode(category: &str, payload: &str) -> Result<DecodedPayload, DecodeError> {
    if category != STRUCTURED_CATEGORY {
        return Ok(DecodedPayload::Scalar(payload.to_string()));
    }

    let value: serde_json::Value = serde_json::from_str(payload)?;
    let serde_json::Value::Object(map) = value else {
        return Err(DecodeError::NotAnObject);
    };

    let mut fields = Vec::with_capacity(map.len());
    for (field, value) in map {
        match scalar_to_string(&value) {
            Some(text) => fields.push((field, text)),
            None => return Err(DecodeError::NonScalarField { field }),
        }
    }

    Ok(DecodedPayload::Structured(fields))
}

/// Render a JSON scalar the way it is persisted: strings without quotes,
/// numbers and booleans in their JSON spelling.
fn scalar_to_string(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        serde_json::Value::Bool(b) => Some(b.to_string()),
        // Null, arrays and objects are not scalar readings
        _ => None,
    }
}
