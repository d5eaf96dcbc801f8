// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Change-detection cache
//!
//! Remembers the last value seen for every logical signal so that only
//! genuine changes reach storage. The cache is volatile: after a restart the
//! first reading of every signal counts as a change.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::fmt;

/// Identity of one logical signal.
///
/// Scalar readings are keyed by `(device, category)`; each field of a
/// structured reading gets its own key `(device, category, field)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    device: String,
    category: String,
    field: Option<String>,
}

impl CacheKey {
    /// Key for a scalar reading.
    pub fn new(device: impl Into<String>, category: impl Into<String>) -> Self {
        Self {
            device: device.into(),
            category: category.into(),
            field: None,
        }
    }

    /// Key for one field of a structured reading.
    pub fn with_field(
        device: impl Into<String>,
        category: impl Into<String>,
        field: impl Into<String>,
    ) -> Self {
        Self {
            device: device.into(),
            category: category.into(),
            field: Some(field.into()),
        }
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.field {
            Some(field) => write!(f, "{}/{}/{}", self.device, self.category, field),
            None => write!(f, "{}/{}", self.device, self.category),
        }
    }
}

/// Last observed value per signal.
///
/// `observe` is the only way in: the compare and the update happen under the
/// shard lock of the key, so two concurrent observations of the same key are
/// serialized.
#[derive(Debug, Default)]
pub struct ChangeCache {
    entries: DashMap<CacheKey, String>,
}

impl ChangeCache {
    /// Create an empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `value` for `key`.
    ///
    /// Returns `true` (and stores the value) when the key is new or the value
    /// differs from the stored one, `false` otherwise.
    pub fn observe(&self, key: CacheKey, value: &str) -> bool {
        match self.entries.entry(key) {
            Entry::Occupied(mut entry) => {
                if entry.get() == value {
                    false
                } else {
                    entry.insert(value.to_string());
                    true
                }
            }
            Entry::Vacant(entry) => {
                entry.insert(value.to_string());
                true
            }
        }
    }

    /// Number of tracked signals
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
