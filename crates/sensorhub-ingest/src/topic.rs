// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Topic decomposition
//!
//! Sensor nodes publish on `<device>/<routing>/<category>[/...]`. Only the
//! device (segment 0) and the sensor category (segment 2) carry meaning here.

/// Device identifier and sensor category extracted from a topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TopicParts<'a> {
    /// Segment 0, e.g. `harbaoui`
    pub device: &'a str,
    /// Segment 2, e.g. `sensors_data`, `motion`, `fall`
    pub category: &'a str,
}

/// Split a topic into its device and category.
///
/// Returns `None` when the topic has fewer than three segments. Trailing
/// empty segments do not count, so `dev/esp32/` is rejected while
/// `dev/esp32/motion/extra` yields `motion`.
pub fn decompose(topic: &str) -> Option<TopicParts<'_>> {
    let mut segments = topic.trim_end_matches('/').split('/');

    let device = segments.next()?;
    let _routing = segments.next()?;
    let category = segments.next()?;

    Some(TopicParts { device, category })
}
