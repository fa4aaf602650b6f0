//! Parsing of the electrometer's measurement payloads.
//!
//! The extractor knows nothing about channel identity. A sample's channel is its position
//! in the payload, which the device server fixes by the order it builds the string in
//! (input 1 first). Callers map positions back to channels with
//! [`ChannelId::buffer_index`](crate::channel_registry::ChannelId::buffer_index).

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

/// Signed decimal with a mandatory decimal point, so labels such as `CH1` are skipped.
static DECIMAL_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[-+]?(?:\d+\.\d*|\.\d+)(?:[eE][-+]?\d+)?").expect("Invalid decimal regex")
});

/// Where the per-channel values of a finished acquisition are read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionStrategy {
    /// One `Meas` attribute holding every channel's value.
    #[default]
    Aggregate,
    /// Last sample of each `CurrentCh<n>` buffer. Kept for older device servers.
    PerChannel,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MeasurementError {
    #[error("Could not parse {value:?} in measurement payload {payload:?}")]
    Malformed { value: String, payload: String },

    #[error("Expected {expected} channel values, found {found} in measurement payload {payload:?}")]
    ChannelCount {
        expected: usize,
        found: usize,
        payload: String,
    },
}

/// Samples of one acquisition cycle, in channel order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MeasurementBuffer {
    values: Vec<f64>,
}

impl MeasurementBuffer {
    pub fn new(values: Vec<f64>) -> Self {
        Self { values }
    }

    pub fn get(&self, index: usize) -> Option<f64> {
        self.values.get(index).copied()
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

fn list_body(raw: &str) -> &str {
    raw.trim_matches(|c: char| c == '[' || c == ']' || c.is_whitespace())
}

fn parse_sample(value: &str, payload: &str) -> Result<f64, MeasurementError> {
    let value = value.trim();
    if value.is_empty() {
        return Ok(f64::NAN);
    }
    value.parse().map_err(|_| MeasurementError::Malformed {
        value: value.to_string(),
        payload: payload.to_string(),
    })
}

/// Last element of a bracketed list such as `[1.0, 2.0, 3.0]`.
///
/// An empty list, or an empty last element, yields NaN.
pub fn extract_last(raw: &str) -> Result<f64, MeasurementError> {
    let last = list_body(raw).rsplit(',').next().unwrap_or_default();
    parse_sample(last, raw)
}

/// Every element of a bracketed list, blanks as NaN.
pub fn extract_series(raw: &str) -> Result<Vec<f64>, MeasurementError> {
    let body = list_body(raw);
    if body.is_empty() {
        return Ok(Vec::new());
    }
    body.split(',').map(|value| parse_sample(value, raw)).collect()
}

/// All decimal numbers embedded in `raw`, left to right.
pub fn extract_all(raw: &str) -> Vec<f64> {
    DECIMAL_REGEX
        .find_iter(raw)
        .filter_map(|m| m.as_str().parse().ok())
        .collect()
}

/// Exactly `channels` decimal numbers from `raw`, one per channel in payload order.
///
/// Any other count is rejected: once a sample is missing, every later one would be
/// attributed to the wrong channel.
pub fn extract_channels(raw: &str, channels: usize) -> Result<Vec<f64>, MeasurementError> {
    let values = extract_all(raw);
    if values.len() == channels {
        Ok(values)
    } else {
        Err(MeasurementError::ChannelCount {
            expected: channels,
            found: values.len(),
            payload: raw.to_string(),
        })
    }
}
