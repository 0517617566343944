//! Host options, their normalized form and endpoint resolution.
//!
//! Hosts hand over loosely typed JSON. [`FingerprintOptions`] accepts it the way
//! a browser host would (truthy flags, any numeric value, unknown keys ignored)
//! and [`FingerprintOptions::normalize`] turns it into a [`FingerprintConfig`]
//! where every numeric field is clamped or defaulted.

use std::collections::BTreeSet;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::error::FingerprintError;

/// Deadline applied to the whole flow when none is given.
pub const DEFAULT_TIMEOUT_MS: u64 = 8_000;
/// Lowest accepted deadline.
pub const MIN_TIMEOUT_MS: u64 = 1_000;
/// Retries after the first attempt.
pub const DEFAULT_RETRY_ATTEMPTS: u32 = 2;
/// Base delay of the exponential backoff.
pub const DEFAULT_BASE_DELAY_MS: u64 = 250;
/// Upper bound for a single backoff delay.
pub const DEFAULT_MAX_DELAY_MS: u64 = 2_000;
/// Statuses considered transient.
pub const DEFAULT_RETRY_STATUSES: [u16; 6] = [408, 429, 500, 502, 503, 504];
/// Environment variables consulted for the endpoint, in order.
pub const ENDPOINT_ENV_VARS: [&str; 2] = ["FP_API_URL", "FINGERPRINT_API_URL"];

/// Options as supplied by the host.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FingerprintOptions {
    /// Include the persistent device identifier.
    #[serde(deserialize_with = "truthy")]
    pub device_id: bool,
    /// Include the soft-tier digest.
    #[serde(deserialize_with = "truthy")]
    pub fp_soft: bool,
    /// Include the hard-tier digest.
    #[serde(deserialize_with = "truthy")]
    pub fp_hard: bool,
    /// Attach the raw signals of every requested tier.
    #[serde(deserialize_with = "truthy")]
    pub send_signals: bool,
    /// Global deadline in milliseconds.
    #[serde(deserialize_with = "lenient_number")]
    pub timeout_ms: Option<f64>,
    /// Per-call endpoint, takes precedence over the widget's endpoint.
    #[serde(deserialize_with = "lenient_string")]
    pub endpoint: Option<String>,
    /// Retry tuning.
    pub retry: Option<RetryOptions>,
}

/// Retry options as supplied by the host.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RetryOptions {
    /// Retries after the first attempt.
    #[serde(deserialize_with = "lenient_number")]
    pub attempts: Option<f64>,
    /// Base delay of the exponential backoff.
    #[serde(deserialize_with = "lenient_number")]
    pub base_delay_ms: Option<f64>,
    /// Cap for a single delay.
    #[serde(deserialize_with = "lenient_number")]
    pub max_delay_ms: Option<f64>,
    /// Statuses that trigger a retry. Replaces the default set when present.
    #[serde(deserialize_with = "lenient_statuses")]
    pub retry_on_statuses: Option<Vec<u16>>,
}

/// Normalized flow configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FingerprintConfig {
    /// Include the persistent device identifier.
    pub device_id: bool,
    /// Include the soft-tier digest.
    pub fp_soft: bool,
    /// Include the hard-tier digest.
    pub fp_hard: bool,
    /// Attach raw signals of the requested tiers.
    pub send_signals: bool,
    /// Global deadline, at least [`MIN_TIMEOUT_MS`].
    pub timeout_ms: u64,
    /// Submission retry policy.
    pub retry: RetryPolicy,
}

/// Retry policy applied by [`crate::Submitter::post_with_retry`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryPolicy {
    /// Retries after the first attempt; total attempts is `attempts + 1`.
    pub attempts: u32,
    /// Base delay of the exponential backoff.
    pub base_delay_ms: u64,
    /// Cap for a single delay.
    pub max_delay_ms: u64,
    /// Statuses considered transient.
    pub retry_on_statuses: BTreeSet<u16>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: DEFAULT_RETRY_ATTEMPTS,
            base_delay_ms: DEFAULT_BASE_DELAY_MS,
            max_delay_ms: DEFAULT_MAX_DELAY_MS,
            retry_on_statuses: DEFAULT_RETRY_STATUSES.into_iter().collect(),
        }
    }
}

impl Default for FingerprintConfig {
    fn default() -> Self {
        Self {
            device_id: false,
            fp_soft: false,
            fp_hard: false,
            send_signals: false,
            timeout_ms: DEFAULT_TIMEOUT_MS,
            retry: RetryPolicy::default(),
        }
    }
}

impl FingerprintOptions {
    /// Parses host options from JSON.
    ///
    /// # Errors
    /// Returns an error if the input is not a JSON object.
    pub fn from_json(json: &str) -> Result<Self, FingerprintError> {
        serde_json::from_str(json).map_err(|e| FingerprintError::Serialization {
            error: format!("invalid fingerprint options json: {e}"),
        })
    }

    /// Clamps and defaults every field.
    #[must_use]
    pub fn normalize(&self) -> FingerprintConfig {
        let retry = self.retry.clone().unwrap_or_default();
        FingerprintConfig {
            device_id: self.device_id,
            fp_soft: self.fp_soft,
            fp_hard: self.fp_hard,
            send_signals: self.send_signals,
            timeout_ms: clamp_ms(self.timeout_ms, MIN_TIMEOUT_MS, DEFAULT_TIMEOUT_MS),
            retry: RetryPolicy {
                attempts: u32::try_from(clamp_ms(
                    retry.attempts,
                    0,
                    u64::from(DEFAULT_RETRY_ATTEMPTS),
                ))
                .unwrap_or(u32::MAX),
                base_delay_ms: clamp_ms(retry.base_delay_ms, 0, DEFAULT_BASE_DELAY_MS),
                max_delay_ms: clamp_ms(retry.max_delay_ms, 0, DEFAULT_MAX_DELAY_MS),
                retry_on_statuses: retry.retry_on_statuses.map_or_else(
                    || DEFAULT_RETRY_STATUSES.into_iter().collect(),
                    |statuses| statuses.into_iter().collect(),
                ),
            },
        }
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn clamp_ms(value: Option<f64>, min: u64, default: u64) -> u64 {
    match value {
        Some(v) if v.is_finite() => {
            // `as` saturates at the u64 bounds.
            (v.floor() as u64).max(min)
        }
        _ => default,
    }
}

/// Reads the endpoint from the first non-empty variable of [`ENDPOINT_ENV_VARS`].
#[must_use]
pub fn endpoint_from_env() -> Option<String> {
    endpoint_from_lookup(|name| std::env::var(name).ok())
}

/// Same as [`endpoint_from_env`] over an arbitrary variable lookup.
pub fn endpoint_from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Option<String> {
    ENDPOINT_ENV_VARS
        .iter()
        .find_map(|name| non_empty(lookup(name)))
}

/// Picks the endpoint for one flow: per-call value, then the widget's value.
///
/// # Errors
/// Returns [`FingerprintError::Configuration`] when neither is set.
pub fn resolve_endpoint(
    per_call: Option<&str>,
    configured: Option<&str>,
) -> Result<String, FingerprintError> {
    non_empty(per_call.map(str::to_string))
        .or_else(|| non_empty(configured.map(str::to_string)))
        .ok_or_else(|| {
            FingerprintError::configuration(
                "FP_API_URL is not configured. Set FP_API_URL or FINGERPRINT_API_URL, \
                 or pass an explicit endpoint.",
            )
        })
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn truthy<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
    Ok(match Value::deserialize(deserializer)? {
        Value::Null => false,
        Value::Bool(b) => b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f.abs() > 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    })
}

fn lenient_number<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<f64>, D::Error> {
    Ok(Value::deserialize(deserializer)?.as_f64())
}

fn lenient_string<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<String>, D::Error> {
    Ok(match Value::deserialize(deserializer)? {
        Value::String(s) => Some(s),
        _ => None,
    })
}

fn lenient_statuses<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<Vec<u16>>, D::Error> {
    Ok(match Value::deserialize(deserializer)? {
        Value::Array(items) => Some(
            items
                .iter()
                .filter_map(Value::as_u64)
                .filter_map(|status| u16::try_from(status).ok())
                .collect(),
        ),
        _ => None,
    })
}
