//! Resilient submission to the fingerprint API.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use backon::{BackoffBuilder, Retryable};
use rand::{rngs::StdRng, Rng, SeedableRng};
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use reqwest::{RequestBuilder, Response};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::RetryPolicy;
use crate::error::FingerprintError;
use crate::payload::OutboundPayload;

/// Credentials sent with every submission.
#[derive(Clone)]
pub struct SubmitHeaders {
    transaction_token: String,
    access_token: String,
}

impl SubmitHeaders {
    /// Headers for one flow.
    pub fn new(transaction_token: impl Into<String>, access_token: impl Into<String>) -> Self {
        Self {
            transaction_token: transaction_token.into(),
            access_token: access_token.into(),
        }
    }
}

impl fmt::Debug for SubmitHeaders {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubmitHeaders")
            .field("transaction_token", &"<redacted>")
            .field("access_token", &"<redacted>")
            .finish()
    }
}

/// Successful API answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiResponse {
    /// HTTP status, always 2xx.
    pub status: u16,
    /// Parsed JSON body, opaque text, or `null` when unreadable.
    pub data: Value,
}

/// A thin wrapper on an HTTP client that posts payloads with retries for
/// transient failures.
#[derive(Debug, Clone)]
pub struct Submitter {
    client: reqwest::Client,
}

impl Default for Submitter {
    fn default() -> Self {
        Self::new()
    }
}

impl Submitter {
    /// Submitter with a default client.
    #[must_use]
    pub fn new() -> Self {
        Self::with_client(reqwest::Client::new())
    }

    /// Submitter over a preconfigured client (proxies, TLS roots).
    #[must_use]
    pub const fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    fn post(&self, url: &str) -> RequestBuilder {
        self.client.post(url).header(
            "User-Agent",
            format!("sye-fingerprint-core/{}", env!("CARGO_PKG_VERSION")),
        )
    }

    /// Posts `body` to `url`, retrying per `policy`.
    ///
    /// A failed attempt is retried while attempts remain and the failure
    /// either has no HTTP status or has one listed in
    /// [`RetryPolicy::retry_on_statuses`]. The last failure is returned once
    /// retries are exhausted.
    ///
    /// # Errors
    /// [`FingerprintError::Http`] for non-2xx answers,
    /// [`FingerprintError::Transport`] when no status was obtained and
    /// [`FingerprintError::Configuration`] when the request cannot be built.
    pub async fn post_with_retry(
        &self,
        url: &str,
        headers: &SubmitHeaders,
        body: &OutboundPayload,
        policy: &RetryPolicy,
    ) -> Result<ApiResponse, FingerprintError> {
        (move || async move { self.post_once(url, headers, body).await })
            .retry(JitteredBackoffBuilder::new(policy))
            .when(|err: &FingerprintError| is_retryable(err, policy))
            .notify(|err: &FingerprintError, delay: Duration| {
                log::warn!(
                    "fingerprint submission failed ({err}), retrying in {}ms",
                    delay.as_millis()
                );
            })
            .await
    }

    async fn post_once(
        &self,
        url: &str,
        headers: &SubmitHeaders,
        body: &OutboundPayload,
    ) -> Result<ApiResponse, FingerprintError> {
        let response = self
            .post(url)
            .header(CONTENT_TYPE, "application/json")
            .header("X-Transaction", headers.transaction_token.as_str())
            .header(AUTHORIZATION, format!("Bearer {}", headers.access_token))
            .json(body)
            .send()
            .await
            .map_err(|err| {
                if err.is_builder() {
                    FingerprintError::configuration(format!("request build failed: {err}"))
                } else {
                    FingerprintError::Transport {
                        url: url.to_string(),
                        error: format!("request failed: {err}"),
                    }
                }
            })?;

        let status = response.status();
        let data = read_body(response).await;
        log::debug!("fingerprint API answered {status}");

        if !status.is_success() {
            return Err(FingerprintError::Http {
                url: url.to_string(),
                status: status.as_u16(),
                data,
            });
        }

        Ok(ApiResponse {
            status: status.as_u16(),
            data,
        })
    }
}

/// JSON when the response declares it, text otherwise, `null` on failure.
async fn read_body(response: Response) -> Value {
    let is_json = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|content_type| content_type.contains("application/json"));

    let Ok(text) = response.text().await else {
        return Value::Null;
    };
    if is_json {
        serde_json::from_str(&text).unwrap_or(Value::Null)
    } else {
        Value::String(text)
    }
}

fn is_retryable(err: &FingerprintError, policy: &RetryPolicy) -> bool {
    match err {
        FingerprintError::Transport { .. } => true,
        FingerprintError::Http { status, .. } => policy.retry_on_statuses.contains(status),
        _ => false,
    }
}

/// Delay before retry `attempt` (0-indexed):
/// `min(max, floor(base * 2^attempt + U[0, base)))`.
#[must_use]
#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
pub fn backoff_delay_ms<R: Rng + ?Sized>(
    attempt: u32,
    base_delay_ms: u64,
    max_delay_ms: u64,
    rng: &mut R,
) -> u64 {
    let base = base_delay_ms as f64;
    let exponential = base * 2f64.powi(i32::try_from(attempt).unwrap_or(i32::MAX));
    let jitter = rng.gen::<f64>() * base;
    let delay = (exponential + jitter).floor();
    if delay >= max_delay_ms as f64 {
        max_delay_ms
    } else {
        delay as u64
    }
}

/// Builds [`JitteredBackoff`] from a [`RetryPolicy`].
#[derive(Debug, Clone)]
pub struct JitteredBackoffBuilder {
    attempts: u32,
    base_delay_ms: u64,
    max_delay_ms: u64,
    seed: Option<u64>,
}

impl JitteredBackoffBuilder {
    /// Builder matching `policy`.
    #[must_use]
    pub const fn new(policy: &RetryPolicy) -> Self {
        Self {
            attempts: policy.attempts,
            base_delay_ms: policy.base_delay_ms,
            max_delay_ms: policy.max_delay_ms,
            seed: None,
        }
    }

    /// Seeds the jitter for reproducible delays.
    #[must_use]
    pub const fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }
}

impl BackoffBuilder for JitteredBackoffBuilder {
    type Backoff = JitteredBackoff;

    fn build(self) -> Self::Backoff {
        JitteredBackoff {
            attempt: 0,
            attempts: self.attempts,
            base_delay_ms: self.base_delay_ms,
            max_delay_ms: self.max_delay_ms,
            rng: self
                .seed
                .map_or_else(StdRng::from_entropy, StdRng::seed_from_u64),
        }
    }
}

/// Exponential backoff with additive jitter re-rolled for every retry.
/// Yields one delay per allowed retry.
#[derive(Debug, Clone)]
pub struct JitteredBackoff {
    attempt: u32,
    attempts: u32,
    base_delay_ms: u64,
    max_delay_ms: u64,
    rng: StdRng,
}

impl Iterator for JitteredBackoff {
    type Item = Duration;

    fn next(&mut self) -> Option<Self::Item> {
        if self.attempt >= self.attempts {
            return None;
        }
        let delay = backoff_delay_ms(
            self.attempt,
            self.base_delay_ms,
            self.max_delay_ms,
            &mut self.rng,
        );
        self.attempt += 1;
        Some(Duration::from_millis(delay))
    }
}

/// Races `flow` against a timer. The flow is dropped if the timer wins.
///
/// # Errors
/// [`FingerprintError::Timeout`] when `timeout` elapses first, otherwise the
/// flow's own result.
pub async fn with_deadline<T, F>(timeout: Duration, flow: F) -> Result<T, FingerprintError>
where
    F: Future<Output = Result<T, FingerprintError>>,
{
    tokio::time::timeout(timeout, flow)
        .await
        .map_err(|_| FingerprintError::Timeout {
            timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
        })?
}
