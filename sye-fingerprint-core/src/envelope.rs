use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::FingerprintError;
use crate::payload::{ComputedMeta, OutboundPayload};
use crate::submit::ApiResponse;

/// Component name carried by every fingerprint envelope.
pub const COMPONENT_NAME: &str = "SYE_FINGERPRINT";

/// Message used when a failure carries no description.
const UNKNOWN_ERROR: &str = "Unknown error";

/// Names shared by every SYE widget: the envelope `component` and the two
/// broadcast event names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WidgetContract {
    /// Value of [`ResultEnvelope::component`].
    pub component: String,
    /// Event published on success.
    pub success_event: String,
    /// Event published on failure.
    pub error_event: String,
}

impl WidgetContract {
    /// Contract of the device fingerprint widget.
    #[must_use]
    pub fn fingerprint() -> Self {
        Self {
            component: COMPONENT_NAME.to_string(),
            success_event: "fingerprint-success".to_string(),
            error_event: "fingerprint-error".to_string(),
        }
    }

    /// Contract of a form widget: events are `<ns>:success` and `<ns>:error`.
    #[must_use]
    pub fn namespaced(component: impl Into<String>, namespace: &str) -> Self {
        Self {
            component: component.into(),
            success_event: format!("{namespace}:success"),
            error_event: format!("{namespace}:error"),
        }
    }

    /// Event name for `envelope`.
    #[must_use]
    pub fn event_for(&self, envelope: &ResultEnvelope) -> &str {
        if envelope.is_success() {
            &self.success_event
        } else {
            &self.error_event
        }
    }
}

/// Everything a successful flow produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowResult {
    /// Body that was transmitted.
    pub sent: OutboundPayload,
    /// Tiers computed for the body.
    pub computed: ComputedMeta,
    /// API answer.
    #[serde(rename = "apiResp")]
    pub api_resp: ApiResponse,
}

/// Failure detail handed to hosts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedError {
    /// Never empty.
    pub message: String,
    /// Present for HTTP failures.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    /// Response body of HTTP failures.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl From<&FingerprintError> for NormalizedError {
    fn from(err: &FingerprintError) -> Self {
        let message = err.to_string();
        Self {
            message: if message.trim().is_empty() {
                UNKNOWN_ERROR.to_string()
            } else {
                message
            },
            status: err.status(),
            data: err.data().cloned(),
        }
    }
}

/// `detail` of a [`ResultEnvelope`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EnvelopeDetail {
    /// Flow completed.
    Success(FlowResult),
    /// Flow failed.
    Failure(NormalizedError),
}

/// The only shape handed to callbacks and event subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultEnvelope {
    /// Widget that produced the outcome.
    pub component: String,
    /// Outcome detail.
    pub detail: EnvelopeDetail,
}

impl ResultEnvelope {
    /// Envelope for a completed flow.
    #[must_use]
    pub fn success(result: FlowResult) -> Self {
        Self {
            component: COMPONENT_NAME.to_string(),
            detail: EnvelopeDetail::Success(result),
        }
    }

    /// Envelope for a failed flow.
    #[must_use]
    pub fn failure(err: &FingerprintError) -> Self {
        Self {
            component: COMPONENT_NAME.to_string(),
            detail: EnvelopeDetail::Failure(err.into()),
        }
    }

    /// Whether the flow completed.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self.detail, EnvelopeDetail::Success(_))
    }

    /// Serializes the envelope the way it is delivered to web hosts.
    ///
    /// # Errors
    /// Returns [`FingerprintError::Serialization`] if serialization fails.
    pub fn to_json(&self) -> Result<String, FingerprintError> {
        Ok(serde_json::to_string(self)?)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::payload::PAYLOAD_VERSION;

    fn flow_result() -> FlowResult {
        FlowResult {
            sent: OutboundPayload {
                version: PAYLOAD_VERSION.to_string(),
                ts: "2024-05-01T10:00:00.000Z".to_string(),
                device_id: None,
                fp_soft: Some("abc".to_string()),
                fp_hard: None,
                signals: None,
            },
            computed: ComputedMeta {
                fp_soft: true,
                ..ComputedMeta::default()
            },
            api_resp: ApiResponse {
                status: 200,
                data: json!({"id": 1}),
            },
        }
    }

    #[test]
    fn test_success_envelope_shape() {
        let envelope = ResultEnvelope::success(flow_result());
        assert!(envelope.is_success());
        let value: Value = serde_json::from_str(&envelope.to_json().unwrap()).unwrap();
        assert_eq!(value["component"], json!("SYE_FINGERPRINT"));
        assert_eq!(value["detail"]["apiResp"]["status"], json!(200));
        assert_eq!(value["detail"]["sent"]["fpSoft"], json!("abc"));
        assert_eq!(value["detail"]["computed"]["fpSoft"], json!(true));
        assert_eq!(value["detail"]["computed"]["sendSignals"], json!(false));
    }

    #[test]
    fn test_http_failure_carries_status_and_data() {
        let err = FingerprintError::Http {
            url: "https://api.test/fp".to_string(),
            status: 400,
            data: json!({"error": "bad"}),
        };
        let envelope = ResultEnvelope::failure(&err);
        assert!(!envelope.is_success());
        let value = serde_json::to_value(&envelope).unwrap();
        assert_eq!(
            value["detail"],
            json!({"message": "Fingerprint API error: 400", "status": 400, "data": {"error": "bad"}})
        );
    }

    #[test]
    fn test_failure_without_status_omits_optional_fields() {
        let envelope = ResultEnvelope::failure(&FingerprintError::Timeout { timeout_ms: 1_000 });
        let value = serde_json::to_value(&envelope).unwrap();
        assert_eq!(
            value["detail"],
            json!({"message": "Timeout in fingerprint flow after 1000ms"})
        );
    }

    #[test]
    fn test_empty_message_falls_back() {
        let normalized = NormalizedError::from(&FingerprintError::Configuration {
            error: String::new(),
        });
        assert_eq!(normalized.message, "Unknown error");
    }

    #[test]
    fn test_envelope_parses_back_into_matching_variant() {
        let envelope = ResultEnvelope::success(flow_result());
        let parsed: ResultEnvelope = serde_json::from_str(&envelope.to_json().unwrap()).unwrap();
        assert_eq!(parsed, envelope);

        let failure = ResultEnvelope::failure(&FingerprintError::Timeout { timeout_ms: 5 });
        let parsed: ResultEnvelope = serde_json::from_str(&failure.to_json().unwrap()).unwrap();
        assert!(!parsed.is_success());
    }

    #[test]
    fn test_widget_contracts() {
        let fingerprint = WidgetContract::fingerprint();
        assert_eq!(fingerprint.component, COMPONENT_NAME);
        assert_eq!(
            fingerprint.event_for(&ResultEnvelope::success(flow_result())),
            "fingerprint-success"
        );
        assert_eq!(
            fingerprint.event_for(&ResultEnvelope::failure(&FingerprintError::Timeout {
                timeout_ms: 1
            })),
            "fingerprint-error"
        );

        let terms = WidgetContract::namespaced("SYE_TERMS", "sye-terms");
        assert_eq!(terms.success_event, "sye-terms:success");
        assert_eq!(terms.error_event, "sye-terms:error");
    }
}
