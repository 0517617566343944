use serde_json::Value;
use thiserror::Error;

/// Error outputs from the fingerprint flow.
///
/// Storage and entropy-probe failures never surface here: they are absorbed by
/// [`crate::IdentityStore`] and [`crate::SignalCollector`] respectively.
#[derive(Debug, Error)]
#[cfg_attr(feature = "ffi", derive(uniffi::Error))]
#[cfg_attr(feature = "ffi", uniffi(flat_error))]
pub enum FingerprintError {
    /// Missing endpoint or credentials. Raised before any I/O happens.
    #[error("{error}")]
    Configuration {
        /// Human readable description of what is missing.
        error: String,
    },
    /// The request never produced an HTTP status (connect, TLS, DNS, reset).
    #[error("Fingerprint API transport error: {error}")]
    Transport {
        /// Target URL of the failed request.
        url: String,
        /// Underlying client error.
        error: String,
    },
    /// The API answered with a non-2xx status.
    #[error("Fingerprint API error: {status}")]
    Http {
        /// Target URL of the failed request.
        url: String,
        /// HTTP status code returned by the API.
        status: u16,
        /// Parsed JSON body, opaque text, or `null` when unreadable.
        data: Value,
    },
    /// The global deadline elapsed before the flow settled.
    #[error("Timeout in fingerprint flow after {timeout_ms}ms")]
    Timeout {
        /// Deadline that was exceeded.
        timeout_ms: u64,
    },
    /// Unexpected error serializing signals or the payload.
    #[error("serialization_error: {error}")]
    Serialization {
        /// Serializer error message.
        error: String,
    },
}

impl FingerprintError {
    /// HTTP status carried by the failure, when one was obtained.
    #[must_use]
    pub const fn status(&self) -> Option<u16> {
        match self {
            Self::Http { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Response body carried by the failure, when one was obtained.
    #[must_use]
    pub const fn data(&self) -> Option<&Value> {
        match self {
            Self::Http { data, .. } => Some(data),
            _ => None,
        }
    }

    pub(crate) fn configuration(error: impl Into<String>) -> Self {
        Self::Configuration {
            error: error.into(),
        }
    }
}

impl From<serde_json::Error> for FingerprintError {
    fn from(error: serde_json::Error) -> Self {
        Self::Serialization {
            error: error.to_string(),
        }
    }
}
