#![deny(clippy::all, clippy::pedantic, clippy::nursery)]
//! Device fingerprinting for SYE widgets.
//!
//! The crate collects two tiers of device signals, digests them into stable
//! fingerprints, keeps a durable device identifier across two storage tiers and
//! submits the result to the fingerprint API with retries under a global
//! deadline. Every outcome is reported through a uniform [`ResultEnvelope`].
//!
//! ```rust,ignore
//! use sye_fingerprint_core::{Callbacks, DeviceFingerprint, FingerprintOptions};
//!
//! let widget = DeviceFingerprint::builder()
//!     .endpoint("https://api.example.com/fingerprint")
//!     .build();
//! let options = FingerprintOptions::from_json(r#"{"deviceId": true, "fpHard": true}"#)?;
//! let envelope = widget
//!     .init("tx-token", "access-token", &options, &Callbacks::default())
//!     .await?;
//! ```

mod error;
pub use error::*;

pub mod canonical;
pub use canonical::{digest_json, sha256_base64url, stable_stringify, Signal, SharedSignal};

pub mod config;
pub use config::{FingerprintConfig, FingerprintOptions, RetryOptions, RetryPolicy};

mod envelope;
pub use envelope::*;

pub mod identity;
pub use identity::{DeviceId, IdentityStore};

pub mod logger;

pub mod payload;
pub use payload::{BuiltPayload, ComputedMeta, OutboundPayload, PayloadBuilder};

pub mod signals;
pub use signals::{HardSignals, SignalCollector, SoftSignals};

pub mod storage;

pub mod submit;
pub use submit::{ApiResponse, SubmitHeaders, Submitter};

mod widget;
pub use widget::*;

#[cfg(feature = "ffi")]
uniffi::setup_scaffolding!("sye_fingerprint_core");
