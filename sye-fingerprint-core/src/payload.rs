//! Outbound body assembly.

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::canonical::digest_json;
use crate::config::FingerprintConfig;
use crate::error::FingerprintError;
use crate::identity::{DeviceId, IdentityStore};
use crate::signals::SignalCollector;

/// Payload format version understood by the fingerprint API.
pub const PAYLOAD_VERSION: &str = "1.1.0";

/// Body posted to the fingerprint API. Only requested tiers are present.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboundPayload {
    /// Payload format version.
    pub version: String,
    /// Build time, ISO 8601 UTC with milliseconds.
    pub ts: String,
    /// Persistent device identifier.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_id: Option<DeviceId>,
    /// Digest of the soft tier.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fp_soft: Option<String>,
    /// Digest of the hard tier.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fp_hard: Option<String>,
    /// Raw signals, only with `sendSignals` and only for requested tiers.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signals: Option<RawSignals>,
}

/// Raw signal objects attached next to their digests.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawSignals {
    /// Soft tier exactly as digested into `fpSoft`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub soft: Option<Value>,
    /// Hard tier exactly as digested into `fpHard`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hard: Option<Value>,
}

/// What the builder was asked to compute. Kept for the caller, never sent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComputedMeta {
    /// Device identifier resolved.
    pub device_id: bool,
    /// Soft tier computed.
    pub fp_soft: bool,
    /// Hard tier computed.
    pub fp_hard: bool,
    /// Raw signals requested.
    pub send_signals: bool,
}

/// Output of [`PayloadBuilder::build`].
#[derive(Debug, Clone, PartialEq)]
pub struct BuiltPayload {
    /// Body to transmit.
    pub body: OutboundPayload,
    /// Audit record of the computed tiers.
    pub computed: ComputedMeta,
}

/// Builds the outbound body from the configuration flags.
#[derive(Debug, Clone, Copy)]
pub struct PayloadBuilder<'a> {
    collector: &'a SignalCollector,
    identity: &'a IdentityStore,
}

impl<'a> PayloadBuilder<'a> {
    /// Builder over the given collector and identity store.
    #[must_use]
    pub const fn new(collector: &'a SignalCollector, identity: &'a IdentityStore) -> Self {
        Self {
            collector,
            identity,
        }
    }

    /// Assembles the body.
    ///
    /// Every field is additive: with all flags off the body holds only
    /// `version` and `ts`. `sendSignals` attaches the raw object of each tier
    /// that was also requested and contributes nothing on its own.
    ///
    /// # Errors
    /// Returns [`FingerprintError::Serialization`] if a signal set cannot be
    /// converted to JSON.
    pub async fn build(&self, config: &FingerprintConfig) -> Result<BuiltPayload, FingerprintError> {
        let computed = ComputedMeta {
            device_id: config.device_id,
            fp_soft: config.fp_soft,
            fp_hard: config.fp_hard,
            send_signals: config.send_signals,
        };

        let device_id = config
            .device_id
            .then(|| self.identity.get_or_create_device_id());

        let soft = if config.fp_soft {
            Some(serde_json::to_value(self.collector.collect_soft())?)
        } else {
            None
        };

        let hard = if config.fp_hard {
            Some(serde_json::to_value(self.collector.collect_hard().await)?)
        } else {
            None
        };

        let fp_soft = soft.as_ref().map(digest_json);
        let fp_hard = hard.as_ref().map(digest_json);

        let signals = if config.send_signals {
            let raw = RawSignals { soft, hard };
            (raw.soft.is_some() || raw.hard.is_some()).then_some(raw)
        } else {
            None
        };

        Ok(BuiltPayload {
            body: OutboundPayload {
                version: PAYLOAD_VERSION.to_string(),
                ts: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
                device_id,
                fp_soft,
                fp_hard,
                signals,
            },
            computed,
        })
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::signals::SoftSignals;

    fn collector() -> SignalCollector {
        SignalCollector::new(|| SoftSignals {
            ua: "agent".to_string(),
            platform: "test".to_string(),
            langs: vec!["en".to_string()],
            ..SoftSignals::default()
        })
    }

    async fn build(config: FingerprintConfig) -> BuiltPayload {
        let collector = collector();
        let identity = IdentityStore::in_memory();
        PayloadBuilder::new(&collector, &identity)
            .build(&config)
            .await
            .unwrap()
    }

    fn keys(body: &OutboundPayload) -> Vec<String> {
        let value = serde_json::to_value(body).unwrap();
        let mut keys: Vec<String> = value.as_object().unwrap().keys().cloned().collect();
        keys.sort();
        keys
    }

    #[tokio::test]
    async fn test_empty_config_only_version_and_ts() {
        let built = build(FingerprintConfig::default()).await;
        assert_eq!(keys(&built.body), vec!["ts", "version"]);
        assert_eq!(built.body.version, "1.1.0");
        assert!(built.body.ts.ends_with('Z'));
        assert_eq!(built.computed, ComputedMeta::default());
    }

    #[tokio::test]
    async fn test_send_signals_alone_contributes_nothing() {
        let built = build(FingerprintConfig {
            send_signals: true,
            ..FingerprintConfig::default()
        })
        .await;
        assert_eq!(keys(&built.body), vec!["ts", "version"]);
        assert!(built.computed.send_signals);
    }

    #[tokio::test]
    async fn test_digests_without_raw_signals() {
        let built = build(FingerprintConfig {
            fp_soft: true,
            fp_hard: true,
            ..FingerprintConfig::default()
        })
        .await;
        assert_eq!(keys(&built.body), vec!["fpHard", "fpSoft", "ts", "version"]);
        assert_ne!(built.body.fp_soft, built.body.fp_hard);
    }

    #[tokio::test]
    async fn test_hard_raw_signals_match_digest() {
        let built = build(FingerprintConfig {
            fp_hard: true,
            send_signals: true,
            ..FingerprintConfig::default()
        })
        .await;
        let signals = built.body.signals.clone().unwrap();
        assert!(signals.soft.is_none());
        let hard = signals.hard.unwrap();
        assert_eq!(Some(digest_json(&hard)), built.body.fp_hard);
        assert_eq!(hard["ua"], json!("agent"));
        assert!(built.body.fp_soft.is_none());
    }

    #[tokio::test]
    async fn test_soft_raw_signals_match_digest_after_wire_round_trip() {
        let built = build(FingerprintConfig {
            fp_soft: true,
            send_signals: true,
            ..FingerprintConfig::default()
        })
        .await;
        let wire = serde_json::to_string(&built.body).unwrap();
        let received: Value = serde_json::from_str(&wire).unwrap();
        assert_eq!(
            json!(digest_json(&received["signals"]["soft"])),
            received["fpSoft"]
        );
        assert!(received["signals"].get("hard").is_none());
    }

    #[tokio::test]
    async fn test_device_id_is_raw_and_stable() {
        let collector = collector();
        let identity = IdentityStore::in_memory();
        let builder = PayloadBuilder::new(&collector, &identity);
        let config = FingerprintConfig {
            device_id: true,
            ..FingerprintConfig::default()
        };
        let first = builder.build(&config).await.unwrap();
        let second = builder.build(&config).await.unwrap();
        assert_eq!(first.body.device_id, second.body.device_id);
        assert_eq!(keys(&first.body), vec!["deviceId", "ts", "version"]);
        assert!(first.computed.device_id);
    }
}
