//! Device signal collection.
//!
//! Two tiers are collected:
//!
//! - **soft**: low-entropy environment facts from a [`SoftSignalProvider`],
//! - **hard**: the soft facts plus structured user-agent detail and the
//!   high-entropy fingerprints produced by [`SignalSource`]s.
//!
//! Sources are independent. A source that fails or is unsupported yields
//! `null` for its own slot and never affects the others. Nothing is cached.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

mod host;
mod sources;

pub use host::HostEnvironment;
pub use sources::*;

/// Low-entropy facts about the client environment.
///
/// Facts the host cannot observe are left out of the serialized form.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SoftSignals {
    /// User agent string.
    pub ua: String,
    /// Platform string.
    pub platform: String,
    /// Preferred language.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lang: Option<String>,
    /// Preferred languages, most preferred first.
    pub langs: Vec<String>,
    /// Logical processors available.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hc: Option<u32>,
    /// Approximate device memory in GiB.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mem: Option<f64>,
    /// Maximum simultaneous touch points.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub touch: Option<u32>,
    /// IANA time zone name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tz: Option<String>,
    /// Minutes to add to local time to get UTC.
    #[serde(rename = "tzOff")]
    pub tz_off: i32,
    /// Screen geometry.
    pub screen: ScreenSignals,
    /// Capability and preference flags.
    pub features: FeatureFlags,
    /// Whether the client reports being driven by automation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub webdriver: Option<bool>,
}

/// Screen geometry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScreenSignals {
    /// Width in CSS pixels.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub w: Option<u32>,
    /// Height in CSS pixels.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub h: Option<u32>,
    /// Available width.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aw: Option<u32>,
    /// Available height.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ah: Option<u32>,
    /// Device pixel ratio.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dpr: Option<f64>,
    /// Color depth in bits.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cd: Option<u32>,
    /// Orientation, `null` when the host has no orientation API.
    pub o: Option<Orientation>,
}

/// Screen orientation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Orientation {
    /// Orientation type, e.g. `landscape-primary`.
    pub t: String,
    /// Angle in degrees.
    pub a: i32,
}

/// Capability and preference flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureFlags {
    /// WebAssembly available.
    pub wasm: bool,
    /// WebGL context obtainable.
    pub webgl: bool,
    /// WebGL2 context obtainable.
    pub webgl2: bool,
    /// Dark color scheme preferred.
    pub dark: bool,
    /// Reduced motion preferred.
    pub rm: bool,
}

/// Soft signals extended with the high-entropy block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HardSignals {
    /// Soft-tier facts, serialized inline.
    #[serde(flatten)]
    pub soft: SoftSignals,
    /// Structured user-agent detail, `null` when unavailable.
    #[serde(rename = "uaData")]
    pub ua_data: Value,
    /// One entry per high-entropy source, `null` when it produced nothing.
    #[serde(rename = "highEntropy")]
    pub high_entropy: Map<String, Value>,
}

/// Fast, read-only provider of soft signals.
pub trait SoftSignalProvider: Send + Sync {
    /// Captures the current environment facts.
    fn soft_signals(&self) -> SoftSignals;
}

impl<F> SoftSignalProvider for F
where
    F: Fn() -> SoftSignals + Send + Sync,
{
    fn soft_signals(&self) -> SoftSignals {
        self()
    }
}

/// Composes a soft provider with any number of high-entropy sources.
#[derive(Clone)]
pub struct SignalCollector {
    soft: Arc<dyn SoftSignalProvider>,
    user_agent: Option<Arc<dyn SignalSource>>,
    high_entropy: Vec<Arc<dyn SignalSource>>,
}

impl fmt::Debug for SignalCollector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignalCollector")
            .field("user_agent", &self.user_agent.as_ref().map(|s| s.name()))
            .field(
                "high_entropy",
                &self.high_entropy.iter().map(|s| s.name()).collect::<Vec<_>>(),
            )
            .finish_non_exhaustive()
    }
}

impl Default for SignalCollector {
    fn default() -> Self {
        Self::native()
    }
}

impl SignalCollector {
    /// Collector over `soft` with no high-entropy sources.
    pub fn new(soft: impl SoftSignalProvider + 'static) -> Self {
        Self {
            soft: Arc::new(soft),
            user_agent: None,
            high_entropy: Vec::new(),
        }
    }

    /// Native host: [`HostEnvironment`] facts and the browser-only probes
    /// (`canvas`, `audio`, `webgl`) reported as unsupported.
    #[must_use]
    pub fn native() -> Self {
        Self::new(HostEnvironment::new())
            .with_source(UnsupportedSource::new(CANVAS_SOURCE))
            .with_source(UnsupportedSource::new(AUDIO_SOURCE))
            .with_source(UnsupportedSource::new(WEBGL_SOURCE))
    }

    /// Sets the source of the structured user-agent detail (`uaData`).
    #[must_use]
    pub fn with_user_agent_source(mut self, source: impl SignalSource + 'static) -> Self {
        self.user_agent = Some(Arc::new(source));
        self
    }

    /// Adds a high-entropy source. Its [`SignalSource::name`] is the key under
    /// `highEntropy`; a later source with the same name replaces the earlier.
    #[must_use]
    pub fn with_source(mut self, source: impl SignalSource + 'static) -> Self {
        let source: Arc<dyn SignalSource> = Arc::new(source);
        self.high_entropy.retain(|s| s.name() != source.name());
        self.high_entropy.push(source);
        self
    }

    /// Captures the soft tier.
    #[must_use]
    pub fn collect_soft(&self) -> SoftSignals {
        self.soft.soft_signals()
    }

    /// Captures the hard tier. Sources run one after another.
    pub async fn collect_hard(&self) -> HardSignals {
        let soft = self.collect_soft();
        let ua_data = match &self.user_agent {
            Some(source) => sample(source.as_ref()).await,
            None => Value::Null,
        };

        let mut high_entropy = Map::new();
        for source in &self.high_entropy {
            high_entropy.insert(source.name().to_string(), sample(source.as_ref()).await);
        }

        HardSignals {
            soft,
            ua_data,
            high_entropy,
        }
    }
}

async fn sample(source: &dyn SignalSource) -> Value {
    match source.produce().await {
        Ok(Some(value)) => value,
        Ok(None) => {
            log::debug!("signal source {} produced no value", source.name());
            Value::Null
        }
        Err(err) => {
            log::debug!("signal source {} failed: {err}", source.name());
            Value::Null
        }
    }
}
