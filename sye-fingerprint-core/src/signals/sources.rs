use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;

use crate::canonical::sha256_base64url;

/// Name of the structured user-agent source.
pub const USER_AGENT_DATA_SOURCE: &str = "uaData";
/// Name of the canvas fingerprint source.
pub const CANVAS_SOURCE: &str = "canvas";
/// Name of the audio fingerprint source.
pub const AUDIO_SOURCE: &str = "audio";
/// Name of the WebGL fingerprint source.
pub const WEBGL_SOURCE: &str = "webgl";

/// High-entropy user-agent hints requested from the host.
pub const HIGH_ENTROPY_HINTS: [&str; 8] = [
    "architecture",
    "bitness",
    "model",
    "platform",
    "platformVersion",
    "uaFullVersion",
    "fullVersionList",
    "wow64",
];

/// Stride between audio samples folded into the fingerprint.
pub const AUDIO_SAMPLE_STRIDE: usize = 1000;

/// Failure of a single entropy probe. Absorbed by the collector.
#[derive(Debug, Error)]
pub enum SignalError {
    /// The host does not offer the capability.
    #[error("unsupported capability: {0}")]
    Unsupported(String),
    /// The capability exists but the probe failed.
    #[error("probe failed: {0}")]
    Probe(String),
}

/// One entropy source.
///
/// `Ok(None)` and `Err(_)` both land as `null` in the collected signals.
#[async_trait]
pub trait SignalSource: Send + Sync {
    /// Key of the produced value.
    fn name(&self) -> &'static str;

    /// Runs the probe.
    async fn produce(&self) -> Result<Option<Value>, SignalError>;
}

/// Source for a capability the host lacks. Always produces nothing.
#[derive(Debug, Clone, Copy)]
pub struct UnsupportedSource {
    name: &'static str,
}

impl UnsupportedSource {
    /// Unsupported source reported under `name`.
    #[must_use]
    pub const fn new(name: &'static str) -> Self {
        Self { name }
    }
}

#[async_trait]
impl SignalSource for UnsupportedSource {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn produce(&self) -> Result<Option<Value>, SignalError> {
        Ok(None)
    }
}

// ---------------------------------------------------------------------------
// User-agent client hints
// ---------------------------------------------------------------------------

/// Low-entropy client hints available without a request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UaLowEntropy {
    /// Whether the client is a mobile device.
    pub mobile: bool,
    /// Brand list as reported by the client.
    pub brands: Value,
}

/// Host access to user-agent client hints.
#[async_trait]
pub trait UserAgentDataBackend: Send + Sync {
    /// Low-entropy hints, `None` when the client-hints API is absent.
    fn low_entropy(&self) -> Option<UaLowEntropy>;

    /// Resolves the requested high-entropy hints.
    async fn high_entropy_values(&self, hints: &[&str]) -> Result<Value, SignalError>;
}

/// Produces `{mobile, brands, high}`. A failed high-entropy request keeps the
/// low-entropy part and sets `high` to `null`.
#[derive(Debug, Clone)]
pub struct UserAgentDataSource<B> {
    backend: B,
}

impl<B: UserAgentDataBackend> UserAgentDataSource<B> {
    /// Wraps `backend`.
    pub const fn new(backend: B) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl<B: UserAgentDataBackend> SignalSource for UserAgentDataSource<B> {
    fn name(&self) -> &'static str {
        USER_AGENT_DATA_SOURCE
    }

    async fn produce(&self) -> Result<Option<Value>, SignalError> {
        let Some(low) = self.backend.low_entropy() else {
            return Ok(None);
        };
        let high = match self.backend.high_entropy_values(&HIGH_ENTROPY_HINTS).await {
            Ok(high) => high,
            Err(err) => {
                log::debug!("high entropy user agent hints failed: {err}");
                Value::Null
            }
        };
        Ok(Some(json!({
            "mobile": low.mobile,
            "brands": low.brands,
            "high": high,
        })))
    }
}

// ---------------------------------------------------------------------------
// Canvas
// ---------------------------------------------------------------------------

/// Fixed scene drawn by the canvas probe.
#[derive(Debug, Clone, PartialEq)]
pub struct CanvasScene {
    /// Canvas width in pixels.
    pub width: u32,
    /// Canvas height in pixels.
    pub height: u32,
    /// Font used for the text run.
    pub font: &'static str,
    /// Text drawn at `text_origin` with a `top` baseline.
    pub text: &'static str,
    /// Text position.
    pub text_origin: (f64, f64),
    /// Filled rectangle as `(x, y, width, height)`.
    pub rect: (f64, f64, f64, f64),
    /// Stroke color of the arc.
    pub stroke_style: &'static str,
    /// Arc as `(center_x, center_y, radius, start, end)` in radians.
    pub arc: (f64, f64, f64, f64, f64),
}

/// Scene every canvas backend must render.
pub const CANVAS_PROBE_SCENE: CanvasScene = CanvasScene {
    width: 300,
    height: 80,
    font: "16px Arial",
    text: "fp: \u{1F63A} 12345",
    text_origin: (10.0, 10.0),
    rect: (120.0, 25.0, 80.0, 20.0),
    stroke_style: "#555",
    arc: (60.0, 50.0, 18.0, 0.0, std::f64::consts::PI * 1.7),
};

/// Host 2D canvas.
pub trait CanvasBackend: Send + Sync {
    /// Renders `scene` and returns its data URL, `None` without a 2D context.
    ///
    /// # Errors
    /// Returns an error when rendering or encoding fails.
    fn render_data_url(&self, scene: &CanvasScene) -> Result<Option<String>, SignalError>;
}

/// Digest of the rendered probe scene.
#[derive(Debug, Clone)]
pub struct CanvasSource<B> {
    backend: B,
}

impl<B: CanvasBackend> CanvasSource<B> {
    /// Wraps `backend`.
    pub const fn new(backend: B) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl<B: CanvasBackend> SignalSource for CanvasSource<B> {
    fn name(&self) -> &'static str {
        CANVAS_SOURCE
    }

    async fn produce(&self) -> Result<Option<Value>, SignalError> {
        Ok(self
            .backend
            .render_data_url(&CANVAS_PROBE_SCENE)?
            .map(|data_url| Value::String(sha256_base64url(data_url))))
    }
}

// ---------------------------------------------------------------------------
// Audio
// ---------------------------------------------------------------------------

/// Offline render graph of the audio probe: oscillator into a compressor.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioProbe {
    /// Output channels.
    pub channels: u32,
    /// Frames to render.
    pub length: u32,
    /// Sample rate in Hz.
    pub sample_rate: u32,
    /// Oscillator waveform.
    pub waveform: &'static str,
    /// Oscillator frequency in Hz.
    pub frequency: f64,
    /// Compressor threshold in dB.
    pub threshold: f64,
    /// Compressor knee in dB.
    pub knee: f64,
    /// Compressor ratio.
    pub ratio: f64,
    /// Compressor attack in seconds.
    pub attack: f64,
    /// Compressor release in seconds.
    pub release: f64,
}

/// Graph every audio backend must render.
pub const AUDIO_PROBE: AudioProbe = AudioProbe {
    channels: 1,
    length: 44_100,
    sample_rate: 44_100,
    waveform: "triangle",
    frequency: 10_000.0,
    threshold: -50.0,
    knee: 40.0,
    ratio: 12.0,
    attack: 0.0,
    release: 0.25,
};

/// Host offline audio renderer.
#[async_trait]
pub trait AudioBackend: Send + Sync {
    /// Renders `probe` and returns the first channel, `None` without offline audio.
    async fn render(&self, probe: &AudioProbe) -> Result<Option<Vec<f32>>, SignalError>;
}

/// Digest of the rendered probe, folded every [`AUDIO_SAMPLE_STRIDE`] samples.
#[derive(Debug, Clone)]
pub struct AudioSource<B> {
    backend: B,
}

impl<B: AudioBackend> AudioSource<B> {
    /// Wraps `backend`.
    pub const fn new(backend: B) -> Self {
        Self { backend }
    }
}

/// Sum of absolute values of every `AUDIO_SAMPLE_STRIDE`-th sample.
#[must_use]
pub fn fold_audio_samples(samples: &[f32]) -> f64 {
    samples
        .iter()
        .step_by(AUDIO_SAMPLE_STRIDE)
        .map(|sample| f64::from(*sample).abs())
        .sum()
}

#[async_trait]
impl<B: AudioBackend> SignalSource for AudioSource<B> {
    fn name(&self) -> &'static str {
        AUDIO_SOURCE
    }

    async fn produce(&self) -> Result<Option<Value>, SignalError> {
        Ok(self.backend.render(&AUDIO_PROBE).await?.map(|samples| {
            let sum = fold_audio_samples(&samples);
            Value::String(sha256_base64url(sum.to_string()))
        }))
    }
}

// ---------------------------------------------------------------------------
// WebGL
// ---------------------------------------------------------------------------

/// Raw WebGL parameters read by the host.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebGlParameters {
    /// `VENDOR`.
    pub vendor: Option<String>,
    /// `RENDERER`.
    pub renderer: Option<String>,
    /// Unmasked vendor, when the debug renderer extension is present.
    pub unmasked_vendor: Option<String>,
    /// Unmasked renderer, when the debug renderer extension is present.
    pub unmasked_renderer: Option<String>,
    /// `VERSION`.
    pub version: Option<String>,
    /// `SHADING_LANGUAGE_VERSION`.
    pub shading_language_version: Option<String>,
}

/// Host WebGL context.
pub trait WebGlBackend: Send + Sync {
    /// Reads the parameters, `None` without a WebGL context.
    ///
    /// # Errors
    /// Returns an error when the context is lost or a read fails.
    fn parameters(&self) -> Result<Option<WebGlParameters>, SignalError>;
}

/// `{vendor, renderer, version, shading}`, preferring unmasked values.
#[derive(Debug, Clone)]
pub struct WebGlSource<B> {
    backend: B,
}

impl<B: WebGlBackend> WebGlSource<B> {
    /// Wraps `backend`.
    pub const fn new(backend: B) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl<B: WebGlBackend> SignalSource for WebGlSource<B> {
    fn name(&self) -> &'static str {
        WEBGL_SOURCE
    }

    async fn produce(&self) -> Result<Option<Value>, SignalError> {
        Ok(self.backend.parameters()?.map(|params| {
            let debug_info = params.unmasked_vendor.is_some() || params.unmasked_renderer.is_some();
            let (vendor, renderer) = if debug_info {
                (params.unmasked_vendor, params.unmasked_renderer)
            } else {
                (params.vendor, params.renderer)
            };
            json!({
                "vendor": vendor,
                "renderer": renderer,
                "version": params.version,
                "shading": params.shading_language_version,
            })
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Hints {
        high: Result<Value, &'static str>,
    }

    #[async_trait]
    impl UserAgentDataBackend for Hints {
        fn low_entropy(&self) -> Option<UaLowEntropy> {
            Some(UaLowEntropy {
                mobile: false,
                brands: json!([{"brand": "Chromium", "version": "126"}]),
            })
        }

        async fn high_entropy_values(&self, hints: &[&str]) -> Result<Value, SignalError> {
            assert_eq!(hints, HIGH_ENTROPY_HINTS);
            self.high
                .clone()
                .map_err(|e| SignalError::Probe(e.to_string()))
        }
    }

    struct NoHints;

    #[async_trait]
    impl UserAgentDataBackend for NoHints {
        fn low_entropy(&self) -> Option<UaLowEntropy> {
            None
        }

        async fn high_entropy_values(&self, _hints: &[&str]) -> Result<Value, SignalError> {
            Err(SignalError::Unsupported("userAgentData".to_string()))
        }
    }

    struct DataUrl(Result<Option<String>, ()>);

    impl CanvasBackend for DataUrl {
        fn render_data_url(&self, scene: &CanvasScene) -> Result<Option<String>, SignalError> {
            assert_eq!(scene, &CANVAS_PROBE_SCENE);
            self.0
                .clone()
                .map_err(|()| SignalError::Probe("tainted canvas".to_string()))
        }
    }

    struct Samples(Vec<f32>);

    #[async_trait]
    impl AudioBackend for Samples {
        async fn render(&self, probe: &AudioProbe) -> Result<Option<Vec<f32>>, SignalError> {
            assert_eq!(probe.length, 44_100);
            Ok(Some(self.0.clone()))
        }
    }

    struct Gl(WebGlParameters);

    impl WebGlBackend for Gl {
        fn parameters(&self) -> Result<Option<WebGlParameters>, SignalError> {
            Ok(Some(self.0.clone()))
        }
    }

    #[tokio::test]
    async fn test_user_agent_data_with_high_entropy() {
        let source = UserAgentDataSource::new(Hints {
            high: Ok(json!({"architecture": "x86", "bitness": "64"})),
        });
        let value = source.produce().await.unwrap().unwrap();
        assert_eq!(value["mobile"], json!(false));
        assert_eq!(value["high"]["bitness"], json!("64"));
    }

    #[tokio::test]
    async fn test_user_agent_data_keeps_low_entropy_on_failure() {
        let source = UserAgentDataSource::new(Hints { high: Err("denied") });
        let value = source.produce().await.unwrap().unwrap();
        assert_eq!(value["brands"][0]["brand"], json!("Chromium"));
        assert_eq!(value["high"], Value::Null);
    }

    #[tokio::test]
    async fn test_user_agent_data_absent_api() {
        let source = UserAgentDataSource::new(NoHints);
        assert!(source.produce().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_canvas_digests_data_url() {
        let url = "data:image/png;base64,AAAA".to_string();
        let source = CanvasSource::new(DataUrl(Ok(Some(url.clone()))));
        assert_eq!(
            source.produce().await.unwrap(),
            Some(Value::String(sha256_base64url(url)))
        );

        let missing = CanvasSource::new(DataUrl(Ok(None)));
        assert!(missing.produce().await.unwrap().is_none());

        let failing = CanvasSource::new(DataUrl(Err(())));
        assert!(failing.produce().await.is_err());
    }

    #[test]
    fn test_audio_fold_uses_stride() {
        let mut samples = vec![0.0_f32; 2_500];
        samples[0] = -0.5;
        samples[1] = 100.0; // skipped
        samples[1_000] = 0.25;
        samples[2_000] = -0.25;
        assert!((fold_audio_samples(&samples) - 1.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_audio_digest_uses_decimal_sum() {
        let mut samples = vec![0.0_f32; 1_001];
        samples[0] = 0.5;
        samples[1_000] = 0.25;
        let value = AudioSource::new(Samples(samples)).produce().await.unwrap();
        assert_eq!(value, Some(Value::String(sha256_base64url("0.75"))));
    }

    #[tokio::test]
    async fn test_webgl_prefers_unmasked_values() {
        let source = WebGlSource::new(Gl(WebGlParameters {
            vendor: Some("WebKit".to_string()),
            renderer: Some("WebKit WebGL".to_string()),
            unmasked_vendor: Some("Google Inc. (NVIDIA)".to_string()),
            unmasked_renderer: Some("ANGLE (NVIDIA)".to_string()),
            version: Some("WebGL 1.0".to_string()),
            shading_language_version: Some("WebGL GLSL ES 1.0".to_string()),
        }));
        let value = source.produce().await.unwrap().unwrap();
        assert_eq!(
            value,
            json!({
                "vendor": "Google Inc. (NVIDIA)",
                "renderer": "ANGLE (NVIDIA)",
                "version": "WebGL 1.0",
                "shading": "WebGL GLSL ES 1.0",
            })
        );
    }

    #[tokio::test]
    async fn test_webgl_masked_fallback() {
        let source = WebGlSource::new(Gl(WebGlParameters {
            vendor: Some("WebKit".to_string()),
            renderer: Some("WebKit WebGL".to_string()),
            ..WebGlParameters::default()
        }));
        let value = source.produce().await.unwrap().unwrap();
        assert_eq!(value["vendor"], json!("WebKit"));
        assert_eq!(value["version"], Value::Null);
    }
}
