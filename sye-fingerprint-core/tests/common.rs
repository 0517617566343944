#![allow(dead_code)]

//! Common test utilities shared across integration tests.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use sye_fingerprint_core::signals::{
    AudioBackend, AudioProbe, AudioSource, CanvasBackend, CanvasScene, CanvasSource,
    FeatureFlags, ScreenSignals, SignalError, UaLowEntropy, UserAgentDataBackend,
    UserAgentDataSource, WebGlBackend, WebGlParameters, WebGlSource,
};
use sye_fingerprint_core::{
    DeviceFingerprint, IdentityStore, SignalCollector, SoftSignals,
};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

pub fn browser_soft_signals() -> SoftSignals {
    SoftSignals {
        ua: "Mozilla/5.0 (X11; Linux x86_64) TestBrowser/1.0".to_string(),
        platform: "Linux x86_64".to_string(),
        lang: Some("es-CO".to_string()),
        langs: vec!["es-CO".to_string(), "es".to_string(), "en".to_string()],
        hc: Some(8),
        mem: Some(8.0),
        touch: Some(0),
        tz: Some("America/Bogota".to_string()),
        tz_off: 300,
        screen: ScreenSignals {
            w: Some(1920),
            h: Some(1080),
            aw: Some(1920),
            ah: Some(1040),
            dpr: Some(1.0),
            cd: Some(24),
            o: None,
        },
        features: FeatureFlags {
            wasm: true,
            webgl: true,
            webgl2: true,
            dark: false,
            rm: false,
        },
        webdriver: Some(false),
    }
}

pub struct FakeUserAgentData;

#[async_trait]
impl UserAgentDataBackend for FakeUserAgentData {
    fn low_entropy(&self) -> Option<UaLowEntropy> {
        Some(UaLowEntropy {
            mobile: false,
            brands: json!([{"brand": "TestBrowser", "version": "1"}]),
        })
    }

    async fn high_entropy_values(&self, _hints: &[&str]) -> Result<Value, SignalError> {
        Ok(json!({"architecture": "x86", "platformVersion": "6.1.0"}))
    }
}

pub struct FakeCanvas;

impl CanvasBackend for FakeCanvas {
    fn render_data_url(&self, scene: &CanvasScene) -> Result<Option<String>, SignalError> {
        Ok(Some(format!(
            "data:image/png;base64,{}x{}",
            scene.width, scene.height
        )))
    }
}

/// Audio context that always fails to render.
pub struct BrokenAudio;

#[async_trait]
impl AudioBackend for BrokenAudio {
    async fn render(&self, _probe: &AudioProbe) -> Result<Option<Vec<f32>>, SignalError> {
        Err(SignalError::Probe("offline audio context suspended".to_string()))
    }
}

pub struct FakeWebGl;

impl WebGlBackend for FakeWebGl {
    fn parameters(&self) -> Result<Option<WebGlParameters>, SignalError> {
        Ok(Some(WebGlParameters {
            vendor: Some("WebKit".to_string()),
            renderer: Some("WebKit WebGL".to_string()),
            unmasked_vendor: Some("Intel".to_string()),
            unmasked_renderer: Some("Mesa Intel UHD 620".to_string()),
            version: Some("WebGL 1.0".to_string()),
            shading_language_version: Some("WebGL GLSL ES 1.0".to_string()),
        }))
    }
}

/// Collector shaped like a desktop browser whose audio probe fails.
pub fn browser_collector() -> SignalCollector {
    SignalCollector::new(browser_soft_signals)
        .with_user_agent_source(UserAgentDataSource::new(FakeUserAgentData))
        .with_source(CanvasSource::new(FakeCanvas))
        .with_source(AudioSource::new(BrokenAudio))
        .with_source(WebGlSource::new(FakeWebGl))
}

pub fn widget(endpoint: &str, identity: IdentityStore) -> DeviceFingerprint {
    DeviceFingerprint::builder()
        .ignore_environment()
        .endpoint(endpoint)
        .collector(browser_collector())
        .identity(identity)
        .build()
}

pub fn shared(widget: DeviceFingerprint) -> Arc<DeviceFingerprint> {
    Arc::new(widget)
}

/// Accepts connections and never answers them.
pub async fn silent_server() -> (String, JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("http://{}/fingerprint", listener.local_addr().unwrap());
    let handle = tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((socket, _)) = listener.accept().await {
            held.push(socket);
        }
    });
    (url, handle)
}
