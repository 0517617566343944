use chrono::{Local, Offset};

use super::{FeatureFlags, ScreenSignals, SoftSignalProvider, SoftSignals};

/// Soft signals observable from a native process.
///
/// Facts without a native equivalent (screen geometry, device memory,
/// automation flag) are reported as absent.
#[derive(Debug, Clone, Copy, Default)]
pub struct HostEnvironment;

impl HostEnvironment {
    /// Creates the provider.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl SoftSignalProvider for HostEnvironment {
    fn soft_signals(&self) -> SoftSignals {
        let langs = languages(|name| std::env::var(name).ok());
        SoftSignals {
            ua: format!(
                "sye-fingerprint-core/{} ({}; {})",
                env!("CARGO_PKG_VERSION"),
                std::env::consts::OS,
                std::env::consts::ARCH
            ),
            platform: format!("{} {}", std::env::consts::OS, std::env::consts::ARCH),
            lang: langs.first().cloned(),
            langs,
            hc: std::thread::available_parallelism()
                .ok()
                .and_then(|n| u32::try_from(n.get()).ok()),
            mem: None,
            touch: Some(0),
            tz: time_zone(std::env::var("TZ").ok(), system_time_zone),
            tz_off: -Local::now().offset().fix().local_minus_utc() / 60,
            screen: ScreenSignals::default(),
            features: FeatureFlags {
                wasm: cfg!(target_arch = "wasm32"),
                ..FeatureFlags::default()
            },
            webdriver: None,
        }
    }
}

/// Preferred languages from `LANGUAGE`, then `LC_ALL`, `LC_MESSAGES`, `LANG`.
fn languages(lookup: impl Fn(&str) -> Option<String>) -> Vec<String> {
    if let Some(list) = lookup("LANGUAGE").filter(|v| !v.is_empty()) {
        let langs: Vec<String> = list.split(':').filter_map(locale_to_tag).collect();
        if !langs.is_empty() {
            return langs;
        }
    }
    ["LC_ALL", "LC_MESSAGES", "LANG"]
        .iter()
        .find_map(|name| lookup(name).as_deref().and_then(locale_to_tag))
        .into_iter()
        .collect()
}

/// `TZ` when it names a zone, otherwise the zone configured on the system.
fn time_zone(tz_env: Option<String>, system: impl FnOnce() -> Option<String>) -> Option<String> {
    tz_env
        .map(|tz| tz.trim_start_matches(':').trim().to_string())
        .filter(|tz| !tz.is_empty())
        .or_else(system)
}

#[cfg(not(target_arch = "wasm32"))]
fn system_time_zone() -> Option<String> {
    match iana_time_zone::get_timezone() {
        Ok(tz) => Some(tz),
        Err(err) => {
            log::debug!("system time zone unavailable: {err}");
            None
        }
    }
}

#[cfg(target_arch = "wasm32")]
const fn system_time_zone() -> Option<String> {
    None
}

/// `es_CO.UTF-8` → `es-CO`. `C` and `POSIX` carry no language.
fn locale_to_tag(locale: &str) -> Option<String> {
    let base = locale.split(['.', '@']).next()?.trim();
    if base.is_empty() || base == "C" || base == "POSIX" {
        return None;
    }
    Some(base.replace('_', "-"))
}
