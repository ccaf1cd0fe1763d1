//! Egress identities and their browser disguises
//!
//! An [`Identity`] pairs an egress endpoint with a [`StealthProfile`]. The
//! profile is fixed for the identity's lifetime so every request drawn from it
//! presents the same device.

use chrono::{DateTime, Utc};
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

use crate::config::{ProxyIdentityConfig, ProxyKind};

/// An egress proxy endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProxyEndpoint {
    /// Proxy URL with inline credentials
    pub url: String,

    /// Network class
    pub kind: ProxyKind,

    /// Display label
    pub label: Option<String>,
}

impl ProxyEndpoint {
    /// URL with the password removed, for logs and status output
    pub fn redacted_url(&self) -> String {
        match reqwest::Url::parse(&self.url) {
            Ok(mut url) => {
                if url.password().is_some() {
                    let _ = url.set_password(Some("***"));
                }
                url.to_string()
            }
            Err(_) => "<invalid proxy url>".to_string(),
        }
    }
}

impl From<&ProxyIdentityConfig> for ProxyEndpoint {
    fn from(config: &ProxyIdentityConfig) -> Self {
        Self {
            url: config.url.clone(),
            kind: config.kind,
            label: config.label.clone(),
        }
    }
}

/// Browser viewport in CSS pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Viewport {
    /// Width
    pub width: u32,
    /// Height
    pub height: u32,
}

/// Spoofed device characteristics presented by a session
///
/// [`headers`](Self::headers) carries everything an HTTP request can express:
/// user agent, language, platform and viewport client hints. The
/// script-visible fields (`platform`, `timezone`, `hardware_concurrency`,
/// WebGL vendor and renderer, `hide_webdriver`) have no header form; the
/// HTTP fetcher does not apply them and they only take effect in a
/// script-executing page fetcher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StealthProfile {
    /// User-Agent header
    pub user_agent: String,

    /// `navigator.platform`
    pub platform: String,

    /// `Sec-CH-UA-Platform` value (quoted)
    pub client_hint_platform: String,

    /// BCP 47 locale
    pub locale: String,

    /// Accept-Language header
    pub accept_language: String,

    /// IANA timezone
    pub timezone: String,

    /// Window size
    pub viewport: Viewport,

    /// `window.devicePixelRatio`
    pub device_scale_factor: f32,

    /// `navigator.hardwareConcurrency`
    pub hardware_concurrency: u8,

    /// Unmasked WebGL vendor
    pub webgl_vendor: String,

    /// Unmasked WebGL renderer
    pub webgl_renderer: String,

    /// Hide `navigator.webdriver` and similar automation markers
    pub hide_webdriver: bool,
}

struct DevicePreset {
    user_agent: &'static str,
    platform: &'static str,
    client_hint_platform: &'static str,
    viewports: &'static [(u32, u32)],
    device_scale_factors: &'static [f32],
    webgl_vendor: &'static str,
    webgl_renderer: &'static str,
}

const DEVICE_PRESETS: &[DevicePreset] = &[
    DevicePreset {
        user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
        platform: "Win32",
        client_hint_platform: "\"Windows\"",
        viewports: &[(1920, 1080), (1536, 864), (1366, 768)],
        device_scale_factors: &[1.0, 1.25],
        webgl_vendor: "Google Inc. (NVIDIA)",
        webgl_renderer: "ANGLE (NVIDIA, NVIDIA GeForce RTX 3060 Direct3D11 vs_5_0 ps_5_0, D3D11)",
    },
    DevicePreset {
        user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/123.0.0.0 Safari/537.36 Edg/123.0.0.0",
        platform: "Win32",
        client_hint_platform: "\"Windows\"",
        viewports: &[(1920, 1080), (1600, 900)],
        device_scale_factors: &[1.0, 1.5],
        webgl_vendor: "Google Inc. (Intel)",
        webgl_renderer: "ANGLE (Intel, Intel(R) UHD Graphics 620 Direct3D11 vs_5_0 ps_5_0, D3D11)",
    },
    DevicePreset {
        user_agent: "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
        platform: "MacIntel",
        client_hint_platform: "\"macOS\"",
        viewports: &[(1440, 900), (1512, 982), (1728, 1117)],
        device_scale_factors: &[2.0],
        webgl_vendor: "Google Inc. (Apple)",
        webgl_renderer: "ANGLE (Apple, Apple M1, OpenGL 4.1)",
    },
    DevicePreset {
        user_agent: "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
        platform: "Linux x86_64",
        client_hint_platform: "\"Linux\"",
        viewports: &[(1920, 1080), (2560, 1440)],
        device_scale_factors: &[1.0],
        webgl_vendor: "Google Inc. (AMD)",
        webgl_renderer: "ANGLE (AMD, AMD Radeon RX 6700 XT (radeonsi navi22 LLVM 15.0.7), OpenGL 4.6)",
    },
];

/// (locale, Accept-Language, timezone)
const LOCALES: &[(&str, &str, &str)] = &[
    ("en-US", "en-US,en;q=0.9", "America/New_York"),
    ("en-US", "en-US,en;q=0.9", "America/Los_Angeles"),
    ("en-GB", "en-GB,en;q=0.9", "Europe/London"),
    ("de-DE", "de-DE,de;q=0.9,en;q=0.8", "Europe/Berlin"),
    ("fr-FR", "fr-FR,fr;q=0.9,en;q=0.8", "Europe/Paris"),
    ("es-ES", "es-ES,es;q=0.9,en;q=0.8", "Europe/Madrid"),
];

const HARDWARE_CONCURRENCY: &[u8] = &[4, 8, 12, 16];

impl StealthProfile {
    /// Draw a consistent device profile from the preset catalog
    pub fn generate<R: Rng + ?Sized>(rng: &mut R) -> Self {
        let preset = &DEVICE_PRESETS[rng.gen_range(0..DEVICE_PRESETS.len())];
        let (locale, accept_language, timezone) = LOCALES[rng.gen_range(0..LOCALES.len())];
        let (width, height) = preset
            .viewports
            .choose(rng)
            .copied()
            .unwrap_or((1920, 1080));

        Self {
            user_agent: preset.user_agent.to_string(),
            platform: preset.platform.to_string(),
            client_hint_platform: preset.client_hint_platform.to_string(),
            locale: locale.to_string(),
            accept_language: accept_language.to_string(),
            timezone: timezone.to_string(),
            viewport: Viewport { width, height },
            device_scale_factor: preset
                .device_scale_factors
                .choose(rng)
                .copied()
                .unwrap_or(1.0),
            hardware_concurrency: HARDWARE_CONCURRENCY.choose(rng).copied().unwrap_or(8),
            webgl_vendor: preset.webgl_vendor.to_string(),
            webgl_renderer: preset.webgl_renderer.to_string(),
            hide_webdriver: true,
        }
    }

    /// HTTP headers that present this profile
    pub fn headers(&self) -> Vec<(&'static str, String)> {
        vec![
            ("user-agent", self.user_agent.clone()),
            ("accept-language", self.accept_language.clone()),
            ("sec-ch-ua-platform", self.client_hint_platform.clone()),
            ("sec-ch-ua-mobile", "?0".to_string()),
            ("sec-ch-viewport-width", self.viewport.width.to_string()),
            ("sec-ch-viewport-height", self.viewport.height.to_string()),
            ("sec-ch-dpr", self.device_scale_factor.to_string()),
            ("upgrade-insecure-requests", "1".to_string()),
        ]
    }
}

/// One leasable egress + fingerprint unit
#[derive(Debug, Clone, PartialEq)]
pub struct Identity {
    /// Unique per generation; changes on rotation
    pub session_id: String,

    /// Egress endpoint (None = direct connection)
    pub endpoint: Option<ProxyEndpoint>,

    /// Disguise applied to every request (None when stealth is disabled)
    pub stealth: Option<StealthProfile>,

    /// When this generation was created
    pub created_at: DateTime<Utc>,
}

impl Identity {
    /// Create a fresh identity on an endpoint
    pub fn fresh<R: Rng + ?Sized>(
        rng: &mut R,
        endpoint: Option<ProxyEndpoint>,
        stealth_enabled: bool,
        created_at: DateTime<Utc>,
    ) -> Self {
        let stealth = stealth_enabled.then(|| StealthProfile::generate(rng));
        Self {
            session_id: format!("sess-{:016x}", rng.gen::<u64>()),
            endpoint,
            stealth,
            created_at,
        }
    }

    /// Age at `now`
    pub fn age(&self, now: DateTime<Utc>) -> chrono::Duration {
        now - self.created_at
    }
}

/// Rolling window of the most recent lease outcomes
#[derive(Debug, Clone)]
pub struct OutcomeWindow {
    outcomes: VecDeque<bool>,
    capacity: usize,
}

impl OutcomeWindow {
    /// Create an empty window keeping at most `capacity` outcomes
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            outcomes: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Record one outcome, dropping the oldest when full
    pub fn record(&mut self, success: bool) {
        if self.outcomes.len() == self.capacity {
            self.outcomes.pop_front();
        }
        self.outcomes.push_back(success);
    }

    /// Share of successes, None when empty
    pub fn success_rate(&self) -> Option<f64> {
        if self.outcomes.is_empty() {
            return None;
        }
        let successes = self.outcomes.iter().filter(|s| **s).count();
        Some(successes as f64 / self.outcomes.len() as f64)
    }

    /// Number of recorded outcomes
    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    /// Whether no outcome has been recorded
    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    /// Forget all outcomes
    pub fn clear(&mut self) {
        self.outcomes.clear();
    }
}
