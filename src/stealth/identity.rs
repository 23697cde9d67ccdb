//! Synthetic browser identity generation
//!
//! Produces one complete, internally consistent fingerprint per extraction
//! attempt. Selection order matters: OS first, then OS-appropriate GPU and
//! fonts, then a browser version pair shared by the user-agent string and
//! the client hints, then timezone-driven locale/languages, then geometry
//! and hardware. Downstream consumers assume these correlations hold, so
//! no field is ever drawn independently of this ordering.

use std::collections::HashMap;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use sha2::{Digest, Sha256};

/// Chrome (major, full) version pairs. The same pair feeds the UA string
/// and the sec-ch-ua headers so they can never disagree.
const CHROME_VERSIONS: &[(&str, &str)] = &[
    ("124", "124.0.6367.91"),
    ("125", "125.0.6422.60"),
    ("126", "126.0.6478.55"),
    ("127", "127.0.6533.72"),
    ("128", "128.0.6613.84"),
    ("129", "129.0.6668.42"),
    ("130", "130.0.6723.91"),
    ("131", "131.0.6778.85"),
    ("132", "132.0.6834.57"),
];

/// (UA os segment, client-hint platform version)
const WINDOWS_VERSIONS: &[(&str, &str)] = &[
    ("Windows NT 10.0; Win64; x64", "10.0.0"),
    ("Windows NT 10.0; Win64; x64", "15.0.0"), // Win11 reports as NT 10.0
];

const MACOS_VERSIONS: &[(&str, &str)] = &[
    ("Macintosh; Intel Mac OS X 10_15_7", "10.15.7"),
    ("Macintosh; Intel Mac OS X 12_7_1", "12.7.1"),
    ("Macintosh; Intel Mac OS X 13_6_3", "13.6.3"),
    ("Macintosh; Intel Mac OS X 14_2_1", "14.2.1"),
    ("Macintosh; Intel Mac OS X 14_5", "14.5"),
];

/// Common desktop viewport sizes
const VIEWPORTS: &[(u32, u32)] = &[
    (1920, 1080),
    (1536, 864),
    (1440, 900),
    (1366, 768),
    (1280, 720),
    (2560, 1440),
    (1680, 1050),
    (1600, 900),
    (1920, 1200),
    (1280, 800),
];

/// (timezone, languages, locale, weight) - weighted by population centers.
/// The timezone choice drives the default language.
const TIMEZONES: &[(&str, &[&str], &str, f64)] = &[
    ("America/New_York", &["en-US", "en"], "en-US", 0.12),
    ("America/Los_Angeles", &["en-US", "en"], "en-US", 0.10),
    ("America/Chicago", &["en-US", "en"], "en-US", 0.06),
    ("Europe/London", &["en-GB", "en"], "en-GB", 0.08),
    ("Europe/Paris", &["fr-FR", "fr", "en"], "fr-FR", 0.04),
    ("Europe/Berlin", &["de-DE", "de", "en"], "de-DE", 0.05),
    ("Asia/Tokyo", &["ja-JP", "ja", "en"], "ja-JP", 0.04),
    ("Asia/Shanghai", &["zh-CN", "zh", "en"], "zh-CN", 0.06),
    ("Asia/Kolkata", &["en-IN", "hi-IN", "en"], "en-IN", 0.15),
    ("Asia/Singapore", &["en-SG", "zh-SG", "en"], "en-SG", 0.03),
    ("Australia/Sydney", &["en-AU", "en"], "en-AU", 0.03),
    ("Europe/Moscow", &["ru-RU", "ru", "en"], "ru-RU", 0.03),
    ("America/Sao_Paulo", &["pt-BR", "pt", "en"], "pt-BR", 0.04),
    ("Asia/Seoul", &["ko-KR", "ko", "en"], "ko-KR", 0.03),
    ("Asia/Dubai", &["ar-AE", "en-AE", "en"], "ar-AE", 0.02),
    ("Asia/Jakarta", &["id-ID", "id", "en"], "id-ID", 0.05),
    ("Europe/Amsterdam", &["nl-NL", "nl", "en"], "nl-NL", 0.02),
    ("Asia/Manila", &["en-PH", "fil-PH", "en"], "en-PH", 0.05),
];

/// WebGL (vendor, renderer) pairs - must match platform expectations
const WEBGL_WINDOWS: &[(&str, &str)] = &[
    ("Google Inc. (NVIDIA)", "ANGLE (NVIDIA, NVIDIA GeForce RTX 3060 Direct3D11 vs_5_0 ps_5_0, D3D11)"),
    ("Google Inc. (NVIDIA)", "ANGLE (NVIDIA, NVIDIA GeForce RTX 3070 Direct3D11 vs_5_0 ps_5_0, D3D11)"),
    ("Google Inc. (NVIDIA)", "ANGLE (NVIDIA, NVIDIA GeForce RTX 4060 Direct3D11 vs_5_0 ps_5_0, D3D11)"),
    ("Google Inc. (NVIDIA)", "ANGLE (NVIDIA, NVIDIA GeForce RTX 4070 Direct3D11 vs_5_0 ps_5_0, D3D11)"),
    ("Google Inc. (NVIDIA)", "ANGLE (NVIDIA, NVIDIA GeForce GTX 1660 Super Direct3D11 vs_5_0 ps_5_0, D3D11)"),
    ("Google Inc. (AMD)", "ANGLE (AMD, AMD Radeon RX 6700 XT Direct3D11 vs_5_0 ps_5_0, D3D11)"),
    ("Google Inc. (AMD)", "ANGLE (AMD, AMD Radeon RX 7600 Direct3D11 vs_5_0 ps_5_0, D3D11)"),
    ("Google Inc. (Intel)", "ANGLE (Intel, Intel(R) UHD Graphics 770 Direct3D11 vs_5_0 ps_5_0, D3D11)"),
    ("Google Inc. (Intel)", "ANGLE (Intel, Intel(R) Iris(R) Xe Graphics Direct3D11 vs_5_0 ps_5_0, D3D11)"),
];

const WEBGL_MAC: &[(&str, &str)] = &[
    ("Apple Inc.", "Apple M1"),
    ("Apple Inc.", "Apple M1 Pro"),
    ("Apple Inc.", "Apple M2"),
    ("Apple Inc.", "Apple M2 Pro"),
    ("Apple Inc.", "Apple M3"),
    ("Apple Inc.", "Apple M3 Pro"),
    ("Apple Inc.", "AMD Radeon Pro 5500M OpenGL Engine"),
    ("Apple Inc.", "Intel(R) Iris(TM) Plus Graphics OpenGL Engine"),
];

const COMMON_FONTS: &[&str] = &[
    "Arial", "Arial Black", "Calibri", "Cambria", "Comic Sans MS",
    "Consolas", "Courier New", "Georgia", "Helvetica", "Impact",
    "Lucida Console", "Lucida Sans Unicode", "Microsoft Sans Serif",
    "Palatino Linotype", "Segoe UI", "Tahoma", "Times New Roman",
    "Trebuchet MS", "Verdana", "Webdings", "Wingdings",
];

const MAC_FONTS: &[&str] = &[
    "Helvetica Neue", "Menlo", "Monaco", "San Francisco", "SF Pro",
    "Avenir", "Avenir Next", "Futura", "Gill Sans", "Optima",
];

/// OS family the identity claims
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum OsFamily {
    Windows,
    MacOs,
}

/// One sec-ch-ua brand entry
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UaBrand {
    pub brand: String,
    pub version: String,
}

/// Client-hint values, derived from the same version pair as the UA string
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClientHints {
    /// Brand list in randomized order (Chrome randomizes too)
    pub brands: Vec<UaBrand>,
    pub full_version: String,
    /// "Windows" or "macOS"
    pub platform_name: String,
    pub platform_version: String,
    pub architecture: String,
    pub bitness: String,
}

impl ClientHints {
    /// `sec-ch-ua` header value
    pub fn ua_header(&self) -> String {
        self.brands
            .iter()
            .map(|b| format!("\"{}\";v=\"{}\"", b.brand, b.version))
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// `sec-ch-ua-full-version-list` header value
    pub fn full_version_list_header(&self) -> String {
        format!(
            "\"Chromium\";v=\"{v}\", \"Google Chrome\";v=\"{v}\", \"Not=A?Brand\";v=\"99.0.0.0\"",
            v = self.full_version
        )
    }
}

/// Battery state snapshot; `None` durations render as `Infinity`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatterySnapshot {
    pub charging: bool,
    pub charging_time_s: Option<u32>,
    pub discharging_time_s: Option<u32>,
    pub level: f64,
}

/// Network connection descriptor
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConnectionProfile {
    pub effective_type: String,
    pub downlink: f64,
    pub rtt: u32,
    pub save_data: bool,
}

/// A complete, internally consistent synthetic browser fingerprint.
///
/// Immutable: created at the start of an extraction attempt, discarded
/// when the owning browsing context closes.
#[derive(Debug, Clone, PartialEq)]
pub struct Identity {
    pub user_agent: String,
    pub os: OsFamily,
    pub platform: String,
    pub viewport_width: u32,
    pub viewport_height: u32,
    pub screen_width: u32,
    pub screen_height: u32,
    pub timezone: String,
    pub locale: String,
    pub languages: Vec<String>,
    pub device_memory: u32,
    pub hardware_concurrency: u32,
    pub webgl_vendor: String,
    pub webgl_renderer: String,
    pub color_depth: u8,
    pub pixel_ratio: f64,
    pub do_not_track: Option<String>,
    pub max_touch_points: u32,
    pub client_hints: ClientHints,
    pub audio_seed: f64,
    pub canvas_seed: u32,
    pub fonts: Vec<String>,
    pub battery: BatterySnapshot,
    pub connection: ConnectionProfile,
}

/// Context configuration derived from an identity, consumed by the
/// session manager when it opens an isolated browsing context.
#[derive(Debug, Clone)]
pub struct ContextOptions {
    pub user_agent: String,
    pub accept_language: String,
    pub timezone: String,
    pub locale: String,
    pub viewport_width: u32,
    pub viewport_height: u32,
    pub device_scale_factor: f64,
    pub has_touch: bool,
    pub max_touch_points: u32,
    pub extra_headers: HashMap<String, String>,
}

impl Identity {
    /// Generate a fresh identity.
    ///
    /// With a seed, the identity is a pure function of the seed string
    /// (SHA-256 of the seed feeds the RNG) - same seed, bit-identical
    /// identity. Without one, per-process entropy is used.
    pub fn generate(seed: Option<&str>) -> Self {
        let mut rng = match seed {
            Some(s) => StdRng::from_seed(Sha256::digest(s.as_bytes()).into()),
            None => StdRng::from_entropy(),
        };

        // 1. OS family, weighted towards Windows
        let os = if rng.gen_bool(0.75) {
            OsFamily::Windows
        } else {
            OsFamily::MacOs
        };

        // 2. OS-appropriate GPU pair and font pool
        let (os_segment, platform_version, platform, webgl, mut fonts) = match os {
            OsFamily::Windows => {
                let (segment, version) = *WINDOWS_VERSIONS.choose(&mut rng).unwrap();
                let webgl = *WEBGL_WINDOWS.choose(&mut rng).unwrap();
                let fonts: Vec<String> = COMMON_FONTS.iter().map(|s| s.to_string()).collect();
                (segment, version, "Win32", webgl, fonts)
            }
            OsFamily::MacOs => {
                let (segment, version) = *MACOS_VERSIONS.choose(&mut rng).unwrap();
                let webgl = *WEBGL_MAC.choose(&mut rng).unwrap();
                let fonts: Vec<String> = COMMON_FONTS
                    .iter()
                    .chain(MAC_FONTS.iter())
                    .map(|s| s.to_string())
                    .collect();
                (segment, version, "MacIntel", webgl, fonts)
            }
        };

        fonts.shuffle(&mut rng);
        let keep = rng.gen_range(15..=fonts.len());
        fonts.truncate(keep);

        // 3. Browser version pair shared by UA and client hints
        let (chrome_major, chrome_full) = *CHROME_VERSIONS.choose(&mut rng).unwrap();
        let user_agent = format!(
            "Mozilla/5.0 ({}) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/{} Safari/537.36",
            os_segment, chrome_full
        );

        let mut brands = vec![
            UaBrand {
                brand: "Chromium".into(),
                version: chrome_major.into(),
            },
            UaBrand {
                brand: "Google Chrome".into(),
                version: chrome_major.into(),
            },
            UaBrand {
                brand: "Not=A?Brand".into(),
                version: "99".into(),
            },
        ];
        brands.shuffle(&mut rng);

        let client_hints = ClientHints {
            brands,
            full_version: chrome_full.to_string(),
            platform_name: match os {
                OsFamily::Windows => "Windows".into(),
                OsFamily::MacOs => "macOS".into(),
            },
            platform_version: platform_version.to_string(),
            architecture: "x86".into(),
            bitness: "64".into(),
        };

        // 4. Timezone drives languages and locale
        let (timezone, languages, locale, _) = *TIMEZONES
            .choose_weighted(&mut rng, |tz| tz.3)
            .unwrap();
        let languages: Vec<String> = languages.iter().map(|s| s.to_string()).collect();

        // 5. Viewport from the catalog; screen slightly taller (OS chrome)
        let (viewport_width, viewport_height) = *VIEWPORTS.choose(&mut rng).unwrap();
        let chrome_height = *[0u32, 40, 48, 56].choose(&mut rng).unwrap();

        // 6. Hardware from weighted small finite sets
        let device_memory = *[4u32, 8, 8, 16, 16, 32].choose(&mut rng).unwrap();
        let hardware_concurrency = *[4u32, 6, 8, 8, 12, 16].choose(&mut rng).unwrap();
        let pixel_ratio = *[1.0f64, 1.0, 1.25, 1.25, 1.5, 2.0].choose(&mut rng).unwrap();

        let battery = BatterySnapshot {
            charging: rng.gen_bool(0.75),
            charging_time_s: if rng.gen_bool(0.5) { Some(0) } else { None },
            discharging_time_s: if rng.gen_bool(0.5) {
                Some(rng.gen_range(3_600..28_800))
            } else {
                None
            },
            level: (rng.gen_range(0.3..1.0f64) * 100.0).round() / 100.0,
        };

        let connection = ConnectionProfile {
            effective_type: (*["4g", "4g", "4g", "3g"].choose(&mut rng).unwrap()).to_string(),
            downlink: *[10.0, 10.0, 5.65, 2.8, 1.4].choose(&mut rng).unwrap(),
            rtt: *[50u32, 100, 150, 200].choose(&mut rng).unwrap(),
            save_data: false,
        };

        Self {
            user_agent,
            os,
            platform: platform.to_string(),
            viewport_width,
            viewport_height,
            screen_width: viewport_width,
            screen_height: viewport_height + chrome_height,
            timezone: timezone.to_string(),
            locale: locale.to_string(),
            languages,
            device_memory,
            hardware_concurrency,
            webgl_vendor: webgl.0.to_string(),
            webgl_renderer: webgl.1.to_string(),
            color_depth: 24,
            pixel_ratio,
            do_not_track: if rng.gen_bool(0.25) {
                Some("1".into())
            } else {
                None
            },
            max_touch_points: 0,
            client_hints,
            audio_seed: rng.gen_range(0.0..1.0),
            canvas_seed: rng.gen_range(0..2u32.pow(31)),
            fonts,
            battery,
            connection,
        }
    }

    /// Weighted Accept-Language value from the language list
    pub fn accept_language(&self) -> String {
        self.languages
            .iter()
            .take(3)
            .enumerate()
            .map(|(i, lang)| format!("{};q={:.1}", lang, 1.0 - i as f64 * 0.1))
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Full header set for the browsing context, client hints included
    pub fn extra_headers(&self) -> HashMap<String, String> {
        let mut headers = HashMap::new();
        headers.insert("Accept-Language".into(), self.accept_language());
        headers.insert(
            "Accept".into(),
            "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,\
             image/apng,*/*;q=0.8,application/signed-exchange;v=b3;q=0.7"
                .into(),
        );
        headers.insert("Accept-Encoding".into(), "gzip, deflate, br".into());
        headers.insert("Upgrade-Insecure-Requests".into(), "1".into());
        headers.insert("Sec-Fetch-Site".into(), "none".into());
        headers.insert("Sec-Fetch-Mode".into(), "navigate".into());
        headers.insert("Sec-Fetch-User".into(), "?1".into());
        headers.insert("Sec-Fetch-Dest".into(), "document".into());
        headers.insert("Cache-Control".into(), "max-age=0".into());
        headers.insert("sec-ch-ua".into(), self.client_hints.ua_header());
        headers.insert("sec-ch-ua-mobile".into(), "?0".into());
        headers.insert(
            "sec-ch-ua-platform".into(),
            format!("\"{}\"", self.client_hints.platform_name),
        );
        headers.insert(
            "sec-ch-ua-platform-version".into(),
            format!("\"{}\"", self.client_hints.platform_version),
        );
        headers
    }

    /// Browsing-context configuration for the session manager
    pub fn context_options(&self) -> ContextOptions {
        ContextOptions {
            user_agent: self.user_agent.clone(),
            accept_language: self.accept_language(),
            timezone: self.timezone.clone(),
            locale: self.locale.clone(),
            viewport_width: self.viewport_width,
            viewport_height: self.viewport_height,
            device_scale_factor: self.pixel_ratio,
            has_touch: self.max_touch_points > 0,
            max_touch_points: self.max_touch_points,
            extra_headers: self.extra_headers(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seeded_generation_is_deterministic() {
        let a = Identity::generate(Some("https://terabox.com/s/1x#0#123"));
        let b = Identity::generate(Some("https://terabox.com/s/1x#0#123"));
        assert_eq!(a, b);
    }

    #[test]
    fn test_different_seeds_diverge() {
        let a = Identity::generate(Some("seed-a"));
        let b = Identity::generate(Some("seed-b"));
        // Full-identity collision across different seeds is as good as
        // impossible with this many correlated fields.
        assert_ne!(a, b);
    }

    #[test]
    fn test_gpu_matches_platform() {
        for i in 0..40 {
            let identity = Identity::generate(Some(&format!("gpu-{}", i)));
            match identity.os {
                OsFamily::Windows => {
                    assert_eq!(identity.platform, "Win32");
                    assert!(WEBGL_WINDOWS
                        .iter()
                        .any(|(v, r)| *v == identity.webgl_vendor
                            && *r == identity.webgl_renderer));
                    assert!(identity.user_agent.contains("Windows NT"));
                }
                OsFamily::MacOs => {
                    assert_eq!(identity.platform, "MacIntel");
                    assert!(WEBGL_MAC
                        .iter()
                        .any(|(v, r)| *v == identity.webgl_vendor
                            && *r == identity.webgl_renderer));
                    assert!(identity.user_agent.contains("Macintosh"));
                }
            }
        }
    }

    #[test]
    fn test_locale_is_first_language() {
        for i in 0..40 {
            let identity = Identity::generate(Some(&format!("lang-{}", i)));
            assert_eq!(identity.locale, identity.languages[0]);
        }
    }

    #[test]
    fn test_screen_is_at_least_viewport() {
        for i in 0..40 {
            let identity = Identity::generate(Some(&format!("geom-{}", i)));
            assert_eq!(identity.screen_width, identity.viewport_width);
            assert!(identity.screen_height >= identity.viewport_height);
            assert!(identity.screen_height <= identity.viewport_height + 56);
        }
    }

    #[test]
    fn test_hardware_from_catalogs() {
        for i in 0..40 {
            let identity = Identity::generate(Some(&format!("hw-{}", i)));
            assert!([4, 8, 16, 32].contains(&identity.device_memory));
            assert!([4, 6, 8, 12, 16].contains(&identity.hardware_concurrency));
            assert!(identity.fonts.len() >= 15);
            assert!(identity.canvas_seed < 2u32.pow(31));
            assert!((0.0..1.0).contains(&identity.audio_seed));
        }
    }

    #[test]
    fn test_client_hints_agree_with_user_agent() {
        for i in 0..40 {
            let identity = Identity::generate(Some(&format!("ch-{}", i)));
            assert!(identity
                .user_agent
                .contains(&format!("Chrome/{}", identity.client_hints.full_version)));
            let major = identity
                .client_hints
                .full_version
                .split('.')
                .next()
                .unwrap();
            assert!(identity
                .client_hints
                .brands
                .iter()
                .any(|b| b.brand == "Google Chrome" && b.version == major));
        }
    }

    #[test]
    fn test_accept_language_weighting() {
        let identity = Identity::generate(Some("al"));
        let al = identity.accept_language();
        assert!(al.starts_with(&format!("{};q=1.0", identity.languages[0])));
    }

    #[test]
    fn test_context_options_carry_client_hints() {
        let identity = Identity::generate(Some("ctx"));
        let options = identity.context_options();
        assert_eq!(options.user_agent, identity.user_agent);
        assert!(options.extra_headers.contains_key("sec-ch-ua"));
        assert!(options.extra_headers.contains_key("Accept-Language"));
        assert!(!options.has_touch);
    }
}
