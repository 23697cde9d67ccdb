//! # Teragrab
//!
//! Stealth extraction of signed download URLs from Terabox-style share links.
//!
//! The target service fingerprints automated clients (automation flags, GPU
//! strings, canvas/audio entropy, timing probes) and hides the real asset URL
//! behind countdown-gated, JavaScript-driven flows. Teragrab drives a patched
//! Chrome over a custom CDP implementation, binds one internally consistent
//! synthetic identity to each isolated browsing context, and races three
//! extraction strategies (network interception, script-state inspection,
//! simulated-human DOM interaction) to recover the signed URL.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use teragrab::{EngineConfig, SessionManager};
//!
//! #[tokio::main]
//! async fn main() -> teragrab::Result<()> {
//!     let manager = SessionManager::new(EngineConfig::default());
//!
//!     let result = manager
//!         .extract("https://terabox.com/s/1abcDEF_ghi")
//!         .await;
//!
//!     if result.success {
//!         println!("{}", result.download_url.unwrap());
//!     }
//!
//!     manager.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! Extraction never panics the host: every failure is represented as a
//! failed [`ExtractionResult`] carrying the last underlying error.

pub mod browser;
pub mod cdp;
pub mod error;
pub mod extract;
pub mod net;
pub mod page;
pub mod retry;
pub mod session;
pub mod stealth;
pub mod validate;

// Re-exports
pub use browser::Browser;
pub use error::{Error, Result};
pub use extract::{ExtractionPipeline, ExtractionResult, StageKind, StageOutcome};
pub use net::{CapturedResponse, NetworkInterceptor};
pub use page::Page;
pub use retry::{RetryPolicy, RetryState};
pub use session::SessionManager;
pub use stealth::{build_init_script, ContextOptions, EvasionToggles, Identity};

/// Browser process configuration
#[derive(Debug, Clone)]
pub struct BrowserConfig {
    /// Headless mode
    pub headless: bool,
    /// Path to Chrome/Chromium binary (None = autodetect)
    pub chrome_path: Option<String>,
    /// Patch automation markers out of the Chrome binary before launch
    pub patch_binary: bool,
    /// Navigation timeout in milliseconds
    pub navigation_timeout_ms: u64,
    /// Default per-action timeout in milliseconds
    pub action_timeout_ms: u64,
    /// Extra launch flags appended after the stealth set
    pub extra_flags: Vec<String>,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            headless: true,
            chrome_path: None,
            patch_binary: true,
            navigation_timeout_ms: 45_000,
            action_timeout_ms: 60_000,
            extra_flags: Vec::new(),
        }
    }
}

/// Extraction pipeline configuration
#[derive(Debug, Clone)]
pub struct ExtractionConfig {
    /// Maximum full-browser attempts (one fresh identity each)
    pub max_attempts: u32,
    /// Minimum content length for a response to count as the target asset
    pub min_file_size: u64,
    /// Host-name substrings that identify the service's CDN
    pub cdn_patterns: Vec<String>,
    /// Query keys whose presence marks a signed URL
    pub signature_params: Vec<String>,
    /// Share-link domains the engine accepts
    pub supported_domains: Vec<String>,
    /// Stage 1 budget in milliseconds
    pub network_stage_timeout_ms: u64,
    /// Stage 2 budget in milliseconds
    pub script_stage_timeout_ms: u64,
    /// Stage 3 budget in milliseconds
    pub dom_stage_timeout_ms: u64,
    /// Gap with no network activity that counts as "idle"
    pub network_idle_gap_ms: u64,
    /// Extra settle time after network idle, for lazy content
    pub idle_grace_ms: u64,
    /// Upper bound on waiting out a visible countdown
    pub countdown_max_wait_ms: u64,
    /// Click/check cycles in the DOM stage
    pub click_cycles: u32,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            min_file_size: 512 * 1024,
            cdn_patterns: [
                "cdnst", "d.terabox", "data.terabox", "download.terabox",
                "cdn.terabox", "st.terabox", "d2.terabox", "d3.terabox",
                "d4.terabox", "d5.terabox", "stream", "datadown", "nxcdn",
                "dxcdn", "hot.terabox", "cold.terabox", "jp-store", "asia-store",
                "us-store", "eu-store", "video-cdn", "file-cdn", "media-cdn",
                "storage", "dl.terabox", "get.terabox", "fetch.terabox",
                "pan.terabox", "pcs.terabox", "c.terabox", "f.terabox",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            signature_params: [
                "sign", "time", "timestamp", "expires", "expiry", "exp",
                "token", "auth", "signature", "key", "secret", "sig",
                "fid", "uk", "devuid", "dp-logid", "shareid", "fsid",
                "rand", "vuk", "app_id", "check_blue_name", "clienttype",
                "channel", "version", "web", "dp-callid", "scene",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            supported_domains: [
                "terabox.com", "1024tera.com", "teraboxapp.com", "4funbox.co",
                "mirrobox.com", "nephobox.com", "freeterabox.com", "momerybox.com",
                "teraboxlink.com", "terafileshare.com", "terabox.fun", "terabox.app",
                "1024terabox.com", "teraboxshare.com", "terabox.tech", "gcloud.live",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            network_stage_timeout_ms: 30_000,
            script_stage_timeout_ms: 10_000,
            dom_stage_timeout_ms: 45_000,
            network_idle_gap_ms: 500,
            idle_grace_ms: 3_000,
            countdown_max_wait_ms: 30_000,
            click_cycles: 3,
        }
    }
}

/// Everything the engine needs for one deployment
#[derive(Debug, Clone, Default)]
pub struct EngineConfig {
    pub browser: BrowserConfig,
    pub extraction: ExtractionConfig,
    pub evasions: EvasionToggles,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_sanity() {
        let config = EngineConfig::default();
        assert_eq!(config.extraction.max_attempts, 3);
        assert_eq!(config.extraction.min_file_size, 512 * 1024);
        assert!(config.extraction.cdn_patterns.iter().any(|p| p == "d.terabox"));
        assert!(config.extraction.signature_params.iter().any(|p| p == "sign"));
        assert!(config
            .extraction
            .supported_domains
            .iter()
            .any(|d| d == "terabox.com"));
        assert!(config.browser.headless);
    }
}
