//! Browser Launcher
//!
//! Chrome discovery, stealth launch flags, optional binary marker
//! patching, and an explicit start/stop lifecycle object. The session
//! manager receives a `Browser` rather than reaching for a global, so
//! tests inject one backed by the mock transport.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::cdp::{launch_chrome, Connection, MockState, Transport};
use crate::error::Result;
use crate::stealth::{find_chrome, MarkerPatcher};
use crate::BrowserConfig;

/// Counter for unique user data directories
static BROWSER_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Launch flags that keep automation signals out of the process.
/// Merged catalog: detection-relevant flags first, then environment
/// hardening for containerized deployments.
fn stealth_args(config: &BrowserConfig) -> Vec<String> {
    let mut args: Vec<String> = [
        // Automation hiding
        "--disable-blink-features=AutomationControlled",
        "--disable-features=IsolateOrigins,site-per-process,AutomationControlled,EnableAutomation",
        "--disable-site-isolation-trials",
        "--enable-features=NetworkService,NetworkServiceInProcess",
        "--disable-infobars",
        // Cloud/container hardening
        "--no-sandbox",
        "--disable-setuid-sandbox",
        "--disable-dev-shm-usage",
        "--disable-gpu",
        // Background-process behavior
        "--disable-background-timer-throttling",
        "--disable-backgrounding-occluded-windows",
        "--disable-renderer-backgrounding",
        "--disable-background-networking",
        "--disable-ipc-flooding-protection",
        // Look like a normal install
        "--no-first-run",
        "--no-default-browser-check",
        "--no-pings",
        "--disable-default-apps",
        "--disable-component-extensions-with-background-pages",
        "--disable-extensions",
        "--disable-hang-monitor",
        "--disable-popup-blocking",
        "--disable-prompt-on-repost",
        "--disable-sync",
        "--disable-domain-reliability",
        "--disable-client-side-phishing-detection",
        "--disable-breakpad",
        "--metrics-recording-only",
        "--password-store=basic",
        "--use-mock-keychain",
        "--force-color-profile=srgb",
        "--mute-audio",
        "--hide-scrollbars",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();

    if config.headless {
        args.push("--headless=new".into());
    }

    args.extend(config.extra_flags.iter().cloned());
    args
}

/// One owned browser process behind a connection
pub struct Browser {
    connection: Connection,
    user_data_dir: Option<PathBuf>,
}

impl Browser {
    /// Launch Chrome with the stealth flag set, patching the binary
    /// first when configured.
    pub async fn launch(config: &BrowserConfig) -> Result<Self> {
        let instance = BROWSER_COUNTER.fetch_add(1, Ordering::Relaxed);
        let user_data_dir = std::env::temp_dir().join(format!(
            "teragrab-browser-{}-{}",
            std::process::id(),
            instance
        ));
        let _ = std::fs::remove_dir_all(&user_data_dir);
        std::fs::create_dir_all(&user_data_dir)?;

        let chrome_path = match &config.chrome_path {
            Some(p) => PathBuf::from(p),
            None => find_chrome()?,
        };

        let chrome_path = if config.patch_binary {
            MarkerPatcher::new(&chrome_path)?.patched_path()?
        } else {
            chrome_path
        };

        let mut args = stealth_args(config);
        args.push(format!("--user-data-dir={}", user_data_dir.display()));

        tracing::info!("Launching Chrome from {:?}", chrome_path);
        let (child, ws_url) = launch_chrome(&chrome_path, &args)?;

        let transport = Transport::connect(child, &ws_url)?;
        let connection = Connection::new(transport);

        let version = connection.version().await?;
        tracing::info!("Connected to Chrome: {}", version.product);

        Ok(Self {
            connection,
            user_data_dir: Some(user_data_dir),
        })
    }

    /// A browser backed by the scripted mock transport; no process is
    /// spawned. Everything above the transport behaves as in production.
    pub fn with_mock(state: Arc<MockState>) -> Self {
        Self {
            connection: Connection::new(Transport::mock(state)),
            user_data_dir: None,
        }
    }

    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    /// Close the browser process and clean up its profile directory
    pub async fn close(&self) -> Result<()> {
        self.connection.close().await?;
        if let Some(dir) = &self.user_data_dir {
            let _ = std::fs::remove_dir_all(dir);
        }
        Ok(())
    }
}

impl Drop for Browser {
    fn drop(&mut self) {
        // The transport's Drop kills the process; the profile dir is
        // best-effort if close() was never reached.
        if let Some(dir) = &self.user_data_dir {
            let _ = std::fs::remove_dir_all(dir);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stealth_args_hide_automation() {
        let args = stealth_args(&BrowserConfig::default());
        assert!(args
            .iter()
            .any(|a| a.contains("AutomationControlled")));
        assert!(args.iter().any(|a| a == "--headless=new"));
    }

    #[test]
    fn test_visible_mode_drops_headless_flag() {
        let config = BrowserConfig {
            headless: false,
            ..Default::default()
        };
        let args = stealth_args(&config);
        assert!(!args.iter().any(|a| a.starts_with("--headless")));
    }

    #[test]
    fn test_extra_flags_appended() {
        let config = BrowserConfig {
            extra_flags: vec!["--proxy-server=socks5://127.0.0.1:9050".into()],
            ..Default::default()
        };
        let args = stealth_args(&config);
        assert!(args.iter().any(|a| a.contains("proxy-server")));
    }

    #[tokio::test]
    async fn test_mock_browser_answers_version() {
        let browser = Browser::with_mock(crate::cdp::MockState::shared());
        let version = browser.connection().version().await.unwrap();
        assert!(version.product.contains("mock"));
    }
}
