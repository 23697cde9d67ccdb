//! Session management
//!
//! Owns at most one browser process, lazily started under a lock. Each
//! extraction attempt gets a fresh identity bound to its own isolated
//! browser context; the context is torn down on every exit path. Total
//! failure rotates the identity and retries with a linearly growing
//! delay - attempts are full browser negotiations, too expensive for
//! exponential spacing.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;

use crate::browser::Browser;
use crate::cdp::types::{EmulationSetUserAgentOverride, UserAgentBrand, UserAgentMetadata};
use crate::error::Result;
use crate::extract::{ExtractionPipeline, ExtractionResult};
use crate::page::Page;
use crate::stealth::{build_init_script, Identity};
use crate::validate;
use crate::EngineConfig;

/// Monotonic reading used to salt per-attempt seeds
fn monotonic_nanos() -> u128 {
    use std::sync::OnceLock;
    use std::time::Instant;
    static START: OnceLock<Instant> = OnceLock::new();
    START.get_or_init(Instant::now).elapsed().as_nanos()
}

/// One leased browsing context: page, identity, and guaranteed teardown
pub struct ContextGuard {
    browser: Arc<Browser>,
    context_id: String,
    target_id: String,
    page: Arc<Page>,
    identity: Identity,
    closed: bool,
}

impl ContextGuard {
    pub fn page(&self) -> &Arc<Page> {
        &self.page
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    /// Close page and context. Close errors are logged, never escalated.
    pub async fn close(mut self) {
        self.closed = true;
        if let Err(e) = self.browser.connection().close_target(&self.target_id).await {
            tracing::warn!("Error closing page: {}", e);
        }
        if let Err(e) = self
            .browser
            .connection()
            .dispose_browser_context(&self.context_id)
            .await
        {
            tracing::warn!("Error disposing context: {}", e);
        }
        tracing::debug!("Context cleaned up");
    }
}

impl Drop for ContextGuard {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        // Cancelled or panicked attempt: clean up in the background so
        // no context leaks
        let browser = Arc::clone(&self.browser);
        let context_id = std::mem::take(&mut self.context_id);
        let target_id = std::mem::take(&mut self.target_id);
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                let _ = browser.connection().close_target(&target_id).await;
                let _ = browser
                    .connection()
                    .dispose_browser_context(&context_id)
                    .await;
            });
        }
    }
}

/// Owns the browser process and leases identity-bound contexts
pub struct SessionManager {
    config: Arc<EngineConfig>,
    browser: Mutex<Option<Arc<Browser>>>,
    pipeline: ExtractionPipeline,
}

impl SessionManager {
    pub fn new(config: EngineConfig) -> Self {
        let config = Arc::new(config);
        let pipeline = ExtractionPipeline::new(Arc::new(config.extraction.clone()));
        Self {
            config,
            browser: Mutex::new(None),
            pipeline,
        }
    }

    /// A manager with a pre-seeded browser, bypassing the launcher.
    /// Tests hand in a mock-backed [`Browser`].
    pub fn with_browser(config: EngineConfig, browser: Browser) -> Self {
        let config = Arc::new(config);
        let pipeline = ExtractionPipeline::new(Arc::new(config.extraction.clone()));
        Self {
            config,
            browser: Mutex::new(Some(Arc::new(browser))),
            pipeline,
        }
    }

    /// Start the browser process once. A no-op when already running.
    pub async fn initialize(&self) -> Result<()> {
        self.browser_handle().await.map(|_| ())
    }

    /// Close the browser and release all resources. Safe to call
    /// repeatedly.
    pub async fn shutdown(&self) {
        let mut guard = self.browser.lock().await;
        if let Some(browser) = guard.take() {
            if let Err(e) = browser.close().await {
                tracing::warn!("Error closing browser: {}", e);
            }
            tracing::info!("Browser closed");
        }
    }

    /// The running browser, launching it first if needed. The lock is
    /// held across the launch so concurrent callers share one process.
    async fn browser_handle(&self) -> Result<Arc<Browser>> {
        let mut guard = self.browser.lock().await;
        if guard.is_none() {
            tracing::info!("Initializing browser...");
            let browser = Browser::launch(&self.config.browser).await?;
            *guard = Some(Arc::new(browser));
            tracing::info!("Browser initialized");
        }
        Ok(Arc::clone(guard.as_ref().unwrap()))
    }

    /// Build a fresh identity and lease an isolated context configured
    /// from it: UA and client hints, timezone, locale, metrics, headers,
    /// stealth bundle, timeouts.
    pub async fn acquire_context(&self, seed: Option<&str>) -> Result<ContextGuard> {
        let browser = self.browser_handle().await?;
        let connection = browser.connection();

        let identity = Identity::generate(seed);
        tracing::info!(
            "Generated identity: {}...",
            &identity.user_agent[..identity.user_agent.len().min(50)]
        );

        let context_id = connection.create_browser_context().await?;

        // Everything after context creation must clean up on failure
        let setup = async {
            let options = identity.context_options();
            let target_id = connection
                .create_target("about:blank", Some(&context_id))
                .await?;
            let session = connection.attach(&target_id).await?;

            session.page_enable().await?;
            session
                .set_user_agent_override(&EmulationSetUserAgentOverride {
                    user_agent: options.user_agent.clone(),
                    accept_language: Some(options.accept_language.clone()),
                    platform: Some(identity.platform.clone()),
                    user_agent_metadata: Some(UserAgentMetadata {
                        brands: identity
                            .client_hints
                            .brands
                            .iter()
                            .map(|b| UserAgentBrand {
                                brand: b.brand.clone(),
                                version: b.version.clone(),
                            })
                            .collect(),
                        full_version: identity.client_hints.full_version.clone(),
                        platform: identity.client_hints.platform_name.clone(),
                        platform_version: identity.client_hints.platform_version.clone(),
                        architecture: identity.client_hints.architecture.clone(),
                        model: String::new(),
                        mobile: false,
                        bitness: identity.client_hints.bitness.clone(),
                    }),
                })
                .await?;
            session.set_timezone_override(&identity.timezone).await?;
            session.set_locale_override(&identity.locale).await?;
            session
                .set_device_metrics(
                    identity.viewport_width,
                    identity.viewport_height,
                    identity.pixel_ratio,
                )
                .await?;
            if options.has_touch {
                session
                    .set_touch_emulation(true, identity.max_touch_points)
                    .await?;
            }
            session
                .set_extra_http_headers(options.extra_headers.clone())
                .await?;

            let bundle = build_init_script(&identity, &self.config.evasions);
            session.add_init_script(&bundle).await?;

            Ok::<_, crate::Error>((target_id, session))
        };

        match setup.await {
            Ok((target_id, session)) => {
                let page = Page::new(
                    session,
                    self.config.browser.navigation_timeout_ms,
                    self.config.browser.action_timeout_ms,
                );
                tracing::debug!("Stealth context ready");
                Ok(ContextGuard {
                    browser,
                    context_id,
                    target_id,
                    page: Arc::new(page),
                    identity,
                    closed: false,
                })
            }
            Err(e) => {
                let _ = connection.dispose_browser_context(&context_id).await;
                Err(e)
            }
        }
    }

    /// Run `attempt_fn` with a fresh identity per attempt.
    ///
    /// The per-attempt seed mixes the URL, the attempt index, and a
    /// monotonic clock reading, so retries never repeat an identity.
    /// Inter-attempt delay grows linearly. Returns failure only after
    /// the budget is exhausted, carrying the last error.
    pub async fn run_with_retry<'s, F>(
        &'s self,
        url: &str,
        attempt_fn: F,
        max_attempts: u32,
    ) -> ExtractionResult
    where
        F: Fn(Arc<Page>, Identity) -> Pin<Box<dyn Future<Output = ExtractionResult> + Send + 's>>,
    {
        let mut last_error = String::from("no attempts made");

        for attempt in 0..max_attempts {
            let seed = format!("{}#{}#{}", url, attempt, monotonic_nanos());

            match self.acquire_context(Some(&seed)).await {
                Ok(guard) => {
                    tracing::info!("Extraction attempt {}/{}", attempt + 1, max_attempts);
                    let result =
                        attempt_fn(Arc::clone(guard.page()), guard.identity().clone()).await;
                    guard.close().await;

                    if result.success {
                        return result;
                    }
                    last_error = result
                        .error
                        .unwrap_or_else(|| "empty result".to_string());
                    tracing::warn!("Attempt {} failed: {}", attempt + 1, last_error);
                }
                Err(e) => {
                    last_error = e.to_string();
                    tracing::error!("Attempt {} could not start: {}", attempt + 1, last_error);
                    if e.is_fatal() {
                        break;
                    }
                }
            }

            if attempt + 1 < max_attempts {
                let delay = Duration::from_secs(((attempt + 1) * 2) as u64);
                tracing::info!("Waiting {}s before retry...", delay.as_secs());
                tokio::time::sleep(delay).await;
            }
        }

        ExtractionResult::failure(format!(
            "All {} attempts failed. Last error: {}",
            max_attempts, last_error
        ))
    }

    /// Full extraction: the three-stage pipeline under identity-rotating
    /// retry. This is the engine's front door.
    pub async fn extract(&self, url: &str) -> ExtractionResult {
        let url = validate::normalize_url(url);
        if !validate::is_supported_share_url(&url, &self.config.extraction.supported_domains) {
            return ExtractionResult::failure(format!("Unsupported share URL: {}", url));
        }

        let pipeline = &self.pipeline;
        let target = url.clone();
        self.run_with_retry(
            &url,
            move |page, _identity| {
                let target = target.clone();
                Box::pin(async move { pipeline.extract(&page, &target).await })
            },
            self.config.extraction.max_attempts,
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cdp::MockState;
    use std::sync::Arc;

    fn mock_manager(state: &Arc<MockState>) -> SessionManager {
        SessionManager::with_browser(
            EngineConfig::default(),
            Browser::with_mock(Arc::clone(state)),
        )
    }

    #[tokio::test]
    async fn test_initialize_is_idempotent_with_seeded_browser() {
        let state = MockState::shared();
        let manager = mock_manager(&state);
        manager.initialize().await.unwrap();
        manager.initialize().await.unwrap();
        // The seeded browser was reused; no launch happened
    }

    #[tokio::test]
    async fn test_shutdown_twice_is_safe() {
        let state = MockState::shared();
        let manager = mock_manager(&state);
        manager.shutdown().await;
        manager.shutdown().await;
        assert_eq!(state.call_count("Browser.close"), 1);
    }

    #[tokio::test]
    async fn test_acquire_context_configures_identity() {
        let state = MockState::shared();
        let manager = mock_manager(&state);

        let guard = manager.acquire_context(Some("test-seed")).await.unwrap();
        assert!(!guard.identity().user_agent.is_empty());

        assert_eq!(state.call_count("Target.createBrowserContext"), 1);
        assert_eq!(state.call_count("Emulation.setUserAgentOverride"), 1);
        assert_eq!(state.call_count("Emulation.setTimezoneOverride"), 1);
        assert_eq!(state.call_count("Emulation.setLocaleOverride"), 1);
        assert_eq!(state.call_count("Emulation.setDeviceMetricsOverride"), 1);
        assert_eq!(state.call_count("Network.setExtraHTTPHeaders"), 1);
        assert_eq!(
            state.call_count("Page.addScriptToEvaluateOnNewDocument"),
            1
        );

        guard.close().await;
        assert_eq!(state.call_count("Target.closeTarget"), 1);
        assert_eq!(state.call_count("Target.disposeBrowserContext"), 1);
    }

    #[tokio::test]
    async fn test_acquire_context_seed_reproduces_identity() {
        let state = MockState::shared();
        let manager = mock_manager(&state);

        let a = manager.acquire_context(Some("same-seed")).await.unwrap();
        let ua_a = a.identity().user_agent.clone();
        a.close().await;

        let b = manager.acquire_context(Some("same-seed")).await.unwrap();
        assert_eq!(ua_a, b.identity().user_agent);
        b.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_with_retry_rotates_identities() {
        let state = MockState::shared();
        let manager = mock_manager(&state);

        let seen: Arc<std::sync::Mutex<Vec<String>>> =
            Arc::new(std::sync::Mutex::new(Vec::new()));
        let seen_in_fn = Arc::clone(&seen);

        let result = manager
            .run_with_retry(
                "https://terabox.com/s/1abc",
                move |_page, identity| {
                    seen_in_fn
                        .lock()
                        .unwrap()
                        .push(format!("{:?}", identity));
                    Box::pin(async { ExtractionResult::failure("stage came up empty") })
                },
                3,
            )
            .await;

        assert!(!result.success);
        let identities = seen.lock().unwrap();
        assert_eq!(identities.len(), 3, "one attempt per budget slot");
        assert_ne!(identities[0], identities[1]);
        assert_ne!(identities[1], identities[2]);
    }

    #[tokio::test]
    async fn test_extract_rejects_foreign_domain() {
        let state = MockState::shared();
        let manager = mock_manager(&state);
        let result = manager.extract("https://example.com/s/1abc").await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("Unsupported"));
        // Rejected before any context was opened
        assert_eq!(state.call_count("Target.createBrowserContext"), 0);
    }
}
