//! CDP Connection/Session Management
//!
//! `Connection` speaks browser-level commands (targets, contexts);
//! `Session` is attached to one target and carries everything an
//! extraction attempt needs: navigation, emulation overrides, script
//! evaluation, synthetic input, and its own event stream.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};

use super::transport::{CdpEvent, Transport};
use super::types::*;
use crate::error::{Error, Result};

/// A CDP connection to one browser process
pub struct Connection {
    transport: Arc<Transport>,
}

impl Connection {
    pub fn new(transport: Transport) -> Self {
        Self {
            transport: Arc::new(transport),
        }
    }

    /// Get browser version info
    pub async fn version(&self) -> Result<BrowserGetVersionResult> {
        self.transport
            .send("Browser.getVersion", &BrowserGetVersion {})
            .await
    }

    /// Create an isolated browser context (no shared cookies/storage)
    pub async fn create_browser_context(&self) -> Result<String> {
        let result: TargetCreateBrowserContextResult = self
            .transport
            .send(
                "Target.createBrowserContext",
                &TargetCreateBrowserContext {
                    dispose_on_detach: Some(true),
                },
            )
            .await?;
        Ok(result.browser_context_id)
    }

    /// Dispose a browser context and everything in it
    pub async fn dispose_browser_context(&self, browser_context_id: &str) -> Result<()> {
        self.transport
            .send::<_, serde_json::Value>(
                "Target.disposeBrowserContext",
                &TargetDisposeBrowserContext {
                    browser_context_id: browser_context_id.to_string(),
                },
            )
            .await?;
        Ok(())
    }

    /// Create a new target (page), optionally inside a browser context
    pub async fn create_target(
        &self,
        url: &str,
        browser_context_id: Option<&str>,
    ) -> Result<String> {
        let result: TargetCreateTargetResult = self
            .transport
            .send(
                "Target.createTarget",
                &TargetCreateTarget {
                    url: url.to_string(),
                    browser_context_id: browser_context_id.map(String::from),
                },
            )
            .await?;
        Ok(result.target_id)
    }

    /// Close a target
    pub async fn close_target(&self, target_id: &str) -> Result<bool> {
        let result: TargetCloseTargetResult = self
            .transport
            .send(
                "Target.closeTarget",
                &TargetCloseTarget {
                    target_id: target_id.to_string(),
                },
            )
            .await?;
        Ok(result.success)
    }

    /// Attach to a target, returning a session with its own event stream
    pub async fn attach(&self, target_id: &str) -> Result<Session> {
        let result: TargetAttachToTargetResult = self
            .transport
            .send(
                "Target.attachToTarget",
                &TargetAttachToTarget {
                    target_id: target_id.to_string(),
                    flatten: Some(true),
                },
            )
            .await?;

        let events = self.transport.subscribe(&result.session_id);

        Ok(Session {
            transport: Arc::clone(&self.transport),
            session_id: result.session_id,
            target_id: target_id.to_string(),
            events: Mutex::new(events),
        })
    }

    /// Close the browser
    pub async fn close(&self) -> Result<()> {
        let _ = self
            .transport
            .send::<_, serde_json::Value>("Browser.close", &BrowserClose {})
            .await;
        self.transport.close().await
    }
}

/// A CDP session attached to a specific target
pub struct Session {
    transport: Arc<Transport>,
    session_id: String,
    target_id: String,
    events: Mutex<mpsc::Receiver<CdpEvent>>,
}

impl Session {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn target_id(&self) -> &str {
        &self.target_id
    }

    /// Send a command addressed to this session
    pub async fn send<C, R>(&self, method: &str, params: &C) -> Result<R>
    where
        C: serde::Serialize,
        R: serde::de::DeserializeOwned,
    {
        self.transport
            .send_to_session(&self.session_id, method, params)
            .await
    }

    /// Receive the next event for this session, if any arrives
    pub async fn next_event(&self) -> Option<CdpEvent> {
        let mut rx = self.events.lock().await;
        rx.recv().await
    }

    /// Non-blocking event poll
    pub async fn try_next_event(&self) -> Option<CdpEvent> {
        let mut rx = self.events.lock().await;
        rx.try_recv().ok()
    }

    // === Page ===

    pub async fn page_enable(&self) -> Result<()> {
        self.send::<_, serde_json::Value>("Page.enable", &PageEnable {})
            .await?;
        Ok(())
    }

    pub async fn navigate(&self, url: &str) -> Result<PageNavigateResult> {
        self.send(
            "Page.navigate",
            &PageNavigate {
                url: url.to_string(),
            },
        )
        .await
    }

    /// Install a script that runs before any page script on every
    /// navigation, frames included
    pub async fn add_init_script(&self, source: &str) -> Result<String> {
        let result: PageAddScriptToEvaluateOnNewDocumentResult = self
            .send(
                "Page.addScriptToEvaluateOnNewDocument",
                &PageAddScriptToEvaluateOnNewDocument {
                    source: source.to_string(),
                    run_immediately: None,
                },
            )
            .await?;
        Ok(result.identifier)
    }

    pub async fn get_frame_tree(&self) -> Result<FrameTree> {
        let result: PageGetFrameTreeResult =
            self.send("Page.getFrameTree", &PageGetFrameTree {}).await?;
        Ok(result.frame_tree)
    }

    // === Emulation (identity binding) ===

    pub async fn set_user_agent_override(
        &self,
        params: &EmulationSetUserAgentOverride,
    ) -> Result<()> {
        self.send::<_, serde_json::Value>("Emulation.setUserAgentOverride", params)
            .await?;
        Ok(())
    }

    pub async fn set_timezone_override(&self, timezone_id: &str) -> Result<()> {
        self.send::<_, serde_json::Value>(
            "Emulation.setTimezoneOverride",
            &EmulationSetTimezoneOverride {
                timezone_id: timezone_id.to_string(),
            },
        )
        .await?;
        Ok(())
    }

    pub async fn set_locale_override(&self, locale: &str) -> Result<()> {
        self.send::<_, serde_json::Value>(
            "Emulation.setLocaleOverride",
            &EmulationSetLocaleOverride {
                locale: locale.to_string(),
            },
        )
        .await?;
        Ok(())
    }

    pub async fn set_device_metrics(
        &self,
        width: u32,
        height: u32,
        device_scale_factor: f64,
    ) -> Result<()> {
        self.send::<_, serde_json::Value>(
            "Emulation.setDeviceMetricsOverride",
            &EmulationSetDeviceMetricsOverride {
                width,
                height,
                device_scale_factor,
                mobile: false,
            },
        )
        .await?;
        Ok(())
    }

    pub async fn set_touch_emulation(&self, enabled: bool, max_touch_points: u32) -> Result<()> {
        self.send::<_, serde_json::Value>(
            "Emulation.setTouchEmulationEnabled",
            &EmulationSetTouchEmulationEnabled {
                enabled,
                max_touch_points: Some(max_touch_points),
            },
        )
        .await?;
        Ok(())
    }

    // === Network ===

    pub async fn network_enable(&self) -> Result<()> {
        self.send::<_, serde_json::Value>("Network.enable", &NetworkEnable {})
            .await?;
        Ok(())
    }

    pub async fn network_disable(&self) -> Result<()> {
        self.send::<_, serde_json::Value>("Network.disable", &NetworkDisable {})
            .await?;
        Ok(())
    }

    pub async fn set_extra_http_headers(&self, headers: HashMap<String, String>) -> Result<()> {
        self.send::<_, serde_json::Value>(
            "Network.setExtraHTTPHeaders",
            &NetworkSetExtraHttpHeaders { headers },
        )
        .await?;
        Ok(())
    }

    // === Runtime ===

    /// Evaluate a JavaScript expression, returning the value.
    /// Promises are awaited.
    pub async fn evaluate(&self, expression: &str) -> Result<RuntimeEvaluateResult> {
        let result: RuntimeEvaluateResult = self
            .send(
                "Runtime.evaluate",
                &RuntimeEvaluate {
                    expression: expression.to_string(),
                    return_by_value: Some(true),
                    await_promise: Some(true),
                },
            )
            .await?;

        if let Some(details) = &result.exception_details {
            return Err(Error::Script(details.text.clone()));
        }
        Ok(result)
    }

    // === Input ===

    pub async fn dispatch_mouse_event(
        &self,
        event_type: MouseEventType,
        x: f64,
        y: f64,
        button: Option<MouseButton>,
        click_count: Option<i32>,
    ) -> Result<()> {
        self.send::<_, serde_json::Value>(
            "Input.dispatchMouseEvent",
            &InputDispatchMouseEvent {
                r#type: event_type,
                x,
                y,
                button,
                click_count,
                delta_x: None,
                delta_y: None,
            },
        )
        .await?;
        Ok(())
    }

    pub async fn dispatch_mouse_wheel(
        &self,
        x: f64,
        y: f64,
        delta_x: f64,
        delta_y: f64,
    ) -> Result<()> {
        self.send::<_, serde_json::Value>(
            "Input.dispatchMouseEvent",
            &InputDispatchMouseEvent {
                r#type: MouseEventType::MouseWheel,
                x,
                y,
                button: None,
                click_count: None,
                delta_x: Some(delta_x),
                delta_y: Some(delta_y),
            },
        )
        .await?;
        Ok(())
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.transport.unsubscribe(&self.session_id);
    }
}
