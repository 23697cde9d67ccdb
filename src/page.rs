//! Page Abstraction
//!
//! A thin handle over one attached CDP session: navigation, readiness
//! and network-idle waits, typed script evaluation, and the event pump
//! that feeds a [`NetworkInterceptor`](crate::net::NetworkInterceptor).

use std::time::Duration;

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::cdp::Session;
use crate::error::{Error, Result};
use crate::net::NetworkInterceptor;

/// Escape a string for safe embedding in a JS single-quoted literal
pub fn escape_js_string(s: &str) -> String {
    s.replace('\\', "\\\\")
        .replace('\'', "\\'")
        .replace('"', "\\\"")
        .replace('`', "\\`")
        .replace('\n', "\\n")
        .replace('\r', "\\r")
        .replace("${", "\\${")
}

/// A browser page bound to one extraction attempt
pub struct Page {
    session: Session,
    navigation_timeout_ms: u64,
    action_timeout_ms: u64,
}

impl Page {
    pub(crate) fn new(session: Session, navigation_timeout_ms: u64, action_timeout_ms: u64) -> Self {
        Self {
            session,
            navigation_timeout_ms,
            action_timeout_ms,
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn action_timeout(&self) -> Duration {
        Duration::from_millis(self.action_timeout_ms)
    }

    /// Navigate and wait for the document to become ready
    pub async fn goto(&self, url: &str) -> Result<()> {
        let result = self.session.navigate(url).await?;
        if let Some(error) = result.error_text {
            return Err(Error::Navigation(error));
        }
        self.wait_for_ready().await
    }

    /// Poll `document.readyState` until the page has loaded
    pub async fn wait_for_ready(&self) -> Result<()> {
        let deadline = tokio::time::Instant::now()
            + Duration::from_millis(self.navigation_timeout_ms);
        let poll = Duration::from_millis(50);

        loop {
            if let Ok(state) = self.eval::<String>("document.readyState").await {
                if state == "complete" || state == "interactive" {
                    return Ok(());
                }
            }
            // readyState can be briefly unavailable mid-navigation; keep polling

            if tokio::time::Instant::now() >= deadline {
                return Err(Error::Timeout(format!(
                    "Navigation did not complete within {}ms",
                    self.navigation_timeout_ms
                )));
            }
            tokio::time::sleep(poll).await;
        }
    }

    /// Drain session events into the interceptor until the network has
    /// been quiet for `idle_gap`, bounded by `max_wait`.
    pub async fn pump_until_idle(
        &self,
        interceptor: &NetworkInterceptor,
        idle_gap: Duration,
        max_wait: Duration,
    ) {
        let deadline = tokio::time::Instant::now() + max_wait;

        loop {
            match tokio::time::timeout(idle_gap, self.session.next_event()).await {
                Ok(Some(event)) => {
                    interceptor.process_event(&event);
                }
                Ok(None) => return, // session gone
                Err(_) => return,   // idle gap reached
            }
            if tokio::time::Instant::now() >= deadline {
                return;
            }
        }
    }

    /// Drain session events into the interceptor for a fixed window
    pub async fn pump_for(&self, interceptor: &NetworkInterceptor, window: Duration) {
        let deadline = tokio::time::Instant::now() + window;

        loop {
            let now = tokio::time::Instant::now();
            if now >= deadline {
                return;
            }
            match tokio::time::timeout(deadline - now, self.session.next_event()).await {
                Ok(Some(event)) => {
                    interceptor.process_event(&event);
                }
                _ => return,
            }
        }
    }

    /// Evaluate an expression and deserialize its value
    pub async fn eval<T: DeserializeOwned>(&self, expression: &str) -> Result<T> {
        let value = self.eval_value(expression).await?;
        serde_json::from_value(value).map_err(Into::into)
    }

    /// Evaluate an expression, returning the raw JSON value
    /// (`null` when the expression produced undefined)
    pub async fn eval_value(&self, expression: &str) -> Result<Value> {
        let result = self.session.evaluate(expression).await?;
        Ok(result.result.value.unwrap_or(Value::Null))
    }

    /// Full page HTML
    pub async fn content(&self) -> Result<String> {
        self.eval("document.documentElement.outerHTML").await
    }

    /// Current main-frame URL
    pub async fn url(&self) -> Result<String> {
        let tree = self.session.get_frame_tree().await?;
        Ok(tree.frame.url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cdp::{Connection, MockState, Transport};
    use serde_json::json;
    use std::sync::Arc;

    async fn mock_page(state: &Arc<MockState>) -> Page {
        let connection = Connection::new(Transport::mock(Arc::clone(state)));
        let target = connection.create_target("about:blank", None).await.unwrap();
        let session = connection.attach(&target).await.unwrap();
        Page::new(session, 5_000, 5_000)
    }

    #[test]
    fn test_escape_js_string() {
        assert_eq!(escape_js_string("a'b"), "a\\'b");
        assert_eq!(escape_js_string("x${y}"), "x\\${y}");
        assert_eq!(escape_js_string("line\nbreak"), "line\\nbreak");
    }

    #[tokio::test]
    async fn test_goto_ready_on_mock() {
        let state = MockState::shared();
        let page = mock_page(&state).await;
        // Mock answers readyState polls with "complete"
        page.goto("https://terabox.com/s/1abc").await.unwrap();
        assert_eq!(state.call_count("Page.navigate"), 1);
    }

    #[tokio::test]
    async fn test_goto_surfaces_navigation_error() {
        let state = MockState::shared();
        state.respond_with(|method, _| {
            (method == "Page.navigate")
                .then(|| json!({ "frameId": "f", "errorText": "net::ERR_NAME_NOT_RESOLVED" }))
        });
        let page = mock_page(&state).await;

        let result = page.goto("https://terabox.com/s/1abc").await;
        assert!(matches!(result, Err(Error::Navigation(_))));
    }

    #[tokio::test]
    async fn test_eval_typed() {
        let state = MockState::shared();
        state.respond_with(|method, params| {
            if method == "Runtime.evaluate"
                && params["expression"].as_str().unwrap_or("").contains("1 + 1")
            {
                Some(json!({ "result": { "type": "number", "value": 2 } }))
            } else {
                None
            }
        });
        let page = mock_page(&state).await;
        let two: i64 = page.eval("1 + 1").await.unwrap();
        assert_eq!(two, 2);
    }

    #[tokio::test]
    async fn test_pump_until_idle_feeds_interceptor() {
        use crate::net::{CaptureRules, NetworkInterceptor};

        let state = MockState::shared();
        let page = mock_page(&state).await;
        let session_id = page.session().session_id().to_string();

        let interceptor = NetworkInterceptor::new(CaptureRules {
            min_file_size: 1024,
            cdn_patterns: vec!["cdn.terabox".into()],
            signature_params: vec!["sign".into()],
        });

        state.emit(
            "Network.responseReceived",
            json!({
                "requestId": "r1",
                "response": {
                    "url": "https://cdn.terabox.example/f?sign=a",
                    "status": 200,
                    "mimeType": "video/mp4",
                    "headers": { "content-type": "video/mp4", "content-length": "2000000" }
                }
            }),
            Some(&session_id),
        );

        page.pump_until_idle(
            &interceptor,
            Duration::from_millis(50),
            Duration::from_millis(500),
        )
        .await;

        assert_eq!(interceptor.len(), 1);
    }
}
