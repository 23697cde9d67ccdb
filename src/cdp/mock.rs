//! Scripted in-memory CDP backend
//!
//! Stands in for a live Chrome in tests: commands are answered from a
//! responder (with sensible canned defaults), events are injected by the
//! test and routed through the same per-session machinery the socket
//! transport uses. The whole stack above the transport - connection,
//! session, page, interceptor, pipeline, session manager - runs unchanged.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use serde_json::{json, Value};
use tokio::sync::mpsc;

use crate::cdp::transport::CdpEvent;
use crate::error::Result;

type Routes = Arc<Mutex<HashMap<String, mpsc::Sender<CdpEvent>>>>;
type Responder = Box<dyn Fn(&str, &Value) -> Option<Value> + Send + Sync>;

/// Shared state behind a mock transport.
///
/// Hold on to the `Arc` to script responses and emit events after the
/// transport has been handed off to a `Browser`.
pub struct MockState {
    responder: Mutex<Option<Responder>>,
    calls: Mutex<Vec<(String, Value)>>,
    routes: Mutex<Option<Routes>>,
    sessions: Mutex<Vec<String>>,
    counter: AtomicU64,
}

impl MockState {
    pub fn shared() -> Arc<Self> {
        Arc::new(Self {
            responder: Mutex::new(None),
            calls: Mutex::new(Vec::new()),
            routes: Mutex::new(None),
            sessions: Mutex::new(Vec::new()),
            counter: AtomicU64::new(1),
        })
    }

    /// Install a responder consulted before the canned defaults.
    /// Return `None` from it to fall through.
    pub fn respond_with<F>(&self, responder: F)
    where
        F: Fn(&str, &Value) -> Option<Value> + Send + Sync + 'static,
    {
        *self.responder.lock().unwrap() = Some(Box::new(responder));
    }

    /// Every command sent so far, in order
    pub fn calls(&self) -> Vec<(String, Value)> {
        self.calls.lock().unwrap().clone()
    }

    /// Number of times `method` was sent
    pub fn call_count(&self, method: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(m, _)| m == method)
            .count()
    }

    /// Inject an event as if the browser pushed it
    pub fn emit(&self, method: &str, params: Value, session_id: Option<&str>) {
        let Some(routes) = self.routes.lock().unwrap().clone() else {
            return;
        };
        let Some(session_id) = session_id else {
            return;
        };
        let guard = routes.lock().unwrap();
        if let Some(tx) = guard.get(session_id) {
            let _ = tx.try_send(CdpEvent {
                method: method.to_string(),
                params,
                session_id: Some(session_id.to_string()),
            });
        }
    }

    /// The most recently attached session id, if any
    pub fn last_session(&self) -> Option<String> {
        self.sessions.lock().unwrap().last().cloned()
    }

    pub(crate) fn set_routes(&self, routes: Routes) {
        *self.routes.lock().unwrap() = Some(routes);
    }

    pub(crate) fn handle(
        &self,
        _session_id: Option<&str>,
        method: &str,
        params: Value,
    ) -> Result<Value> {
        self.calls
            .lock()
            .unwrap()
            .push((method.to_string(), params.clone()));

        if let Some(responder) = self.responder.lock().unwrap().as_ref() {
            if let Some(value) = responder(method, &params) {
                return Ok(value);
            }
        }

        Ok(self.default_response(method))
    }

    fn default_response(&self, method: &str) -> Value {
        match method {
            "Browser.getVersion" => json!({
                "product": "Chrome/131.0.0.0 (mock)",
                "userAgent": "Mozilla/5.0 (mock)",
            }),
            "Target.createBrowserContext" => {
                let n = self.counter.fetch_add(1, Ordering::SeqCst);
                json!({ "browserContextId": format!("mock-context-{}", n) })
            }
            "Target.createTarget" => {
                let n = self.counter.fetch_add(1, Ordering::SeqCst);
                json!({ "targetId": format!("mock-target-{}", n) })
            }
            "Target.attachToTarget" => {
                let n = self.counter.fetch_add(1, Ordering::SeqCst);
                let session_id = format!("mock-session-{}", n);
                self.sessions.lock().unwrap().push(session_id.clone());
                json!({ "sessionId": session_id })
            }
            "Target.closeTarget" => json!({ "success": true }),
            "Page.navigate" => json!({ "frameId": "mock-frame" }),
            "Page.addScriptToEvaluateOnNewDocument" => json!({ "identifier": "mock-script-1" }),
            "Page.getFrameTree" => json!({
                "frameTree": { "frame": { "id": "mock-frame", "url": "about:blank" } }
            }),
            // Pages poll readyState; answering "complete" keeps navigation
            // waits instant under the mock.
            "Runtime.evaluate" => json!({ "result": { "type": "string", "value": "complete" } }),
            _ => json!({}),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_mint_fresh_ids() {
        let state = MockState::shared();
        let a = state.handle(None, "Target.createTarget", json!({})).unwrap();
        let b = state.handle(None, "Target.createTarget", json!({})).unwrap();
        assert_ne!(a["targetId"], b["targetId"]);
    }

    #[test]
    fn test_responder_overrides_defaults() {
        let state = MockState::shared();
        state.respond_with(|method, _| {
            (method == "Page.navigate").then(|| json!({ "errorText": "net::ERR_FAILED" }))
        });

        let nav = state.handle(None, "Page.navigate", json!({})).unwrap();
        assert_eq!(nav["errorText"], "net::ERR_FAILED");

        let version = state.handle(None, "Browser.getVersion", json!({})).unwrap();
        assert!(version["product"].as_str().unwrap().contains("mock"));
    }

    #[test]
    fn test_call_recording() {
        let state = MockState::shared();
        state
            .handle(None, "Network.enable", json!({}))
            .unwrap();
        state
            .handle(None, "Network.enable", json!({}))
            .unwrap();
        assert_eq!(state.call_count("Network.enable"), 2);
        assert_eq!(state.call_count("Page.navigate"), 0);
    }
}
