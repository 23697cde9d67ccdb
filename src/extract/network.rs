//! Stage 1: network interception
//!
//! Navigate with the listener already attached, let the page settle
//! (bounded network idle plus a grace period for lazy content), then ask
//! the interceptor for its best candidate.

use std::time::Duration;

use async_trait::async_trait;

use super::pipeline::{AttemptContext, Stage};
use super::{StageHit, StageKind, StageOutcome};

pub struct NetworkStage;

#[async_trait]
impl Stage for NetworkStage {
    fn kind(&self) -> StageKind {
        StageKind::Network
    }

    async fn run(&self, cx: &AttemptContext<'_>) -> StageOutcome {
        if let Err(e) = cx.page.goto(cx.url).await {
            return StageOutcome::Failed(e.to_string());
        }

        cx.page
            .pump_until_idle(
                cx.interceptor,
                Duration::from_millis(cx.config.network_idle_gap_ms),
                Duration::from_millis(cx.config.network_stage_timeout_ms),
            )
            .await;

        // Lazy content keeps loading after "idle"
        cx.page
            .pump_for(
                cx.interceptor,
                Duration::from_millis(cx.config.idle_grace_ms),
            )
            .await;

        match cx.interceptor.best() {
            Some(response) => StageOutcome::Found(StageHit::from_captured(&response)),
            None => StageOutcome::NotFound,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cdp::{Connection, MockState, Transport};
    use crate::net::{CaptureRules, NetworkInterceptor};
    use crate::page::Page;
    use crate::ExtractionConfig;
    use serde_json::json;

    #[tokio::test]
    async fn test_network_stage_captures_response_during_settle() {
        let state = MockState::shared();
        let connection = Connection::new(Transport::mock(std::sync::Arc::clone(&state)));
        let target = connection.create_target("about:blank", None).await.unwrap();
        let session = connection.attach(&target).await.unwrap();
        let session_id = session.session_id().to_string();
        let page = Page::new(session, 2_000, 2_000);

        let config = ExtractionConfig {
            network_stage_timeout_ms: 1_000,
            network_idle_gap_ms: 100,
            idle_grace_ms: 100,
            ..Default::default()
        };
        let interceptor = NetworkInterceptor::new(CaptureRules {
            min_file_size: config.min_file_size,
            cdn_patterns: config.cdn_patterns.clone(),
            signature_params: config.signature_params.clone(),
        });

        // Response arrives "during navigation"
        state.emit(
            "Network.responseReceived",
            json!({
                "requestId": "r1",
                "response": {
                    "url": "https://d.terabox.example/video.mp4?sign=abc",
                    "status": 200,
                    "mimeType": "video/mp4",
                    "headers": {
                        "content-type": "video/mp4",
                        "content-length": "2000000"
                    }
                }
            }),
            Some(&session_id),
        );

        let cx = AttemptContext {
            page: &page,
            interceptor: &interceptor,
            url: "https://terabox.com/s/1abc",
            config: &config,
        };

        match NetworkStage.run(&cx).await {
            StageOutcome::Found(hit) => {
                assert!(hit.url.contains("sign=abc"));
                assert_eq!(hit.filesize, Some(2_000_000));
                assert_eq!(hit.filetype.as_deref(), Some("video"));
            }
            other => panic!("expected Found, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_network_stage_not_found_when_quiet() {
        let state = MockState::shared();
        let connection = Connection::new(Transport::mock(state));
        let target = connection.create_target("about:blank", None).await.unwrap();
        let session = connection.attach(&target).await.unwrap();
        let page = Page::new(session, 2_000, 2_000);

        let config = ExtractionConfig {
            network_stage_timeout_ms: 500,
            network_idle_gap_ms: 50,
            idle_grace_ms: 50,
            ..Default::default()
        };
        let interceptor = NetworkInterceptor::new(CaptureRules {
            min_file_size: config.min_file_size,
            cdn_patterns: config.cdn_patterns.clone(),
            signature_params: config.signature_params.clone(),
        });

        let cx = AttemptContext {
            page: &page,
            interceptor: &interceptor,
            url: "https://terabox.com/s/1abc",
            config: &config,
        };

        assert_eq!(NetworkStage.run(&cx).await, StageOutcome::NotFound);
    }
}
