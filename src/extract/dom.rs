//! Stage 3: simulated-human DOM interaction
//!
//! When nothing surfaced passively, act like a person would: scroll the
//! page, close whatever pops up, sit out the countdown, then find and
//! click the download button - main frame first, then same-origin
//! iframes - and watch the network listener for the response the click
//! triggers.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use super::pipeline::{AttemptContext, Stage};
use super::{StageHit, StageKind, StageOutcome};
use crate::stealth::humanize::{human_delay, random_delay, Human};

/// Download-button selectors in priority order. Generic tags at the end
/// only count with a matching text hint.
const BUTTON_SELECTORS: &[&str] = &[
    "[class*=\"download\"]",
    "[id*=\"download\"]",
    "[data-action=\"download\"]",
    "[data-type=\"download\"]",
    ".file-item-download",
    ".download-btn",
    ".btn-download",
    "#downloadBtn",
    ".primaryBtn",
    ".main-btn",
    "[class*=\"play-btn\"]",
    "button",
    "a",
    "[role=\"button\"]",
];

/// Visible-text hints that mark a button as the download trigger
const TEXT_HINTS: &[&str] = &[
    "download",
    "free download",
    "save",
    "直接下载",
    "普通下载",
    "play",
    "preview",
];

const COUNTDOWN_SELECTORS: &[&str] = &[
    "[class*=\"countdown\"]",
    "[class*=\"timer\"]",
    "[id*=\"countdown\"]",
    "[id*=\"timer\"]",
    ".wait-time",
    ".download-wait",
];

const MODAL_CLOSE_SELECTORS: &[&str] = &[
    "[class*=\"modal\"] [class*=\"close\"]",
    "[class*=\"popup\"] [class*=\"close\"]",
    "[class*=\"dialog\"] [class*=\"close\"]",
    ".modal-close",
    ".close-btn",
    "button[aria-label=\"Close\"]",
    "[class*=\"overlay\"] [class*=\"close\"]",
];

/// A clickable target located by the in-page search
#[derive(Debug, Clone, Deserialize)]
struct ClickTarget {
    x: f64,
    y: f64,
    #[serde(rename = "w")]
    width: f64,
    #[serde(rename = "h")]
    height: f64,
}

/// Countdown probe result
#[derive(Debug, Clone, Deserialize)]
struct CountdownProbe {
    present: bool,
    #[serde(default)]
    seconds: Option<i64>,
}

pub struct DomStage;

#[async_trait]
impl Stage for DomStage {
    fn kind(&self) -> StageKind {
        StageKind::Dom
    }

    async fn run(&self, cx: &AttemptContext<'_>) -> StageOutcome {
        let human = Human::new(cx.page.session());

        if let Err(e) = scroll_naturally(&human).await {
            tracing::debug!("[dom] scroll failed: {}", e);
        }

        dismiss_modals(cx, &human).await;
        wait_out_countdown(cx).await;

        for cycle in 0..cx.config.click_cycles {
            let target = match locate_button(cx).await {
                Some(t) => t,
                None => {
                    tracing::info!("[dom] no download button found");
                    break;
                }
            };

            tracing::info!(
                "[dom] clicking download button (cycle {}/{})",
                cycle + 1,
                cx.config.click_cycles
            );
            if let Err(e) = human
                .click(target.x, target.y, target.width, target.height)
                .await
            {
                tracing::debug!("[dom] click failed: {}", e);
            }

            // Let the click's network traffic land
            cx.page
                .pump_for(cx.interceptor, Duration::from_millis(2_000))
                .await;
            if let Some(response) = cx.interceptor.best() {
                return StageOutcome::Found(StageHit::from_captured(&response));
            }

            // The click may have spawned a fresh modal or countdown
            dismiss_modals(cx, &human).await;
            wait_out_countdown(cx).await;
            random_delay(1_000, 2_000).await;
        }

        StageOutcome::NotFound
    }
}

/// Scroll down in uneven steps, then drift back up a little
async fn scroll_naturally(human: &Human<'_>) -> crate::error::Result<()> {
    human_delay(500, 0.3).await;
    for _ in 0..3 {
        human.scroll(300.0).await?;
    }
    human.scroll(-150.0).await?;
    Ok(())
}

/// Close any visible overlay/modal, a few at most
async fn dismiss_modals(cx: &AttemptContext<'_>, human: &Human<'_>) {
    for _ in 0..3 {
        let js = format!(
            r#"
            (() => {{
                const selectors = {selectors};
                for (const sel of selectors) {{
                    for (const el of document.querySelectorAll(sel)) {{
                        const r = el.getBoundingClientRect();
                        const style = getComputedStyle(el);
                        if (r.width > 0 && r.height > 0 &&
                            style.display !== 'none' && style.visibility !== 'hidden') {{
                            return {{ x: r.x + r.width / 2, y: r.y + r.height / 2,
                                      w: r.width, h: r.height }};
                        }}
                    }}
                }}
                return null;
            }})()
            "#,
            selectors = serde_json::to_string(MODAL_CLOSE_SELECTORS).unwrap(),
        );

        match cx.page.eval::<Option<ClickTarget>>(&js).await {
            Ok(Some(target)) => {
                tracing::info!("[dom] closing modal");
                if human
                    .click(target.x, target.y, target.width, target.height)
                    .await
                    .is_err()
                {
                    return;
                }
                random_delay(300, 700).await;
            }
            _ => return,
        }
    }
}

/// Poll the countdown element until it disappears or reads zero,
/// bounded by the configured maximum
async fn wait_out_countdown(cx: &AttemptContext<'_>) {
    let js = format!(
        r#"
        (() => {{
            const selectors = {selectors};
            for (const sel of selectors) {{
                const el = document.querySelector(sel);
                if (el) {{
                    const m = (el.textContent || '').match(/\d+/);
                    return {{ present: true, seconds: m ? parseInt(m[0], 10) : null }};
                }}
            }}
            return {{ present: false }};
        }})()
        "#,
        selectors = serde_json::to_string(COUNTDOWN_SELECTORS).unwrap(),
    );

    let deadline =
        tokio::time::Instant::now() + Duration::from_millis(cx.config.countdown_max_wait_ms);
    let mut waiting = false;

    loop {
        match cx.page.eval::<CountdownProbe>(&js).await {
            Ok(probe) if probe.present => {
                if probe.seconds == Some(0) {
                    tracing::info!("[dom] countdown reached zero");
                    return;
                }
                if !waiting {
                    tracing::info!("[dom] countdown visible, waiting it out");
                    waiting = true;
                }
            }
            _ => {
                if waiting {
                    tracing::info!("[dom] countdown gone");
                }
                return;
            }
        }

        if tokio::time::Instant::now() >= deadline {
            tracing::warn!("[dom] countdown still visible after max wait");
            return;
        }
        tokio::time::sleep(Duration::from_millis(1_000)).await;
    }
}

/// Find the first visible, enabled download button - main document
/// first, then same-origin iframes (coordinates offset to the top
/// frame's viewport).
async fn locate_button(cx: &AttemptContext<'_>) -> Option<ClickTarget> {
    let js = format!(
        r#"
        (() => {{
            const selectors = {selectors};
            const hints = {hints};
            const generic = new Set(['button', 'a', '[role="button"]']);

            const hintMatch = (el) => {{
                const t = (el.innerText || el.textContent || el.value || '').trim().toLowerCase();
                return hints.some(h => t.includes(h));
            }};
            const usable = (el) => {{
                if (el.disabled || el.getAttribute('disabled') !== null) return false;
                const r = el.getBoundingClientRect();
                if (r.width <= 0 || r.height <= 0) return false;
                const style = getComputedStyle(el);
                return style.display !== 'none' && style.visibility !== 'hidden';
            }};
            const search = (doc, offsetX, offsetY) => {{
                for (const sel of selectors) {{
                    let els;
                    try {{ els = doc.querySelectorAll(sel); }} catch (e) {{ continue; }}
                    for (const el of els) {{
                        if (!usable(el)) continue;
                        if (generic.has(sel) && !hintMatch(el)) continue;
                        const r = el.getBoundingClientRect();
                        return {{ x: offsetX + r.x + r.width / 2,
                                  y: offsetY + r.y + r.height / 2,
                                  w: r.width, h: r.height }};
                    }}
                }}
                return null;
            }};

            const hit = search(document, 0, 0);
            if (hit) return hit;

            for (const frame of document.querySelectorAll('iframe')) {{
                let doc = null;
                try {{ doc = frame.contentDocument; }} catch (e) {{ continue; }}
                if (!doc) continue;
                const fr = frame.getBoundingClientRect();
                const inner = search(doc, fr.x, fr.y);
                if (inner) return inner;
            }}
            return null;
        }})()
        "#,
        selectors = serde_json::to_string(BUTTON_SELECTORS).unwrap(),
        hints = serde_json::to_string(TEXT_HINTS).unwrap(),
    );

    cx.page.eval::<Option<ClickTarget>>(&js).await.ok().flatten()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cdp::{Connection, MockState, Transport};
    use crate::net::{CaptureRules, NetworkInterceptor};
    use crate::page::Page;
    use crate::ExtractionConfig;
    use serde_json::json;
    use std::sync::Arc;

    async fn mock_page(state: &Arc<MockState>) -> Page {
        let connection = Connection::new(Transport::mock(Arc::clone(state)));
        let target = connection.create_target("about:blank", None).await.unwrap();
        let session = connection.attach(&target).await.unwrap();
        Page::new(session, 2_000, 2_000)
    }

    fn fast_config() -> ExtractionConfig {
        ExtractionConfig {
            countdown_max_wait_ms: 500,
            click_cycles: 1,
            ..Default::default()
        }
    }

    fn interceptor(config: &ExtractionConfig) -> NetworkInterceptor {
        NetworkInterceptor::new(CaptureRules {
            min_file_size: config.min_file_size,
            cdn_patterns: config.cdn_patterns.clone(),
            signature_params: config.signature_params.clone(),
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_stage_not_found_without_button() {
        let state = MockState::shared();
        // Every probe answers null: no modal, no countdown, no button
        state.respond_with(|method, _| {
            (method == "Runtime.evaluate")
                .then(|| json!({ "result": { "type": "object", "value": null } }))
        });

        let page = mock_page(&state).await;
        let config = fast_config();
        let icpt = interceptor(&config);
        let cx = AttemptContext {
            page: &page,
            interceptor: &icpt,
            url: "https://terabox.com/s/1abc",
            config: &config,
        };

        assert_eq!(DomStage.run(&cx).await, StageOutcome::NotFound);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stage_clicks_button_and_reads_capture() {
        let state = MockState::shared();
        let page = mock_page(&state).await;
        let session_id = page.session().session_id().to_string();

        let emitted = Arc::new(std::sync::atomic::AtomicBool::new(false));
        {
            let state_for_responder = Arc::clone(&state);
            let emitted = Arc::clone(&emitted);
            state.respond_with(move |method, params| {
                match method {
                    "Runtime.evaluate" => {
                        let expr = params["expression"].as_str().unwrap_or("");
                        if expr.contains("const hints =") {
                            // The button search finds a target
                            Some(json!({ "result": { "type": "object", "value":
                                { "x": 320.0, "y": 410.0, "w": 120.0, "h": 40.0 } } }))
                        } else {
                            Some(json!({ "result": { "type": "object", "value": null } }))
                        }
                    }
                    "Input.dispatchMouseEvent" => {
                        // First click: the download response appears
                        if params["type"] == "mouseReleased"
                            && !emitted.swap(true, std::sync::atomic::Ordering::SeqCst)
                        {
                            state_for_responder.emit(
                                "Network.responseReceived",
                                json!({
                                    "requestId": "click-1",
                                    "response": {
                                        "url": "https://d.terabox.example/f?sign=clicked",
                                        "status": 200,
                                        "mimeType": "video/mp4",
                                        "headers": {
                                            "content-type": "video/mp4",
                                            "content-length": "4000000"
                                        }
                                    }
                                }),
                                Some(&session_id),
                            );
                        }
                        Some(json!({}))
                    }
                    _ => None,
                }
            });
        }

        let config = fast_config();
        let icpt = interceptor(&config);
        let cx = AttemptContext {
            page: &page,
            interceptor: &icpt,
            url: "https://terabox.com/s/1abc",
            config: &config,
        };

        match DomStage.run(&cx).await {
            StageOutcome::Found(hit) => {
                assert!(hit.url.contains("sign=clicked"));
                assert_eq!(hit.filetype.as_deref(), Some("video"));
            }
            other => panic!("expected Found, got {:?}", other),
        }
    }
}
