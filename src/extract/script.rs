//! Stage 2: script-state inspection
//!
//! Reads what the page's own JavaScript already knows: well-known
//! globals holding file metadata, tokens scraped from inline scripts,
//! the player's source, and - when enough parameters are recoverable -
//! the service's internal share-list/download API called from inside
//! the page so its session cookies apply.

use std::sync::OnceLock;

use async_trait::async_trait;
use regex::Regex;
use serde_json::Value;

use super::pipeline::{AttemptContext, Stage};
use super::{StageHit, StageKind, StageOutcome};
use crate::page::{escape_js_string, Page};
use crate::validate;

/// Key names whose string values are download links
const URL_KEYS: &[&str] = &[
    "dlink",
    "download_url",
    "downloadurl",
    "url",
    "link",
    "play_url",
    "playurl",
    "stream_url",
];

/// Bound on the recursive walk. `serde_json::Value` cannot be cyclic,
/// so the cap only guards against pathological nesting depth.
const MAX_WALK_DEPTH: usize = 8;

fn jstoken_patterns() -> &'static Vec<Regex> {
    static RES: OnceLock<Vec<Regex>> = OnceLock::new();
    RES.get_or_init(|| {
        [
            r#"window\.jsToken\s*=\s*["']([^"']+)["']"#,
            r#""jsToken"\s*:\s*"([^"]+)""#,
            r#"'jsToken'\s*:\s*'([^']+)'"#,
            r#"jsToken=([a-zA-Z0-9]+)"#,
        ]
        .iter()
        .map(|p| Regex::new(p).unwrap())
        .collect()
    })
}

pub struct ScriptStage;

#[async_trait]
impl Stage for ScriptStage {
    fn kind(&self) -> StageKind {
        StageKind::Script
    }

    async fn run(&self, cx: &AttemptContext<'_>) -> StageOutcome {
        let state = match probe_globals(cx.page).await {
            Ok(state) => state,
            Err(e) => {
                tracing::debug!("[script] global probe failed: {}", e);
                Value::Null
            }
        };

        // Token from globals, else scraped out of the page source
        let mut js_token = state["jsToken"].as_str().map(String::from);
        if js_token.is_none() {
            js_token = scrape_jstoken(cx.page).await;
        }

        // Internal API path, the most reliable when the parameters line up
        if let Some(token) = &js_token {
            if let Some(surl) = validate::extract_share_id(cx.url) {
                match internal_api(cx.page, &surl, token).await {
                    Ok(Some(hit)) => return StageOutcome::Found(hit),
                    Ok(None) => {}
                    Err(e) => tracing::debug!("[script] internal API failed: {}", e),
                }
            }
        }

        // Walk whatever file metadata the page keeps in globals
        let mut candidates = Vec::new();
        for key in [
            "fileList", "locals", "yunData", "pageData", "shareData", "videoData",
        ] {
            collect_urls(&state[key], 0, cx, &mut candidates);
        }
        if let Some(url) = pick_candidate(&candidates, cx) {
            return StageOutcome::Found(StageHit {
                url,
                filename: None,
                filesize: None,
                filetype: None,
            });
        }

        // Signed CDN URLs sitting verbatim in inline scripts
        if let Ok(html) = cx.page.content().await {
            let inline = scan_inline_urls(&html, cx);
            if let Some(url) = pick_candidate(&inline, cx) {
                return StageOutcome::Found(StageHit {
                    url,
                    filename: None,
                    filesize: None,
                    filetype: None,
                });
            }
        }

        // Player element source
        match probe_video_source(cx.page).await {
            Ok(Some(url)) if validate::is_cdn_url(&url, &cx.config.cdn_patterns) => {
                return StageOutcome::Found(StageHit {
                    url,
                    filename: None,
                    filesize: None,
                    filetype: Some("video".into()),
                });
            }
            Err(e) => tracing::debug!("[script] video probe failed: {}", e),
            _ => {}
        }

        StageOutcome::NotFound
    }
}

/// Snapshot the well-known globals as plain JSON
async fn probe_globals(page: &Page) -> crate::error::Result<Value> {
    page.eval_value(
        r#"
        (() => {
            const safe = (v) => {
                try { return JSON.parse(JSON.stringify(v === undefined ? null : v)); }
                catch (e) { return null; }
            };
            return {
                jsToken: safe(window.jsToken),
                bdstoken: safe(window.bdstoken),
                shareid: safe(window.shareid || window.share_id),
                uk: safe(window.uk),
                sign: safe(window.sign),
                timestamp: safe(window.timestamp),
                fileList: safe(window.fileList),
                locals: safe(window.locals),
                yunData: safe(window.yunData),
                pageData: safe(window.pageData),
                shareData: safe(window.shareData),
                videoData: safe(window.videoData)
            };
        })()
        "#,
    )
    .await
}

/// Pull a jsToken out of the raw page source
async fn scrape_jstoken(page: &Page) -> Option<String> {
    let html = page.content().await.ok()?;
    for re in jstoken_patterns() {
        if let Some(caps) = re.captures(&html) {
            return Some(caps[1].to_string());
        }
    }
    None
}

/// Share-list then download-link fetches against the service's internal
/// API, executed in-page so session state applies. Falls back to the
/// streaming endpoint for video shares.
async fn internal_api(
    page: &Page,
    surl: &str,
    js_token: &str,
) -> crate::error::Result<Option<StageHit>> {
    let surl = escape_js_string(surl);
    let token = escape_js_string(js_token);

    let share_info = page
        .eval_value(&format!(
            r#"
            (async () => {{
                try {{
                    const response = await fetch('/share/list?app_id=250528&web=1&channel=dubox&jsToken={token}&page=1&num=100&by=name&order=asc&shorturl={surl}&root=1', {{
                        headers: {{
                            'Accept': 'application/json, text/plain, */*',
                            'X-Requested-With': 'XMLHttpRequest'
                        }},
                        credentials: 'include'
                    }});
                    return await response.json();
                }} catch (e) {{
                    return {{ errno: -1, error: String(e) }};
                }}
            }})()
            "#,
        ))
        .await?;

    if share_info["errno"] != Value::from(0) {
        tracing::debug!("[script] share list errno: {}", share_info["errno"]);
        return Ok(None);
    }

    let Some(file) = best_share_entry(&share_info["list"]) else {
        return Ok(None);
    };

    let (Some(uk), Some(share_id), Some(fs_id)) = (
        value_param(&share_info["uk"]),
        value_param(&share_info["shareid"]),
        value_param(&file["fs_id"]),
    ) else {
        return Ok(None);
    };

    let filename = file["server_filename"].as_str().map(String::from);
    let filesize = file["size"].as_u64();
    let is_video = file["category"] == Value::from(1);

    let download = page
        .eval_value(&format!(
            r#"
            (async () => {{
                try {{
                    const response = await fetch('/share/download?app_id=250528&web=1&channel=dubox&jsToken={token}&shorturl={surl}&fid_list=[{fs_id}]&uk={uk}&shareid={share_id}', {{
                        headers: {{
                            'Accept': 'application/json, text/plain, */*',
                            'X-Requested-With': 'XMLHttpRequest'
                        }},
                        credentials: 'include'
                    }});
                    return await response.json();
                }} catch (e) {{
                    return {{ errno: -1, error: String(e) }};
                }}
            }})()
            "#,
        ))
        .await?;

    let mut dlink = None;
    if download["errno"] == Value::from(0) {
        dlink = download["dlink"]
            .as_str()
            .or_else(|| download["list"][0]["dlink"].as_str())
            .map(String::from);
    }

    // Streaming fallback for videos when the download endpoint balks
    if dlink.is_none() && is_video {
        let streaming = page
            .eval_value(&format!(
                r#"
                (async () => {{
                    try {{
                        const response = await fetch('/share/streaming?app_id=250528&channel=dubox&uk={uk}&shareid={share_id}&fid={fs_id}&type=M3U8_AUTO_720', {{
                            credentials: 'include'
                        }});
                        return await response.json();
                    }} catch (e) {{
                        return {{ errno: -1 }};
                    }}
                }})()
                "#,
            ))
            .await?;
        if streaming["errno"] == Value::from(0) {
            dlink = streaming["dlink"]
                .as_str()
                .or_else(|| streaming["stream_url"].as_str())
                .map(String::from);
        }
    }

    Ok(dlink.map(|url| StageHit {
        url,
        filename,
        filesize,
        filetype: Some(if is_video { "video" } else { "file" }.into()),
    }))
}

/// A string or number JSON value as a query-parameter string
fn value_param(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(escape_js_string(s)),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Largest video in a share listing, else the largest file
fn best_share_entry(list: &Value) -> Option<&Value> {
    let entries = list.as_array()?;
    if entries.is_empty() {
        return None;
    }

    let videos: Vec<&Value> = entries
        .iter()
        .filter(|e| e["category"] == Value::from(1))
        .collect();
    let pool: Vec<&Value> = if videos.is_empty() {
        entries.iter().collect()
    } else {
        videos
    };

    pool.into_iter().max_by_key(|e| e["size"].as_u64().unwrap_or(0))
}

/// Recursively collect URL-bearing strings, bounded by depth
fn collect_urls(value: &Value, depth: usize, cx: &AttemptContext<'_>, out: &mut Vec<String>) {
    if depth > MAX_WALK_DEPTH {
        return;
    }

    match value {
        Value::Object(map) => {
            for (key, child) in map {
                if let Value::String(s) = child {
                    let key_match = URL_KEYS.iter().any(|k| key.eq_ignore_ascii_case(k));
                    let cdn_match = s.starts_with("http")
                        && validate::is_cdn_url(s, &cx.config.cdn_patterns);
                    if (key_match && s.starts_with("http")) || cdn_match {
                        out.push(s.clone());
                    }
                }
                collect_urls(child, depth + 1, cx, out);
            }
        }
        Value::Array(items) => {
            for item in items {
                collect_urls(item, depth + 1, cx, out);
            }
        }
        _ => {}
    }
}

/// Prefer a fully signed CDN URL; fall back to any CDN URL
fn pick_candidate(candidates: &[String], cx: &AttemptContext<'_>) -> Option<String> {
    candidates
        .iter()
        .find(|url| {
            validate::is_valid_download_url(
                url,
                &cx.config.cdn_patterns,
                &cx.config.signature_params,
            )
        })
        .or_else(|| {
            candidates
                .iter()
                .find(|url| validate::is_cdn_url(url, &cx.config.cdn_patterns))
        })
        .cloned()
}

/// Absolute URLs sitting in the page source
fn scan_inline_urls(html: &str, cx: &AttemptContext<'_>) -> Vec<String> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| Regex::new(r#"https?://[^"'\\\s<>]+"#).unwrap());

    re.find_iter(html)
        .map(|m| m.as_str().replace("\\/", "/"))
        .filter(|url| validate::is_cdn_url(url, &cx.config.cdn_patterns))
        .collect()
}

/// The player's current source, if any
async fn probe_video_source(page: &Page) -> crate::error::Result<Option<String>> {
    let value = page
        .eval_value(
            r#"
            (() => {
                const video = document.querySelector('video');
                if (video && video.src) return video.src;
                const source = document.querySelector('video source');
                if (source && source.src) return source.src;
                if (window.player && window.player.src) return String(window.player.src);
                return null;
            })()
            "#,
        )
        .await?;
    Ok(value.as_str().map(String::from))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cdp::{Connection, MockState, Transport};
    use crate::net::{CaptureRules, NetworkInterceptor};
    use crate::ExtractionConfig;
    use serde_json::json;
    use std::sync::Arc;

    fn config() -> ExtractionConfig {
        ExtractionConfig::default()
    }

    fn cx_fixture<'a>(
        page: &'a Page,
        interceptor: &'a NetworkInterceptor,
        config: &'a ExtractionConfig,
    ) -> AttemptContext<'a> {
        AttemptContext {
            page,
            interceptor,
            url: "https://terabox.com/s/1abcDEF",
            config,
        }
    }

    async fn mock_page(state: &Arc<MockState>) -> Page {
        let connection = Connection::new(Transport::mock(Arc::clone(state)));
        let target = connection.create_target("about:blank", None).await.unwrap();
        let session = connection.attach(&target).await.unwrap();
        Page::new(session, 2_000, 2_000)
    }

    fn interceptor(config: &ExtractionConfig) -> NetworkInterceptor {
        NetworkInterceptor::new(CaptureRules {
            min_file_size: config.min_file_size,
            cdn_patterns: config.cdn_patterns.clone(),
            signature_params: config.signature_params.clone(),
        })
    }

    #[test]
    fn test_collect_urls_finds_nested_dlink() {
        let state = MockState::shared();
        let rt = tokio::runtime::Runtime::new().unwrap();
        let page = rt.block_on(mock_page(&state));
        let config = config();
        let icpt = interceptor(&config);
        let cx = cx_fixture(&page, &icpt, &config);

        let value = json!({
            "list": [
                { "meta": { "dlink": "https://d.terabox.example/f?sign=x" } }
            ]
        });
        let mut out = Vec::new();
        collect_urls(&value, 0, &cx, &mut out);
        assert_eq!(out, vec!["https://d.terabox.example/f?sign=x"]);
    }

    #[test]
    fn test_collect_urls_respects_depth_cap() {
        let state = MockState::shared();
        let rt = tokio::runtime::Runtime::new().unwrap();
        let page = rt.block_on(mock_page(&state));
        let config = config();
        let icpt = interceptor(&config);
        let cx = cx_fixture(&page, &icpt, &config);

        // Bury a link below the cap
        let mut value = json!({ "dlink": "https://d.terabox.example/deep?sign=x" });
        for _ in 0..(MAX_WALK_DEPTH + 2) {
            value = json!({ "next": value });
        }
        let mut out = Vec::new();
        collect_urls(&value, 0, &cx, &mut out);
        assert!(out.is_empty());
    }

    #[test]
    fn test_collect_urls_takes_cdn_strings_under_any_key() {
        let state = MockState::shared();
        let rt = tokio::runtime::Runtime::new().unwrap();
        let page = rt.block_on(mock_page(&state));
        let config = config();
        let icpt = interceptor(&config);
        let cx = cx_fixture(&page, &icpt, &config);

        let value = json!({
            "whatever": "https://d.terabox.example/f?sign=x",
            "unrelated": "https://example.com/not-cdn",
        });
        let mut out = Vec::new();
        collect_urls(&value, 0, &cx, &mut out);
        assert_eq!(out, vec!["https://d.terabox.example/f?sign=x"]);
    }

    #[test]
    fn test_best_share_entry_prefers_largest_video() {
        let list = json!([
            { "category": 6, "size": 900, "server_filename": "readme.txt" },
            { "category": 1, "size": 100, "server_filename": "small.mp4" },
            { "category": 1, "size": 500, "server_filename": "big.mp4" },
        ]);
        let best = best_share_entry(&list).unwrap();
        assert_eq!(best["server_filename"], "big.mp4");
    }

    #[test]
    fn test_best_share_entry_falls_back_to_largest_file() {
        let list = json!([
            { "category": 6, "size": 900, "server_filename": "archive.zip" },
            { "category": 4, "size": 100, "server_filename": "doc.pdf" },
        ]);
        let best = best_share_entry(&list).unwrap();
        assert_eq!(best["server_filename"], "archive.zip");
    }

    #[test]
    fn test_scan_inline_urls_handles_escaped_slashes() {
        let state = MockState::shared();
        let rt = tokio::runtime::Runtime::new().unwrap();
        let page = rt.block_on(mock_page(&state));
        let config = config();
        let icpt = interceptor(&config);
        let cx = cx_fixture(&page, &icpt, &config);

        let html = r#"<script>var x = {"dlink":"https:\/\/d.terabox.example\/f?sign=zz"};</script>"#;
        let urls = scan_inline_urls(html, &cx);
        assert_eq!(urls, vec!["https://d.terabox.example/f?sign=zz"]);
    }

    #[tokio::test]
    async fn test_stage_finds_url_in_globals() {
        let state = MockState::shared();
        state.respond_with(|method, params| {
            if method != "Runtime.evaluate" {
                return None;
            }
            let expr = params["expression"].as_str().unwrap_or("");
            if expr.contains("jsToken: safe(window.jsToken)") {
                // No token: the API path is skipped, the walk finds the link
                Some(json!({
                    "result": {
                        "type": "object",
                        "value": {
                            "jsToken": null,
                            "fileList": [
                                { "dlink": "https://d.terabox.example/f?sign=ok&fid=1" }
                            ]
                        }
                    }
                }))
            } else if expr.contains("outerHTML") {
                Some(json!({ "result": { "type": "string", "value": "<html></html>" } }))
            } else {
                None
            }
        });

        let page = mock_page(&state).await;
        let config = config();
        let icpt = interceptor(&config);
        let cx = cx_fixture(&page, &icpt, &config);

        match ScriptStage.run(&cx).await {
            StageOutcome::Found(hit) => {
                assert_eq!(hit.url, "https://d.terabox.example/f?sign=ok&fid=1");
            }
            other => panic!("expected Found, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_stage_not_found_on_empty_page() {
        let state = MockState::shared();
        state.respond_with(|method, params| {
            if method != "Runtime.evaluate" {
                return None;
            }
            let expr = params["expression"].as_str().unwrap_or("");
            if expr.contains("outerHTML") {
                Some(json!({ "result": { "type": "string", "value": "<html></html>" } }))
            } else {
                Some(json!({ "result": { "type": "object", "value": null } }))
            }
        });

        let page = mock_page(&state).await;
        let config = config();
        let icpt = interceptor(&config);
        let cx = cx_fixture(&page, &icpt, &config);

        assert_eq!(ScriptStage.run(&cx).await, StageOutcome::NotFound);
    }
}
