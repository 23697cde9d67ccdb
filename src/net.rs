//! Network interception
//!
//! A passive observer over one session's `Network.*` events. Every
//! response is classified against the dual rule - media type with real
//! size, or signed CDN URL with real size - and candidates are collected
//! into an append-only list that lives for exactly one navigation
//! attempt. Never shared across contexts.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::cdp::transport::CdpEvent;
use crate::cdp::types::{
    NetworkLoadingFailedEvent, NetworkLoadingFinishedEvent, NetworkResponseReceivedEvent,
};
use crate::validate;

/// One response that looks like the target asset
#[derive(Debug, Clone)]
pub struct CapturedResponse {
    pub url: String,
    pub content_type: Option<String>,
    pub content_length: Option<u64>,
    pub filename: Option<String>,
    pub headers: HashMap<String, String>,
}

impl CapturedResponse {
    /// Largest-first ordering key
    fn size(&self) -> u64 {
        self.content_length.unwrap_or(0)
    }

    fn is_video(&self) -> bool {
        self.content_type
            .as_deref()
            .map(|ct| ct.to_ascii_lowercase().contains("video"))
            .unwrap_or(false)
    }
}

/// Content-type prefixes that read as a file download
const MEDIA_TYPES: &[&str] = &[
    "video/",
    "audio/",
    "application/octet-stream",
    "application/x-download",
    "application/force-download",
    "application/zip",
    "application/x-rar",
    "application/pdf",
];

/// Classification parameters, copied out of the engine config so the
/// interceptor stays free of config plumbing
#[derive(Debug, Clone)]
pub struct CaptureRules {
    pub min_file_size: u64,
    pub cdn_patterns: Vec<String>,
    pub signature_params: Vec<String>,
}

/// Passive response listener for one extraction attempt.
///
/// Attach (start feeding events) before navigation begins so early
/// responses are not missed; drop when the attempt ends.
pub struct NetworkInterceptor {
    rules: CaptureRules,
    /// In-flight responses waiting for their size report
    pending: Mutex<HashMap<String, CapturedResponse>>,
    captured: Mutex<Vec<CapturedResponse>>,
}

impl NetworkInterceptor {
    pub fn new(rules: CaptureRules) -> Self {
        Self {
            rules,
            pending: Mutex::new(HashMap::new()),
            captured: Mutex::new(Vec::new()),
        }
    }

    /// Feed one CDP event. Returns true when the event was a network
    /// event this interceptor consumed.
    pub fn process_event(&self, event: &CdpEvent) -> bool {
        match event.method.as_str() {
            "Network.responseReceived" => {
                if let Ok(e) =
                    serde_json::from_value::<NetworkResponseReceivedEvent>(event.params.clone())
                {
                    self.on_response(e);
                    return true;
                }
            }
            "Network.loadingFinished" => {
                if let Ok(e) =
                    serde_json::from_value::<NetworkLoadingFinishedEvent>(event.params.clone())
                {
                    self.on_finished(e);
                    return true;
                }
            }
            "Network.loadingFailed" => {
                if let Ok(e) =
                    serde_json::from_value::<NetworkLoadingFailedEvent>(event.params.clone())
                {
                    self.pending.lock().unwrap().remove(&e.request_id);
                    return true;
                }
            }
            _ => {}
        }
        false
    }

    fn on_response(&self, event: NetworkResponseReceivedEvent) {
        let headers = event.response.headers;
        let lower: HashMap<String, String> = headers
            .iter()
            .map(|(k, v)| (k.to_ascii_lowercase(), v.clone()))
            .collect();

        let content_type = lower
            .get("content-type")
            .cloned()
            .or(event.response.mime_type.clone());
        let content_length = lower
            .get("content-length")
            .and_then(|v| validate::parse_content_length(v));
        let filename = lower
            .get("content-disposition")
            .and_then(|v| validate::parse_content_disposition(v));

        let response = CapturedResponse {
            url: event.response.url,
            content_type,
            content_length,
            filename,
            headers,
        };

        if self.is_candidate(&response) {
            tracing::info!(
                "Captured download candidate: {} ({}, {})",
                truncate(&response.url, 80),
                response.content_type.as_deref().unwrap_or("?"),
                validate::format_file_size(response.content_length),
            );
            self.captured.lock().unwrap().push(response);
        } else if response.content_length.is_none() {
            // Size may arrive with loadingFinished; park it
            self.pending
                .lock()
                .unwrap()
                .insert(event.request_id, response);
        }
    }

    fn on_finished(&self, event: NetworkLoadingFinishedEvent) {
        let parked = self.pending.lock().unwrap().remove(&event.request_id);
        if let Some(mut response) = parked {
            if response.content_length.is_none() && event.encoded_data_length > 0.0 {
                response.content_length = Some(event.encoded_data_length as u64);
            }
            if self.is_candidate(&response) {
                tracing::info!(
                    "Captured download candidate (late size): {} ({})",
                    truncate(&response.url, 80),
                    validate::format_file_size(response.content_length),
                );
                self.captured.lock().unwrap().push(response);
            }
        }
    }

    /// The dual rule: media type with size, or signed CDN URL with size
    fn is_candidate(&self, response: &CapturedResponse) -> bool {
        let is_media_type = response
            .content_type
            .as_deref()
            .map(|ct| {
                let ct = ct.to_ascii_lowercase();
                MEDIA_TYPES.iter().any(|m| ct.contains(m))
            })
            .unwrap_or(false);

        let is_large = response.size() >= self.rules.min_file_size;

        let is_signed_cdn = validate::is_cdn_url(&response.url, &self.rules.cdn_patterns)
            && validate::has_signature_params(&response.url, &self.rules.signature_params);

        (is_media_type && is_large) || (is_signed_cdn && is_large)
    }

    /// Best candidate so far: the largest video-typed one, else the
    /// largest overall
    pub fn best(&self) -> Option<CapturedResponse> {
        let captured = self.captured.lock().unwrap();
        if captured.is_empty() {
            return None;
        }

        captured
            .iter()
            .filter(|c| c.is_video())
            .max_by_key(|c| c.size())
            .or_else(|| captured.iter().max_by_key(|c| c.size()))
            .cloned()
    }

    /// Number of captured candidates
    pub fn len(&self) -> usize {
        self.captured.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((i, _)) => &s[..i],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn rules() -> CaptureRules {
        CaptureRules {
            min_file_size: 512 * 1024,
            cdn_patterns: vec!["cdn.terabox".into(), "d.terabox".into()],
            signature_params: vec!["sign".into(), "expires".into()],
        }
    }

    fn response_event(url: &str, content_type: &str, length: u64) -> CdpEvent {
        CdpEvent {
            method: "Network.responseReceived".into(),
            params: json!({
                "requestId": format!("req-{}", url.len()),
                "response": {
                    "url": url,
                    "status": 200,
                    "statusText": "OK",
                    "mimeType": content_type,
                    "headers": {
                        "content-type": content_type,
                        "content-length": length.to_string(),
                    }
                }
            }),
            session_id: Some("s".into()),
        }
    }

    #[test]
    fn test_large_video_is_a_candidate() {
        let interceptor = NetworkInterceptor::new(rules());
        interceptor.process_event(&response_event(
            "https://files.example.com/clip",
            "video/mp4",
            10 * 1024 * 1024,
        ));
        assert_eq!(interceptor.len(), 1);
    }

    #[test]
    fn test_small_html_is_not_a_candidate() {
        let interceptor = NetworkInterceptor::new(rules());
        interceptor.process_event(&response_event(
            "https://terabox.com/s/1abc",
            "text/html",
            1024,
        ));
        assert!(interceptor.is_empty());
    }

    #[test]
    fn test_signed_url_needs_cdn_host() {
        let interceptor = NetworkInterceptor::new(rules());
        // Signature parameter but a non-CDN host: not a candidate
        interceptor.process_event(&response_event(
            "https://other.example.com/f?sign=abc",
            "text/plain",
            5 * 1024 * 1024,
        ));
        assert!(interceptor.is_empty());

        // Same shape on a CDN host: captured
        interceptor.process_event(&response_event(
            "https://cdn.terabox.example/f?sign=abc",
            "text/plain",
            5 * 1024 * 1024,
        ));
        assert_eq!(interceptor.len(), 1);
    }

    #[test]
    fn test_large_media_below_threshold_rejected() {
        let interceptor = NetworkInterceptor::new(rules());
        interceptor.process_event(&response_event(
            "https://files.example.com/tiny.mp4",
            "video/mp4",
            100 * 1024,
        ));
        assert!(interceptor.is_empty());
    }

    #[test]
    fn test_best_prefers_video_over_raw_size() {
        let interceptor = NetworkInterceptor::new(rules());
        interceptor.process_event(&response_event(
            "https://a.example.com/v1",
            "video/mp4",
            5 * 1024 * 1024,
        ));
        interceptor.process_event(&response_event(
            "https://b.example.com/blob",
            "application/octet-stream",
            50 * 1024 * 1024,
        ));
        interceptor.process_event(&response_event(
            "https://c.example.com/v2",
            "video/mp4",
            20 * 1024 * 1024,
        ));

        let best = interceptor.best().unwrap();
        assert_eq!(best.url, "https://c.example.com/v2");
        assert_eq!(best.content_length, Some(20 * 1024 * 1024));
    }

    #[test]
    fn test_best_falls_back_to_largest() {
        let interceptor = NetworkInterceptor::new(rules());
        interceptor.process_event(&response_event(
            "https://a.example.com/z1",
            "application/zip",
            5 * 1024 * 1024,
        ));
        interceptor.process_event(&response_event(
            "https://b.example.com/z2",
            "application/zip",
            9 * 1024 * 1024,
        ));
        assert_eq!(interceptor.best().unwrap().url, "https://b.example.com/z2");
    }

    #[test]
    fn test_late_size_via_loading_finished() {
        let interceptor = NetworkInterceptor::new(rules());
        let no_length = CdpEvent {
            method: "Network.responseReceived".into(),
            params: json!({
                "requestId": "req-late",
                "response": {
                    "url": "https://d.terabox.example/f?sign=ok",
                    "status": 200,
                    "mimeType": "video/mp4",
                    "headers": { "content-type": "video/mp4" }
                }
            }),
            session_id: Some("s".into()),
        };
        interceptor.process_event(&no_length);
        assert!(interceptor.is_empty());

        interceptor.process_event(&CdpEvent {
            method: "Network.loadingFinished".into(),
            params: json!({
                "requestId": "req-late",
                "encodedDataLength": 3_000_000.0,
            }),
            session_id: Some("s".into()),
        });
        assert_eq!(interceptor.len(), 1);
        assert_eq!(
            interceptor.best().unwrap().content_length,
            Some(3_000_000)
        );
    }

    #[test]
    fn test_filename_parsed_from_content_disposition() {
        let interceptor = NetworkInterceptor::new(rules());
        interceptor.process_event(&CdpEvent {
            method: "Network.responseReceived".into(),
            params: json!({
                "requestId": "req-cd",
                "response": {
                    "url": "https://d.terabox.example/f?sign=ok",
                    "status": 200,
                    "mimeType": "video/mp4",
                    "headers": {
                        "content-type": "video/mp4",
                        "content-length": "2000000",
                        "content-disposition": "attachment; filename=\"movie.mp4\""
                    }
                }
            }),
            session_id: Some("s".into()),
        });
        assert_eq!(
            interceptor.best().unwrap().filename.as_deref(),
            Some("movie.mp4")
        );
    }
}
