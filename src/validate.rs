//! URL and response validators
//!
//! Pure predicates over URLs and headers. The pipeline treats full
//! validation as advisory: a failing candidate is logged but still
//! returned, since a dropped good link costs more than an occasional
//! bad one.

use std::sync::OnceLock;

use regex::Regex;
use url::Url;

/// Video MIME types
const VIDEO_MIMES: &[&str] = &[
    "video/mp4",
    "video/webm",
    "video/avi",
    "video/mkv",
    "video/x-matroska",
    "video/quicktime",
    "video/x-msvideo",
    "video/x-flv",
    "video/3gpp",
    "video/mpeg",
];

/// Audio MIME types
const AUDIO_MIMES: &[&str] = &[
    "audio/mpeg",
    "audio/mp3",
    "audio/wav",
    "audio/aac",
    "audio/ogg",
    "audio/flac",
    "audio/x-m4a",
];

/// Document/archive MIME types
const DOCUMENT_MIMES: &[&str] = &[
    "application/pdf",
    "application/zip",
    "application/x-rar-compressed",
    "application/x-7z-compressed",
    "application/x-tar",
    "application/gzip",
    "application/octet-stream",
];

fn share_path_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"/s/1?([a-zA-Z0-9_-]+)").unwrap())
}

/// Outcome of full candidate validation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verdict {
    pub valid: bool,
    pub reason: String,
}

impl Verdict {
    fn ok() -> Self {
        Self {
            valid: true,
            reason: "valid".into(),
        }
    }

    fn fail(reason: impl Into<String>) -> Self {
        Self {
            valid: false,
            reason: reason.into(),
        }
    }
}

/// Add a protocol if missing and trim whitespace
pub fn normalize_url(url: &str) -> String {
    let url = url.trim();
    if url.starts_with("http://") || url.starts_with("https://") {
        url.to_string()
    } else {
        format!("https://{}", url)
    }
}

/// Does the URL's host match the supported share-link domains
/// (exact or subdomain)?
pub fn is_supported_share_url(url: &str, domains: &[String]) -> bool {
    let Ok(parsed) = Url::parse(url) else {
        return false;
    };
    let Some(host) = parsed.host_str() else {
        return false;
    };
    let host = host.to_ascii_lowercase();
    let host = host.strip_prefix("www.").unwrap_or(&host);

    domains.iter().any(|d| {
        let d = d.to_ascii_lowercase();
        host == d || host.ends_with(&format!(".{}", d))
    })
}

/// Extract the short share id from a share URL
/// (`/s/<id>` path segment or `surl` query parameter).
pub fn extract_share_id(url: &str) -> Option<String> {
    if let Some(caps) = share_path_re().captures(url) {
        return Some(caps[1].to_string());
    }

    let parsed = Url::parse(url).ok()?;
    parsed
        .query_pairs()
        .find(|(k, _)| k == "surl")
        .map(|(_, v)| v.into_owned())
}

/// Does the URL's host contain one of the configured CDN patterns?
pub fn is_cdn_url(url: &str, cdn_patterns: &[String]) -> bool {
    let Ok(parsed) = Url::parse(url) else {
        return false;
    };
    let Some(host) = parsed.host_str() else {
        return false;
    };
    let host = host.to_ascii_lowercase();

    cdn_patterns.iter().any(|p| host.contains(p.as_str()))
}

/// Does the query string carry at least one signature-like key?
pub fn has_signature_params(url: &str, signature_params: &[String]) -> bool {
    let Ok(parsed) = Url::parse(url) else {
        return false;
    };

    parsed
        .query_pairs()
        .any(|(k, _)| signature_params.iter().any(|p| p == k.as_ref()))
}

/// A URL is download-url-valid when it is a CDN match AND carries a
/// signature parameter.
pub fn is_valid_download_url(
    url: &str,
    cdn_patterns: &[String],
    signature_params: &[String],
) -> bool {
    is_cdn_url(url, cdn_patterns) && has_signature_params(url, signature_params)
}

/// Full validation of an extracted candidate. Size is only checked when
/// known.
pub fn validate_candidate(
    url: &str,
    content_length: Option<u64>,
    cdn_patterns: &[String],
    signature_params: &[String],
    min_file_size: u64,
) -> Verdict {
    if url.is_empty() {
        return Verdict::fail("empty URL");
    }
    if !url.starts_with("http") {
        return Verdict::fail("invalid protocol");
    }
    if !is_cdn_url(url, cdn_patterns) {
        return Verdict::fail("not a CDN URL");
    }
    if !has_signature_params(url, signature_params) {
        return Verdict::fail("missing signature parameters");
    }
    if let Some(len) = content_length {
        if len < min_file_size {
            return Verdict::fail(format!("file too small ({})", format_file_size(Some(len))));
        }
    }
    Verdict::ok()
}

/// Coarse file type from a content-type header
pub fn file_type(content_type: Option<&str>) -> &'static str {
    let Some(ct) = content_type else {
        return "unknown";
    };
    let ct = ct
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_ascii_lowercase();

    if VIDEO_MIMES.contains(&ct.as_str()) {
        "video"
    } else if AUDIO_MIMES.contains(&ct.as_str()) {
        "audio"
    } else if DOCUMENT_MIMES.contains(&ct.as_str()) {
        "document"
    } else if ct.starts_with("image/") {
        "image"
    } else {
        "file"
    }
}

/// Extract a filename from a Content-Disposition header.
/// RFC 5987 `filename*=` takes precedence over plain `filename=`.
pub fn parse_content_disposition(header: &str) -> Option<String> {
    if header.is_empty() {
        return None;
    }

    static EXT_RE: OnceLock<Regex> = OnceLock::new();
    static PLAIN_RE: OnceLock<Regex> = OnceLock::new();

    let ext = EXT_RE
        .get_or_init(|| Regex::new(r#"(?i)filename\*=(?:UTF-8''|utf-8'')([^;]+)"#).unwrap());
    if let Some(caps) = ext.captures(header) {
        return Some(percent_decode(caps[1].trim()));
    }

    let plain =
        PLAIN_RE.get_or_init(|| Regex::new(r#"(?i)filename="?([^";\r\n]+)"?"#).unwrap());
    plain
        .captures(header)
        .map(|caps| caps[1].trim().to_string())
}

/// Parse a Content-Length header value
pub fn parse_content_length(header: &str) -> Option<u64> {
    header.trim().parse().ok()
}

/// Human-readable size for log lines and error reasons
pub fn format_file_size(size_bytes: Option<u64>) -> String {
    let Some(bytes) = size_bytes else {
        return "unknown size".to_string();
    };

    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;

    for unit in &UNITS[..UNITS.len() - 1] {
        if size < 1024.0 {
            return format!("{:.2} {}", size, unit);
        }
        size /= 1024.0;
    }
    format!("{:.2} {}", size, UNITS[UNITS.len() - 1])
}

fn percent_decode(input: &str) -> String {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            if let Ok(b) = u8::from_str_radix(&input[i + 1..i + 3], 16) {
                out.push(b);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }

    String::from_utf8_lossy(&out).into_owned()
}
