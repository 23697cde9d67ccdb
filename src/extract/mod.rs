//! Extraction pipeline
//!
//! A three-stage waterfall: network interception, script-state
//! inspection, simulated-human DOM interaction. Each stage runs at most
//! once per attempt, in that order, and the first stage to produce a
//! validated hit short-circuits the rest.

pub mod dom;
pub mod network;
pub mod pipeline;
pub mod script;

use crate::net::CapturedResponse;
use crate::validate;

pub use pipeline::{AttemptContext, ExtractionPipeline, Stage};

/// Which extraction layer produced a result
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageKind {
    Network,
    Script,
    Dom,
}

impl StageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StageKind::Network => "network",
            StageKind::Script => "script",
            StageKind::Dom => "dom",
        }
    }
}

impl std::fmt::Display for StageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What one stage recovered
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageHit {
    pub url: String,
    pub filename: Option<String>,
    pub filesize: Option<u64>,
    pub filetype: Option<String>,
}

impl StageHit {
    pub fn from_captured(response: &CapturedResponse) -> Self {
        Self {
            url: response.url.clone(),
            filename: response.filename.clone(),
            filesize: response.content_length,
            filetype: Some(validate::file_type(response.content_type.as_deref()).to_string()),
        }
    }
}

/// Explicit stage result - no `None`/exception duality. The orchestrator
/// pattern-matches on this.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageOutcome {
    Found(StageHit),
    NotFound,
    Failed(String),
}

/// Output contract of the whole engine. Immutable once constructed.
#[derive(Debug, Clone)]
pub struct ExtractionResult {
    pub success: bool,
    pub download_url: Option<String>,
    pub filename: Option<String>,
    pub filesize: Option<u64>,
    pub filetype: Option<String>,
    /// Which layer produced the URL, on success
    pub layer: Option<StageKind>,
    /// Human-readable error, on failure
    pub error: Option<String>,
}

impl ExtractionResult {
    pub fn found(hit: StageHit, layer: StageKind) -> Self {
        Self {
            success: true,
            download_url: Some(hit.url),
            filename: hit.filename,
            filesize: hit.filesize,
            filetype: hit.filetype,
            layer: Some(layer),
            error: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            download_url: None,
            filename: None,
            filesize: None,
            filetype: None,
            layer: None,
            error: Some(error.into()),
        }
    }
}
