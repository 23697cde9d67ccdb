//! Waterfall orchestrator
//!
//! Runs the stages in fixed order inside one borrowed page, applies the
//! advisory validators, and re-queries the network listener once after
//! the last stage (responses can land after a stage returns).

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use super::{dom::DomStage, network::NetworkStage, script::ScriptStage};
use super::{ExtractionResult, StageHit, StageKind, StageOutcome};
use crate::net::{CaptureRules, NetworkInterceptor};
use crate::page::Page;
use crate::validate;
use crate::ExtractionConfig;

/// Everything a stage may touch during one attempt
pub struct AttemptContext<'a> {
    pub page: &'a Page,
    pub interceptor: &'a NetworkInterceptor,
    pub url: &'a str,
    pub config: &'a ExtractionConfig,
}

/// One strategy in the waterfall
#[async_trait]
pub trait Stage: Send + Sync {
    fn kind(&self) -> StageKind;
    async fn run(&self, cx: &AttemptContext<'_>) -> StageOutcome;
}

/// The three-stage extraction pipeline
pub struct ExtractionPipeline {
    config: Arc<ExtractionConfig>,
}

impl ExtractionPipeline {
    pub fn new(config: Arc<ExtractionConfig>) -> Self {
        Self { config }
    }

    /// Run one full extraction attempt in a page the session manager
    /// lends out. Returns a failed result rather than erroring when no
    /// stage produces a candidate - the manager decides whether to
    /// rotate identity and retry.
    pub async fn extract(&self, page: &Page, url: &str) -> ExtractionResult {
        let interceptor = NetworkInterceptor::new(CaptureRules {
            min_file_size: self.config.min_file_size,
            cdn_patterns: self.config.cdn_patterns.clone(),
            signature_params: self.config.signature_params.clone(),
        });

        // The listener must observe traffic from the first request on
        if let Err(e) = page.session().network_enable().await {
            tracing::warn!("Network.enable failed: {}", e);
        }

        let stages: [Box<dyn Stage>; 3] = [
            Box::new(NetworkStage),
            Box::new(ScriptStage),
            Box::new(DomStage),
        ];

        let cx = AttemptContext {
            page,
            interceptor: &interceptor,
            url,
            config: &self.config,
        };

        self.run_stages(&stages, &cx).await
    }

    /// Stage driver, separated from `extract` so the waterfall semantics
    /// are testable with stub stages.
    pub async fn run_stages(
        &self,
        stages: &[Box<dyn Stage>],
        cx: &AttemptContext<'_>,
    ) -> ExtractionResult {
        for stage in stages {
            let kind = stage.kind();
            let budget = self.stage_budget(kind);
            tracing::info!("[{}] stage starting ({}s budget)", kind, budget.as_secs());

            let outcome = match tokio::time::timeout(budget, stage.run(cx)).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    tracing::warn!("[{}] stage timed out", kind);
                    StageOutcome::NotFound
                }
            };

            match outcome {
                StageOutcome::Found(hit) => {
                    tracing::info!("[{}] produced {}", kind, truncate(&hit.url, 80));
                    return self.admit(hit, kind);
                }
                StageOutcome::NotFound => {
                    tracing::info!("[{}] found nothing", kind);
                }
                StageOutcome::Failed(reason) => {
                    tracing::warn!("[{}] failed: {}", kind, reason);
                }
            }
        }

        // Late responses: one final listener query after the last stage
        cx.page
            .pump_for(cx.interceptor, Duration::from_millis(500))
            .await;
        if let Some(response) = cx.interceptor.best() {
            tracing::info!("Late network capture: {}", truncate(&response.url, 80));
            return self.admit(StageHit::from_captured(&response), StageKind::Network);
        }

        ExtractionResult::failure("no extraction layer produced a download URL")
    }

    /// Advisory validation: a failing candidate is logged and returned
    /// anyway. A dropped good link costs more than an occasional bad one.
    fn admit(&self, hit: StageHit, layer: StageKind) -> ExtractionResult {
        let verdict = validate::validate_candidate(
            &hit.url,
            hit.filesize,
            &self.config.cdn_patterns,
            &self.config.signature_params,
            self.config.min_file_size,
        );
        if !verdict.valid {
            tracing::warn!(
                "Candidate failed validation ({}), returning anyway: {}",
                verdict.reason,
                truncate(&hit.url, 80)
            );
        }
        ExtractionResult::found(hit, layer)
    }

    fn stage_budget(&self, kind: StageKind) -> Duration {
        let ms = match kind {
            StageKind::Network => self.config.network_stage_timeout_ms,
            StageKind::Script => self.config.script_stage_timeout_ms,
            StageKind::Dom => self.config.dom_stage_timeout_ms,
        };
        Duration::from_millis(ms)
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((i, _)) => &s[..i],
        None => s,
    }
}
