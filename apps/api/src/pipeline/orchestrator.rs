//! Pipeline Orchestrator: sequences the analysis stages for one resume/JD pair.
//!
//! Flow (parallel topology):   keyword ┐
//!                             scoring ├─ fan out, settle in any order
//!                             optimiser┘
//! Flow (sequential topology): jd_analysis → keyword → { scoring, optimiser }
//!
//! Stages with no data dependency are always in flight together. Every stage
//! settlement is pushed to the progress listener as soon as it happens, and a
//! failing stage never stops its siblings: failures live in the result.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt};
use futures::stream::{FuturesUnordered, StreamExt};
use serde::Deserialize;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::llm_client::{LlmError, StructuredGenerator};
use crate::pipeline::definitions::{
    generate, jd_analysis_prompt, keyword_analysis_prompt, optimiser_prompt, reconcile_keywords,
    scoring_prompt, JdAnalysisOutput, KeywordAnalysisOutput, OptimiserOutput, RawScoringOutput,
    ScoringOutput, UpstreamContext,
};
use crate::pipeline::result::{PipelineResult, StageUpdate, Topology};
use crate::pipeline::stage::{run_stage, Stage, StageName, StageStatus};

pub const DEFAULT_STAGE_TIMEOUT: Duration = Duration::from_secs(90);

#[derive(Debug, Error, PartialEq)]
pub enum PipelineError {
    #[error("resume text cannot be empty")]
    EmptyResume,

    #[error("job description text cannot be empty")]
    EmptyJobDescription,

    #[error("stage '{stage}' cannot be retried: {reason}")]
    NotRetryable { stage: StageName, reason: String },

    #[error("pipeline finished with unsettled stages: {0:?}")]
    Unsettled(Vec<StageName>),
}

/// Input shared by every orchestration entry point.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisRequest {
    pub resume_text: String,
    pub job_description_text: String,
    pub session_id: String,
    #[serde(default = "new_correlation_id")]
    pub correlation_id: String,
}

pub fn new_correlation_id() -> String {
    Uuid::new_v4().to_string()
}

/// Receives a snapshot of the whole result every time a stage starts or settles.
pub trait ProgressListener: Send + Sync {
    fn on_progress(&self, snapshot: &PipelineResult);
}

impl<F> ProgressListener for F
where
    F: Fn(&PipelineResult) + Send + Sync,
{
    fn on_progress(&self, snapshot: &PipelineResult) {
        self(snapshot)
    }
}

impl ProgressListener for mpsc::UnboundedSender<PipelineResult> {
    fn on_progress(&self, snapshot: &PipelineResult) {
        // A closed receiver means nobody is watching any more; the run carries on.
        if self.send(snapshot.clone()).is_err() {
            debug!("progress receiver dropped; snapshot discarded");
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct OrchestratorConfig {
    pub topology: Topology,
    pub stage_timeout: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            topology: Topology::default(),
            stage_timeout: DEFAULT_STAGE_TIMEOUT,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Plan {
    Full,
    KeywordOnly,
    ScoreOnly,
}

type Batch<'a> = Vec<(StageName, BoxFuture<'a, StageUpdate>)>;

/// Runs analysis pipelines against a shared structured generator.
/// Holds no per-run state; one instance serves concurrent requests.
pub struct Orchestrator {
    pub(super) generator: Arc<dyn StructuredGenerator>,
    pub(super) config: OrchestratorConfig,
}

impl Orchestrator {
    pub fn new(generator: Arc<dyn StructuredGenerator>, config: OrchestratorConfig) -> Self {
        Self { generator, config }
    }

    pub fn topology(&self) -> Topology {
        self.config.topology
    }

    /// Keyword analysis, ATS scoring and resume optimisation.
    pub async fn analyze_resume_and_jd(
        &self,
        request: &AnalysisRequest,
        listener: Option<&dyn ProgressListener>,
    ) -> Result<PipelineResult, PipelineError> {
        self.run(Plan::Full, request, listener).await
    }

    /// Keyword analysis only; scoring and optimiser stay pending.
    pub async fn analyze_keyword_only(
        &self,
        request: &AnalysisRequest,
        listener: Option<&dyn ProgressListener>,
    ) -> Result<PipelineResult, PipelineError> {
        self.run(Plan::KeywordOnly, request, listener).await
    }

    /// Keyword analysis and scoring; the optimiser stays pending.
    pub async fn analyze_score_only(
        &self,
        request: &AnalysisRequest,
        listener: Option<&dyn ProgressListener>,
    ) -> Result<PipelineResult, PipelineError> {
        self.run(Plan::ScoreOnly, request, listener).await
    }

    /// Re-runs one failed or never-run stage and merges it into `previous`.
    /// Upstream context comes from `previous`, whose topology is kept.
    pub async fn retry_stage(
        &self,
        request: &AnalysisRequest,
        previous: PipelineResult,
        stage: StageName,
        listener: Option<&dyn ProgressListener>,
    ) -> Result<PipelineResult, PipelineError> {
        validate(request)?;

        match previous.status_of(stage) {
            None => {
                return Err(PipelineError::NotRetryable {
                    stage,
                    reason: format!("not part of a {} pipeline", previous.topology),
                })
            }
            Some(StageStatus::Completed) => {
                return Err(PipelineError::NotRetryable {
                    stage,
                    reason: "already completed".to_string(),
                })
            }
            Some(_) => {}
        }

        let jd = previous
            .jd_analysis
            .as_ref()
            .and_then(Stage::output)
            .cloned();
        let keywords = match previous.topology {
            Topology::Sequential => previous.keyword_analysis.output().cloned(),
            Topology::Parallel => None,
        };
        let context = UpstreamContext {
            jd_analysis: jd.as_ref(),
            keyword_analysis: keywords.as_ref(),
        };
        let extract_job_details = jd.is_none();

        let work = match stage {
            StageName::JdAnalysis => self.jd_analysis_stage(request).boxed(),
            StageName::KeywordAnalysis => self.keyword_stage(request, context).boxed(),
            StageName::Scoring => self
                .scoring_stage(request, context, extract_job_details)
                .boxed(),
            StageName::Optimiser => self.optimiser_stage(request, context).boxed(),
            StageName::Formatter | StageName::CoverLetter => {
                return Err(PipelineError::NotRetryable {
                    stage,
                    reason: "stage does not run on its own".to_string(),
                })
            }
        };

        let span = info_span!(
            "retry_stage",
            session_id = %request.session_id,
            correlation_id = %request.correlation_id,
            stage = %stage,
        );
        async move {
            info!("retrying stage");
            let result = fan_out(previous, vec![(stage, work)], listener).await;
            settled(result, &[stage])
        }
        .instrument(span)
        .await
    }

    async fn run(
        &self,
        plan: Plan,
        request: &AnalysisRequest,
        listener: Option<&dyn ProgressListener>,
    ) -> Result<PipelineResult, PipelineError> {
        validate(request)?;

        let topology = self.config.topology;
        let span = info_span!(
            "pipeline",
            session_id = %request.session_id,
            correlation_id = %request.correlation_id,
            plan = ?plan,
            topology = %topology,
        );

        async move {
            info!("pipeline started");
            let seed = PipelineResult::new(
                request.session_id.clone(),
                request.correlation_id.clone(),
                topology,
            );

            let (result, launched) = match topology {
                Topology::Parallel => self.run_parallel(plan, request, seed, listener).await,
                Topology::Sequential => self.run_sequential(plan, request, seed, listener).await,
            };

            let result = settled(result, &launched)?;
            let failed = result.failed_stages();
            if failed.is_empty() {
                info!(stages = launched.len(), "pipeline finished");
            } else {
                warn!(stages = launched.len(), ?failed, "pipeline finished with failed stages");
            }
            Ok(result)
        }
        .instrument(span)
        .await
    }

    async fn run_parallel(
        &self,
        plan: Plan,
        request: &AnalysisRequest,
        seed: PipelineResult,
        listener: Option<&dyn ProgressListener>,
    ) -> (PipelineResult, Vec<StageName>) {
        let context = UpstreamContext::default();

        let mut batch: Batch<'_> = vec![(
            StageName::KeywordAnalysis,
            self.keyword_stage(request, context).boxed(),
        )];
        if matches!(plan, Plan::Full | Plan::ScoreOnly) {
            batch.push((
                StageName::Scoring,
                self.scoring_stage(request, context, true).boxed(),
            ));
        }
        if plan == Plan::Full {
            batch.push((
                StageName::Optimiser,
                self.optimiser_stage(request, context).boxed(),
            ));
        }

        let launched: Vec<StageName> = batch.iter().map(|(name, _)| *name).collect();
        let result = fan_out(seed, batch, listener).await;
        (result, launched)
    }

    async fn run_sequential(
        &self,
        plan: Plan,
        request: &AnalysisRequest,
        seed: PipelineResult,
        listener: Option<&dyn ProgressListener>,
    ) -> (PipelineResult, Vec<StageName>) {
        let mut launched = vec![StageName::JdAnalysis, StageName::KeywordAnalysis];

        let result = fan_out(
            seed,
            vec![(
                StageName::JdAnalysis,
                self.jd_analysis_stage(request).boxed(),
            )],
            listener,
        )
        .await;
        let jd = result
            .jd_analysis
            .as_ref()
            .and_then(Stage::output)
            .cloned();
        if jd.is_none() {
            warn!("jd analysis unavailable; downstream stages run without it");
        }

        let context = UpstreamContext {
            jd_analysis: jd.as_ref(),
            keyword_analysis: None,
        };
        let result = fan_out(
            result,
            vec![(
                StageName::KeywordAnalysis,
                self.keyword_stage(request, context).boxed(),
            )],
            listener,
        )
        .await;

        if plan == Plan::KeywordOnly {
            return (result, launched);
        }

        let keywords = result.keyword_analysis.output().cloned();
        let context = UpstreamContext {
            jd_analysis: jd.as_ref(),
            keyword_analysis: keywords.as_ref(),
        };
        let extract_job_details = jd.is_none();

        let mut batch: Batch<'_> = vec![(
            StageName::Scoring,
            self.scoring_stage(request, context, extract_job_details)
                .boxed(),
        )];
        if plan == Plan::Full {
            batch.push((
                StageName::Optimiser,
                self.optimiser_stage(request, context).boxed(),
            ));
        }
        launched.extend(batch.iter().map(|(name, _)| *name));

        let result = fan_out(result, batch, listener).await;
        (result, launched)
    }

    // ────────────────────────────────────────────────────────────────────────
    // Stage bodies
    // ────────────────────────────────────────────────────────────────────────

    async fn jd_analysis_stage(&self, request: &AnalysisRequest) -> StageUpdate {
        let stage = run_stage(
            StageName::JdAnalysis,
            self.bounded(async {
                let prompt = jd_analysis_prompt(&request.job_description_text);
                generate::<JdAnalysisOutput>(self.generator.as_ref(), &prompt).await
            }),
        )
        .await;
        StageUpdate::JdAnalysis(stage)
    }

    async fn keyword_stage(
        &self,
        request: &AnalysisRequest,
        context: UpstreamContext<'_>,
    ) -> StageUpdate {
        let stage = run_stage(
            StageName::KeywordAnalysis,
            self.bounded(async {
                let prompt = keyword_analysis_prompt(
                    &request.resume_text,
                    &request.job_description_text,
                    context,
                )?;
                let output =
                    generate::<KeywordAnalysisOutput>(self.generator.as_ref(), &prompt).await?;
                Ok(reconcile_keywords(output, &request.resume_text))
            }),
        )
        .await;
        StageUpdate::KeywordAnalysis(stage)
    }

    async fn scoring_stage(
        &self,
        request: &AnalysisRequest,
        context: UpstreamContext<'_>,
        extract_job_details: bool,
    ) -> StageUpdate {
        let stage = run_stage(
            StageName::Scoring,
            self.bounded(async {
                let prompt = scoring_prompt(
                    &request.resume_text,
                    &request.job_description_text,
                    context,
                    extract_job_details,
                )?;
                let raw = generate::<RawScoringOutput>(self.generator.as_ref(), &prompt).await?;
                debug!(raw_overall = raw.overall, "normalizing score");
                Ok(ScoringOutput::from(raw))
            }),
        )
        .await;
        StageUpdate::Scoring(stage)
    }

    async fn optimiser_stage(
        &self,
        request: &AnalysisRequest,
        context: UpstreamContext<'_>,
    ) -> StageUpdate {
        let stage = run_stage(
            StageName::Optimiser,
            self.bounded(async {
                let prompt = optimiser_prompt(
                    &request.resume_text,
                    &request.job_description_text,
                    context,
                )?;
                generate::<OptimiserOutput>(self.generator.as_ref(), &prompt).await
            }),
        )
        .await;
        StageUpdate::Optimiser(stage)
    }

    /// Applies the per-stage timeout.
    pub(super) async fn bounded<T>(
        &self,
        work: impl Future<Output = Result<T, LlmError>>,
    ) -> Result<T, LlmError> {
        let limit = self.config.stage_timeout;
        match tokio::time::timeout(limit, work).await {
            Ok(outcome) => outcome,
            Err(_) => Err(LlmError::Timeout {
                seconds: limit.as_secs(),
            }),
        }
    }
}

/// Marks the batch running, then applies each stage as it settles.
/// Completion order within a batch is whatever the generator produces.
async fn fan_out(
    result: PipelineResult,
    batch: Batch<'_>,
    listener: Option<&dyn ProgressListener>,
) -> PipelineResult {
    let mut result = result;
    for (name, _) in &batch {
        result = result.with_update(StageUpdate::Running(*name));
    }
    notify(listener, &result);

    let mut in_flight: FuturesUnordered<_> = batch.into_iter().map(|(_, work)| work).collect();
    while let Some(update) = in_flight.next().await {
        debug!(stage = %update.stage_name(), "stage settled");
        result = result.with_update(update);
        notify(listener, &result);
    }
    result
}

fn notify(listener: Option<&dyn ProgressListener>, snapshot: &PipelineResult) {
    if let Some(listener) = listener {
        listener.on_progress(snapshot);
    }
}

fn settled(result: PipelineResult, launched: &[StageName]) -> Result<PipelineResult, PipelineError> {
    if result.is_settled_for(launched) {
        return Ok(result);
    }
    let unsettled = launched
        .iter()
        .copied()
        .filter(|name| !result.status_of(*name).is_some_and(|s| s.is_terminal()))
        .collect();
    Err(PipelineError::Unsettled(unsettled))
}

fn validate(request: &AnalysisRequest) -> Result<(), PipelineError> {
    require_texts(&request.resume_text, &request.job_description_text)
}

pub(super) fn require_texts(resume_text: &str, jd_text: &str) -> Result<(), PipelineError> {
    if resume_text.trim().is_empty() {
        return Err(PipelineError::EmptyResume);
    }
    if jd_text.trim().is_empty() {
        return Err(PipelineError::EmptyJobDescription);
    }
    Ok(())
}
