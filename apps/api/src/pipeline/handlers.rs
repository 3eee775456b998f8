//! Axum route handlers for the Analysis API.

use std::convert::Infallible;

use axum::{
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
    Json,
};
use futures::stream::{self, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::mpsc;
use tokio::task::JoinError;
use tracing::{error, warn};

use crate::errors::AppError;
use crate::pipeline::cover_letter::{CoverLetterRequest, CoverLetterResult};
use crate::pipeline::orchestrator::{require_texts, AnalysisRequest, PipelineError};
use crate::pipeline::result::PipelineResult;
use crate::pipeline::stage::StageName;
use crate::state::AppState;

// ────────────────────────────────────────────────────────────────────────────
// Request types
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnalysisMode {
    #[default]
    Full,
    Keywords,
    Score,
}

#[derive(Debug, Deserialize)]
pub struct StreamAnalysisRequest {
    #[serde(flatten)]
    pub request: AnalysisRequest,
    #[serde(default)]
    pub mode: AnalysisMode,
}

#[derive(Debug, Deserialize)]
pub struct RetryStageRequest {
    #[serde(flatten)]
    pub request: AnalysisRequest,
    pub stage: StageName,
    pub previous: PipelineResult,
}

// ────────────────────────────────────────────────────────────────────────────
// Handlers
// ────────────────────────────────────────────────────────────────────────────

/// POST /api/v1/analysis
///
/// Keyword analysis, ATS scoring and resume optimisation. Failed stages are
/// reported inside the result with a 200.
pub async fn handle_full_analysis(
    State(state): State<AppState>,
    Json(request): Json<AnalysisRequest>,
) -> Result<Json<PipelineResult>, AppError> {
    let result = state
        .orchestrator
        .analyze_resume_and_jd(&request, None)
        .await?;
    Ok(Json(result))
}

/// POST /api/v1/analysis/keywords
pub async fn handle_keyword_analysis(
    State(state): State<AppState>,
    Json(request): Json<AnalysisRequest>,
) -> Result<Json<PipelineResult>, AppError> {
    let result = state
        .orchestrator
        .analyze_keyword_only(&request, None)
        .await?;
    Ok(Json(result))
}

/// POST /api/v1/analysis/score
pub async fn handle_score_analysis(
    State(state): State<AppState>,
    Json(request): Json<AnalysisRequest>,
) -> Result<Json<PipelineResult>, AppError> {
    let result = state.orchestrator.analyze_score_only(&request, None).await?;
    Ok(Json(result))
}

/// POST /api/v1/analysis/stream
///
/// Server-sent events: one `progress` event per snapshot, then a single
/// `complete` event with the final result, or `error`.
/// Input is validated before the stream opens so bad requests still get a 400.
pub async fn handle_stream_analysis(
    State(state): State<AppState>,
    Json(body): Json<StreamAnalysisRequest>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    require_texts(&body.request.resume_text, &body.request.job_description_text)?;

    let (tx, rx) = mpsc::unbounded_channel::<PipelineResult>();
    let orchestrator = state.orchestrator.clone();
    let run = tokio::spawn(async move {
        let StreamAnalysisRequest { request, mode } = body;
        match mode {
            AnalysisMode::Full => orchestrator.analyze_resume_and_jd(&request, Some(&tx)).await,
            AnalysisMode::Keywords => orchestrator.analyze_keyword_only(&request, Some(&tx)).await,
            AnalysisMode::Score => orchestrator.analyze_score_only(&request, Some(&tx)).await,
        }
    });

    // The sender lives in the task, so the channel closes once the run settles.
    let progress = stream::unfold(rx, |mut rx| async move {
        let snapshot = rx.recv().await?;
        Some((json_event("progress", &snapshot), rx))
    });
    let outcome = stream::once(async move { outcome_event(run.await) });

    let events = progress.chain(outcome).map(Ok::<_, Infallible>);
    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}

/// POST /api/v1/analysis/retry
///
/// Re-runs one failed or pending stage of a previous result.
pub async fn handle_retry_stage(
    State(state): State<AppState>,
    Json(body): Json<RetryStageRequest>,
) -> Result<Json<PipelineResult>, AppError> {
    if body.previous.session_id != body.request.session_id {
        return Err(AppError::Validation(
            "previous result belongs to a different session".to_string(),
        ));
    }

    let result = state
        .orchestrator
        .retry_stage(&body.request, body.previous, body.stage, None)
        .await?;
    Ok(Json(result))
}

/// POST /api/v1/cover-letters
///
/// Three cover letter variations. A failed generation returns 200 with
/// `status: "failed"`.
pub async fn handle_cover_letters(
    State(state): State<AppState>,
    Json(request): Json<CoverLetterRequest>,
) -> Result<Json<CoverLetterResult>, AppError> {
    let result = state
        .orchestrator
        .generate_cover_letter_variations(&request)
        .await?;
    Ok(Json(result))
}

// ────────────────────────────────────────────────────────────────────────────
// SSE helpers
// ────────────────────────────────────────────────────────────────────────────

fn json_event(name: &str, payload: &impl Serialize) -> Event {
    Event::default()
        .event(name)
        .json_data(payload)
        .unwrap_or_else(|e| {
            warn!("failed to encode '{name}' event: {e}");
            Event::default().event("error").data("event encoding failed")
        })
}

fn outcome_event(outcome: Result<Result<PipelineResult, PipelineError>, JoinError>) -> Event {
    match outcome {
        Ok(Ok(result)) => json_event("complete", &result),
        Ok(Err(e)) => {
            warn!("streamed analysis failed: {e}");
            json_event(
                "error",
                &json!({ "code": "PIPELINE_ERROR", "message": e.to_string() }),
            )
        }
        Err(e) => {
            error!("analysis task aborted: {e}");
            json_event(
                "error",
                &json!({
                    "code": "INTERNAL_ERROR",
                    "message": "An internal server error occurred"
                }),
            )
        }
    }
}
