//! Stage records and the stage runner.
//!
//! A stage is one agent call. Its state is an enum so that `output` exists only
//! on completed stages and `error` only on failed ones; the JSON form is flat:
//! `{"name": "scoring", "status": "completed", "startedAt": .., "finishedAt": .., "output": {..}}`.

use std::fmt;
use std::future::Future;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::llm_client::LlmError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StageName {
    KeywordAnalysis,
    Scoring,
    Optimiser,
    JdAnalysis,
    Formatter,
    CoverLetter,
}

impl StageName {
    pub fn as_str(&self) -> &'static str {
        match self {
            StageName::KeywordAnalysis => "keywordAnalysis",
            StageName::Scoring => "scoring",
            StageName::Optimiser => "optimiser",
            StageName::JdAnalysis => "jdAnalysis",
            StageName::Formatter => "formatter",
            StageName::CoverLetter => "coverLetter",
        }
    }
}

impl fmt::Display for StageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl StageStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, StageStatus::Completed | StageStatus::Failed)
    }
}

/// Coarse classification of a stage failure, for per-stage retry decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StageErrorKind {
    Timeout,
    Validation,
    Provider,
    RateLimited,
    Network,
    Other,
}

impl From<&LlmError> for StageErrorKind {
    fn from(err: &LlmError) -> Self {
        match err {
            LlmError::Http(e) if e.is_timeout() => StageErrorKind::Timeout,
            LlmError::Http(_) => StageErrorKind::Network,
            LlmError::Api { status: 429, .. } | LlmError::RateLimited { .. } => {
                StageErrorKind::RateLimited
            }
            LlmError::Api { .. } | LlmError::Provider(_) => StageErrorKind::Provider,
            LlmError::Parse(_)
            | LlmError::Schema(_)
            | LlmError::EmptyContent
            | LlmError::Incomplete(_) => StageErrorKind::Validation,
            LlmError::Timeout { .. } => StageErrorKind::Timeout,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase", rename_all_fields = "camelCase")]
pub enum StageState<T> {
    Pending,
    Running {
        started_at: i64,
    },
    Completed {
        started_at: i64,
        finished_at: i64,
        output: T,
    },
    Failed {
        started_at: i64,
        finished_at: i64,
        error: String,
        error_kind: StageErrorKind,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stage<T> {
    pub name: StageName,
    #[serde(flatten)]
    pub state: StageState<T>,
}

impl<T> Stage<T> {
    pub fn pending(name: StageName) -> Self {
        Self {
            name,
            state: StageState::Pending,
        }
    }

    pub fn running(name: StageName) -> Self {
        Self {
            name,
            state: StageState::Running {
                started_at: now_millis(),
            },
        }
    }

    pub fn status(&self) -> StageStatus {
        match self.state {
            StageState::Pending => StageStatus::Pending,
            StageState::Running { .. } => StageStatus::Running,
            StageState::Completed { .. } => StageStatus::Completed,
            StageState::Failed { .. } => StageStatus::Failed,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status().is_terminal()
    }

    pub fn output(&self) -> Option<&T> {
        match &self.state {
            StageState::Completed { output, .. } => Some(output),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match &self.state {
            StageState::Failed { error, .. } => Some(error),
            _ => None,
        }
    }

    pub fn started_at(&self) -> Option<i64> {
        match self.state {
            StageState::Pending => None,
            StageState::Running { started_at }
            | StageState::Completed { started_at, .. }
            | StageState::Failed { started_at, .. } => Some(started_at),
        }
    }

    /// Replaces the start timestamp of a started stage; pending stages are unchanged.
    pub fn with_started_at(mut self, at: i64) -> Self {
        match &mut self.state {
            StageState::Pending => {}
            StageState::Running { started_at }
            | StageState::Completed { started_at, .. }
            | StageState::Failed { started_at, .. } => *started_at = at,
        }
        self
    }

    /// Builds a stage under `name` that settles exactly like `self`, with the
    /// output transformed by `f`. Non-terminal stages mirror as pending.
    pub fn mirror<U>(&self, name: StageName, f: impl FnOnce(&T) -> U) -> Stage<U> {
        let state = match &self.state {
            StageState::Completed {
                started_at,
                finished_at,
                output,
            } => StageState::Completed {
                started_at: *started_at,
                finished_at: *finished_at,
                output: f(output),
            },
            StageState::Failed {
                started_at,
                finished_at,
                error,
                error_kind,
            } => StageState::Failed {
                started_at: *started_at,
                finished_at: *finished_at,
                error: error.clone(),
                error_kind: *error_kind,
            },
            StageState::Pending | StageState::Running { .. } => StageState::Pending,
        };
        Stage { name, state }
    }
}

/// Runs one stage body and settles it. Never propagates the body's error:
/// a failure becomes a `Failed` stage carrying the error's message.
pub async fn run_stage<T, F>(name: StageName, work: F) -> Stage<T>
where
    F: Future<Output = Result<T, LlmError>>,
{
    let started_at = now_millis();
    let outcome = work.await;
    let finished_at = now_millis();
    let duration_ms = finished_at - started_at;

    let state = match outcome {
        Ok(output) => {
            info!(stage = %name, duration_ms, "stage completed");
            StageState::Completed {
                started_at,
                finished_at,
                output,
            }
        }
        Err(err) => {
            let error_kind = StageErrorKind::from(&err);
            warn!(stage = %name, duration_ms, ?error_kind, "stage failed: {err}");
            StageState::Failed {
                started_at,
                finished_at,
                error: err.to_string(),
                error_kind,
            }
        }
    };

    Stage { name, state }
}

pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}
