//! Pipeline Result: the aggregate threaded through one orchestration run.
//!
//! Updates consume the aggregate and return the next one, so every snapshot
//! handed to a progress listener is an independent value.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::pipeline::definitions::{
    FormatterOutput, JdAnalysisOutput, KeywordAnalysisOutput, OptimiserOutput, ScoringOutput,
};
use crate::pipeline::stage::{Stage, StageName, StageState, StageStatus};

/// How the analysis stages are wired together.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Topology {
    /// Keyword analysis, scoring and optimiser fan out at once; scoring also
    /// extracts job title and company.
    #[default]
    Parallel,
    /// JD analysis, then keyword analysis, then scoring and optimiser together.
    Sequential,
}

impl FromStr for Topology {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "parallel" => Ok(Topology::Parallel),
            "sequential" => Ok(Topology::Sequential),
            other => Err(format!(
                "unknown pipeline topology '{other}' (expected 'parallel' or 'sequential')"
            )),
        }
    }
}

impl fmt::Display for Topology {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Topology::Parallel => f.write_str("parallel"),
            Topology::Sequential => f.write_str("sequential"),
        }
    }
}

fn settle<T>(slot: Stage<T>, incoming: Stage<T>) -> Stage<T> {
    match slot.state {
        StageState::Running { started_at } => incoming.with_started_at(started_at),
        _ => incoming,
    }
}

/// One settled (or starting) stage, applied to a `PipelineResult`.
#[derive(Debug, Clone)]
pub enum StageUpdate {
    Running(StageName),
    JdAnalysis(Stage<JdAnalysisOutput>),
    KeywordAnalysis(Stage<KeywordAnalysisOutput>),
    Scoring(Stage<ScoringOutput>),
    Optimiser(Stage<OptimiserOutput>),
}

impl StageUpdate {
    pub fn stage_name(&self) -> StageName {
        match self {
            StageUpdate::Running(name) => *name,
            StageUpdate::JdAnalysis(s) => s.name,
            StageUpdate::KeywordAnalysis(s) => s.name,
            StageUpdate::Scoring(s) => s.name,
            StageUpdate::Optimiser(s) => s.name,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineResult {
    pub session_id: String,
    pub correlation_id: String,
    pub topology: Topology,
    /// Present only in the sequential topology.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jd_analysis: Option<Stage<JdAnalysisOutput>>,
    pub keyword_analysis: Stage<KeywordAnalysisOutput>,
    pub scoring: Stage<ScoringOutput>,
    pub optimiser: Stage<OptimiserOutput>,
    /// Derived from `optimiser`; never runs on its own.
    pub formatter: Stage<FormatterOutput>,
}

impl PipelineResult {
    /// All stages pending.
    pub fn new(session_id: String, correlation_id: String, topology: Topology) -> Self {
        Self {
            session_id,
            correlation_id,
            topology,
            jd_analysis: match topology {
                Topology::Sequential => Some(Stage::pending(StageName::JdAnalysis)),
                Topology::Parallel => None,
            },
            keyword_analysis: Stage::pending(StageName::KeywordAnalysis),
            scoring: Stage::pending(StageName::Scoring),
            optimiser: Stage::pending(StageName::Optimiser),
            formatter: Stage::pending(StageName::Formatter),
        }
    }

    /// Applies one update. `Running` only moves a pending stage; settled
    /// updates replace the slot, keeping the `startedAt` a running slot
    /// already reported. The formatter follows the optimiser.
    pub fn with_update(mut self, update: StageUpdate) -> Self {
        match update {
            StageUpdate::Running(name) => self.mark_running(name),
            StageUpdate::JdAnalysis(stage) => {
                self.jd_analysis = Some(match self.jd_analysis.take() {
                    Some(slot) => settle(slot, stage),
                    None => stage,
                });
            }
            StageUpdate::KeywordAnalysis(stage) => {
                self.keyword_analysis = settle(self.keyword_analysis, stage)
            }
            StageUpdate::Scoring(stage) => self.scoring = settle(self.scoring, stage),
            StageUpdate::Optimiser(stage) => {
                let stage = settle(self.optimiser, stage);
                if stage.is_terminal() {
                    self.formatter = stage.mirror(StageName::Formatter, |o| FormatterOutput::from(o));
                }
                self.optimiser = stage;
            }
        }
        self
    }

    fn mark_running(&mut self, name: StageName) {
        fn start<T>(stage: &mut Stage<T>) {
            if matches!(stage.state, StageState::Pending) {
                *stage = Stage::running(stage.name);
            }
        }

        match name {
            StageName::JdAnalysis => {
                if let Some(stage) = self.jd_analysis.as_mut() {
                    start(stage);
                }
            }
            StageName::KeywordAnalysis => start(&mut self.keyword_analysis),
            StageName::Scoring => start(&mut self.scoring),
            StageName::Optimiser => start(&mut self.optimiser),
            StageName::Formatter | StageName::CoverLetter => {}
        }
    }

    /// Status of a stage slot, or `None` when the slot is absent from this result.
    pub fn status_of(&self, name: StageName) -> Option<StageStatus> {
        match name {
            StageName::JdAnalysis => self.jd_analysis.as_ref().map(Stage::status),
            StageName::KeywordAnalysis => Some(self.keyword_analysis.status()),
            StageName::Scoring => Some(self.scoring.status()),
            StageName::Optimiser => Some(self.optimiser.status()),
            StageName::Formatter => Some(self.formatter.status()),
            StageName::CoverLetter => None,
        }
    }

    /// True once every listed stage has completed or failed.
    pub fn is_settled_for(&self, stages: &[StageName]) -> bool {
        stages
            .iter()
            .all(|name| self.status_of(*name).is_some_and(|s| s.is_terminal()))
    }

    pub fn failed_stages(&self) -> Vec<StageName> {
        [
            StageName::JdAnalysis,
            StageName::KeywordAnalysis,
            StageName::Scoring,
            StageName::Optimiser,
        ]
        .into_iter()
        .filter(|name| self.status_of(*name) == Some(StageStatus::Failed))
        .collect()
    }
}
