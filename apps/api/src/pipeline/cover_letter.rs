//! Cover letter variations. One generator call returns three styled drafts;
//! each accepted draft gets its own id so a caller can compare them side by side.

use serde::{Deserialize, Serialize};
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::llm_client::LlmError;
use crate::pipeline::definitions::{
    cover_letter_prompt, generate, CoverLetterDraft, CoverLetterDraftVariation,
    COVER_LETTER_STYLES,
};
use crate::pipeline::orchestrator::{require_texts, Orchestrator, PipelineError};
use crate::pipeline::stage::{now_millis, run_stage, StageName, StageStatus};

pub const VARIATION_COUNT: usize = COVER_LETTER_STYLES.len();

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoverLetterRequest {
    pub resume_text: String,
    pub job_description_text: String,
    pub session_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoverLetterVariant {
    pub id: Uuid,
    pub style: String,
    pub markdown: String,
    pub created_at: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoverLetterResult {
    pub session_id: String,
    /// `completed` or `failed`.
    pub status: StageStatus,
    pub outputs: Vec<CoverLetterVariant>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Orchestrator {
    /// Generation failures are reported in the result, not as `Err`.
    pub async fn generate_cover_letter_variations(
        &self,
        request: &CoverLetterRequest,
    ) -> Result<CoverLetterResult, PipelineError> {
        require_texts(&request.resume_text, &request.job_description_text)?;

        let span = info_span!("cover_letter", session_id = %request.session_id);
        async move {
            let stage = run_stage(
                StageName::CoverLetter,
                self.bounded(async {
                    let prompt =
                        cover_letter_prompt(&request.resume_text, &request.job_description_text);
                    let draft = generate::<CoverLetterDraft>(self.generator.as_ref(), &prompt).await?;
                    accept_variations(draft)
                }),
            )
            .await;

            let result = match stage.output() {
                Some(outputs) => {
                    info!(variations = outputs.len(), "cover letters generated");
                    CoverLetterResult {
                        session_id: request.session_id.clone(),
                        status: StageStatus::Completed,
                        outputs: outputs.clone(),
                        error: None,
                    }
                }
                None => {
                    let error = stage.error().unwrap_or("cover letter generation failed");
                    warn!("cover letter generation failed: {error}");
                    CoverLetterResult {
                        session_id: request.session_id.clone(),
                        status: StageStatus::Failed,
                        outputs: Vec::new(),
                        error: Some(error.to_string()),
                    }
                }
            };
            Ok(result)
        }
        .instrument(span)
        .await
    }
}

/// Drops drafts with a blank style or body, keeps the first three and stamps them.
fn accept_variations(draft: CoverLetterDraft) -> Result<Vec<CoverLetterVariant>, LlmError> {
    let usable: Vec<CoverLetterDraftVariation> = draft
        .variations
        .into_iter()
        .filter(|v| !v.style.trim().is_empty() && !v.markdown.trim().is_empty())
        .take(VARIATION_COUNT)
        .collect();

    if usable.len() < VARIATION_COUNT {
        return Err(LlmError::Incomplete(format!(
            "expected {VARIATION_COUNT} cover letter variations, got {}",
            usable.len()
        )));
    }

    let created_at = now_millis();
    Ok(usable
        .into_iter()
        .map(|v| CoverLetterVariant {
            id: Uuid::new_v4(),
            style: v.style.trim().to_string(),
            markdown: v.markdown,
            created_at,
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::time::Duration;

    use serde_json::{json, Value};

    use crate::llm_client::mock::ScriptedGenerator;
    use crate::llm_client::StructuredGenerator;
    use crate::pipeline::orchestrator::OrchestratorConfig;
    use crate::pipeline::result::Topology;

    fn request() -> CoverLetterRequest {
        CoverLetterRequest {
            resume_text: "Experienced backend engineer with Python and SQL".to_string(),
            job_description_text: "Seeking Senior Backend Engineer with Python, SQL, and Kubernetes"
                .to_string(),
            session_id: "session-9".to_string(),
        }
    }

    fn letters(entries: &[(&str, &str)]) -> Value {
        let variations: Vec<Value> = entries
            .iter()
            .map(|(style, markdown)| json!({ "style": style, "markdown": markdown }))
            .collect();
        json!({ "variations": variations })
    }

    fn orchestrator(generator: &Arc<ScriptedGenerator>) -> Orchestrator {
        let generator: Arc<dyn StructuredGenerator> = generator.clone();
        Orchestrator::new(
            generator,
            OrchestratorConfig {
                topology: Topology::Parallel,
                stage_timeout: Duration::from_secs(5),
            },
        )
    }

    #[tokio::test]
    async fn test_three_variations_with_distinct_ids() {
        let generator = Arc::new(ScriptedGenerator::new().respond(
            "cover_letter",
            letters(&[
                ("Professional & Direct", "Dear team, ..."),
                ("Achievement Focused", "In my last role I ..."),
                ("Passionate & Cultural", "I have followed your work ..."),
            ]),
        ));

        let result = orchestrator(&generator)
            .generate_cover_letter_variations(&request())
            .await
            .unwrap();

        assert_eq!(result.status, StageStatus::Completed);
        assert_eq!(result.session_id, "session-9");
        assert!(result.error.is_none());
        assert_eq!(result.outputs.len(), 3);
        for variant in &result.outputs {
            assert!(!variant.markdown.is_empty());
            assert!(!variant.style.is_empty());
        }
        let ids: HashSet<Uuid> = result.outputs.iter().map(|v| v.id).collect();
        assert_eq!(ids.len(), 3);

        let calls = generator.calls();
        assert_eq!(calls.len(), 1);
        assert!((calls[0].temperature - 0.7).abs() < f32::EPSILON);
    }

    #[tokio::test]
    async fn test_extra_and_blank_variations_are_dropped() {
        let generator = Arc::new(ScriptedGenerator::new().respond(
            "cover_letter",
            letters(&[
                ("Professional & Direct", "one"),
                ("", "no style"),
                ("Achievement Focused", "two"),
                ("Passionate & Cultural", "three"),
                ("Bonus", "four"),
            ]),
        ));

        let result = orchestrator(&generator)
            .generate_cover_letter_variations(&request())
            .await
            .unwrap();

        let styles: Vec<&str> = result.outputs.iter().map(|v| v.style.as_str()).collect();
        assert_eq!(
            styles,
            vec!["Professional & Direct", "Achievement Focused", "Passionate & Cultural"]
        );
    }

    #[tokio::test]
    async fn test_too_few_variations_fails() {
        let generator = Arc::new(ScriptedGenerator::new().respond(
            "cover_letter",
            letters(&[("Professional & Direct", "one"), ("Achievement Focused", "  ")]),
        ));

        let result = orchestrator(&generator)
            .generate_cover_letter_variations(&request())
            .await
            .unwrap();

        assert_eq!(result.status, StageStatus::Failed);
        assert!(result.outputs.is_empty());
        assert_eq!(
            result.error.as_deref(),
            Some("Incomplete output: expected 3 cover letter variations, got 1")
        );
    }

    #[tokio::test]
    async fn test_generator_failure_is_reported_in_result() {
        let generator = Arc::new(ScriptedGenerator::new().fail("cover_letter", "overloaded"));
        let result = orchestrator(&generator)
            .generate_cover_letter_variations(&request())
            .await
            .unwrap();

        assert_eq!(result.status, StageStatus::Failed);
        assert_eq!(result.error.as_deref(), Some("overloaded"));
    }

    #[tokio::test]
    async fn test_empty_resume_is_rejected_before_generation() {
        let generator = Arc::new(ScriptedGenerator::new());
        let mut blank = request();
        blank.resume_text = "\n".to_string();

        let outcome = orchestrator(&generator)
            .generate_cover_letter_variations(&blank)
            .await;
        assert_eq!(outcome, Err(PipelineError::EmptyResume));
        assert!(generator.calls().is_empty());
    }

    #[test]
    fn test_result_serializes_camel_case() {
        let result = CoverLetterResult {
            session_id: "s".to_string(),
            status: StageStatus::Failed,
            outputs: Vec::new(),
            error: Some("boom".to_string()),
        };
        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(value["sessionId"], "s");
        assert_eq!(value["status"], "failed");
        assert_eq!(value["error"], "boom");
    }
}
