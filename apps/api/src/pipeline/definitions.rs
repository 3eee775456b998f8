//! Stage Definitions: what each agent is asked and what shape it must return.
//!
//! Every output type implements `StageOutput`, which binds it to its schema
//! and temperature. Schemas are built once and shared read-only by every
//! pipeline run.

use std::collections::HashSet;
use std::sync::OnceLock;

use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::llm_client::prompts::{ATS_FORMAT_INSTRUCTION, NO_FABRICATION_INSTRUCTION};
use crate::llm_client::schema::{FieldKind, OutputSchema, SchemaError};
use crate::llm_client::{LlmError, StructuredGenerator};
use crate::pipeline::prompts::{
    COVER_LETTER_PROMPT_TEMPLATE, JD_ANALYSIS_PROMPT_TEMPLATE, KEYWORD_ANALYSIS_PROMPT_TEMPLATE,
    OPTIMISER_PROMPT_TEMPLATE, SCORING_EXTRACTION_INSTRUCTION, SCORING_PROMPT_TEMPLATE,
    UPSTREAM_CONTEXT_HEADING,
};

/// Analytical / extraction stages favour determinism.
pub const ANALYTICAL_TEMPERATURE: f32 = 0.2;
/// Rewriting gets a little more room.
pub const OPTIMISER_TEMPERATURE: f32 = 0.25;
/// Three stylistically different letters need variety.
pub const COVER_LETTER_TEMPERATURE: f32 = 0.7;

pub const COVER_LETTER_STYLES: [&str; 3] = [
    "Professional & Direct",
    "Achievement Focused",
    "Passionate & Cultural",
];

type SchemaCell = OnceLock<Result<OutputSchema, SchemaError>>;

/// A typed stage output and the schema the generator must satisfy for it.
pub trait StageOutput: DeserializeOwned + Serialize + Send + Sized {
    const TEMPERATURE: f32;

    fn schema() -> Result<&'static OutputSchema, SchemaError>;
}

fn cached(
    cell: &'static SchemaCell,
    build: fn() -> Result<OutputSchema, SchemaError>,
) -> Result<&'static OutputSchema, SchemaError> {
    cell.get_or_init(build).as_ref().map_err(Clone::clone)
}

/// Asks the generator for `T`, validating against `T`'s schema before deserializing.
pub async fn generate<T: StageOutput>(
    generator: &dyn StructuredGenerator,
    prompt: &str,
) -> Result<T, LlmError> {
    let schema = T::schema()?;
    let value = generator
        .generate_structured(prompt, schema, T::TEMPERATURE)
        .await?;
    schema.validate(&value)?;
    Ok(serde_json::from_value(value)?)
}

// ────────────────────────────────────────────────────────────────────────────
// Output types
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JdAnalysisOutput {
    pub keywords: Vec<String>,
    pub skills: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seniority: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeywordAnalysisOutput {
    pub matching_keywords: Vec<String>,
    pub missing_keywords: Vec<String>,
    pub suggestions: Vec<String>,
}

/// Scoring output as the model returns it. `overall` is not trusted to be an integer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawScoringOutput {
    pub overall: f64,
    pub alignment_notes: String,
    pub matched_keywords: Vec<String>,
    pub missing_keywords: Vec<String>,
    #[serde(default)]
    pub job_title: Option<String>,
    #[serde(default)]
    pub company: Option<String>,
}

/// Scoring output after normalization; `overall` is an integer in 0–100.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoringOutput {
    pub overall: u8,
    pub alignment_notes: String,
    pub matched_keywords: Vec<String>,
    pub missing_keywords: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub company: Option<String>,
}

impl From<RawScoringOutput> for ScoringOutput {
    fn from(raw: RawScoringOutput) -> Self {
        Self {
            overall: normalize_score(raw.overall),
            alignment_notes: raw.alignment_notes,
            matched_keywords: raw.matched_keywords,
            missing_keywords: raw.missing_keywords,
            job_title: non_blank(raw.job_title),
            company: non_blank(raw.company),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OptimiserOutput {
    pub markdown: String,
    pub rationale: String,
}

/// Legacy formatter slot; always a copy of the optimiser's markdown.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FormatterOutput {
    pub markdown: String,
}

impl From<&OptimiserOutput> for FormatterOutput {
    fn from(optimised: &OptimiserOutput) -> Self {
        Self {
            markdown: optimised.markdown.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoverLetterDraft {
    pub variations: Vec<CoverLetterDraftVariation>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoverLetterDraftVariation {
    pub style: String,
    pub markdown: String,
}

// ────────────────────────────────────────────────────────────────────────────
// Schemas
// ────────────────────────────────────────────────────────────────────────────

fn string_list() -> FieldKind {
    FieldKind::array_of(FieldKind::String)
}

impl StageOutput for JdAnalysisOutput {
    const TEMPERATURE: f32 = ANALYTICAL_TEMPERATURE;

    fn schema() -> Result<&'static OutputSchema, SchemaError> {
        static SCHEMA: SchemaCell = OnceLock::new();
        cached(&SCHEMA, || {
            OutputSchema::builder("jd_analysis")
                .required("keywords", string_list())
                .required("skills", string_list())
                .optional("title", FieldKind::String)
                .optional("summary", FieldKind::String)
                .optional("seniority", FieldKind::String)
                .build()
        })
    }
}

impl StageOutput for KeywordAnalysisOutput {
    const TEMPERATURE: f32 = ANALYTICAL_TEMPERATURE;

    fn schema() -> Result<&'static OutputSchema, SchemaError> {
        static SCHEMA: SchemaCell = OnceLock::new();
        cached(&SCHEMA, || {
            OutputSchema::builder("keyword_analysis")
                .required("matchingKeywords", string_list())
                .required("missingKeywords", string_list())
                .required("suggestions", string_list())
                .build()
        })
    }
}

impl StageOutput for RawScoringOutput {
    const TEMPERATURE: f32 = ANALYTICAL_TEMPERATURE;

    fn schema() -> Result<&'static OutputSchema, SchemaError> {
        static SCHEMA: SchemaCell = OnceLock::new();
        cached(&SCHEMA, || {
            OutputSchema::builder("ats_scoring")
                .required("overall", FieldKind::Number)
                .required("alignmentNotes", FieldKind::String)
                .required("matchedKeywords", string_list())
                .required("missingKeywords", string_list())
                .optional("jobTitle", FieldKind::String)
                .optional("company", FieldKind::String)
                .build()
        })
    }
}

impl StageOutput for OptimiserOutput {
    const TEMPERATURE: f32 = OPTIMISER_TEMPERATURE;

    fn schema() -> Result<&'static OutputSchema, SchemaError> {
        static SCHEMA: SchemaCell = OnceLock::new();
        cached(&SCHEMA, || {
            OutputSchema::builder("resume_optimiser")
                .required("markdown", FieldKind::String)
                .required("rationale", FieldKind::String)
                .build()
        })
    }
}

impl StageOutput for CoverLetterDraft {
    const TEMPERATURE: f32 = COVER_LETTER_TEMPERATURE;

    fn schema() -> Result<&'static OutputSchema, SchemaError> {
        static SCHEMA: SchemaCell = OnceLock::new();
        cached(&SCHEMA, || {
            let variation = OutputSchema::builder("cover_letter_variation")
                .required("style", FieldKind::String)
                .required("markdown", FieldKind::String)
                .build()?;
            OutputSchema::builder("cover_letter")
                .required(
                    "variations",
                    FieldKind::array_of(FieldKind::Object(variation)),
                )
                .build()
        })
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Prompt construction
// ────────────────────────────────────────────────────────────────────────────

/// Upstream stage outputs a prompt may consume. Empty in the parallel topology.
#[derive(Debug, Default, Clone, Copy)]
pub struct UpstreamContext<'a> {
    pub jd_analysis: Option<&'a JdAnalysisOutput>,
    pub keyword_analysis: Option<&'a KeywordAnalysisOutput>,
}

impl UpstreamContext<'_> {
    fn render(&self) -> Result<String, LlmError> {
        if self.jd_analysis.is_none() && self.keyword_analysis.is_none() {
            return Ok(String::new());
        }

        let mut block = serde_json::Map::new();
        if let Some(jd) = self.jd_analysis {
            block.insert("jdAnalysis".to_string(), serde_json::to_value(jd)?);
        }
        if let Some(keywords) = self.keyword_analysis {
            block.insert("keywordAnalysis".to_string(), serde_json::to_value(keywords)?);
        }

        Ok(format!(
            "\n{UPSTREAM_CONTEXT_HEADING}\n{}\n",
            serde_json::to_string_pretty(&block)?
        ))
    }
}

pub fn jd_analysis_prompt(jd_text: &str) -> String {
    fill_template(JD_ANALYSIS_PROMPT_TEMPLATE, &[("jd_text", jd_text)])
}

pub fn keyword_analysis_prompt(
    resume_text: &str,
    jd_text: &str,
    context: UpstreamContext<'_>,
) -> Result<String, LlmError> {
    Ok(fill_template(
        KEYWORD_ANALYSIS_PROMPT_TEMPLATE,
        &[
            ("no_fabrication", NO_FABRICATION_INSTRUCTION),
            ("context", &context.render()?),
            ("resume_text", resume_text),
            ("jd_text", jd_text),
        ],
    ))
}

/// `extract_job_details` folds job title/company extraction into scoring, used
/// when no separate JD analysis stage runs.
pub fn scoring_prompt(
    resume_text: &str,
    jd_text: &str,
    context: UpstreamContext<'_>,
    extract_job_details: bool,
) -> Result<String, LlmError> {
    let extraction = if extract_job_details {
        SCORING_EXTRACTION_INSTRUCTION
    } else {
        ""
    };
    Ok(fill_template(
        SCORING_PROMPT_TEMPLATE,
        &[
            ("extraction", extraction),
            ("context", &context.render()?),
            ("resume_text", resume_text),
            ("jd_text", jd_text),
        ],
    ))
}

pub fn optimiser_prompt(
    resume_text: &str,
    jd_text: &str,
    context: UpstreamContext<'_>,
) -> Result<String, LlmError> {
    Ok(fill_template(
        OPTIMISER_PROMPT_TEMPLATE,
        &[
            ("no_fabrication", NO_FABRICATION_INSTRUCTION),
            ("ats_format", ATS_FORMAT_INSTRUCTION),
            ("context", &context.render()?),
            ("resume_text", resume_text),
            ("jd_text", jd_text),
        ],
    ))
}

pub fn cover_letter_prompt(resume_text: &str, jd_text: &str) -> String {
    let styles = COVER_LETTER_STYLES
        .iter()
        .enumerate()
        .map(|(i, style)| format!("{}. {style}", i + 1))
        .collect::<Vec<_>>()
        .join("\n");
    fill_template(
        COVER_LETTER_PROMPT_TEMPLATE,
        &[
            ("no_fabrication", NO_FABRICATION_INSTRUCTION),
            ("styles", &styles),
            ("resume_text", resume_text),
            ("jd_text", jd_text),
        ],
    )
}

/// Substitutes `{key}` placeholders in one pass over the template. Inserted
/// values are never rescanned, so user text containing `{jd_text}` stays literal.
/// Unknown placeholders are left as they are.
fn fill_template(template: &str, values: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let hit = values.iter().find(|(key, _)| {
            after
                .strip_prefix(key)
                .is_some_and(|tail| tail.starts_with('}'))
        });
        match hit {
            Some((key, value)) => {
                out.push_str(value);
                rest = &after[key.len() + 1..];
            }
            None => {
                out.push('{');
                rest = after;
            }
        }
    }

    out.push_str(rest);
    out
}

// ────────────────────────────────────────────────────────────────────────────
// Post-processing
// ────────────────────────────────────────────────────────────────────────────

/// Rounds a model-supplied score to the nearest integer (half away from zero)
/// and clamps it to 0–100. Non-finite input scores 0.
pub fn normalize_score(raw: f64) -> u8 {
    if !raw.is_finite() {
        return 0;
    }
    raw.round().clamp(0.0, 100.0) as u8
}

/// De-duplicates keywords case-insensitively and guarantees no keyword sits in
/// both lists. A keyword the model put in both is matching if the resume
/// mentions it, missing otherwise.
pub fn reconcile_keywords(output: KeywordAnalysisOutput, resume_text: &str) -> KeywordAnalysisOutput {
    let resume_lower = resume_text.to_lowercase();
    let missing_lower: HashSet<String> = output
        .missing_keywords
        .iter()
        .map(|k| k.trim().to_lowercase())
        .collect();

    let mut seen = HashSet::new();
    let mut matching = Vec::new();
    let mut missing = Vec::new();

    for keyword in output.matching_keywords {
        let key = keyword.trim().to_lowercase();
        if key.is_empty() || !seen.insert(key.clone()) {
            continue;
        }
        if missing_lower.contains(&key) && !mentions(&resume_lower, &key) {
            missing.push(keyword.trim().to_string());
        } else {
            matching.push(keyword.trim().to_string());
        }
    }

    for keyword in output.missing_keywords {
        let key = keyword.trim().to_lowercase();
        if key.is_empty() || !seen.insert(key) {
            continue;
        }
        missing.push(keyword.trim().to_string());
    }

    KeywordAnalysisOutput {
        matching_keywords: matching,
        missing_keywords: missing,
        suggestions: output
            .suggestions
            .into_iter()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect(),
    }
}

/// Whole-token match: "go" is not mentioned by "good", nor "sql" by "nosql".
/// Both arguments are expected lowercased.
fn mentions(text: &str, keyword: &str) -> bool {
    text.match_indices(keyword).any(|(at, _)| {
        let before = text[..at].chars().next_back();
        let after = text[at + keyword.len()..].chars().next();
        !before.is_some_and(char::is_alphanumeric) && !after.is_some_and(char::is_alphanumeric)
    })
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_all_schemas_build() {
        assert!(JdAnalysisOutput::schema().is_ok());
        assert!(KeywordAnalysisOutput::schema().is_ok());
        assert!(RawScoringOutput::schema().is_ok());
        assert!(OptimiserOutput::schema().is_ok());
        assert!(CoverLetterDraft::schema().is_ok());
    }

    #[test]
    fn test_schema_required_fields_match_types() {
        let scoring = RawScoringOutput::schema().unwrap();
        assert_eq!(
            scoring.required_fields().collect::<Vec<_>>(),
            vec!["overall", "alignmentNotes", "matchedKeywords", "missingKeywords"]
        );

        // The minimal value the schema accepts must deserialize into the type.
        let minimal = json!({
            "overall": 50,
            "alignmentNotes": "ok",
            "matchedKeywords": [],
            "missingKeywords": []
        });
        scoring.validate(&minimal).unwrap();
        let raw: RawScoringOutput = serde_json::from_value(minimal).unwrap();
        assert!(raw.job_title.is_none());

        let jd = json!({ "keywords": ["Rust"], "skills": [] });
        JdAnalysisOutput::schema().unwrap().validate(&jd).unwrap();
        let parsed: JdAnalysisOutput = serde_json::from_value(jd).unwrap();
        assert_eq!(parsed.keywords, vec!["Rust"]);
    }

    #[test]
    fn test_schema_names_are_distinct() {
        let names: HashSet<&str> = [
            JdAnalysisOutput::schema().unwrap().name(),
            KeywordAnalysisOutput::schema().unwrap().name(),
            RawScoringOutput::schema().unwrap().name(),
            OptimiserOutput::schema().unwrap().name(),
            CoverLetterDraft::schema().unwrap().name(),
        ]
        .into_iter()
        .collect();
        assert_eq!(names.len(), 5);
    }

    #[test]
    fn test_normalize_score_rounds_to_nearest() {
        assert_eq!(normalize_score(81.6), 82);
        assert_eq!(normalize_score(67.4), 67);
        assert_eq!(normalize_score(50.5), 51);
        assert_eq!(normalize_score(100.0), 100);
    }

    #[test]
    fn test_normalize_score_clamps_and_handles_non_finite() {
        assert_eq!(normalize_score(-3.2), 0);
        assert_eq!(normalize_score(140.0), 100);
        assert_eq!(normalize_score(f64::NAN), 0);
        assert_eq!(normalize_score(f64::INFINITY), 0);
    }

    #[test]
    fn test_scoring_output_from_raw_drops_blank_extraction() {
        let raw = RawScoringOutput {
            overall: 71.5,
            alignment_notes: "Solid".to_string(),
            matched_keywords: vec!["Python".to_string()],
            missing_keywords: vec![],
            job_title: Some("  ".to_string()),
            company: Some(" Acme ".to_string()),
        };
        let scored = ScoringOutput::from(raw);
        assert_eq!(scored.overall, 72);
        assert!(scored.job_title.is_none());
        assert_eq!(scored.company.as_deref(), Some("Acme"));
    }

    #[test]
    fn test_reconcile_moves_unsupported_duplicate_to_missing() {
        let output = KeywordAnalysisOutput {
            matching_keywords: vec!["Python".to_string(), "Kubernetes".to_string()],
            missing_keywords: vec!["kubernetes".to_string()],
            suggestions: vec!["Mention container work".to_string(), " ".to_string()],
        };
        let reconciled =
            reconcile_keywords(output, "Experienced backend engineer with Python and SQL");

        assert_eq!(reconciled.matching_keywords, vec!["Python"]);
        assert_eq!(reconciled.missing_keywords, vec!["Kubernetes"]);
        assert_eq!(reconciled.suggestions, vec!["Mention container work"]);
    }

    #[test]
    fn test_reconcile_keeps_supported_duplicate_in_matching() {
        let output = KeywordAnalysisOutput {
            matching_keywords: vec!["SQL".to_string()],
            missing_keywords: vec!["SQL".to_string(), "Go".to_string(), "go".to_string()],
            suggestions: vec![],
        };
        let reconciled = reconcile_keywords(output, "Python and SQL");
        assert_eq!(reconciled.matching_keywords, vec!["SQL"]);
        assert_eq!(reconciled.missing_keywords, vec!["Go"]);
    }

    #[test]
    fn test_reconcile_ignores_keywords_embedded_in_longer_words() {
        let output = KeywordAnalysisOutput {
            matching_keywords: vec!["Go".to_string(), "Java".to_string(), "SQL".to_string()],
            missing_keywords: vec!["Go".to_string(), "Java".to_string(), "SQL".to_string()],
            suggestions: vec![],
        };
        let reconciled =
            reconcile_keywords(output, "Good communicator, JavaScript developer, NoSQL stores");

        assert!(reconciled.matching_keywords.is_empty());
        assert_eq!(reconciled.missing_keywords, vec!["Go", "Java", "SQL"]);
    }

    #[test]
    fn test_reconcile_matches_keywords_next_to_punctuation() {
        let output = KeywordAnalysisOutput {
            matching_keywords: vec!["Go".to_string(), "C++".to_string()],
            missing_keywords: vec!["go".to_string(), "c++".to_string()],
            suggestions: vec![],
        };
        let reconciled = reconcile_keywords(output, "Services in Go, tooling in C++.");
        assert_eq!(reconciled.matching_keywords, vec!["Go", "C++"]);
        assert!(reconciled.missing_keywords.is_empty());
    }

    #[test]
    fn test_placeholders_in_user_text_are_not_expanded() {
        let jd = "Seeking a platform engineer";
        let prompt = keyword_analysis_prompt(
            "My notes mention {jd_text} and {context}",
            jd,
            UpstreamContext::default(),
        )
        .unwrap();

        assert_eq!(prompt.matches(jd).count(), 1);
        assert!(prompt.contains("My notes mention {jd_text} and {context}"));
    }

    #[test]
    fn test_fill_template_leaves_unknown_placeholders() {
        assert_eq!(
            fill_template("{a} {b} {", &[("a", "{b}")]),
            "{b} {b} {"
        );
    }

    #[test]
    fn test_keyword_prompt_includes_upstream_context_only_when_present() {
        let bare = keyword_analysis_prompt("resume", "jd", UpstreamContext::default()).unwrap();
        assert!(!bare.contains(UPSTREAM_CONTEXT_HEADING));
        assert!(bare.contains(NO_FABRICATION_INSTRUCTION));

        let jd = JdAnalysisOutput {
            keywords: vec!["Terraform".to_string()],
            skills: vec!["Infrastructure as code".to_string()],
            title: None,
            summary: None,
            seniority: Some("senior".to_string()),
        };
        let with_context = keyword_analysis_prompt(
            "resume",
            "jd",
            UpstreamContext {
                jd_analysis: Some(&jd),
                keyword_analysis: None,
            },
        )
        .unwrap();
        assert!(with_context.contains(UPSTREAM_CONTEXT_HEADING));
        assert!(with_context.contains("Terraform"));
        assert!(with_context.contains("Infrastructure as code"));
    }

    #[test]
    fn test_scoring_prompt_extraction_toggle() {
        let folded = scoring_prompt("r", "j", UpstreamContext::default(), true).unwrap();
        assert!(folded.contains("\"jobTitle\""));
        let plain = scoring_prompt("r", "j", UpstreamContext::default(), false).unwrap();
        assert!(!plain.contains("\"jobTitle\""));
    }

    #[test]
    fn test_optimiser_prompt_carries_format_and_fabrication_rules() {
        let prompt = optimiser_prompt("my resume", "the jd", UpstreamContext::default()).unwrap();
        assert!(prompt.contains(ATS_FORMAT_INSTRUCTION));
        assert!(prompt.contains(NO_FABRICATION_INSTRUCTION));
        assert!(prompt.contains("my resume"));
        assert!(prompt.contains("the jd"));
    }

    #[test]
    fn test_cover_letter_prompt_lists_every_style() {
        let prompt = cover_letter_prompt("r", "j");
        for style in COVER_LETTER_STYLES {
            assert!(prompt.contains(style), "missing style {style}");
        }
    }

    #[test]
    fn test_formatter_output_copies_optimiser_markdown() {
        let optimised = OptimiserOutput {
            markdown: "# Jane Doe".to_string(),
            rationale: "tightened".to_string(),
        };
        assert_eq!(FormatterOutput::from(&optimised).markdown, "# Jane Doe");
    }
}
