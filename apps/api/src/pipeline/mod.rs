// Resume/JD analysis pipeline.
// Implements: stage runner, stage definitions, orchestration (full, keyword-only,
// score-only, retry), cover letter variations, progress streaming over SSE.
// All LLM calls go through llm_client::StructuredGenerator.

pub mod cover_letter;
pub mod definitions;
pub mod handlers;
pub mod orchestrator;
pub mod prompts;
pub mod result;
pub mod stage;
