// Shared prompt constants and prompt-building utilities.
// Each pipeline stage defines its own template in pipeline/prompts.rs.
// This file contains cross-cutting prompt fragments.

/// System prompt fragment that enforces JSON-only output.
pub const JSON_ONLY_SYSTEM: &str = "You are a precise, structured assistant. \
    You MUST respond with valid JSON only. \
    Do NOT include any text outside the JSON object. \
    Do NOT use markdown code fences. \
    Do NOT include explanations or apologies.";

/// Common instruction appended to every prompt that reads the candidate's resume.
pub const NO_FABRICATION_INSTRUCTION: &str = "\
    CRITICAL: Work only from what the resume actually states. \
    Do NOT invent employers, titles, dates, metrics, certifications or skills. \
    If the resume does not support a claim, leave it out.";

/// Instruction that keeps rewritten resumes parseable by applicant tracking systems.
pub const ATS_FORMAT_INSTRUCTION: &str = "\
    CRITICAL: Output clean, ATS-parseable markdown: \
    standard section headings, plain bullet lists, no tables, no columns, \
    no images, no text boxes, no emoji.";
