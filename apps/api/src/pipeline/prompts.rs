// All LLM prompt templates for the analysis pipeline.
// Reuses cross-cutting fragments from llm_client::prompts.
// Placeholders are replaced verbatim by pipeline::definitions.

/// JD analysis prompt (sequential topology only).
/// Replace: {jd_text}
pub const JD_ANALYSIS_PROMPT_TEMPLATE: &str = r#"Analyse the following job description on its own.

Extract:
- "keywords": every meaningful technical and domain keyword (languages, frameworks, tools, methodologies, certifications)
- "skills": the concrete skills a candidate must demonstrate, required ones first
- "title": the job title, if stated
- "summary": two sentences describing the role
- "seniority": one of "junior", "mid", "senior", "staff", "principal", "director" or "unknown"

Use the exact casing the job description uses for each keyword.

JOB DESCRIPTION:
{jd_text}"#;

/// Keyword analysis prompt.
/// Replace: {no_fabrication}, {context}, {resume_text}, {jd_text}
pub const KEYWORD_ANALYSIS_PROMPT_TEMPLATE: &str = r#"{no_fabrication}

Compare the resume against the job description at the keyword level.

- "matchingKeywords": keywords from the job description that the resume already demonstrates
- "missingKeywords": keywords from the job description that the resume does not mention or support
- "suggestions": 3 to 5 short, actionable recommendations for closing the gaps truthfully

A keyword belongs in exactly one of the two lists. Never suggest claiming experience the resume does not show;
suggest surfacing, rewording or clarifying real experience instead.
{context}
RESUME:
{resume_text}

JOB DESCRIPTION:
{jd_text}"#;

/// ATS scoring prompt.
/// Replace: {context}, {extraction}, {resume_text}, {jd_text}
pub const SCORING_PROMPT_TEMPLATE: &str = r#"Act as an applicant tracking system and score how well this resume matches the job description.

- "overall": a score from 0 to 100
- "alignmentNotes": a short paragraph explaining the score: strongest alignment first, then the biggest gaps
- "matchedKeywords": job description keywords the resume covers
- "missingKeywords": job description keywords the resume lacks
{extraction}
Score on evidence in the resume text only. Do not reward keyword stuffing.
{context}
RESUME:
{resume_text}

JOB DESCRIPTION:
{jd_text}"#;

/// Extra instruction that folds job title/company extraction into scoring.
pub const SCORING_EXTRACTION_INSTRUCTION: &str = r#"- "jobTitle": the job title exactly as the job description states it, if present
- "company": the hiring company's name, if present
"#;

/// Resume optimiser prompt.
/// Replace: {no_fabrication}, {ats_format}, {context}, {resume_text}, {jd_text}
pub const OPTIMISER_PROMPT_TEMPLATE: &str = r#"{no_fabrication}

{ats_format}

Rewrite the resume so it is as strong as it can truthfully be for this job description.

- Keep every role, employer, date and qualification that is in the original.
- Weave in job description keywords only where the candidate's real experience supports them.
- Lead bullets with strong verbs and keep existing metrics.
- Do not keyword-stuff.

Return:
- "markdown": the complete rewritten resume as markdown
- "rationale": a short explanation of what changed and why
{context}
RESUME:
{resume_text}

JOB DESCRIPTION:
{jd_text}"#;

/// Cover letter variations prompt.
/// Replace: {no_fabrication}, {styles}, {resume_text}, {jd_text}
pub const COVER_LETTER_PROMPT_TEMPLATE: &str = r#"{no_fabrication}

Write THREE distinct cover letters for this candidate and job, one per style:
{styles}

Each letter is 250 to 400 words of markdown, addressed to the hiring team, and draws only on the resume.
The three letters must differ in structure and emphasis, not just wording.

Return "variations": an array of exactly three objects, each with:
- "style": the style label exactly as listed above
- "markdown": the letter

RESUME:
{resume_text}

JOB DESCRIPTION:
{jd_text}"#;

/// Heading placed before serialized upstream stage output inside a prompt.
pub const UPSTREAM_CONTEXT_HEADING: &str = "ANALYSIS FROM EARLIER STAGES (use as context, verify against the resume):";
