// Prompt text for every call made to the AI service.
// JSON keys requested here must match the FieldSpec keys in extraction.rs and comparator.rs.

pub const VISION_EXTRACT_INSTRUCTION: &str = "Extract all readable text from this image.";

pub const JOB_AD_PROMPT_TEMPLATE: &str = r#"Analyze the following job advertisement and extract the key requirements.

Respond ONLY with a JSON object using exactly these keys:
{
  "title": "job title",
  "company": "company name, or \"Not found\" if not clearly stated",
  "required_skills": ["technical and soft skills that are required"],
  "desired_skills": ["additional advantageous skills"],
  "experience_level": "e.g. years, entry-level, senior",
  "education": "degree and field",
  "responsibilities": ["brief list of key responsibilities"]
}

Focus on specific, actionable requirements. Do not add commentary.

Job Advertisement:
{document_text}"#;

pub const CV_PROMPT_TEMPLATE: &str = r#"Analyze the following CV and extract the candidate's details.

Respond ONLY with a JSON object using exactly these keys:
{
  "name": "candidate name",
  "skills": ["technical and soft skills"],
  "experience": ["role, company, duration and key achievements, one entry per position"],
  "education": ["degree, institution, years"],
  "projects": ["notable projects or certifications"]
}

Focus on specific, quantifiable details. Do not add commentary.

CV Content:
{document_text}"#;

pub const MATCH_PROMPT_TEMPLATE: &str = r#"You are an expert HR recommender. Compare the following job requirements with the candidate's CV information.

Job Requirements:
{job_json}

Candidate CV Information:
{candidate_json}

Provide a suitability score from 0 to 100 based on how well the candidate's CV matches the job requirements,
and a brief (1-3 sentences) justification highlighting primary strengths and main gaps.

Respond ONLY with a JSON object:
{"score": <integer 0-100>, "justification": "<justification text>"}"#;

pub fn job_ad_prompt(document_text: &str) -> String {
    fill_template(JOB_AD_PROMPT_TEMPLATE, &[("{document_text}", document_text)])
}

pub fn cv_prompt(document_text: &str) -> String {
    fill_template(CV_PROMPT_TEMPLATE, &[("{document_text}", document_text)])
}

pub fn match_prompt(job_json: &str, candidate_json: &str) -> String {
    fill_template(
        MATCH_PROMPT_TEMPLATE,
        &[("{job_json}", job_json), ("{candidate_json}", candidate_json)],
    )
}

/// Substitutes placeholders in one left-to-right pass over the template.
/// Inserted values are never scanned again, so document text that happens
/// to contain a placeholder is kept verbatim.
fn fill_template(template: &str, values: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(
        template.len() + values.iter().map(|(_, value)| value.len()).sum::<usize>(),
    );
    let mut rest = template;

    while let Some((at, placeholder, value)) = values
        .iter()
        .filter_map(|(placeholder, value)| rest.find(placeholder).map(|at| (at, *placeholder, *value)))
        .min_by_key(|(at, _, _)| *at)
    {
        out.push_str(&rest[..at]);
        out.push_str(value);
        rest = &rest[at + placeholder.len()..];
    }
    out.push_str(rest);
    out
}
