use std::sync::Arc;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

use super::errors::CoreError;
use super::gemini_client::{GenerationRequest, GenerativeModel};
use super::models::{CandidateProfile, CandidateRef, JobRequirements, MatchResult};
use super::prompts;
use super::structured::{recover_record, FieldShape, FieldSpec, NOT_FOUND};

static NUMBER_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[-+]?\d+(?:\.\d+)?").unwrap());

pub const NO_JUSTIFICATION: &str = "No justification provided";

const REQUIRED_WEIGHT: f64 = 0.8;
const DESIRED_WEIGHT: f64 = 0.2;

pub const MATCH_SCORE: FieldSpec = FieldSpec {
    key: "score",
    labels: &["percentage", "suitability", "match"],
    shape: FieldShape::Text,
};
pub const MATCH_JUSTIFICATION: FieldSpec = FieldSpec {
    key: "justification",
    labels: &["reason", "rationale"],
    shape: FieldShape::Paragraph,
};

pub const MATCH_FIELDS: &[FieldSpec] = &[MATCH_SCORE, MATCH_JUSTIFICATION];

/// Scores one candidate against the job requirements.
///
/// The session holds an `Arc<dyn SuitabilityScorer>` chosen from
/// [`ScorerBackend`](super::models::ScorerBackend) at startup.
#[async_trait]
pub trait SuitabilityScorer: Send + Sync {
    async fn score(
        &self,
        job: &JobRequirements,
        candidate: &CandidateProfile,
    ) -> Result<MatchResult, CoreError>;
}

/// Asks the text model for a score and justification.
pub struct LlmScorer {
    model: Arc<dyn GenerativeModel>,
}

impl LlmScorer {
    pub fn new(model: Arc<dyn GenerativeModel>) -> Self {
        Self { model }
    }
}

#[async_trait]
impl SuitabilityScorer for LlmScorer {
    async fn score(
        &self,
        job: &JobRequirements,
        candidate: &CandidateProfile,
    ) -> Result<MatchResult, CoreError> {
        let job_json = serde_json::to_string_pretty(job)
            .map_err(|err| CoreError::InvalidRequest(format!("job requirements: {err}")))?;
        let candidate_json = serde_json::to_string_pretty(candidate)
            .map_err(|err| CoreError::InvalidRequest(format!("candidate profile: {err}")))?;

        let reply = self
            .model
            .generate(GenerationRequest::text(
                prompts::match_prompt(&job_json, &candidate_json),
                true,
            ))
            .await?;
        let (score, justification) = parse_match_reply(&reply)?;
        debug!(file_name = %candidate.source_file, score, "candidate scored");

        Ok(MatchResult {
            candidate: CandidateRef::from(candidate),
            score,
            justification,
        })
    }
}

/// Recovers `(score, justification)` from a comparator reply.
///
/// Fails only when neither field can be located; a present but unreadable
/// score becomes 0 with a note in the justification.
pub fn parse_match_reply(raw: &str) -> Result<(u8, String), CoreError> {
    let record = recover_record(raw, MATCH_FIELDS)?;
    let score_text = record.text(&MATCH_SCORE);

    let mut justification = record.text(&MATCH_JUSTIFICATION);
    if justification.is_empty() || justification.eq_ignore_ascii_case(NOT_FOUND) {
        justification = NO_JUSTIFICATION.to_string();
    }

    match parse_score(&score_text) {
        Some(score) => Ok((score, justification)),
        None => Ok((
            0,
            format!("Score could not be read (\"{score_text}\"). {justification}"),
        )),
    }
}

/// First signed number in `text`, rounded and clamped into 0..=100.
pub fn parse_score(text: &str) -> Option<u8> {
    let value: f64 = NUMBER_RE.find(text)?.as_str().parse().ok()?;
    Some(value.round().clamp(0.0, 100.0) as u8)
}

/// Offline scorer: share of job skills found in the candidate's skills,
/// experience and projects.
pub struct KeywordScorer;

#[async_trait]
impl SuitabilityScorer for KeywordScorer {
    async fn score(
        &self,
        job: &JobRequirements,
        candidate: &CandidateProfile,
    ) -> Result<MatchResult, CoreError> {
        let (score, justification) = keyword_fit(job, candidate);
        Ok(MatchResult {
            candidate: CandidateRef::from(candidate),
            score,
            justification,
        })
    }
}

fn keyword_fit(job: &JobRequirements, candidate: &CandidateProfile) -> (u8, String) {
    let haystack: Vec<String> = candidate
        .skills
        .iter()
        .chain(&candidate.experience)
        .chain(&candidate.projects)
        .map(|entry| entry.to_lowercase())
        .collect();

    let required = Coverage::of(&job.required_skills, &haystack);
    let desired = Coverage::of(&job.desired_skills, &haystack);

    let fraction = match (required.total(), desired.total()) {
        (0, 0) => {
            return (
                0,
                "The job advertisement lists no skills to compare against.".to_string(),
            )
        }
        (_, 0) => required.ratio(),
        (0, _) => desired.ratio(),
        _ => REQUIRED_WEIGHT * required.ratio() + DESIRED_WEIGHT * desired.ratio(),
    };
    let score = (fraction * 100.0).round().clamp(0.0, 100.0) as u8;

    let mut justification = if required.total() > 0 {
        format!(
            "Matches {} of {} required skills",
            required.matched.len(),
            required.total()
        )
    } else {
        format!(
            "Matches {} of {} desired skills",
            desired.matched.len(),
            desired.total()
        )
    };
    let headline = if required.total() > 0 { &required } else { &desired };
    if !headline.matched.is_empty() {
        justification.push_str(&format!(" ({})", headline.matched.join(", ")));
    }
    justification.push('.');
    if !required.missing.is_empty() {
        justification.push_str(&format!(" Missing: {}.", required.missing.join(", ")));
    }

    (score, justification)
}

struct Coverage<'a> {
    matched: Vec<&'a str>,
    missing: Vec<&'a str>,
}

impl<'a> Coverage<'a> {
    fn of(skills: &'a [String], haystack: &[String]) -> Self {
        let mut matched = Vec::new();
        let mut missing = Vec::new();
        for skill in skills.iter().map(|s| s.trim()).filter(|s| !s.is_empty()) {
            let needle = skill.to_lowercase();
            if haystack.iter().any(|entry| contains_term(entry, &needle)) {
                matched.push(skill);
            } else {
                missing.push(skill);
            }
        }
        Self { matched, missing }
    }

    fn total(&self) -> usize {
        self.matched.len() + self.missing.len()
    }

    fn ratio(&self) -> f64 {
        if self.total() == 0 {
            return 0.0;
        }
        self.matched.len() as f64 / self.total() as f64
    }
}

/// Substring match that refuses to start or end inside a word, so `Go`
/// does not match `Google`.
fn contains_term(haystack: &str, term: &str) -> bool {
    haystack.match_indices(term).any(|(start, found)| {
        let end = start + found.len();
        let before = haystack[..start].chars().next_back();
        let after = haystack[end..].chars().next();
        !before.is_some_and(char::is_alphanumeric) && !after.is_some_and(char::is_alphanumeric)
    })
}
