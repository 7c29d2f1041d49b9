use std::sync::Arc;

use tracing::{debug, info};

use super::document_loader::{DocumentLoader, LoadedDocument};
use super::errors::{CoreError, DocumentProcessingError};
use super::gemini_client::{GenerationRequest, GenerativeModel};
use super::models::{CandidateProfile, DocumentKind, JobRequirements, RuntimeSettings, UploadedFile};
use super::prompts;
use super::structured::{recover_record, FieldShape, FieldSpec, StructuredRecord};

pub const JOB_TITLE: FieldSpec = FieldSpec {
    key: "title",
    labels: &["job title", "position", "role"],
    shape: FieldShape::Text,
};
pub const JOB_COMPANY: FieldSpec = FieldSpec {
    key: "company",
    labels: &["company name", "employer"],
    shape: FieldShape::Text,
};
pub const JOB_REQUIRED_SKILLS: FieldSpec = FieldSpec {
    key: "required_skills",
    labels: &["requirements", "must have"],
    shape: FieldShape::List,
};
pub const JOB_DESIRED_SKILLS: FieldSpec = FieldSpec {
    key: "desired_skills",
    labels: &["preferred skills", "nice to have"],
    shape: FieldShape::List,
};
pub const JOB_EXPERIENCE_LEVEL: FieldSpec = FieldSpec {
    key: "experience_level",
    labels: &["experience", "seniority"],
    shape: FieldShape::Text,
};
pub const JOB_EDUCATION: FieldSpec = FieldSpec {
    key: "education",
    labels: &["educational qualifications", "qualifications"],
    shape: FieldShape::Text,
};
pub const JOB_RESPONSIBILITIES: FieldSpec = FieldSpec {
    key: "responsibilities",
    labels: &["key responsibilities", "duties"],
    shape: FieldShape::List,
};

pub const JOB_FIELDS: &[FieldSpec] = &[
    JOB_TITLE,
    JOB_COMPANY,
    JOB_REQUIRED_SKILLS,
    JOB_DESIRED_SKILLS,
    JOB_EXPERIENCE_LEVEL,
    JOB_EDUCATION,
    JOB_RESPONSIBILITIES,
];

pub const CV_NAME: FieldSpec = FieldSpec {
    key: "name",
    labels: &["candidate name", "full name"],
    shape: FieldShape::Text,
};
pub const CV_SKILLS: FieldSpec = FieldSpec {
    key: "skills",
    labels: &["key skills", "technical skills"],
    shape: FieldShape::List,
};
pub const CV_EXPERIENCE: FieldSpec = FieldSpec {
    key: "experience",
    labels: &["professional experience", "work experience"],
    shape: FieldShape::List,
};
pub const CV_EDUCATION: FieldSpec = FieldSpec {
    key: "education",
    labels: &["educational background"],
    shape: FieldShape::List,
};
pub const CV_PROJECTS: FieldSpec = FieldSpec {
    key: "projects",
    labels: &["projects/certifications", "certifications"],
    shape: FieldShape::List,
};

pub const CV_FIELDS: &[FieldSpec] = &[CV_NAME, CV_SKILLS, CV_EXPERIENCE, CV_EDUCATION, CV_PROJECTS];

/// Turns one uploaded file into a structured record: document text (text
/// layer or vision model), then a JSON-structuring call, then recovery.
pub struct DocumentExtractor {
    model: Arc<dyn GenerativeModel>,
    loader: DocumentLoader,
    max_document_chars: usize,
}

impl DocumentExtractor {
    pub fn new(model: Arc<dyn GenerativeModel>, settings: &RuntimeSettings) -> Self {
        Self {
            model,
            loader: DocumentLoader::new(settings.pdf_text_min_chars),
            max_document_chars: settings.max_document_chars.max(1),
        }
    }

    pub async fn extract_job_requirements(
        &self,
        file: &UploadedFile,
    ) -> Result<JobRequirements, DocumentProcessingError> {
        let record = self.extract_record(file, DocumentKind::JobAd).await?;
        Ok(job_requirements_from_record(&record, &file.file_name))
    }

    pub async fn extract_candidate_profile(
        &self,
        file: &UploadedFile,
        upload_index: usize,
    ) -> Result<CandidateProfile, DocumentProcessingError> {
        let record = self.extract_record(file, DocumentKind::Cv).await?;
        Ok(candidate_profile_from_record(
            &record,
            &file.file_name,
            upload_index,
        ))
    }

    pub async fn extract_record(
        &self,
        file: &UploadedFile,
        kind: DocumentKind,
    ) -> Result<StructuredRecord, DocumentProcessingError> {
        info!(file_name = %file.file_name, ?kind, "extracting document");

        let text = self
            .document_text(file)
            .await
            .map_err(|err| DocumentProcessingError::new(&file.file_name, err))?;

        self.structure(&text, kind)
            .await
            .map_err(|err| DocumentProcessingError::new(&file.file_name, err))
    }

    async fn document_text(&self, file: &UploadedFile) -> Result<String, CoreError> {
        let data = file.read().await?;
        let parts = match self.loader.load(&file.file_name, data).await? {
            LoadedDocument::Text(text) => return Ok(text),
            LoadedDocument::Binary(parts) => parts,
        };

        let mut pages = Vec::with_capacity(parts.len());
        for (index, part) in parts.into_iter().enumerate() {
            let request = GenerationRequest::vision(
                prompts::VISION_EXTRACT_INSTRUCTION,
                part.mime_type,
                part.data,
            );
            let text = self.model.generate(request).await?;
            if text.trim().is_empty() {
                debug!(file_name = %file.file_name, part = index + 1, "vision model returned no text");
                continue;
            }
            pages.push(text.trim().to_string());
        }

        if pages.is_empty() {
            return Err(CoreError::EmptyDocument);
        }

        Ok(pages.join("\n\n"))
    }

    async fn structure(&self, text: &str, kind: DocumentKind) -> Result<StructuredRecord, CoreError> {
        let text = truncate_chars(text, self.max_document_chars);
        let (prompt, fields) = match kind {
            DocumentKind::JobAd => (prompts::job_ad_prompt(text), JOB_FIELDS),
            DocumentKind::Cv => (prompts::cv_prompt(text), CV_FIELDS),
        };

        let reply = self
            .model
            .generate(GenerationRequest::text(prompt, true))
            .await?;
        let record = recover_record(&reply, fields)?;
        debug!(?kind, method = ?record.method, "structured record recovered");
        Ok(record)
    }
}

pub fn job_requirements_from_record(record: &StructuredRecord, source_file: &str) -> JobRequirements {
    JobRequirements {
        source_file: source_file.to_string(),
        title: record.text(&JOB_TITLE),
        company: record.text(&JOB_COMPANY),
        required_skills: record.list(&JOB_REQUIRED_SKILLS),
        desired_skills: record.list(&JOB_DESIRED_SKILLS),
        experience_level: record.text(&JOB_EXPERIENCE_LEVEL),
        education: record.text(&JOB_EDUCATION),
        responsibilities: record.list(&JOB_RESPONSIBILITIES),
    }
}

pub fn candidate_profile_from_record(
    record: &StructuredRecord,
    source_file: &str,
    upload_index: usize,
) -> CandidateProfile {
    CandidateProfile {
        source_file: source_file.to_string(),
        upload_index,
        name: record.text(&CV_NAME),
        skills: record.list(&CV_SKILLS),
        experience: record.list(&CV_EXPERIENCE),
        education: record.list(&CV_EDUCATION),
        projects: record.list(&CV_PROJECTS),
    }
}

fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((byte_index, _)) => &text[..byte_index],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::errors::FailureKind;
    use crate::core::gemini_client::ModelRole;
    use crate::core::structured::NOT_FOUND;
    use crate::core::testing::{echo_vision_then, png_file, prompt_text, ScriptedModel};

    const JOB_REPLY: &str = "```json\n{\"title\": \"Data Engineer\", \"company\": \"Acme\", \"required_skills\": [\"Python\", \"SQL\"], \"desired_skills\": [], \"experience_level\": \"3+ years\", \"education\": \"BSc Computer Science\", \"responsibilities\": [\"Build pipelines\"]}\n```";

    fn extractor(model: ScriptedModel) -> (Arc<ScriptedModel>, DocumentExtractor) {
        let model = Arc::new(model);
        let extractor = DocumentExtractor::new(model.clone(), &RuntimeSettings::default());
        (model, extractor)
    }

    #[tokio::test]
    async fn job_ad_image_is_read_then_structured() {
        let (model, extractor) = extractor(echo_vision_then(|prompt| {
            assert!(prompt.contains("Senior Data Engineer at Acme"));
            Ok(JOB_REPLY.to_string())
        }));

        let job = extractor
            .extract_job_requirements(&png_file("ad.png", "Senior Data Engineer at Acme"))
            .await
            .unwrap();

        assert_eq!(job.title, "Data Engineer");
        assert_eq!(job.required_skills, vec!["Python", "SQL"]);
        assert!(job.desired_skills.is_empty());
        assert_eq!(job.source_file, "ad.png");

        let calls = model.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].role, ModelRole::Vision);
        assert_eq!(calls[1].role, ModelRole::Text);
        assert!(calls[1].json_response);
    }

    #[tokio::test]
    async fn prose_cv_reply_is_recovered_field_by_field() {
        let (_, extractor) = extractor(echo_vision_then(|_| {
            Ok("Name: Jane Roe\nKey Skills: Rust, Go, SQL\nProfessional Experience:\n- Backend Engineer, Initech, 2019-2024\n".to_string())
        }));

        let profile = extractor
            .extract_candidate_profile(&png_file("jane.png", "Jane Roe resume"), 3)
            .await
            .unwrap();

        assert_eq!(profile.name, "Jane Roe");
        assert_eq!(profile.skills, vec!["Rust", "Go", "SQL"]);
        assert_eq!(profile.experience, vec!["Backend Engineer, Initech, 2019-2024"]);
        assert!(profile.projects.is_empty());
        assert_eq!(profile.upload_index, 3);
    }

    #[tokio::test]
    async fn blank_vision_output_is_a_document_failure() {
        let (model, extractor) = extractor(echo_vision_then(|_| Ok(JOB_REPLY.to_string())));

        let err = extractor
            .extract_candidate_profile(&png_file("blank.png", "   "), 0)
            .await
            .unwrap_err();

        assert_eq!(err.file_name, "blank.png");
        assert_eq!(err.kind(), FailureKind::Document);
        assert!(matches!(err.cause, CoreError::EmptyDocument));
        assert_eq!(model.calls().len(), 1);
    }

    #[tokio::test]
    async fn refusal_text_is_an_extraction_failure_with_raw_reply() {
        let refusal = "I cannot process personal documents.";
        let (_, extractor) = extractor(echo_vision_then(move |_| Ok(refusal.to_string())));

        let err = extractor
            .extract_candidate_profile(&png_file("cv.png", "some resume"), 0)
            .await
            .unwrap_err();

        assert_eq!(err.kind(), FailureKind::Extraction);
        assert_eq!(err.raw_text(), Some(refusal));
    }

    #[tokio::test]
    async fn service_errors_are_tagged_with_the_file() {
        let (_, extractor) = extractor(echo_vision_then(|_| {
            Err(CoreError::ServiceCall {
                status: 403,
                body: "API key not valid".to_string(),
            })
        }));

        let err = extractor
            .extract_job_requirements(&png_file("ad.png", "ad text"))
            .await
            .unwrap_err();

        assert_eq!(err.kind(), FailureKind::Service);
        assert!(err.to_string().contains("ad.png"));
    }

    #[tokio::test]
    async fn unsupported_files_never_reach_the_model() {
        let (model, extractor) = extractor(echo_vision_then(|_| Ok(JOB_REPLY.to_string())));

        let err = extractor
            .extract_candidate_profile(&UploadedFile::from_bytes("cv.docx", vec![1, 2, 3]), 0)
            .await
            .unwrap_err();

        assert!(matches!(err.cause, CoreError::UnsupportedFormat(_)));
        assert!(model.calls().is_empty());
    }

    #[tokio::test]
    async fn long_documents_are_truncated_before_structuring() {
        let long_text = "x".repeat(10_000);
        let (model, extractor) = extractor(echo_vision_then(|_| Ok(JOB_REPLY.to_string())));

        extractor
            .extract_job_requirements(&png_file("ad.png", &long_text))
            .await
            .unwrap();

        let structuring_prompt = prompt_text(&model.calls()[1]);
        assert!(structuring_prompt.contains(&"x".repeat(6000)));
        assert!(!structuring_prompt.contains(&"x".repeat(6001)));
    }

    #[test]
    fn missing_job_fields_become_sentinels_or_empty_lists() {
        let record = recover_record("Job Title: Analyst", JOB_FIELDS).unwrap();
        let job = job_requirements_from_record(&record, "ad.pdf");

        assert_eq!(job.title, "Analyst");
        assert_eq!(job.company, NOT_FOUND);
        assert!(job.required_skills.is_empty());
    }

    #[test]
    fn truncate_chars_respects_char_boundaries() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("abc", 10), "abc");
    }
}
