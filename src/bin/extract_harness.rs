use std::path::Path;
use std::sync::Arc;

use job_matcher_desktop_lib::core::extraction::{
    candidate_profile_from_record, job_requirements_from_record, DocumentExtractor,
};
use job_matcher_desktop_lib::core::gemini_client::GeminiClient;
use job_matcher_desktop_lib::core::models::{DocumentKind, UploadedFile};
use job_matcher_desktop_lib::core::secret_store::ApiKeyStore;
use job_matcher_desktop_lib::core::settings_store::SettingsStore;
use job_matcher_desktop_lib::init_tracing;
use serde_json::json;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing(false);

    let args: Vec<String> = std::env::args().collect();
    if args.len() < 3 {
        eprintln!("Usage: extract_harness <job-ad|cv> <path-to-document.pdf|png|jpg>");
        std::process::exit(1);
    }

    let kind = match args[1].as_str() {
        "job-ad" => DocumentKind::JobAd,
        "cv" => DocumentKind::Cv,
        other => {
            eprintln!("Unknown document kind: {other} (expected job-ad or cv)");
            std::process::exit(1);
        }
    };

    let path = &args[2];
    if !Path::new(path).exists() {
        eprintln!("File not found: {path}");
        std::process::exit(2);
    }

    let settings = SettingsStore::new().load().await?;
    let (api_key, _) = ApiKeyStore::new().resolve()?;
    let client = GeminiClient::new(api_key, settings.clone())?;
    let extractor = DocumentExtractor::new(Arc::new(client), &settings);

    let file = UploadedFile::from_path(path);
    let record = extractor.extract_record(&file, kind).await?;
    let typed = match kind {
        DocumentKind::JobAd => {
            serde_json::to_value(job_requirements_from_record(&record, &file.file_name))?
        }
        DocumentKind::Cv => {
            serde_json::to_value(candidate_profile_from_record(&record, &file.file_name, 0))?
        }
    };

    let output = json!({
        "kind": kind,
        "record": record,
        "typed": typed,
    });
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
