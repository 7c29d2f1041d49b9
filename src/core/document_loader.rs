use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

use super::errors::CoreError;

static URL_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r#"https?://[^\s<>'"\)]+"#).unwrap());

const PDF_SIGNATURE: &[u8] = b"%PDF-";
const PNG_SIGNATURE: &[u8] = b"\x89PNG\r\n\x1a\n";
const JPEG_SIGNATURE: &[u8] = b"\xff\xd8\xff";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFormat {
    Pdf,
    Png,
    Jpeg,
}

impl DocumentFormat {
    pub fn from_file_name(file_name: &str) -> Result<Self, CoreError> {
        let extension = std::path::Path::new(file_name)
            .extension()
            .and_then(|v| v.to_str())
            .map(|v| v.to_ascii_lowercase())
            .unwrap_or_default();

        match extension.as_str() {
            "pdf" => Ok(Self::Pdf),
            "png" => Ok(Self::Png),
            "jpg" | "jpeg" => Ok(Self::Jpeg),
            _ => Err(CoreError::UnsupportedFormat(file_name.to_string())),
        }
    }

    pub fn mime_type(self) -> &'static str {
        match self {
            Self::Pdf => "application/pdf",
            Self::Png => "image/png",
            Self::Jpeg => "image/jpeg",
        }
    }

    fn matches_signature(self, data: &[u8]) -> bool {
        match self {
            // Some generators put junk before the header; readers accept it within the first KiB.
            Self::Pdf => data
                .windows(PDF_SIGNATURE.len())
                .take(1024)
                .any(|w| w == PDF_SIGNATURE),
            Self::Png => data.starts_with(PNG_SIGNATURE),
            Self::Jpeg => data.starts_with(JPEG_SIGNATURE),
        }
    }
}

/// A binary document part handed to the vision model.
#[derive(Debug, Clone)]
pub struct BinaryPart {
    pub mime_type: &'static str,
    pub data: Arc<[u8]>,
}

#[derive(Debug, Clone)]
pub enum LoadedDocument {
    /// Text taken from the PDF text layer; no vision call needed.
    Text(String),
    /// Parts the vision model must read.
    Binary(Vec<BinaryPart>),
}

pub struct DocumentLoader {
    pdf_text_min_chars: usize,
}

impl DocumentLoader {
    pub fn new(pdf_text_min_chars: usize) -> Self {
        Self { pdf_text_min_chars }
    }

    pub async fn load(&self, file_name: &str, data: Arc<[u8]>) -> Result<LoadedDocument, CoreError> {
        if data.is_empty() {
            return Err(CoreError::UnreadableDocument(format!("{file_name} is empty")));
        }

        let format = DocumentFormat::from_file_name(file_name)?;
        if !format.matches_signature(&data) {
            return Err(CoreError::UnreadableDocument(format!(
                "{file_name} is not a valid {} file",
                format.mime_type()
            )));
        }

        if format != DocumentFormat::Pdf {
            return Ok(LoadedDocument::Binary(vec![BinaryPart {
                mime_type: format.mime_type(),
                data,
            }]));
        }

        match extract_pdf_text(Arc::clone(&data)).await {
            Ok(mut text) if has_usable_text_layer(&text, self.pdf_text_min_chars) => {
                let links = extract_hyperlinks(&data);
                if !links.is_empty() {
                    text.push('\n');
                    text.push_str(&links.join("\n"));
                }
                Ok(LoadedDocument::Text(text))
            }
            Ok(text) => {
                debug!(
                    file_name,
                    chars = text.trim().chars().count(),
                    "PDF text layer too thin, sending document to the vision model"
                );
                Ok(LoadedDocument::Binary(vec![BinaryPart {
                    mime_type: format.mime_type(),
                    data,
                }]))
            }
            Err(err) => {
                debug!(file_name, "PDF text extraction failed ({err}), sending document to the vision model");
                Ok(LoadedDocument::Binary(vec![BinaryPart {
                    mime_type: format.mime_type(),
                    data,
                }]))
            }
        }
    }
}

/// The threshold counts characters, so accented or non-Latin text is not
/// over-counted by its UTF-8 width.
fn has_usable_text_layer(text: &str, min_chars: usize) -> bool {
    text.trim().chars().count() >= min_chars
}

/// Runs the PDF decoder on the blocking pool; a decoder panic surfaces as an error.
async fn extract_pdf_text(data: Arc<[u8]>) -> Result<String, CoreError> {
    tokio::task::spawn_blocking(move || pdf_extract::extract_text_from_mem(&data))
        .await
        .map_err(|err| CoreError::UnreadableDocument(format!("PDF decoder aborted: {err}")))?
        .map_err(|err| CoreError::UnreadableDocument(err.to_string()))
}

fn extract_hyperlinks(data: &[u8]) -> Vec<String> {
    let raw = String::from_utf8_lossy(data);
    let mut links: Vec<String> = Vec::new();
    for m in URL_RE.find_iter(&raw) {
        let value = m.as_str().to_string();
        if !links
            .iter()
            .any(|existing: &String| existing.eq_ignore_ascii_case(&value))
        {
            links.push(value);
        }
    }

    links
}

#[cfg(test)]
mod tests {
    use super::*;

    fn png_bytes() -> Arc<[u8]> {
        let mut bytes = PNG_SIGNATURE.to_vec();
        bytes.extend_from_slice(&[0, 0, 0, 13]);
        Arc::from(bytes)
    }

    #[test]
    fn text_layer_threshold_counts_characters_not_bytes() {
        let accented = "é".repeat(30);
        assert_eq!(accented.len(), 60);
        assert!(!has_usable_text_layer(&accented, 50));
        assert!(has_usable_text_layer(&accented, 30));

        let cyrillic = format!("  {}  ", "Опыт работы".repeat(4));
        assert!(!has_usable_text_layer(&cyrillic, 50));
        assert!(has_usable_text_layer(&cyrillic, 44));
    }

    #[test]
    fn format_detection_follows_extension() {
        assert_eq!(DocumentFormat::from_file_name("CV.PDF").unwrap(), DocumentFormat::Pdf);
        assert_eq!(DocumentFormat::from_file_name("a.jpeg").unwrap(), DocumentFormat::Jpeg);
        assert_eq!(DocumentFormat::from_file_name("a.jpg").unwrap(), DocumentFormat::Jpeg);
        assert!(matches!(
            DocumentFormat::from_file_name("resume.docx"),
            Err(CoreError::UnsupportedFormat(name)) if name == "resume.docx"
        ));
    }

    #[tokio::test]
    async fn images_pass_through_as_a_single_part() {
        let loader = DocumentLoader::new(50);
        let loaded = loader.load("scan.png", png_bytes()).await.unwrap();

        match loaded {
            LoadedDocument::Binary(parts) => {
                assert_eq!(parts.len(), 1);
                assert_eq!(parts[0].mime_type, "image/png");
            }
            LoadedDocument::Text(_) => panic!("image must not produce text"),
        }
    }

    #[tokio::test]
    async fn mislabelled_or_empty_files_are_rejected() {
        let loader = DocumentLoader::new(50);

        let renamed = loader.load("photo.jpg", png_bytes()).await.unwrap_err();
        assert!(matches!(renamed, CoreError::UnreadableDocument(_)));

        let empty = loader.load("cv.pdf", Arc::from(Vec::new())).await.unwrap_err();
        assert!(matches!(empty, CoreError::UnreadableDocument(_)));
    }

    #[tokio::test]
    async fn broken_pdf_falls_back_to_vision_part() {
        let loader = DocumentLoader::new(50);
        let data: Arc<[u8]> = Arc::from(b"%PDF-1.7\nnot really a pdf".to_vec());
        let loaded = loader.load("scan.pdf", data).await.unwrap();

        match loaded {
            LoadedDocument::Binary(parts) => assert_eq!(parts[0].mime_type, "application/pdf"),
            LoadedDocument::Text(text) => panic!("unexpected text layer: {text}"),
        }
    }

    #[test]
    fn hyperlinks_are_deduplicated_case_insensitively() {
        let links = extract_hyperlinks(
            b"(https://github.com/jane) /URI (https://GitHub.com/Jane) https://jane.dev",
        );
        assert_eq!(links, vec!["https://github.com/jane", "https://jane.dev"]);
    }
}
