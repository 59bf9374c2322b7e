//! Document ingestion stage.
//!
//! Turns a `Reference` into a `Document` by reading the file from disk.
//! Supported types: plain text, markdown, JSON (string leaves are joined),
//! PDF (page text) and DOCX (paragraph text).

use std::io::{Cursor, Read};
use std::path::Path;

use anyhow::{Context, Result};
use async_trait::async_trait;
use quick_xml::events::Event as XmlEvent;
use quick_xml::Reader;
use tracing::debug;

use crate::core::safety::SafetyLimits;
use crate::domain::{Metadata, Payload, StageKind};

use super::{Stage, StageError};

/// File extensions the stage can extract text from
pub const SUPPORTED_TYPES: [&str; 6] = ["txt", "md", "markdown", "json", "pdf", "docx"];

pub struct DocumentIngestStage {
    limits: SafetyLimits,
}

impl Default for DocumentIngestStage {
    fn default() -> Self {
        Self::new(SafetyLimits::default())
    }
}

impl DocumentIngestStage {
    pub fn new(limits: SafetyLimits) -> Self {
        Self { limits }
    }

    async fn read(&self, path: &Path) -> Result<(String, String)> {
        let display = path.display().to_string();

        self.limits
            .validate_input(0, Some(path))
            .map_err(StageError::from)?;

        let meta = match tokio::fs::metadata(path).await {
            Ok(meta) if meta.is_file() => meta,
            _ => return Err(StageError::NotFound(display).into()),
        };
        self.limits
            .validate_input(meta.len(), None)
            .map_err(StageError::from)?;

        let file_type = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_default();

        if !SUPPORTED_TYPES.contains(&file_type.as_str()) {
            let shown = if file_type.is_empty() { display } else { file_type };
            return Err(StageError::UnsupportedType(shown).into());
        }

        let raw = tokio::fs::read(path)
            .await
            .with_context(|| format!("Failed to read document: {}", path.display()))?;

        let text = match file_type.as_str() {
            "pdf" => extract_blocking(raw, extract_pdf).await,
            "docx" => extract_blocking(raw, extract_docx).await,
            "json" => serde_json::from_slice::<serde_json::Value>(&raw)
                .map(|value| {
                    let mut leaves = Vec::new();
                    collect_strings(&value, &mut leaves);
                    leaves.join("\n")
                })
                .map_err(anyhow::Error::from),
            _ => String::from_utf8(raw).map_err(anyhow::Error::from),
        }
        .with_context(|| format!("Failed to extract text from {}", path.display()))?;

        Ok((text, file_type))
    }
}

fn collect_strings(value: &serde_json::Value, out: &mut Vec<String>) {
    match value {
        serde_json::Value::String(s) if !s.trim().is_empty() => out.push(s.trim().to_string()),
        serde_json::Value::Array(items) => items.iter().for_each(|v| collect_strings(v, out)),
        serde_json::Value::Object(map) => map.values().for_each(|v| collect_strings(v, out)),
        _ => {}
    }
}

/// Run a CPU-bound extractor off the async workers
async fn extract_blocking(raw: Vec<u8>, extract: fn(&[u8]) -> Result<String>) -> Result<String> {
    tokio::task::spawn_blocking(move || extract(&raw))
        .await
        .context("Extraction task aborted")?
}

fn extract_pdf(raw: &[u8]) -> Result<String> {
    let document = lopdf::Document::load_mem(raw).map_err(|e| anyhow::anyhow!("Invalid PDF: {}", e))?;

    let pages: Vec<u32> = document.get_pages().keys().copied().collect();
    if pages.is_empty() {
        return Ok(String::new());
    }

    document
        .extract_text(&pages)
        .map_err(|e| anyhow::anyhow!("Unreadable PDF text: {}", e))
}

fn extract_docx(raw: &[u8]) -> Result<String> {
    let mut archive = zip::ZipArchive::new(Cursor::new(raw)).context("Invalid DOCX archive")?;

    let mut xml = String::new();
    archive
        .by_name("word/document.xml")
        .context("DOCX has no word/document.xml")?
        .read_to_string(&mut xml)?;

    docx_paragraphs(&xml)
}

/// Text of each `w:p` paragraph, one per line
fn docx_paragraphs(xml: &str) -> Result<String> {
    let mut reader = Reader::from_str(xml);
    let mut paragraphs = Vec::new();
    let mut current = String::new();
    let mut in_text = false;

    loop {
        match reader.read_event().context("Malformed DOCX XML")? {
            XmlEvent::Start(e) if e.name().as_ref() == b"w:t" => in_text = true,
            XmlEvent::End(e) if e.name().as_ref() == b"w:t" => in_text = false,
            XmlEvent::Text(t) if in_text => current.push_str(&t.unescape()?),
            XmlEvent::Empty(e) if e.name().as_ref() == b"w:tab" => current.push('\t'),
            XmlEvent::End(e) if e.name().as_ref() == b"w:p" => {
                let paragraph = current.trim();
                if !paragraph.is_empty() {
                    paragraphs.push(paragraph.to_string());
                }
                current.clear();
            }
            XmlEvent::Eof => break,
            _ => {}
        }
    }

    Ok(paragraphs.join("\n"))
}

#[async_trait]
impl Stage for DocumentIngestStage {
    fn kind(&self) -> StageKind {
        StageKind::Ingestion
    }

    fn name(&self) -> &str {
        "document-ingest"
    }

    async fn process(&self, input: Payload) -> Result<Payload> {
        let (path, recipient) = match input {
            Payload::Reference { path, recipient } => (path, recipient),
            other => {
                return Err(StageError::Validation(format!("expected reference, got {}", other.shape())).into())
            }
        };

        let source = Path::new(&path);
        let (text, file_type) = self.read(source).await?;

        if text.trim().is_empty() {
            return Err(StageError::EmptyExtraction(path).into());
        }

        let file_name = source
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| path.clone());

        debug!(file = %file_name, bytes = text.len(), "Document ingested");

        Ok(Payload::Document {
            text,
            metadata: Metadata {
                file_name,
                file_type,
                recipient,
                cost_usd: None,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::retry::classify;
    use crate::stages::ErrorClass;
    use lopdf::content::{Content, Operation};
    use lopdf::{dictionary, Object, Stream};
    use std::io::Write;
    use tempfile::TempDir;

    fn write_docx(path: &Path, body: &str) {
        let xml = format!(
            r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?><w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main"><w:body>{}</w:body></w:document>"#,
            body
        );
        let mut zip = zip::ZipWriter::new(std::fs::File::create(path).unwrap());
        zip.start_file("word/document.xml", zip::write::FileOptions::default())
            .unwrap();
        zip.write_all(xml.as_bytes()).unwrap();
        zip.finish().unwrap();
    }

    /// Single-page PDF showing `line` in Courier
    fn write_pdf(path: &Path, line: &str) {
        let mut doc = lopdf::Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let font_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Courier",
        });
        let resources_id = doc.add_object(dictionary! {
            "Font" => dictionary! {
                "F1" => font_id,
            },
        });
        let content = Content {
            operations: vec![
                Operation::new("BT", vec![]),
                Operation::new("Tf", vec!["F1".into(), 12.into()]),
                Operation::new("Td", vec![72.into(), 700.into()]),
                Operation::new("Tj", vec![Object::string_literal(line)]),
                Operation::new("ET", vec![]),
            ],
        };
        let content_id = doc.add_object(Stream::new(dictionary! {}, content.encode().unwrap()));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
        });
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => vec![page_id.into()],
                "Count" => 1,
                "Resources" => resources_id,
                "MediaBox" => vec![0.into(), 0.into(), 595.into(), 842.into()],
            }),
        );
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);
        doc.save(path).unwrap();
    }

    fn reference(path: &Path) -> Payload {
        Payload::Reference {
            path: path.to_string_lossy().to_string(),
            recipient: Some("ops@example.com".to_string()),
        }
    }

    #[tokio::test]
    async fn test_ingest_text() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("Report.TXT");
        std::fs::write(&path, "Quarterly revenue grew.").unwrap();

        let output = DocumentIngestStage::default()
            .process(reference(&path))
            .await
            .unwrap();

        match output {
            Payload::Document { text, metadata } => {
                assert_eq!(text, "Quarterly revenue grew.");
                assert_eq!(metadata.file_name, "Report.TXT");
                assert_eq!(metadata.file_type, "txt");
                assert_eq!(metadata.recipient.as_deref(), Some("ops@example.com"));
            }
            other => panic!("unexpected payload {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_ingest_json_leaves() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("notes.json");
        std::fs::write(&path, r#"{"title": "Plan", "items": ["one", 2, "three"]}"#).unwrap();

        let output = DocumentIngestStage::default()
            .process(reference(&path))
            .await
            .unwrap();

        let Payload::Document { text, .. } = output else {
            panic!("expected document");
        };
        assert!(text.contains("Plan"));
        assert!(text.contains("one"));
        assert!(text.contains("three"));
        assert!(!text.contains('2'));
    }

    #[tokio::test]
    async fn test_ingest_failures_are_classified() {
        let dir = TempDir::new().unwrap();
        let stage = DocumentIngestStage::default();

        let missing = stage.process(reference(&dir.path().join("gone.txt"))).await.unwrap_err();
        assert_eq!(classify(&missing), ErrorClass::Generic);

        let rtf = dir.path().join("scan.rtf");
        std::fs::write(&rtf, "{\\rtf1 hello}").unwrap();
        let unsupported = stage.process(reference(&rtf)).await.unwrap_err();
        assert_eq!(classify(&unsupported), ErrorClass::Validation);
        assert!(matches!(
            unsupported.downcast_ref::<StageError>(),
            Some(StageError::UnsupportedType(_))
        ));

        let empty = dir.path().join("empty.md");
        std::fs::write(&empty, "  \n").unwrap();
        let err = stage.process(reference(&empty)).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<StageError>(),
            Some(StageError::EmptyExtraction(_))
        ));

        let secret = dir.path().join(".env");
        std::fs::write(&secret, "TOKEN=x").unwrap();
        let err = stage.process(reference(&secret)).await.unwrap_err();
        assert!(matches!(err.downcast_ref::<StageError>(), Some(StageError::Safety(_))));
    }

    #[tokio::test]
    async fn test_ingest_pdf() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("scan.pdf");
        write_pdf(&path, "Quarterly revenue grew");

        let output = DocumentIngestStage::default()
            .process(reference(&path))
            .await
            .unwrap();

        let Payload::Document { text, metadata } = output else {
            panic!("expected document");
        };
        assert!(text.contains("Quarterly revenue grew"), "text: {:?}", text);
        assert_eq!(metadata.file_type, "pdf");
    }

    #[tokio::test]
    async fn test_ingest_docx_paragraphs() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("memo.docx");
        write_docx(
            &path,
            "<w:p><w:r><w:t>Budget</w:t></w:r><w:r><w:tab/><w:t xml:space=\"preserve\">approved</w:t></w:r></w:p>\
             <w:p/>\
             <w:p><w:r><w:t>R&amp;D hiring resumes.</w:t></w:r></w:p>",
        );

        let output = DocumentIngestStage::default()
            .process(reference(&path))
            .await
            .unwrap();

        let Payload::Document { text, metadata } = output else {
            panic!("expected document");
        };
        assert_eq!(text, "Budget\tapproved\nR&D hiring resumes.");
        assert_eq!(metadata.file_type, "docx");
    }

    #[tokio::test]
    async fn test_corrupt_binary_documents_are_generic_failures() {
        let dir = TempDir::new().unwrap();
        let stage = DocumentIngestStage::default();

        let pdf = dir.path().join("torn.pdf");
        std::fs::write(&pdf, "%PDF-1.5 truncated").unwrap();
        let err = stage.process(reference(&pdf)).await.unwrap_err();
        assert_eq!(classify(&err), ErrorClass::Generic);

        let docx = dir.path().join("torn.docx");
        std::fs::write(&docx, "not a zip archive").unwrap();
        let err = stage.process(reference(&docx)).await.unwrap_err();
        assert_eq!(classify(&err), ErrorClass::Generic);

        let blank = dir.path().join("blank.docx");
        write_docx(&blank, "<w:p><w:r><w:t>  </w:t></w:r></w:p>");
        let err = stage.process(reference(&blank)).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<StageError>(),
            Some(StageError::EmptyExtraction(_))
        ));
    }

    #[tokio::test]
    async fn test_input_size_limit() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("big.txt");
        std::fs::write(&path, "x".repeat(64)).unwrap();

        let stage = DocumentIngestStage::new(SafetyLimits {
            max_input_bytes: 16,
            ..Default::default()
        });
        let err = stage.process(reference(&path)).await.unwrap_err();
        assert_eq!(classify(&err), ErrorClass::Validation);
    }
}
