//! Text extraction from uploaded files
//!
//! PDFs yield one entry per page (1-based page numbers); Markdown and plain
//! text yield a single unpaged entry.

use std::path::Path;

use pulldown_cmark::{Event, Parser, TagEnd};
use tracing::debug;

use quill_core::{Error, Result};

/// Text of one page (or of a whole unpaged file)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageText {
    pub page: Option<u32>,
    pub text: String,
}

impl PageText {
    pub fn page(page: u32, text: impl Into<String>) -> Self {
        Self {
            page: Some(page),
            text: text.into(),
        }
    }

    pub fn unpaged(text: impl Into<String>) -> Self {
        Self {
            page: None,
            text: text.into(),
        }
    }
}

/// Supported source formats, chosen by file extension
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceFormat {
    Pdf,
    Markdown,
    PlainText,
}

impl SourceFormat {
    pub fn from_path(path: &Path) -> Result<Self> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_default();
        match ext.as_str() {
            "pdf" => Ok(SourceFormat::Pdf),
            "md" | "markdown" => Ok(SourceFormat::Markdown),
            "txt" | "text" => Ok(SourceFormat::PlainText),
            other => Err(Error::Ingestion(format!(
                "Unsupported file type '{}' for {}",
                other,
                path.display()
            ))),
        }
    }
}

/// Read a file and extract its text
pub async fn extract_pages(path: &Path) -> Result<Vec<PageText>> {
    let format = SourceFormat::from_path(path)?;
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|e| Error::Ingestion(format!("Failed to read {}: {}", path.display(), e)))?;

    let pages = match format {
        SourceFormat::Pdf => tokio::task::spawn_blocking(move || extract_pdf(&bytes))
            .await
            .map_err(|e| Error::Ingestion(format!("PDF extraction task failed: {}", e)))??,
        SourceFormat::Markdown => vec![PageText::unpaged(markdown_to_text(&decode_utf8(bytes, path)?))],
        SourceFormat::PlainText => vec![PageText::unpaged(decode_utf8(bytes, path)?)],
    };

    debug!(path = %path.display(), pages = pages.len(), "extracted text");
    Ok(pages)
}

fn decode_utf8(bytes: Vec<u8>, path: &Path) -> Result<String> {
    String::from_utf8(bytes).map_err(|e| Error::Ingestion(format!("{} is not valid UTF-8: {}", path.display(), e)))
}

/// Extract the text of every page of an in-memory PDF
pub fn extract_pdf(bytes: &[u8]) -> Result<Vec<PageText>> {
    let document =
        lopdf::Document::load_mem(bytes).map_err(|e| Error::Ingestion(format!("Failed to parse PDF: {}", e)))?;

    let page_numbers: Vec<u32> = document.get_pages().keys().copied().collect();
    if page_numbers.is_empty() {
        return Err(Error::Ingestion("PDF has no pages".to_string()));
    }

    let mut pages = Vec::new();
    for page_number in &page_numbers {
        let text = document
            .extract_text(&[*page_number])
            .map_err(|e| Error::Ingestion(format!("Failed to extract text of page {}: {}", page_number, e)))?;
        pages.push(PageText::page(*page_number, text));
    }
    Ok(pages)
}

/// Flatten Markdown into plain text, keeping block boundaries as blank lines
pub fn markdown_to_text(markdown: &str) -> String {
    let mut out = String::new();
    for event in Parser::new(markdown) {
        match event {
            Event::Text(text) | Event::Code(text) => out.push_str(&text),
            Event::SoftBreak => out.push(' '),
            Event::HardBreak => out.push('\n'),
            Event::End(TagEnd::Paragraph | TagEnd::Heading(_) | TagEnd::CodeBlock) => out.push_str("\n\n"),
            Event::End(TagEnd::Item) => out.push('\n'),
            _ => {}
        }
    }
    out.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_by_extension() {
        assert_eq!(SourceFormat::from_path(Path::new("a/Notes.PDF")).unwrap(), SourceFormat::Pdf);
        assert_eq!(SourceFormat::from_path(Path::new("b.md")).unwrap(), SourceFormat::Markdown);
        assert_eq!(SourceFormat::from_path(Path::new("c.txt")).unwrap(), SourceFormat::PlainText);
        assert!(matches!(SourceFormat::from_path(Path::new("d.docx")), Err(Error::Ingestion(_))));
        assert!(matches!(SourceFormat::from_path(Path::new("noext")), Err(Error::Ingestion(_))));
    }

    #[test]
    fn test_markdown_to_text() {
        let md = "# Cells\n\nThe *cell* is the basic unit\nof life.\n\n- nucleus\n- `ribosome`\n";
        let text = markdown_to_text(md);
        assert_eq!(text, "Cells\n\nThe cell is the basic unit of life.\n\nnucleus\nribosome");
    }

    #[test]
    fn test_corrupt_pdf_is_ingestion_error() {
        let err = extract_pdf(b"%PDF-1.4 this is not really a pdf").unwrap_err();
        assert!(matches!(err, Error::Ingestion(_)));
    }

    #[tokio::test]
    async fn test_extract_plain_text_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.txt");
        std::fs::write(&path, "Osmosis moves water across membranes.").unwrap();

        let pages = extract_pages(&path).await.unwrap();
        assert_eq!(pages, vec![PageText::unpaged("Osmosis moves water across membranes.")]);
    }

    #[tokio::test]
    async fn test_invalid_utf8_is_ingestion_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.txt");
        std::fs::write(&path, [0xff, 0xfe, 0x00]).unwrap();
        assert!(matches!(extract_pages(&path).await, Err(Error::Ingestion(_))));
    }

    #[tokio::test]
    async fn test_missing_file_is_ingestion_error() {
        let err = extract_pages(Path::new("/definitely/not/here.pdf")).await.unwrap_err();
        assert!(matches!(err, Error::Ingestion(_)));
    }
}
