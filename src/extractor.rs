//! Page-level plain text extraction from PDF bytes.

use std::path::Path;

use lopdf::Document;

use crate::error::ExtractionError;

/// Text of a single PDF page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageText {
    /// 1-based page number.
    pub number: u32,
    /// Extracted text; images and layout are discarded.
    pub text: String,
}

/// Extracts the text of every page, in page order.
pub fn extract_pages(bytes: &[u8]) -> Result<Vec<PageText>, ExtractionError> {
    let document =
        Document::load_mem(bytes).map_err(|err| ExtractionError::Parse(err.to_string()))?;
    let page_numbers: Vec<u32> = document.get_pages().keys().copied().collect();
    if page_numbers.is_empty() {
        return Err(ExtractionError::NoPages);
    }

    let mut pages = Vec::with_capacity(page_numbers.len());
    for number in page_numbers {
        let text = document
            .extract_text(&[number])
            .map_err(|err| ExtractionError::Page {
                page: number,
                reason: err.to_string(),
            })?;
        pages.push(PageText {
            number,
            text: clean_page_text(&text),
        });
    }
    tracing::debug!(pages = pages.len(), "extracted PDF text");
    Ok(pages)
}

/// Reads a PDF from disk and extracts its pages.
pub fn extract_pages_from_path(path: &Path) -> Result<Vec<PageText>, ExtractionError> {
    let bytes = std::fs::read(path)?;
    extract_pages(&bytes)
}

fn clean_page_text(raw: &str) -> String {
    raw.chars()
        .filter(|ch| !ch.is_control() || *ch == '\n' || *ch == '\t')
        .collect::<String>()
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_non_pdf_bytes() {
        let err = extract_pages(b"definitely not a pdf").expect_err("garbage rejected");
        assert!(matches!(err, ExtractionError::Parse(_)));
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = extract_pages_from_path(Path::new("/nonexistent/docchat/test.pdf"))
            .expect_err("missing file");
        assert!(matches!(err, ExtractionError::Io(_)));
    }

    #[test]
    fn strips_control_characters_but_keeps_newlines() {
        assert_eq!(clean_page_text("  a\u{0}b\nc\u{c}  "), "ab\nc");
    }
}
