use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ExtractionError;

/// Declared format of an uploaded document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentFormat {
    /// Page-structured PDF container
    Pdf,
    /// Plain UTF-8 text (including markdown)
    Text,
}

impl DocumentFormat {
    pub fn from_path(path: &Path) -> Result<Self, ExtractionError> {
        let ext = path
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        ext.parse()
    }
}

impl std::str::FromStr for DocumentFormat {
    type Err = ExtractionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pdf" => Ok(DocumentFormat::Pdf),
            "txt" | "text" | "md" | "markdown" => Ok(DocumentFormat::Text),
            other => Err(ExtractionError::UnsupportedFormat(if other.is_empty() {
                "missing file extension".to_string()
            } else {
                other.to_string()
            })),
        }
    }
}

impl std::fmt::Display for DocumentFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DocumentFormat::Pdf => write!(f, "pdf"),
            DocumentFormat::Text => write!(f, "text"),
        }
    }
}

/// An uploaded document. Only lives until its text has been extracted.
#[derive(Debug, Clone)]
pub struct Document {
    pub id: String,
    pub name: String,
    pub format: DocumentFormat,
    pub bytes: Vec<u8>,
}

impl Document {
    pub fn generate_id(bytes: &[u8]) -> String {
        use sha2::{Digest, Sha256};
        let hash = Sha256::digest(bytes);
        hex::encode(&hash[..16])
    }

    pub fn new(name: impl Into<String>, format: DocumentFormat, bytes: Vec<u8>) -> Self {
        Self {
            id: Self::generate_id(&bytes),
            name: name.into(),
            format,
            bytes,
        }
    }

    pub fn info(&self) -> DocumentInfo {
        DocumentInfo {
            id: self.id.clone(),
            name: self.name.clone(),
            format: self.format,
            size_bytes: self.bytes.len() as u64,
            pages: 0,
            chunks: 0,
        }
    }
}

/// What survives of a document once it has been indexed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentInfo {
    pub id: String,
    pub name: String,
    pub format: DocumentFormat,
    pub size_bytes: u64,
    pub pages: usize,
    pub chunks: usize,
}

/// Plain text extracted from a document, with the character offset where each page starts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractedText {
    pub text: String,
    pub page_offsets: Vec<usize>,
}

impl ExtractedText {
    pub fn single_page(text: String) -> Self {
        Self {
            text,
            page_offsets: vec![0],
        }
    }

    pub fn page_count(&self) -> usize {
        self.page_offsets.len()
    }

    /// 1-based page containing the character at `offset`.
    pub fn page_for_offset(&self, offset: usize) -> Option<u32> {
        if self.page_offsets.is_empty() {
            return None;
        }
        let idx = self.page_offsets.partition_point(|&start| start <= offset);
        Some(idx.max(1) as u32)
    }

    /// True when there is nothing but whitespace to index.
    pub fn is_blank(&self) -> bool {
        self.text.trim().is_empty()
    }
}

/// A bounded, contiguous slice of document text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: u32,
    pub text: String,
    /// Character offset of the first character in the extracted text
    pub source_offset: usize,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub page: Option<u32>,
}

/// A chunk paired with its embedding, ready for `Index::insert_all`.
#[derive(Debug, Clone)]
pub struct IndexEntry {
    pub chunk: Chunk,
    pub embedding: Vec<f32>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_document_generate_id() {
        let id = Document::generate_id(b"%PDF-1.7");
        assert_eq!(id.len(), 32);
        assert_eq!(id, Document::generate_id(b"%PDF-1.7"));
        assert_ne!(id, Document::generate_id(b"%PDF-1.4"));
    }

    #[test]
    fn test_format_from_path() {
        assert_eq!(
            DocumentFormat::from_path(&PathBuf::from("report.PDF")).unwrap(),
            DocumentFormat::Pdf
        );
        assert_eq!(
            DocumentFormat::from_path(&PathBuf::from("notes.md")).unwrap(),
            DocumentFormat::Text
        );
        assert!(matches!(
            DocumentFormat::from_path(&PathBuf::from("slides.pptx")),
            Err(ExtractionError::UnsupportedFormat(_))
        ));
        assert!(DocumentFormat::from_path(&PathBuf::from("README")).is_err());
    }

    #[test]
    fn test_page_for_offset() {
        let extracted = ExtractedText {
            text: "aaaabbbcc".to_string(),
            page_offsets: vec![0, 4, 7],
        };
        assert_eq!(extracted.page_for_offset(0), Some(1));
        assert_eq!(extracted.page_for_offset(3), Some(1));
        assert_eq!(extracted.page_for_offset(4), Some(2));
        assert_eq!(extracted.page_for_offset(8), Some(3));
        assert_eq!(ExtractedText::default().page_for_offset(0), None);
    }

    #[test]
    fn test_empty_pages_share_offsets() {
        // page 2 extracted no text, so pages 2 and 3 both start at offset 4
        let extracted = ExtractedText {
            text: "aaaabbb".to_string(),
            page_offsets: vec![0, 4, 4],
        };
        assert_eq!(extracted.page_for_offset(4), Some(3));
    }

    #[test]
    fn test_is_blank() {
        assert!(ExtractedText::single_page("  \n\t".to_string()).is_blank());
        assert!(!ExtractedText::single_page(" a ".to_string()).is_blank());
    }
}
