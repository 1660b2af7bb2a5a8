//! Reading uploaded documents from disk.

use std::fs;
use std::path::Path;

use crate::error::ExtractionError;
use crate::models::{Document, DocumentFormat};

/// Read a document, detecting its format from the extension.
///
/// The size limit is checked against file metadata before any bytes are read.
pub fn read_document(path: &Path, max_bytes: u64) -> Result<Document, ExtractionError> {
    let format = DocumentFormat::from_path(path)?;

    let size = fs::metadata(path)?.len();
    if size > max_bytes {
        return Err(ExtractionError::TooLarge {
            size,
            limit: max_bytes,
        });
    }

    let bytes = fs::read(path)?;
    Ok(Document::new(display_name(path), format, bytes))
}

/// File name without directories, for prompts and output.
pub fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.to_string_lossy().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_text_document() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.md");
        fs::write(&path, "# Notes\nsome text").unwrap();

        let document = read_document(&path, 1024).unwrap();
        assert_eq!(document.name, "notes.md");
        assert_eq!(document.format, DocumentFormat::Text);
        assert_eq!(document.bytes, b"# Notes\nsome text");
    }

    #[test]
    fn test_read_document_too_large() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("big.txt");
        fs::write(&path, "0123456789").unwrap();

        assert!(matches!(
            read_document(&path, 4),
            Err(ExtractionError::TooLarge { size: 10, limit: 4 })
        ));
    }

    #[test]
    fn test_unsupported_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("slides.pptx");
        fs::write(&path, "x").unwrap();

        assert!(matches!(
            read_document(&path, 1024),
            Err(ExtractionError::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn test_missing_file() {
        assert!(matches!(
            read_document(Path::new("/nonexistent/doc.pdf"), 1024),
            Err(ExtractionError::IoError(_))
        ));
    }
}
