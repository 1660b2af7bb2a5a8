//! Text extraction from uploaded documents.

use tracing::debug;

use crate::error::ExtractionError;
use crate::models::{DocumentFormat, ExtractedText};

/// Extract plain text from a document payload, concatenating pages in page order.
///
/// A page without extractable text contributes nothing; only a payload that cannot be
/// parsed as a container at all is an error.
pub fn extract(bytes: &[u8], format: DocumentFormat) -> Result<ExtractedText, ExtractionError> {
    match format {
        DocumentFormat::Pdf => extract_pdf(bytes),
        DocumentFormat::Text => {
            let text = String::from_utf8(bytes.to_vec())?;
            Ok(ExtractedText::single_page(text))
        }
    }
}

fn extract_pdf(bytes: &[u8]) -> Result<ExtractedText, ExtractionError> {
    let document = lopdf::Document::load_mem(bytes)
        .map_err(|e| ExtractionError::InvalidContainer(e.to_string()))?;

    let pages = document.get_pages();
    let mut extracted = ExtractedText {
        text: String::new(),
        page_offsets: Vec::with_capacity(pages.len()),
    };
    let mut offset = 0;

    // BTreeMap iteration is already in page-number order
    for &page_number in pages.keys() {
        extracted.page_offsets.push(offset);

        let page_text = match document.extract_text(&[page_number]) {
            Ok(text) => text,
            Err(e) => {
                debug!(page = page_number, error = %e, "page yielded no text");
                String::new()
            }
        };

        offset += page_text.chars().count();
        extracted.text.push_str(&page_text);
    }

    debug!(
        pages = extracted.page_count(),
        chars = offset,
        "extracted PDF text"
    );

    Ok(extracted)
}
