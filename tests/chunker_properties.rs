use proptest::prelude::*;

use docqa::error::ChunkError;
use docqa::models::ExtractedText;
use docqa::services::TextChunker;
use docqa::services::chunker::reassemble;

fn chunker_params() -> impl Strategy<Value = (usize, usize)> {
    (1usize..64).prop_flat_map(|size| (Just(size), 0..size))
}

proptest! {
    #[test]
    fn reassembly_reconstructs_text(text in "\\PC{1,400}", (size, overlap) in chunker_params()) {
        let chunker = TextChunker::new(size, overlap).unwrap();
        let chunks = chunker.chunk(&text).unwrap();
        prop_assert_eq!(reassemble(&chunks), text);
    }

    #[test]
    fn chunks_respect_size_and_overlap(text in "[a-zé漢 ]{1,300}", (size, overlap) in chunker_params()) {
        let chunker = TextChunker::new(size, overlap).unwrap();
        let chunks = chunker.chunk(&text).unwrap();

        for (i, chunk) in chunks.iter().enumerate() {
            prop_assert_eq!(chunk.id as usize, i);
            prop_assert!(chunk.text.chars().count() <= size);
            prop_assert!(!chunk.text.is_empty());
        }
        for pair in chunks.windows(2) {
            let tail: String = pair[0].text.chars().skip(size - overlap).collect();
            let head: String = pair[1].text.chars().take(overlap).collect();
            prop_assert_eq!(tail, head);
            prop_assert_eq!(pair[1].source_offset - pair[0].source_offset, size - overlap);
        }
    }

    #[test]
    fn chunking_is_deterministic(text in "\\PC{1,200}", (size, overlap) in chunker_params()) {
        let chunker = TextChunker::new(size, overlap).unwrap();
        prop_assert_eq!(chunker.chunk(&text).unwrap(), chunker.chunk(&text).unwrap());
    }

    #[test]
    fn page_labels_never_decrease(pages in prop::collection::vec("[a-z]{0,40}", 1..6), size in 1usize..20) {
        let mut text = String::new();
        let mut page_offsets = Vec::new();
        for page in &pages {
            page_offsets.push(text.chars().count());
            text.push_str(page);
        }
        prop_assume!(!text.is_empty());

        let extracted = ExtractedText { text, page_offsets };
        let chunks = TextChunker::new(size, 0).unwrap().chunk_with_pages(&extracted).unwrap();
        let labels: Vec<u32> = chunks.iter().map(|c| c.page.unwrap()).collect();
        prop_assert!(labels.windows(2).all(|w| w[0] <= w[1]));
        prop_assert!(labels.iter().all(|&p| p >= 1 && p as usize <= pages.len()));
    }
}

#[test]
fn fixed_windows() {
    let texts = |size, overlap| -> Vec<String> {
        TextChunker::new(size, overlap)
            .unwrap()
            .chunk("AAAAABBBBBCCCCC")
            .unwrap()
            .into_iter()
            .map(|c| c.text)
            .collect()
    };
    assert_eq!(texts(5, 0), vec!["AAAAA", "BBBBB", "CCCCC"]);
    assert_eq!(texts(5, 2), vec!["AAAAA", "AABBB", "BBBBC", "BCCCC", "CCC"]);
}

#[test]
fn empty_text_is_rejected() {
    let chunker = TextChunker::new(5, 2).unwrap();
    assert_eq!(chunker.chunk(""), Err(ChunkError::EmptyDocument));
}

#[test]
fn invalid_parameters() {
    assert!(matches!(TextChunker::new(0, 0), Err(ChunkError::InvalidParameters(_))));
    assert!(matches!(TextChunker::new(4, 4), Err(ChunkError::InvalidParameters(_))));
}
