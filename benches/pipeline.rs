//! Chunking and in-memory search benchmarks.

use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use tokio::runtime::Runtime;

use docqa::models::{Chunk, IndexEntry};
use docqa::services::{Index, InMemoryIndex, TextChunker};

const WORDS: [&str; 12] = [
    "lease", "tenant", "landlord", "payment", "term", "notice", "property", "deposit",
    "renewal", "clause", "agreement", "party",
];

fn sample_text(chars: usize) -> String {
    let mut text = String::with_capacity(chars + 16);
    let mut i = 0;
    while text.len() < chars {
        text.push_str(WORDS[i % WORDS.len()]);
        text.push(' ');
        i += 1;
    }
    text.truncate(chars);
    text
}

/// Deterministic pseudo-random unit-ish vectors.
fn vector(seed: u64, dim: usize) -> Vec<f32> {
    let mut state = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
    (0..dim)
        .map(|_| {
            state = state.wrapping_mul(6364136223846793005).wrapping_add(1);
            ((state >> 33) as f32 / u32::MAX as f32) - 0.25
        })
        .collect()
}

fn bench_chunker(c: &mut Criterion) {
    let chunker = TextChunker::new(800, 200).unwrap();
    let mut group = c.benchmark_group("chunker");

    for size in [10_000usize, 100_000, 1_000_000] {
        let text = sample_text(size);
        group.bench_with_input(BenchmarkId::from_parameter(size), &text, |b, text| {
            b.iter(|| chunker.chunk(black_box(text)).unwrap())
        });
    }
    group.finish();
}

fn bench_search(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let dim = 384;
    let mut group = c.benchmark_group("memory_search");

    for count in [100usize, 1_000, 10_000] {
        let index = InMemoryIndex::new();
        let entries = (0..count)
            .map(|i| IndexEntry {
                chunk: Chunk {
                    id: i as u32,
                    text: format!("chunk {i}"),
                    source_offset: i * 600,
                    page: None,
                },
                embedding: vector(i as u64, dim),
            })
            .collect();
        rt.block_on(index.insert_all(entries)).unwrap();

        let query = vector(u64::MAX, dim);
        group.bench_with_input(BenchmarkId::from_parameter(count), &query, |b, query| {
            b.iter(|| rt.block_on(index.search(black_box(query), 4)).unwrap())
        });
    }
    group.finish();
}

criterion_group!(benches, bench_chunker, bench_search);
criterion_main!(benches);
