use criterion::{Criterion, criterion_group, criterion_main};
use doc_chat::embeddings::{ChunkingConfig, chunk_text};
use std::hint::black_box;

fn sample_document() -> String {
    let paragraph = "The service manual describes maintenance intervals for every component. \
        Filters are replaced every six months, belts are inspected yearly, and the control \
        board firmware is updated whenever a new release is published.";
    (0..400)
        .map(|i| format!("Section {}. {}", i, paragraph))
        .collect::<Vec<_>>()
        .join("\n\n")
}

pub fn criterion_benchmark(c: &mut Criterion) {
    let document = sample_document();
    let config = ChunkingConfig::default();
    c.bench_function("chunking", |b| {
        b.iter(|| chunk_text(black_box(&document), black_box(&config)))
    });
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
