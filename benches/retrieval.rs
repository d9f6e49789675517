use criterion::{Criterion, criterion_group, criterion_main};
use doc_chat::retrieval::{MMR_LAMBDA, mmr_select, similarity_search};
use std::hint::black_box;

const DIMENSION: usize = 768;
const VECTOR_COUNT: usize = 5_000;

fn vector(seed: usize) -> Vec<f32> {
    (0..DIMENSION)
        .map(|i| (((seed * 31 + i * 17) % 97) as f32 / 97.0) - 0.5)
        .collect()
}

pub fn criterion_benchmark(c: &mut Criterion) {
    let vectors: Vec<Vec<f32>> = (0..VECTOR_COUNT).map(vector).collect();
    let query = vector(VECTOR_COUNT + 1);

    c.bench_function("similarity_search", |b| {
        b.iter(|| similarity_search(black_box(&vectors), black_box(&query), 4))
    });

    let candidates = similarity_search(&vectors, &query, 20);
    c.bench_function("mmr_select", |b| {
        b.iter(|| mmr_select(black_box(&vectors), black_box(&candidates), 4, MMR_LAMBDA))
    });
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
