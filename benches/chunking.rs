use criterion::{Criterion, criterion_group, criterion_main};
use rag_workflow::chunking::{ChunkingConfig, split_documents};
use rag_workflow::ingestion::Document;
use std::hint::black_box;

fn sample_documents() -> Vec<Document> {
    let paragraph = "Retrieval augmented generation grounds a language model in a knowledge base. \
        Documents are split into overlapping chunks, embedded, and searched by cosine similarity.\n\n";
    (0..50)
        .map(|i| Document::new(format!("kb-{}", i), paragraph.repeat(20 + i % 7)))
        .collect()
}

pub fn criterion_benchmark(c: &mut Criterion) {
    let documents = sample_documents();
    let config = ChunkingConfig::default();
    c.bench_function("chunking", |b| {
        b.iter(|| split_documents(black_box(&documents), black_box(&config)))
    });

    let small = ChunkingConfig::new(200, 50);
    c.bench_function("chunking_small_chunks", |b| {
        b.iter(|| split_documents(black_box(&documents), black_box(&small)))
    });
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
