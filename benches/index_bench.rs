// Local Index Performance Benchmarks
// Measures tokenize-and-index throughput and TF-IDF ranking over a
// pre-built corpus.

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use distrisearch::index::{InvertedIndex, Tokenizer};
use distrisearch::types::DocId;
use std::hint::black_box;

fn corpus(size: usize) -> Vec<(DocId, String)> {
    let vocabulary = [
        "raft", "consensus", "quorum", "replica", "shard", "index", "search", "cluster",
        "leader", "election", "directory", "snapshot", "timeout", "heartbeat", "ranking",
    ];
    (0..size)
        .map(|i| {
            let words: Vec<&str> = (0..40)
                .map(|j| vocabulary[(i * 7 + j * 3) % vocabulary.len()])
                .collect();
            (DocId::from(format!("doc-{i:05}")), words.join(" "))
        })
        .collect()
}

fn bench_tokenize_and_index(c: &mut Criterion) {
    let mut group = c.benchmark_group("tokenize_and_index");
    let tokenizer = Tokenizer::new();

    for size in [100, 1000] {
        let docs = corpus(size);
        group.bench_with_input(BenchmarkId::from_parameter(size), &docs, |b, docs| {
            b.iter(|| {
                let index = InvertedIndex::new();
                for (doc_id, content) in docs {
                    let terms = tokenizer.tokenize(black_box(content));
                    index.add(doc_id, &terms);
                }
                black_box(index.doc_count());
            });
        });
    }

    group.finish();
}

fn bench_rank(c: &mut Criterion) {
    let tokenizer = Tokenizer::new();
    let index = InvertedIndex::new();
    for (doc_id, content) in corpus(5000) {
        let terms = tokenizer.tokenize(&content);
        index.add(&doc_id, &terms);
    }
    let query = vec!["raft".to_string(), "quorum".to_string()];

    c.bench_function("rank_two_terms", |b| {
        b.iter(|| {
            let candidates = index.search_all(black_box(&query));
            black_box(index.rank(&candidates, &query));
        });
    });

    c.bench_function("search_ranked_top10", |b| {
        b.iter(|| {
            black_box(index.search_ranked(black_box(&query), 10));
        });
    });
}

criterion_group!(benches, bench_tokenize_and_index, bench_rank);
criterion_main!(benches);
