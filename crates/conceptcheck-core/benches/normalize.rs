use criterion::{black_box, criterion_group, criterion_main, Criterion};

use conceptcheck_core::knowledge::KnowledgeStore;
use conceptcheck_core::normalize::TextNormalizer;

fn bench_normalize(c: &mut Criterion) {
    let knowledge = KnowledgeStore::builtin().expect("builtin knowledge");
    let normalizer = TextNormalizer::new(knowledge.vocabulary());
    let mut group = c.benchmark_group("normalize");

    let short = "A binary search tree is a hierarchical structure where each node has a left child and a right child.";
    let paragraph = "Quicksort picks a pivot, partitions the array so smaller elements come before it \
        and larger ones after it, and then recursively sorts both partitions. On average it runs in \
        O(n log n) time, e.g. when pivots split the input evenly, but a bad pivot choice degrades it \
        to O(n^2). Because partitioning happens in place, it needs little extra memory.";
    let long = paragraph.repeat(12);

    group.bench_function("sentence", |b| {
        b.iter(|| normalizer.normalize(black_box(short)))
    });

    group.bench_function("paragraph", |b| {
        b.iter(|| normalizer.normalize(black_box(paragraph)))
    });

    group.bench_function("long", |b| {
        b.iter(|| normalizer.normalize(black_box(&long)))
    });

    group.finish();
}

criterion_group!(benches, bench_normalize);
criterion_main!(benches);
