use std::sync::Arc;

use chrono::Utc;
use criterion::{black_box, criterion_group, criterion_main, Criterion};

use conceptcheck_core::compare::{detect_misconceptions, Comparator};
use conceptcheck_core::knowledge::KnowledgeStore;
use conceptcheck_core::model::{ReferenceContent, ReferenceSourceKind};
use conceptcheck_core::normalize::TextNormalizer;
use conceptcheck_core::scoring::{classify, Scorer};

fn bench_scoring(c: &mut Criterion) {
    let knowledge = KnowledgeStore::builtin().expect("builtin knowledge");
    let normalizer = Arc::new(TextNormalizer::new(knowledge.vocabulary()));
    let concept = knowledge.get("binary search").expect("binary search concept");
    let reference = ReferenceContent {
        source: ReferenceSourceKind::KnowledgeBase,
        title: concept.name.clone(),
        text: concept.definition.clone(),
        summary: concept.definition.clone(),
        retrieved_at: Utc::now(),
        url: None,
        sections: vec![],
        related_titles: vec![],
        concept_id: Some(concept.id.clone()),
    };
    let student = normalizer.normalize(
        "Binary search works on any array. It checks the middle element and halves the \
         interval each time, so it always runs in O(1) time.",
    );

    let comparator = Comparator::new(Arc::clone(&normalizer), None);
    let runtime = tokio::runtime::Runtime::new().expect("tokio runtime");
    let comparison = runtime.block_on(comparator.compare(&student, &reference, Some(concept)));
    let scorer = Scorer::default();

    let mut group = c.benchmark_group("scoring");

    group.bench_function("compare_lexical", |b| {
        b.iter(|| runtime.block_on(comparator.compare(black_box(&student), &reference, Some(concept))))
    });

    group.bench_function("misconceptions", |b| {
        b.iter(|| detect_misconceptions(black_box(&student), concept))
    });

    group.bench_function("score_and_classify", |b| {
        b.iter(|| {
            let score = scorer.score(black_box(&comparison));
            classify(&score, comparison.misconceptions.len())
        })
    });

    group.finish();
}

criterion_group!(benches, bench_scoring);
criterion_main!(benches);
