//! Pattern trie build and lookup benchmarks
//!
//! Pattern sets are rebuilt whenever configuration changes and queried on
//! every instrumentation decision.
//!
//! # Run Instructions
//!
//! ```bash
//! cargo bench --bench trie_build
//! ```

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use rastro::trie::{pattern_builder, Pattern, PatternSet};

/// `count` patterns spread over a few services, some wildcards, some exact
fn patterns(count: usize) -> Vec<Pattern> {
    (0..count)
        .map(|i| {
            let service = i % 16;
            match i % 4 {
                0 => Pattern::prefix(format!("Service{service}.")),
                1 => Pattern::prefix(format!("Service{service}.op{}", i % 7)),
                _ => Pattern::exact(format!("Service{service}.op{}{i}", i % 7)).with_tag("bench"),
            }
        })
        .collect()
}

/// Benchmark: building a trie from scratch
fn bench_build(c: &mut Criterion) {
    let mut group = c.benchmark_group("trie_build");
    let builder = pattern_builder();

    for count in [16, 128, 1024] {
        let items = patterns(count);
        group.bench_with_input(BenchmarkId::from_parameter(count), &items, |b, items| {
            b.iter(|| black_box(builder.build(Pattern::any(), items.iter().cloned())));
        });
    }

    group.finish();
}

/// Benchmark: most specific match for a name
fn bench_best_match(c: &mut Criterion) {
    let set = PatternSet::new(patterns(1024));

    c.bench_function("pattern_best_match", |b| {
        b.iter(|| black_box(set.best_match(black_box("Service3.op35"))));
    });
}

criterion_group!(benches, bench_build, bench_best_match);
criterion_main!(benches);
