//! Benchmark for the Scavenger puzzle

use criterion::{Criterion, black_box, criterion_group, criterion_main};
use scavenger_core::{Target, compute_digest, digest_value};

fn bench_digest(c: &mut Criterion) {
    c.bench_function("digest_single", |b| {
        b.iter(|| compute_digest(black_box("benchmark challenge payload"), black_box("12345")))
    });
}

fn bench_search_step(c: &mut Criterion) {
    let target = Target::from_bits(16);

    c.bench_function("search_step", |b| {
        let mut nonce: u64 = 0;
        b.iter(|| {
            let candidate = nonce.to_string();
            nonce = nonce.wrapping_add(1);
            target.is_met_by(digest_value(black_box("benchmark challenge payload"), &candidate))
        })
    });
}

criterion_group!(benches, bench_digest, bench_search_step);
criterion_main!(benches);
