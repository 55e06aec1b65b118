use criterion::{criterion_group, criterion_main};


criterion_group!(
    benches,
    store::bench_append,
    store::bench_iterate,
    store::bench_mount
);
criterion_main!(benches);
