use byte_ring::ByteRing;
use criterion::{black_box, criterion_group, criterion_main, Criterion};

fn bench_write_read(c: &mut Criterion) {
    let chunk = [0x30u8; 64];
    let mut out = [0u8; 64];

    c.bench_function("ring_write_read_64", |b| {
        let mut ring = ByteRing::with_default_capacity();
        b.iter(|| {
            ring.write(black_box(&chunk));
            ring.read(black_box(&mut out));
        })
    });

    c.bench_function("ring_overflow_1k", |b| {
        let big = [0x41u8; 1500];
        b.iter(|| {
            let mut ring = ByteRing::with_default_capacity();
            black_box(ring.write(black_box(&big)));
        })
    });
}

criterion_group!(benches, bench_write_read);
criterion_main!(benches);
