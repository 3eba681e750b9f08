use std::io::Cursor;

use criterion::{criterion_group, criterion_main, Criterion, Throughput};
use rand::Rng;

use downlink::{pn, read_cadus, rs, ASM};

fn bench_derandomize(c: &mut Criterion) {
    let mut rng = rand::thread_rng();
    let mut buf = [0u8; 1020];
    rng.fill(&mut buf[..]);

    let mut group = c.benchmark_group("derandomize");
    group.throughput(Throughput::Bytes(buf.len() as u64));
    group.bench_function("loop", |b| {
        b.iter(|| pn::derandomize(&buf));
    });
    group.finish();
}

fn bench_rs_correct_codeblock(c: &mut Criterion) {
    // the zero word is a valid codeword; flip one symbol so every pass
    // pays for a correction
    let mut block = vec![0u8; rs::N * 4];
    block[100] = 0xa5;

    let mut group = c.benchmark_group("rs");
    group.throughput(Throughput::Bytes(block.len() as u64));
    group.bench_function("correct_codeblock", |b| {
        b.iter(|| {
            let (_, state) = rs::correct_codeblock(&block, 4);
            assert_eq!(state, rs::RsState::Corrected(1));
        });
    });
    group.finish();
}

fn bench_synchronize(c: &mut Criterion) {
    let mut stream = Vec::new();
    for _ in 0..64 {
        stream.extend(&ASM);
        stream.extend(vec![0u8; 1020]);
    }

    let mut group = c.benchmark_group("synchronize");
    group.throughput(Throughput::Bytes(stream.len() as u64));
    group.bench_function("locked", |b| {
        b.iter(|| {
            let n = read_cadus(Cursor::new(&stream), 1024)
                .map_while(Result::ok)
                .count();
            assert_eq!(n, 64);
        });
    });
    group.finish();
}

criterion_group!(
    benches,
    bench_derandomize,
    bench_rs_correct_codeblock,
    bench_synchronize,
);
criterion_main!(benches);
