use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};

use slink::identity::Principal;
use slink::token::TokenCodec;

fn bench_token(c: &mut Criterion) {
    let codec = TokenCodec::new("bench-secret").expect("secret");
    let principal = Principal::new("bench-user", false);
    let token = codec.sign(&principal).expect("sign");
    let mut tampered = token.clone();
    tampered.pop();
    tampered.push('A');

    let mut group = c.benchmark_group("token");
    group.throughput(Throughput::Elements(1));
    group.bench_function("sign", |b| {
        b.iter(|| black_box(codec.sign(black_box(&principal)).expect("sign")))
    });
    group.bench_function("verify_ok", |b| b.iter(|| black_box(codec.verify(black_box(&token)))));
    group.bench_function("verify_reject", |b| b.iter(|| black_box(codec.verify(black_box(&tampered)))));
    group.finish();
}

criterion_group!(benches, bench_token);
criterion_main!(benches);
