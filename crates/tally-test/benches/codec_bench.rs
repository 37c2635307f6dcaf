//! Benchmarks for the Tally wire codec

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use tally_core::Decimal;
use tally_wire::{decode_decimals, encode_decimal, encode_decimals, SlotPayload};

fn values(n: usize) -> Vec<Decimal> {
    (0..n).map(|i| Decimal::new(i as i64 * 12_345, 2)).collect()
}

fn payload(n: usize) -> SlotPayload {
    let values = values(n);
    SlotPayload::from_values(
        (0..n).map(|i| format!("currency_{}", i)).collect(),
        values.iter().map(|v| tally_core::to_f64(*v)).collect(),
        &values,
    )
}

fn bench_decimal_encode(c: &mut Criterion) {
    let value = Decimal::new(-987_654_321_012, 6);
    c.bench_function("decimal_encode", |b| b.iter(|| encode_decimal(black_box(value))));
}

fn bench_decimal_array(c: &mut Criterion) {
    let values = values(16);
    let bytes = encode_decimals(&values);

    c.bench_function("decimal_array_encode_16", |b| {
        b.iter(|| encode_decimals(black_box(&values)))
    });
    c.bench_function("decimal_array_decode_16", |b| {
        b.iter(|| decode_decimals(black_box(&bytes)).unwrap())
    });
}

fn bench_payload_roundtrip(c: &mut Criterion) {
    let payload = payload(8);
    let bytes = payload.encode().unwrap();

    c.bench_function("payload_encode_8", |b| b.iter(|| black_box(&payload).encode().unwrap()));
    c.bench_function("payload_decode_8", |b| {
        b.iter(|| {
            let parsed = SlotPayload::decode(black_box(&bytes)).unwrap();
            black_box(parsed)
        })
    });
}

criterion_group!(
    benches,
    bench_decimal_encode,
    bench_decimal_array,
    bench_payload_roundtrip
);
criterion_main!(benches);
