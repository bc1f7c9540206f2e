use criterion::{black_box, criterion_group, criterion_main, Criterion};

use conwatch::metrics::Aggregator;
use conwatch::tracer::parse::{decode_record, RECORD_SIZE};

fn raw_record(event_type: u8, protocol: u8) -> Vec<u8> {
    let mut buf = Vec::with_capacity(RECORD_SIZE);
    buf.extend_from_slice(&4242u32.to_le_bytes()); // pid
    buf.extend_from_slice(&4243u32.to_le_bytes()); // tid
    buf.extend_from_slice(&0x0100_007Fu32.to_le_bytes()); // saddr
    buf.extend_from_slice(&0x0101_A8C0u32.to_le_bytes()); // daddr
    buf.extend_from_slice(&55000u16.to_le_bytes()); // sport
    buf.extend_from_slice(&443u16.to_le_bytes()); // dport
    buf.push(event_type);
    buf.push(protocol);
    buf.extend_from_slice(&1_700_000_000_000u64.to_le_bytes()); // timestamp_ns
    buf.extend_from_slice(&65536u64.to_le_bytes()); // bytes_sent
    buf.extend_from_slice(&131072u64.to_le_bytes()); // bytes_received
    buf.extend_from_slice(&250u32.to_le_bytes()); // rtt_us
    buf.extend_from_slice(&1500u32.to_le_bytes()); // duration_ms
    buf.push(1); // tcp_state
    buf.push(0); // reset_reason
    buf
}

fn bench_decode(c: &mut Criterion) {
    let open = raw_record(1, 6);
    let close = raw_record(2, 6);

    c.bench_function("decode_record_open", |b| {
        b.iter(|| decode_record(black_box(&open)))
    });
    c.bench_function("decode_record_close", |b| {
        b.iter(|| decode_record(black_box(&close)))
    });
}

fn bench_aggregate(c: &mut Criterion) {
    let agg = Aggregator::new(Vec::new());
    let events: Vec<_> = [(1u8, 6u8), (6, 6), (2, 6), (1, 17), (4, 6)]
        .iter()
        .map(|&(t, p)| decode_record(&raw_record(t, p)).unwrap())
        .collect();

    c.bench_function("aggregator_apply_mixed", |b| {
        b.iter(|| {
            for event in &events {
                agg.apply(black_box(event));
            }
        })
    });
}

fn bench_pipeline(c: &mut Criterion) {
    let agg = Aggregator::new(Vec::new());
    let raw = raw_record(2, 6);

    c.bench_function("decode_and_apply", |b| {
        b.iter(|| {
            let event = decode_record(black_box(&raw)).unwrap();
            agg.apply(&event);
        })
    });
}

criterion_group!(benches, bench_decode, bench_aggregate, bench_pipeline);
criterion_main!(benches);
