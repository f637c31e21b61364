//! Protocol encoding/decoding benchmarks.

use bytes::Bytes;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use evstore_protocol::message::{
    EventRecord, NewEvent, ReadStreamEventsCompleted, ReadStreamResult, ResolvedIndexedEvent,
    WriteEvents,
};
use evstore_protocol::{Credentials, DispatchTable, Frame, ReadBuffer, TcpCommand};
use uuid::Uuid;

fn create_write(events: usize, data_size: usize) -> WriteEvents {
    WriteEvents {
        event_stream_id: "orders-1".to_string(),
        expected_version: -2,
        events: (0..events)
            .map(|_| NewEvent {
                event_id: Uuid::new_v4().as_bytes().to_vec(),
                event_type: "OrderPlaced".to_string(),
                data_content_type: 1,
                metadata_content_type: 0,
                data: vec![b'x'; data_size],
                metadata: None,
            })
            .collect(),
        require_master: true,
    }
}

fn create_page(events: usize) -> ReadStreamEventsCompleted {
    ReadStreamEventsCompleted {
        events: (0..events as i64)
            .map(|n| ResolvedIndexedEvent {
                event: Some(EventRecord {
                    event_stream_id: "orders-1".to_string(),
                    event_number: n,
                    event_id: Uuid::new_v4().as_bytes().to_vec(),
                    event_type: "OrderPlaced".to_string(),
                    data_content_type: 1,
                    metadata_content_type: 0,
                    data: format!("{{\"n\":{}}}", n).into_bytes(),
                    metadata: None,
                    created: None,
                    created_epoch: Some(1_700_000_000_000),
                }),
                link: None,
            })
            .collect(),
        result: ReadStreamResult::Success as i32,
        next_event_number: events as i64,
        last_event_number: events as i64 - 1,
        is_end_of_stream: true,
        last_commit_position: 4096,
        error: None,
    }
}

fn bench_frame_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("frame_encode");
    let credentials = Credentials::new("admin", "changeit").unwrap();

    for size in [100, 1000, 10000] {
        let frame = Frame::new(
            TcpCommand::WriteEvents,
            Uuid::new_v4(),
            Bytes::from("x".repeat(size)),
        )
        .with_credentials(Some(credentials.clone()));

        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &frame, |b, frame| {
            b.iter(|| black_box(frame.encode().unwrap()));
        });
    }

    group.finish();
}

fn bench_frame_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("frame_decode");

    for size in [100, 1000, 10000] {
        let frame = Frame::new(
            TcpCommand::WriteEvents,
            Uuid::new_v4(),
            Bytes::from("x".repeat(size)),
        );
        let encoded = frame.encode().unwrap();

        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &encoded, |b, encoded| {
            b.iter(|| {
                let mut buf = encoded.clone();
                black_box(Frame::decode(&mut buf).unwrap())
            });
        });
    }

    group.finish();
}

fn bench_write_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("write_events_encode");

    for events in [1, 10, 100] {
        let message = create_write(events, 256);

        group.throughput(Throughput::Elements(events as u64));
        group.bench_with_input(BenchmarkId::from_parameter(events), &message, |b, message| {
            b.iter(|| {
                black_box(
                    Frame::from_message(TcpCommand::WriteEvents, Uuid::nil(), message)
                        .encode()
                        .unwrap(),
                )
            });
        });
    }

    group.finish();
}

fn bench_page_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("read_page_decode");

    for events in [10, 100, 500] {
        let frame = Frame::from_message(
            TcpCommand::ReadStreamEventsForwardCompleted,
            Uuid::new_v4(),
            &create_page(events),
        );

        group.throughput(Throughput::Elements(events as u64));
        group.bench_with_input(BenchmarkId::from_parameter(events), &frame, |b, frame| {
            b.iter(|| black_box(frame.decode_payload::<ReadStreamEventsCompleted>().unwrap()));
        });
    }

    group.finish();
}

fn bench_read_buffer(c: &mut Criterion) {
    let mut group = c.benchmark_group("read_buffer");

    // A burst of replies delivered in small chunks, as a socket would.
    for chunk_size in [64, 1024, 16 * 1024] {
        let mut wire = Vec::new();
        for _ in 0..32 {
            let frame = Frame::from_message(
                TcpCommand::ReadStreamEventsForwardCompleted,
                Uuid::new_v4(),
                &create_page(20),
            );
            wire.extend_from_slice(&frame.encode().unwrap());
        }

        group.throughput(Throughput::Bytes(wire.len() as u64));
        group.bench_with_input(
            BenchmarkId::from_parameter(chunk_size),
            &wire,
            |b, wire| {
                b.iter(|| {
                    let mut buffer = ReadBuffer::new(DispatchTable::new());
                    for chunk in wire.chunks(chunk_size) {
                        buffer.extend(chunk).unwrap();
                    }
                    black_box(buffer.drain())
                });
            },
        );
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_frame_encode,
    bench_frame_decode,
    bench_write_encode,
    bench_page_decode,
    bench_read_buffer,
);

criterion_main!(benches);
