//! Criterion benchmarks for the datagram codec and the move engine.
//!
//! Run with:
//! ```bash
//! cargo bench --package kalah-core --bench codec_bench
//! ```

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use kalah_core::protocol::{decode_datagram, encode_datagram, ErrorCode, Frame};
use kalah_core::{apply_move, Board, Seat};

// ── Datagram fixtures ─────────────────────────────────────────────────────────

fn make_client_burst() -> Vec<Frame> {
    vec![
        Frame::Timestamp(1_700_000_000_000),
        Frame::JoinUsername("bench-user".to_string()),
        Frame::LobbySelect(1),
        Frame::Move(2),
    ]
}

fn make_server_burst() -> Vec<Frame> {
    let board = Board::default();
    vec![
        Frame::StartGame {
            board,
            turn: true,
            spectator: false,
        },
        Frame::UpdateGame { board, turn: false },
        Frame::ChatMessage("ada: good luck".to_string()),
        Frame::error(ErrorCode::InvalidMove, "pit 3 is empty"),
    ]
}

fn make_chat_datagram(frames: usize) -> Vec<Frame> {
    (0..frames)
        .map(|i| Frame::ChatMessage(format!("message number {i}")))
        .collect()
}

// ── Benchmarks ────────────────────────────────────────────────────────────────

fn bench_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("encode_datagram");
    for (name, frames) in [
        ("client_burst", make_client_burst()),
        ("server_burst", make_server_burst()),
    ] {
        group.bench_with_input(BenchmarkId::from_parameter(name), &frames, |b, f| {
            b.iter(|| encode_datagram(black_box(f)).expect("encode"))
        });
    }
    group.finish();
}

fn bench_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("decode_datagram");
    for count in [1usize, 16, 256] {
        let bytes = encode_datagram(&make_chat_datagram(count)).expect("encode");
        group.bench_with_input(BenchmarkId::new("chat_frames", count), &bytes, |b, bytes| {
            b.iter(|| decode_datagram(black_box(bytes)))
        });
    }
    group.finish();
}

fn bench_apply_move(c: &mut Criterion) {
    let board = Board::default();
    c.bench_function("apply_move_opening", |b| {
        b.iter(|| apply_move(black_box(&board), Seat::South, black_box(2)))
    });
}

criterion_group!(benches, bench_encode, bench_decode, bench_apply_move);
criterion_main!(benches);
