use criterion::{criterion_group, criterion_main, Criterion};
use chap_collab::buffer::{EditorSurface, TextBuffer};
use chap_collab::channel::{LocalHub, Topic};
use chap_collab::cursor::CursorColor;
use chap_collab::patch::{LogEntry, Origin, Patch, Position};
use chap_collab::protocol::{ChangeEvent, FileId, Frame, PresenceEvent};
use chap_collab::session::{FileSession, SessionConfig};
use chap_collab::store::MemoryStore;
use chap_collab::tabs::PresenceRegistry;
use std::hint::black_box;
use std::sync::Arc;

fn change_frame() -> Frame {
    let patch = Patch::new(
        Origin::Input,
        Position::new(12, 4),
        Position::new(12, 9),
        "hello",
        "world",
        42,
    );
    Frame::Change(ChangeEvent {
        file_id: FileId::from("src/main.rs"),
        log_entry: LogEntry::new("alice", Some("avatar.png".into()), patch.clone()),
        patch,
    })
}

fn bench_change_encode(c: &mut Criterion) {
    let frame = change_frame();
    c.bench_function("change_frame_encode", |b| {
        b.iter(|| black_box(black_box(&frame).encode().unwrap()))
    });
}

fn bench_change_decode(c: &mut Criterion) {
    let text = change_frame().encode().unwrap();
    c.bench_function("change_frame_decode", |b| {
        b.iter(|| black_box(Frame::decode(black_box(&text)).unwrap()))
    });
}

fn bench_buffer_replace_range(c: &mut Criterion) {
    let text: String = (0..10_000).map(|i| format!("line number {i}\n")).collect();
    let mut buffer = TextBuffer::from_text(&text);

    c.bench_function("buffer_replace_range_10k_lines", |b| {
        b.iter(|| {
            buffer.replace_range("x", Position::new(5_000, 4), Position::new(5_000, 4), Origin::Input);
            buffer.replace_range("", Position::new(5_000, 4), Position::new(5_000, 5), Origin::Delete);
        })
    });
}

fn bench_session_local_edit(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let _guard = rt.enter();
    let hub = LocalHub::new("bench");
    let (_, channel) = hub.connect("alice");
    let (mut session, _) = rt.block_on(FileSession::open(
        FileId::from("F"),
        SessionConfig::new("alice", "bench"),
        TextBuffer::new(),
        channel,
        Arc::new(MemoryStore::new()),
    ));

    c.bench_function("session_local_edit", |b| {
        b.iter(|| {
            black_box(session.local_edit("a", Position::ZERO, Position::ZERO, Origin::Input));
        })
    });
}

fn bench_hub_fan_out(c: &mut Criterion) {
    let hub = LocalHub::new("bench");
    let file = FileId::from("F");
    let (_, sender) = hub.connect("sender");
    let mut subscriptions: Vec<_> = (0..100)
        .map(|i| {
            let (_, channel) = hub.connect(format!("peer-{i}"));
            channel.subscribe(Topic::File(file.clone()))
        })
        .collect();
    let patch = Patch::insert(Origin::Input, Position::ZERO, "x", 1);
    let entry = LogEntry::new("sender", None, patch.clone());

    c.bench_function("hub_fan_out_100_peers", |b| {
        b.iter(|| {
            sender.publish(&file, patch.clone(), entry.clone()).unwrap();
            for sub in &mut subscriptions {
                black_box(sub.try_next());
            }
        })
    });
}

fn bench_presence_joins(c: &mut Criterion) {
    let events: Vec<Frame> = (0..1_000)
        .map(|i| {
            Frame::UserJoined(PresenceEvent {
                file_id: Some(FileId::new(format!("F{}", i % 20))),
                username: Some(format!("user-{}", i % 50)),
                image: None,
                is_active_in_tab: Some(i % 3 == 0),
                is_live: Some(true),
                last_seen_timestamp: Some(i),
                project_id: Some("bench".into()),
            })
        })
        .collect();

    c.bench_function("presence_1000_user_joined", |b| {
        b.iter(|| {
            let mut registry = PresenceRegistry::new();
            for i in 0..20 {
                registry.open_tab(FileId::new(format!("F{i}")));
            }
            for event in &events {
                registry.apply(event);
            }
            black_box(registry.records().count())
        })
    });
}

fn bench_cursor_color(c: &mut Criterion) {
    c.bench_function("cursor_color_from_username", |b| {
        b.iter(|| black_box(CursorColor::from_username(black_box("collaborator-42"))))
    });
}

criterion_group!(
    benches,
    bench_change_encode,
    bench_change_decode,
    bench_buffer_replace_range,
    bench_session_local_edit,
    bench_hub_fan_out,
    bench_presence_joins,
    bench_cursor_color,
);
criterion_main!(benches);
