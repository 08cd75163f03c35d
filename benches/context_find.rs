use std::hint::black_box;

use criterion::*;
use rand::Rng;
use srtp_keydb::engine::{
    Database, DatabaseOptions, Derivation, Direction, KeyDeriver, SessionKeysMut, StreamId,
};

struct NoopDeriver;

impl KeyDeriver for NoopDeriver {
    fn derive(&self, _: &Derivation<'_>, _: SessionKeysMut<'_>) {}
}

/// A stream with a busy timeline: a new key every 500 packets.
fn busy_stream(keys: u8) -> (Database, StreamId) {
    let mut db = Database::new(DatabaseOptions::default()).unwrap();
    let stream = db.source_add(0x1234, true, 0).unwrap();

    for id in 0..keys {
        db.key_add(&[0, 0, 0, id], &[id; 16], &[id; 14], 0).unwrap();
    }

    for (i, id) in (0..keys).cycle().take(128).enumerate() {
        db.change_key_at(stream, &[0, 0, 0, id], i as u64 * 500, false)
            .unwrap();
    }

    (db, stream)
}

fn criterion_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("database");
    group.throughput(Throughput::Elements(1));

    {
        let (db, stream) = busy_stream(4);
        let mut rng = rand::rng();
        let indexes = (0..1024)
            .map(|_| rng.random_range(0..64_000u64))
            .collect::<Vec<_>>();

        let mut cursor = 0;
        group.bench_function("context_find", |bencher| {
            bencher.iter(|| {
                cursor = (cursor + 1) % indexes.len();
                black_box(db.context_find(stream, indexes[cursor]).unwrap());
            })
        });
    }

    {
        let (mut db, stream) = busy_stream(4);
        let mut rng = rand::rng();
        let indexes = (0..1024)
            .map(|_| rng.random_range(0..64_000u64))
            .collect::<Vec<_>>();

        // incoming packets are only marked on commit, prepare alone never replays
        let mut cursor = 0;
        group.bench_function("prepare_decrypt", |bencher| {
            bencher.iter(|| {
                cursor = (cursor + 1) % indexes.len();
                black_box(
                    db.prepare_keys(stream, indexes[cursor], Direction::Decrypt, &NoopDeriver)
                        .unwrap(),
                );
            })
        });
    }

    {
        let (mut db, stream) = busy_stream(4);
        let mut index = 0u64;

        group.bench_function("encrypt_packet_path", |bencher| {
            bencher.iter(|| {
                let selected = db
                    .prepare_keys(stream, index, Direction::Encrypt, &NoopDeriver)
                    .unwrap();
                db.commit(stream, selected.context, index, Direction::Encrypt)
                    .unwrap();

                index += 1;
            })
        });
    }

    group.finish();
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
