use std::{net::SocketAddr, thread};

use anyhow::Result;
use srtp_keydb::{
    SharedDatabase,
    engine::{DatabaseOptions, Derivation, Direction, KeyDeriver, SessionKeysMut},
};

struct Passthrough;

impl KeyDeriver for Passthrough {
    fn derive(&self, derivation: &Derivation<'_>, keys: SessionKeysMut<'_>) {
        keys.encrypt_key
            .copy_from_slice(derivation.master.master_key());
    }
}

#[test]
fn shared_database_test() -> Result<()> {
    let db = SharedDatabase::new(DatabaseOptions::default())?;

    let streams = {
        let mut locked = db.lock();
        locked.key_add(&[0, 0, 0, 1], &[7; 16], &[8; 14], 1 << 10)?;

        let mut streams = Vec::new();
        for port in 0..8u16 {
            let address = SocketAddr::from(([127, 0, 0, 1], 5000 + port));
            let stream = locked.dest_add(port as u32, true, 0, address)?;
            locked.change_key(stream, &[0, 0, 0, 1], false)?;
            streams.push(stream);
        }

        streams
    };

    let workers = streams
        .iter()
        .map(|stream| {
            let db = db.clone();
            let stream = *stream;

            thread::spawn(move || {
                for index in 0..5000u64 {
                    let key = db.process(stream, index, Direction::Encrypt, &Passthrough, |context, _| {
                        Ok(context.current_encrypt_key().to_vec())
                    })?;

                    assert_eq!(key, vec![7; 16]);
                }

                Ok::<_, srtp_keydb::engine::Error>(())
            })
        })
        .collect::<Vec<_>>();

    for worker in workers {
        worker.join().expect("worker panicked")?;
    }

    let db = db.lock();
    let key = db.key_find(&[0, 0, 0, 1])?;
    assert_eq!(db.key_context_count(key)?, streams.len());

    for stream in streams {
        assert_eq!(db.stream_max_index(stream)?, 4999);
        assert_eq!(db.context(db.context_find(stream, 4999)?)?.count(), 5000);
    }

    Ok(())
}
