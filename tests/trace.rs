use anyhow::Result;
use srtp_keydb::{
    SharedDatabase,
    engine::DatabaseOptions,
    trace::{Player, Summary, Trace},
};

fn play(trace: &Trace) -> Result<(SharedDatabase, Summary)> {
    let db = SharedDatabase::new(DatabaseOptions::default())?;
    let summary = Player::new(db.clone(), trace)?.run(&trace.events)?;

    Ok((db, summary))
}

#[test]
fn trace_sample_test() -> Result<()> {
    let trace = Trace::from_json5(include_str!("./samples/trace.json5"))?;
    let (db, summary) = play(&trace)?;

    assert_eq!(
        summary,
        Summary {
            accepted: 14,
            old_keys: 2,
            replayed: 2,
            no_key: 0,
            invalid_index: 0,
            key_limit: 0,
            failed: 1,
            derived: 7,
            switches: 1,
        }
    );

    let db = db.lock();
    let video = db.dest_find(2222, "127.0.0.1:5002".parse()?)?;
    let key = db.key_find(&[0, 0, 0, 2])?;

    assert_eq!(db.context(db.context_find(video, 3)?)?.master_key(), Some(key));
    assert_eq!(db.stream_max_index(video)?, 3);

    Ok(())
}

#[test]
fn trace_management_test() -> Result<()> {
    let trace = Trace::from_json5(
        r#"{
            keys: [
                { mki: "AAAAAQ==", key: "AQEBAQEBAQEBAQEBAQEBAQ==", salt: "AgICAgICAgICAgICAgI=" },
                { mki: "AAAAAg==", key: "AwMDAwMDAwMDAwMDAwMDAw==", salt: "BAQEBAQEBAQEBAQEBAQ=" },
            ],
            streams: [
                { name: "out", ssrc: 1, address: "127.0.0.1:5000" },
                { name: "in", ssrc: 2, rtp: false },
            ],
            events: [
                { type: "change-key", stream: "out", mki: "AAAAAQ==" },
                { type: "change-key", stream: "in", mki: "AAAAAg==" },
                { type: "packet", stream: "out", index: 0 },
                { type: "packet", stream: "in", index: 0 },

                { type: "ssrc-changed", old: 1, new: 9 },
                { type: "packet", stream: "out", index: 1 },
                { type: "change-key", stream: "out", mki: "AAAAAQ==" },
                { type: "packet", stream: "out", index: 0 },

                { type: "remove-key", mki: "AAAAAg==" },
                { type: "packet", stream: "in", index: 1 },

                { type: "clear-keys", stream: "out" },
                { type: "packet", stream: "out", index: 1 },

                { type: "packet", stream: "in", index: 2, mki: "AAAAAQ==" },
                { type: "remove-stream", stream: "in" },
            ],
        }"#,
    )?;

    let (db, summary) = play(&trace)?;

    // after the SSRC change the destination starts over without keys
    assert_eq!(summary.accepted, 4);
    assert_eq!(summary.no_key, 3);
    assert_eq!(summary.derived, 4);

    let db = db.lock();
    let out = db.dest_find(9, "127.0.0.1:5000".parse()?)?;
    assert!(db.dest_find(1, "127.0.0.1:5000".parse()?).is_err());
    assert!(db.stream(out)?.history().is_empty());
    assert!(db.source_find(2, false).is_err());
    assert_eq!(db.stream_count(), 1);
    assert_eq!(db.key_count(), 1);

    Ok(())
}

#[test]
fn trace_unknown_stream_test() -> Result<()> {
    let trace = Trace::from_json5(
        r#"{ events: [{ type: "packet", stream: "missing", seq: 1 }] }"#,
    )?;

    let db = SharedDatabase::new(DatabaseOptions::default())?;
    assert!(Player::new(db, &trace)?.run(&trace.events).is_err());

    Ok(())
}
