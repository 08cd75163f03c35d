use std::{cell::Cell, fmt, fs::read_to_string, net::SocketAddr};

use ahash::{HashMap, HashMapExt};
use anyhow::{Result, anyhow};
use base64::{Engine, prelude::BASE64_STANDARD};
use engine::{
    Derivation, Direction, Error, KeyDeriver, KeySlot, SessionKeysMut, StreamId, Switch,
    index::rtp_index,
};
use serde::Deserialize;

use crate::SharedDatabase;

/// Master key given inline, every field base64 encoded as in SDES
/// `inline:` parameters.
#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
pub struct KeyEntry {
    pub mki: String,
    pub key: String,
    pub salt: String,
    #[serde(default)]
    pub derivation_rate: u64,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
pub struct StreamEntry {
    pub name: String,
    pub ssrc: u32,
    #[serde(default = "StreamEntry::rtp")]
    pub rtp: bool,
    #[serde(default)]
    pub init_index: u64,
    ///
    /// Peer address of a local destination, packets on it are encrypted.
    /// Streams without address are remote sources and are decrypted.
    ///
    #[serde(default)]
    pub address: Option<SocketAddr>,
}

impl StreamEntry {
    fn rtp() -> bool {
        true
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Event {
    #[serde(rename_all = "kebab-case")]
    ChangeKey {
        stream: String,
        mki: String,
        ///
        /// First index the key applies to, the next packet of the stream when
        /// absent.
        ///
        #[serde(default)]
        index: Option<u64>,
        #[serde(default)]
        trigger: bool,
    },
    #[serde(rename_all = "kebab-case")]
    Packet {
        stream: String,
        #[serde(default)]
        index: Option<u64>,
        #[serde(default)]
        roc: u32,
        #[serde(default)]
        seq: Option<u16>,
        ///
        /// MKI carried by an incoming packet.
        ///
        #[serde(default)]
        mki: Option<String>,
        ///
        /// Whether the packet passes authentication.
        ///
        #[serde(default = "Event::authentic")]
        authentic: bool,
    },
    RemoveKey {
        mki: String,
    },
    ClearKeys {
        stream: String,
    },
    RemoveStream {
        stream: String,
    },
    SsrcChanged {
        old: u32,
        new: u32,
    },
}

impl Event {
    fn authentic() -> bool {
        true
    }
}

#[derive(Deserialize, Debug, Default, Clone)]
#[serde(rename_all = "kebab-case")]
pub struct Trace {
    #[serde(default)]
    pub keys: Vec<KeyEntry>,
    #[serde(default)]
    pub streams: Vec<StreamEntry>,
    #[serde(default)]
    pub events: Vec<Event>,
}

impl Trace {
    pub fn load(path: &str) -> Result<Self> {
        Self::from_json5(&read_to_string(path)?)
    }

    pub fn from_json5(value: &str) -> Result<Self> {
        Ok(serde_json5::from_str(value)?)
    }
}

/// Outcome counters of a replayed trace.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Summary {
    pub accepted: usize,
    pub old_keys: usize,
    pub replayed: usize,
    pub no_key: usize,
    pub invalid_index: usize,
    pub key_limit: usize,
    pub failed: usize,
    pub derived: usize,
    pub switches: usize,
}

impl fmt::Display for Summary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "accepted={} (old keys={}), dropped: replayed={}, no key={}, invalid index={}, key limit={}, failed={}; derivations={}, key switches={}",
            self.accepted,
            self.old_keys,
            self.replayed,
            self.no_key,
            self.invalid_index,
            self.key_limit,
            self.failed,
            self.derived,
            self.switches,
        )
    }
}

/// Stand-in key derivation for traces.
///
/// It does not implement the AES-CM key derivation function, it only makes
/// keys derived from different master keys or at different indexes
/// distinguishable in the logs.
#[derive(Default)]
struct TraceDeriver {
    derived: Cell<usize>,
    switches: Cell<usize>,
}

impl KeyDeriver for TraceDeriver {
    fn derive(&self, derivation: &Derivation<'_>, keys: SessionKeysMut<'_>) {
        self.derived.set(self.derived.get() + 1);

        let label = derivation.index.to_be_bytes();
        for (buffer, material) in [
            (keys.encrypt_key, derivation.master.master_key()),
            (keys.auth_key, derivation.master.master_key()),
            (keys.salt, derivation.master.master_salt()),
        ] {
            for (i, byte) in buffer.iter_mut().enumerate() {
                *byte = material[i % material.len()] ^ label[i % label.len()];
            }
        }
    }

    fn on_key_limit(&self, key: engine::KeyId) {
        log::warn!("master key reached its limit: key={key:?}");
    }

    fn on_key_switch(&self, switch: &Switch) {
        self.switches.set(self.switches.get() + 1);
        log::info!(
            "stream switched key: stream={:?}, index={}, key={:?}",
            switch.stream,
            switch.index,
            switch.key
        );
    }
}

/// Replays trace events against a database.
///
/// # Test
///
/// ```
/// use srtp_keydb::{SharedDatabase, engine::DatabaseOptions, trace::{Player, Trace}};
///
/// let trace = Trace::from_json5(
///     r#"{
///         keys: [{ mki: "AAAAAQ==", key: "AQEBAQEBAQEBAQEBAQEBAQ==", salt: "AgICAgICAgICAgICAgI=" }],
///         streams: [{ name: "alice", ssrc: 1 }],
///         events: [
///             { type: "change-key", stream: "alice", mki: "AAAAAQ==" },
///             { type: "packet", stream: "alice", seq: 0 },
///             { type: "packet", stream: "alice", seq: 1 },
///             { type: "packet", stream: "alice", seq: 1 },
///         ],
///     }"#,
/// )
/// .unwrap();
///
/// let mut player = Player::new(SharedDatabase::new(DatabaseOptions::default()).unwrap(), &trace).unwrap();
/// let summary = player.run(&trace.events).unwrap();
///
/// assert_eq!(summary.accepted, 2);
/// assert_eq!(summary.replayed, 1);
/// assert_eq!(summary.derived, 1);
/// ```
pub struct Player {
    db: SharedDatabase,
    streams: HashMap<String, StreamId>,
    deriver: TraceDeriver,
    summary: Summary,
}

impl Player {
    /// Registers the keys and streams of the trace.
    pub fn new(db: SharedDatabase, trace: &Trace) -> Result<Self> {
        let mut streams = HashMap::with_capacity(trace.streams.len());

        {
            let mut locked = db.lock();

            for key in &trace.keys {
                locked.key_add(
                    &decode(&key.mki)?,
                    &decode(&key.key)?,
                    &decode(&key.salt)?,
                    key.derivation_rate,
                )?;
            }

            for entry in &trace.streams {
                let stream = match entry.address {
                    Some(address) => locked.dest_add(entry.ssrc, entry.rtp, entry.init_index, address)?,
                    None => locked.source_add(entry.ssrc, entry.rtp, entry.init_index)?,
                };

                if streams.insert(entry.name.clone(), stream).is_some() {
                    return Err(anyhow!("duplicate stream name: {}", entry.name));
                }
            }
        }

        Ok(Self {
            deriver: TraceDeriver::default(),
            summary: Summary::default(),
            streams,
            db,
        })
    }

    pub fn run(&mut self, events: &[Event]) -> Result<Summary> {
        for event in events {
            self.apply(event)?;
        }

        self.summary.derived = self.deriver.derived.get();
        self.summary.switches = self.deriver.switches.get();
        Ok(self.summary)
    }

    fn apply(&mut self, event: &Event) -> Result<()> {
        match event {
            Event::ChangeKey {
                stream,
                mki,
                index,
                trigger,
            } => {
                let id = self.stream(stream)?;
                let mki = decode(mki)?;

                let mut db = self.db.lock();
                let scheduled = match index {
                    Some(index) => db.change_key_at(id, &mki, *index, *trigger),
                    None => db.change_key(id, &mki, *trigger),
                };

                match scheduled {
                    Ok(scheduled) => log::info!("key scheduled: stream={stream}, result={scheduled:?}"),
                    Err(e) => log::warn!("key change rejected: stream={stream}, err={e}"),
                }
            }
            Event::Packet {
                stream,
                index,
                roc,
                seq,
                mki,
                authentic,
            } => {
                let index = index
                    .or_else(|| seq.map(|seq| rtp_index(*roc, seq)))
                    .ok_or_else(|| anyhow!("packet without index: stream={stream}"))?;

                self.packet(stream, index, mki.as_deref(), *authentic)?;
            }
            Event::RemoveKey { mki } => {
                let mut db = self.db.lock();
                let key = db.key_find(&decode(mki)?)?;
                db.key_remove(key)?;
            }
            Event::ClearKeys { stream } => {
                let id = self.stream(stream)?;
                self.db.lock().clear_keys(id)?;
            }
            Event::RemoveStream { stream } => {
                let id = self.stream(stream)?;

                let mut db = self.db.lock();
                if db.stream(id)?.is_remote() {
                    db.source_remove(id)?;
                } else {
                    db.dest_remove(id)?;
                }

                self.streams.remove(stream);
            }
            Event::SsrcChanged { old, new } => {
                let mut db = self.db.lock();

                let moving = self
                    .streams
                    .iter()
                    .filter_map(|(name, id)| {
                        let stream = db.stream(*id).ok()?;
                        (stream.ssrc() == *old).then_some((name.clone(), stream.address()?))
                    })
                    .collect::<Vec<_>>();

                db.ssrc_changed(*old, *new)?;

                for (name, address) in moving {
                    self.streams.insert(name, db.dest_find(*new, address)?);
                }
            }
        }

        Ok(())
    }

    fn packet(&mut self, name: &str, index: u64, mki: Option<&str>, authentic: bool) -> Result<()> {
        let stream = self.stream(name)?;
        let direction = if self.db.lock().stream(stream)?.is_remote() {
            Direction::Decrypt
        } else {
            Direction::Encrypt
        };

        if let (Some(mki), Direction::Decrypt) = (mki, direction) {
            let rekeyed = self.db.lock().rekey_from_mki(stream, index, &decode(mki)?);
            if let Err(e) = rekeyed {
                log::warn!("packet dropped: stream={name}, index={index}, err={e}");
                self.count(e);
                return Ok(());
            }
        }

        let result = self.db.process(stream, index, direction, &self.deriver, |_, selected| {
            if authentic {
                Ok(selected)
            } else {
                Err(Error::BadParameter)
            }
        });

        match result {
            Ok(selected) => {
                log::info!(
                    "packet accepted: stream={name}, index={index}, direction={direction:?}, slot={:?}",
                    selected.slot
                );

                self.summary.accepted += 1;
                if selected.slot == KeySlot::Old {
                    self.summary.old_keys += 1;
                }
            }
            Err(e) => {
                log::warn!("packet dropped: stream={name}, index={index}, direction={direction:?}, err={e}");
                self.count(e);
            }
        }

        Ok(())
    }

    fn count(&mut self, error: Error) {
        match error {
            Error::ReplayedPacket => self.summary.replayed += 1,
            Error::NotFound => self.summary.no_key += 1,
            Error::InvalidIndex => self.summary.invalid_index += 1,
            Error::KeyLimitReached => self.summary.key_limit += 1,
            _ => self.summary.failed += 1,
        }
    }

    fn stream(&self, name: &str) -> Result<StreamId> {
        self.streams
            .get(name)
            .copied()
            .ok_or_else(|| anyhow!("unknown stream: {name}"))
    }
}

fn decode(value: &str) -> Result<Vec<u8>> {
    Ok(BASE64_STANDARD.decode(value)?)
}
