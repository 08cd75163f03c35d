use std::{hash::Hash, net::SocketAddr};

use pool::{ObjectPool, Table};

use crate::{
    Arena, Context, ContextId, DatabaseOptions, Entry, Error, KeyId, KeySlot, MasterKey,
    Scheduled, Stream, StreamId, Switch, stream::plan_trigger,
};

/// SRTP/SRTCP key database
///
/// Holds the master keys, the remote sources and local destinations, and the
/// contexts binding keys to streams over ranges of packet indexes.
///
/// Sources are identified by SSRC and protocol, destinations by SSRC and
/// transport address, so the same SSRC can be sent to several peers with
/// independent key schedules.
///
/// # Test
///
/// ```
/// use srtp_keydb_engine::*;
///
/// let mut db = Database::new(DatabaseOptions::default()).unwrap();
/// let key = db.key_add(&[0, 0, 0, 1], &[1; 16], &[2; 14], 0).unwrap();
/// let stream = db.source_add(0x1234, true, 0).unwrap();
///
/// db.context_add(stream, 0, Some(key), false).unwrap();
///
/// let context = db.context_find(stream, 10).unwrap();
/// assert_eq!(db.context(context).unwrap().master_key(), Some(key));
/// assert_eq!(db.key_context_count(key), Ok(1));
/// ```
pub struct Database {
    pub(crate) options: DatabaseOptions,
    pub(crate) arena: Arena,
    pub(crate) streams: ObjectPool<Stream>,
    keys: Table<Box<[u8]>, KeyId>,
    sources: Table<(u32, bool), StreamId>,
    destinations: Table<(u32, SocketAddr), StreamId>,
}

impl Database {
    /// Returns [`Error::BadParameter`] when the options do not validate.
    pub fn new(mut options: DatabaseOptions) -> Result<Self, Error> {
        options.validate()?;

        Ok(Self {
            arena: Arena::new(options.key_pool, options.context_pool),
            streams: ObjectPool::new(options.stream_pool),
            keys: Table::new(options.key_table),
            sources: Table::new(options.source_table),
            destinations: Table::new(options.destination_table),
            options,
        })
    }

    pub fn options(&self) -> &DatabaseOptions {
        &self.options
    }

    pub fn arena(&self) -> &Arena {
        &self.arena
    }

    pub fn key_count(&self) -> usize {
        self.arena.keys.len()
    }

    pub fn stream_count(&self) -> usize {
        self.streams.len()
    }

    pub fn context_count(&self) -> usize {
        self.arena.contexts.len()
    }

    /// Registers a master key under its MKI.
    ///
    /// The lengths of `mki`, `key` and `salt` have to match the configured
    /// sizes. A key already registered under the same MKI is reported in
    /// [`Error::DuplicateEntry`].
    ///
    /// # Test
    ///
    /// ```
    /// use srtp_keydb_engine::*;
    ///
    /// let mut db = Database::new(DatabaseOptions::default()).unwrap();
    /// let key = db.key_add(&[0, 0, 0, 1], &[1; 16], &[2; 14], 0).unwrap();
    ///
    /// assert_eq!(
    ///     db.key_add(&[0, 0, 0, 1], &[3; 16], &[4; 14], 0),
    ///     Err(Error::DuplicateEntry(Entry::Key(key)))
    /// );
    ///
    /// assert_eq!(db.key_add(&[0, 0, 1], &[3; 16], &[4; 14], 0), Err(Error::BadParameter));
    /// assert_eq!(db.key_find(&[0, 0, 0, 1]), Ok(key));
    /// assert_eq!(db.key(key).unwrap().master_salt(), &[2; 14]);
    /// ```
    pub fn key_add(
        &mut self,
        mki: &[u8],
        key: &[u8],
        salt: &[u8],
        derivation_rate: u64,
    ) -> Result<KeyId, Error> {
        if mki.len() != self.options.mki_size
            || key.len() != self.options.master_key_size
            || salt.len() != self.options.master_salt_size
        {
            return Err(Error::BadParameter);
        }

        let id = self
            .arena
            .keys
            .alloc(MasterKey::new(key, salt, mki, derivation_rate))?;

        match self.keys.insert_unique(Box::from(mki), id) {
            Ok(None) => {
                log::debug!("master key added: mki={mki:?}, rate={derivation_rate}");
                Ok(id)
            }
            Ok(Some(existing)) => {
                let existing = *existing;
                self.arena.keys.release(id);
                Err(Error::DuplicateEntry(Entry::Key(existing)))
            }
            Err(e) => {
                self.arena.keys.release(id);
                Err(e.into())
            }
        }
    }

    pub fn key_find(&self, mki: &[u8]) -> Result<KeyId, Error> {
        self.keys.get(mki).copied().ok_or(Error::NotFound)
    }

    pub fn key(&self, key: KeyId) -> Result<&MasterKey, Error> {
        self.arena.key(key).ok_or(Error::NotFound)
    }

    /// number of contexts currently using the key.
    pub fn key_context_count(&self, key: KeyId) -> Result<usize, Error> {
        Ok(self.key(key)?.context_count())
    }

    /// Removes a master key together with every context using it.
    ///
    /// Every range the key covered is left to a NULL context, no key applies
    /// to those indexes until another one is scheduled.
    ///
    /// # Test
    ///
    /// ```
    /// use srtp_keydb_engine::*;
    ///
    /// let mut db = Database::new(DatabaseOptions::default()).unwrap();
    /// let a = db.key_add(&[0, 0, 0, 1], &[1; 16], &[2; 14], 0).unwrap();
    /// let b = db.key_add(&[0, 0, 0, 2], &[3; 16], &[4; 14], 0).unwrap();
    /// let stream = db.source_add(0x1234, true, 0).unwrap();
    ///
    /// db.context_add(stream, 0, Some(a), false).unwrap();
    /// db.context_add(stream, 100, Some(b), false).unwrap();
    /// db.context_add(stream, 200, Some(a), false).unwrap();
    ///
    /// db.key_remove(b).unwrap();
    ///
    /// assert_eq!(db.key_find(&[0, 0, 0, 2]), Err(Error::NotFound));
    /// assert_eq!(db.context_find(stream, 150), Err(Error::NotFound));
    /// assert_eq!(db.stream(stream).unwrap().history().len(), 3);
    /// assert_eq!(db.key_context_count(a), Ok(2));
    /// ```
    pub fn key_remove(&mut self, key: KeyId) -> Result<(), Error> {
        let master = self.arena.key(key).ok_or(Error::NotFound)?;
        let mki: Box<[u8]> = Box::from(master.mki());
        let contexts = master.contexts().to_vec();

        for context in contexts {
            // an earlier removal may already have merged this one away
            let Some(owner) = self.arena.context(context).map(Context::stream) else {
                continue;
            };

            let removed = match self.streams.get_mut(owner) {
                Some(stream) => stream.remove_context(&mut self.arena, context),
                None => Err(Error::NotFound),
            };

            if let Err(e) = removed {
                log::error!("orphaned context destroyed: context={context:?}, err={e}");
                self.arena.destroy_context(context);
            }
        }

        self.keys.remove(&mki[..]);
        self.arena.keys.release(key);

        log::debug!("master key removed: mki={mki:?}");
        Ok(())
    }

    /// Adds a remote source, the stream packets are received on.
    ///
    /// `init_index` is the index of the first expected packet.
    pub fn source_add(&mut self, ssrc: u32, is_rtp: bool, init_index: u64) -> Result<StreamId, Error> {
        let stream = self.new_stream(ssrc, is_rtp, None, init_index)?;
        Self::register(&mut self.sources, &mut self.streams, (ssrc, is_rtp), stream)?;

        log::debug!("source added: ssrc={ssrc}, rtp={is_rtp}, init={init_index}");
        Ok(stream)
    }

    pub fn source_find(&self, ssrc: u32, is_rtp: bool) -> Result<StreamId, Error> {
        self.sources.get(&(ssrc, is_rtp)).copied().ok_or(Error::NotFound)
    }

    pub fn source_remove(&mut self, stream: StreamId) -> Result<(), Error> {
        let source = self.streams.get(stream).ok_or(Error::NotFound)?;
        let key = (source.ssrc(), source.is_rtp());
        if !source.is_remote() || self.sources.get(&key) != Some(&stream) {
            return Err(Error::NotFound);
        }

        self.sources.remove(&key);
        self.release_stream(stream);

        log::debug!("source removed: ssrc={}, rtp={}", key.0, key.1);
        Ok(())
    }

    /// Adds a local destination, the stream packets are sent on.
    ///
    /// # Test
    ///
    /// ```
    /// use srtp_keydb_engine::*;
    ///
    /// let mut db = Database::new(DatabaseOptions::default()).unwrap();
    /// let a = "127.0.0.1:5000".parse().unwrap();
    /// let b = "127.0.0.1:6000".parse().unwrap();
    ///
    /// let first = db.dest_add(0x1234, true, 0, a).unwrap();
    /// let second = db.dest_add(0x1234, true, 0, b).unwrap();
    /// assert_ne!(first, second);
    ///
    /// assert_eq!(
    ///     db.dest_add(0x1234, false, 0, a),
    ///     Err(Error::DuplicateEntry(Entry::Stream(first)))
    /// );
    ///
    /// db.dest_remove(first).unwrap();
    /// assert_eq!(db.dest_find(0x1234, a), Err(Error::NotFound));
    /// assert_eq!(db.dest_find(0x1234, b), Ok(second));
    /// ```
    pub fn dest_add(
        &mut self,
        ssrc: u32,
        is_rtp: bool,
        init_index: u64,
        address: SocketAddr,
    ) -> Result<StreamId, Error> {
        let stream = self.new_stream(ssrc, is_rtp, Some(address), init_index)?;
        Self::register(&mut self.destinations, &mut self.streams, (ssrc, address), stream)?;

        log::debug!("destination added: ssrc={ssrc}, rtp={is_rtp}, addr={address}, init={init_index}");
        Ok(stream)
    }

    pub fn dest_find(&self, ssrc: u32, address: SocketAddr) -> Result<StreamId, Error> {
        self.destinations
            .get(&(ssrc, address))
            .copied()
            .ok_or(Error::NotFound)
    }

    pub fn dest_remove(&mut self, stream: StreamId) -> Result<(), Error> {
        let destination = self.streams.get(stream).ok_or(Error::NotFound)?;
        let Some(address) = destination.address() else {
            return Err(Error::NotFound);
        };

        let key = (destination.ssrc(), address);
        if self.destinations.get(&key) != Some(&stream) {
            return Err(Error::NotFound);
        }

        self.destinations.remove(&key);
        self.release_stream(stream);

        log::debug!("destination removed: ssrc={}, addr={}", key.0, key.1);
        Ok(())
    }

    pub fn stream(&self, stream: StreamId) -> Result<&Stream, Error> {
        self.streams.get(stream).ok_or(Error::NotFound)
    }

    /// Schedules `key` on the stream from index `start` on, a `None` key
    /// schedules a NULL context.
    ///
    /// A context created with `trigger` set switches every other stream
    /// sharing the previous key over to `key` the first time it is used.
    ///
    /// Returns `None` when nothing had to be scheduled, a NULL context at the
    /// head of an empty timeline.
    pub fn context_add(
        &mut self,
        stream: StreamId,
        start: u64,
        key: Option<KeyId>,
        trigger: bool,
    ) -> Result<Option<Scheduled>, Error> {
        if let Some(key) = key {
            if !self.arena.keys.contains(key) {
                return Err(Error::NotFound);
            }
        }

        let entry = self.streams.get_mut(stream).ok_or(Error::NotFound)?;
        match entry.add_context(&mut self.arena, stream, start, key, trigger) {
            Ok(scheduled) => {
                log::debug!(
                    "context scheduled: stream={stream:?}, start={start}, key={key:?}, trigger={trigger}, result={scheduled:?}"
                );

                Ok(scheduled)
            }
            Err(e) => {
                log::warn!("context rejected: stream={stream:?}, start={start}, key={key:?}, err={e}");
                Err(e)
            }
        }
    }

    pub fn context_remove(&mut self, context: ContextId) -> Result<(), Error> {
        let owner = self.context(context)?.stream();
        self.streams
            .get_mut(owner)
            .ok_or(Error::NotFound)?
            .remove_context(&mut self.arena, context)?;

        log::debug!("context removed: stream={owner:?}, context={context:?}");
        Ok(())
    }

    /// The keyed context that applies to `index` on the stream.
    ///
    /// A NULL context covering the index is reported as
    /// [`Error::NotFound`], no key applies to it.
    pub fn context_find(&self, stream: StreamId, index: u64) -> Result<ContextId, Error> {
        let context = self
            .stream(stream)?
            .find_context(&self.arena, index)
            .ok_or(Error::NotFound)?;

        if self.arena.contexts[context].is_null() {
            return Err(Error::NotFound);
        }

        Ok(context)
    }

    pub fn context(&self, context: ContextId) -> Result<&Context, Error> {
        self.arena.context(context).ok_or(Error::NotFound)
    }

    /// Mutable access to a context, used to store freshly derived session
    /// keys through [`Context::current_keys_mut`].
    pub fn context_mut(&mut self, context: ContextId) -> Result<&mut Context, Error> {
        self.arena.contexts.get_mut(context).ok_or(Error::NotFound)
    }

    /// See [`Context::update_keys`].
    pub fn context_update_keys(&mut self, context: ContextId, index: u64) -> Result<KeySlot, Error> {
        let wrap = self.context_wrap(context)?;
        self.context_mut(context)?.update_keys(index, wrap)
    }

    /// See [`Context::enable_current_keys`].
    pub fn context_enable_current_keys(&mut self, context: ContextId, index: u64) -> Result<(), Error> {
        let wrap = self.context_wrap(context)?;
        self.context_mut(context)?.enable_current_keys(index, wrap);
        Ok(())
    }

    /// Counts one packet encrypted with the context.
    ///
    /// Once the master key protected `wrap_index` packets of one stream it
    /// is flagged, see [`MasterKey::is_max_limit`].
    pub fn context_inc_encrypt_count(&mut self, context: ContextId) -> Result<(), Error> {
        let owner = self.context(context)?.stream();
        self.streams
            .get(owner)
            .ok_or(Error::NotFound)?
            .inc_encrypt_count(&mut self.arena, context);

        Ok(())
    }

    /// Switches every stream still using the key that `context` replaces on
    /// its own stream over to the key of `context`, at the next packet of
    /// each of those streams.
    ///
    /// Returns false when `context` is not a triggering context or follows no
    /// keyed context.
    pub fn context_trigger(&mut self, context: ContextId) -> Result<bool, Error> {
        Ok(self.apply_trigger(context)?.is_some())
    }

    pub(crate) fn apply_trigger(&mut self, context: ContextId) -> Result<Option<Vec<Switch>>, Error> {
        self.context(context)?;

        let Some(switches) = plan_trigger(&self.streams, &self.arena, context) else {
            return Ok(None);
        };

        for switch in &switches {
            let Some(stream) = self.streams.get_mut(switch.stream) else {
                continue;
            };

            match stream.add_context(&mut self.arena, switch.stream, switch.index, switch.key, false) {
                Ok(_) => log::debug!(
                    "key switch scheduled: stream={:?}, index={}, key={:?}",
                    switch.stream,
                    switch.index,
                    switch.key
                ),
                Err(e) => log::error!(
                    "key switch failed: stream={:?}, index={}, err={e}",
                    switch.stream,
                    switch.index
                ),
            }
        }

        Ok(Some(switches))
    }

    /// Moves `max_index` of the stream forward to `index`, retiring the
    /// contexts that fall out of the history window and shifting the replay
    /// list.
    ///
    /// Returns false, changing nothing, when `index` is not ahead of the
    /// history window.
    pub fn stream_update_max_index(&mut self, stream: StreamId, index: u64) -> Result<bool, Error> {
        Ok(self
            .streams
            .get_mut(stream)
            .ok_or(Error::NotFound)?
            .update_max_index(&mut self.arena, index))
    }

    /// See [`Stream::test_replay_list`].
    pub fn stream_test_replay_list(
        &mut self,
        stream: StreamId,
        index: u64,
        mark_seen: bool,
    ) -> Result<bool, Error> {
        Ok(self
            .streams
            .get_mut(stream)
            .ok_or(Error::NotFound)?
            .test_replay_list(index, mark_seen))
    }

    pub fn stream_max_index(&self, stream: StreamId) -> Result<u64, Error> {
        Ok(self.stream(stream)?.max_index())
    }

    /// Schedules the key registered under `mki` at the next packet of the
    /// stream.
    ///
    /// # Test
    ///
    /// ```
    /// use srtp_keydb_engine::*;
    ///
    /// let mut db = Database::new(DatabaseOptions::default()).unwrap();
    /// db.key_add(&[0, 0, 0, 1], &[1; 16], &[2; 14], 0).unwrap();
    /// let stream = db.source_add(0x1234, true, 1000).unwrap();
    ///
    /// let scheduled = db.change_key(stream, &[0, 0, 0, 1], false).unwrap().unwrap();
    /// assert_eq!(db.context(scheduled.context).unwrap().from_index(), 1000);
    /// ```
    pub fn change_key(
        &mut self,
        stream: StreamId,
        mki: &[u8],
        share_trigger: bool,
    ) -> Result<Option<Scheduled>, Error> {
        let entry = self.stream(stream)?;
        let index = entry.max_index().wrapping_add(1) & entry.wrap_index();
        self.change_key_at(stream, mki, index, share_trigger)
    }

    pub fn change_key_at(
        &mut self,
        stream: StreamId,
        mki: &[u8],
        index: u64,
        share_trigger: bool,
    ) -> Result<Option<Scheduled>, Error> {
        let key = self.key_find(mki)?;
        self.context_add(stream, index, Some(key), share_trigger)
    }

    /// Drops every context of the stream, no key applies to it anymore.
    pub fn clear_keys(&mut self, stream: StreamId) -> Result<(), Error> {
        self.streams
            .get_mut(stream)
            .ok_or(Error::NotFound)?
            .clear(&mut self.arena);

        log::debug!("stream keys cleared: stream={stream:?}");
        Ok(())
    }

    /// Re-registers every destination sending under `old_ssrc` with
    /// `new_ssrc`.
    ///
    /// The new destinations keep the address, protocol and initial index of
    /// the old ones but start with an empty timeline, keys have to be
    /// scheduled again. Returns the new destinations.
    pub fn ssrc_changed(&mut self, old_ssrc: u32, new_ssrc: u32) -> Result<Vec<StreamId>, Error> {
        let changing = self
            .destinations
            .iter()
            .filter(|((ssrc, _), _)| *ssrc == old_ssrc)
            .map(|(_, stream)| *stream)
            .collect::<Vec<_>>();

        let mut changed = Vec::with_capacity(changing.len());
        for stream in changing {
            let (is_rtp, address, init_index) = {
                let destination = self.stream(stream)?;
                let Some(address) = destination.address() else {
                    continue;
                };

                (destination.is_rtp(), address, destination.history().init_index())
            };

            if let Err(e) = self.dest_remove(stream) {
                log::error!("failed to remove destination: ssrc={old_ssrc}, addr={address}, err={e}");
            }

            match self.dest_add(new_ssrc, is_rtp, init_index, address) {
                Ok(stream) => changed.push(stream),
                Err(e) => {
                    log::error!("failed to add destination: ssrc={new_ssrc}, addr={address}, err={e}")
                }
            }
        }

        Ok(changed)
    }

    fn new_stream(
        &mut self,
        ssrc: u32,
        is_rtp: bool,
        address: Option<SocketAddr>,
        init_index: u64,
    ) -> Result<StreamId, Error> {
        let protocol = self.options.protocol(is_rtp);

        Ok(self.streams.alloc(Stream::new(
            ssrc,
            is_rtp,
            address,
            init_index,
            protocol.replay_list_size,
            protocol.history_size,
            protocol.layout(),
        ))?)
    }

    fn register<K: Eq + Hash>(
        table: &mut Table<K, StreamId>,
        streams: &mut ObjectPool<Stream>,
        key: K,
        stream: StreamId,
    ) -> Result<(), Error> {
        match table.insert_unique(key, stream) {
            Ok(None) => Ok(()),
            Ok(Some(existing)) => {
                let existing = *existing;
                streams.release(stream);
                Err(Error::DuplicateEntry(Entry::Stream(existing)))
            }
            Err(e) => {
                streams.release(stream);
                Err(e.into())
            }
        }
    }

    fn release_stream(&mut self, stream: StreamId) {
        if let Some(mut stream) = self.streams.release(stream) {
            stream.clear(&mut self.arena);
        }
    }

    fn context_wrap(&self, context: ContextId) -> Result<u64, Error> {
        Ok(self.stream(self.context(context)?.stream())?.wrap_index())
    }
}
