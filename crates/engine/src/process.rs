use crate::{
    ContextId, Database, Derivation, Direction, Error, KeyDeriver, KeyId, KeySlot, StreamId,
};

/// Keys chosen for one packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Selected {
    pub context: ContextId,
    pub slot: KeySlot,
    pub key: KeyId,
}

impl Database {
    /// Finds, and derives when needed, the session keys a packet at `index`
    /// is processed with.
    ///
    /// The replay list is checked first. Outgoing packets are marked seen
    /// right away, incoming ones only once [`Database::commit`] confirms the
    /// packet authenticated. The first use of a triggering context switches
    /// the streams sharing its previous key, see
    /// [`Database::context_trigger`].
    ///
    /// Any error means the packet has to be dropped.
    ///
    /// # Test
    ///
    /// ```
    /// use srtp_keydb_engine::*;
    ///
    /// struct Fill;
    ///
    /// impl KeyDeriver for Fill {
    ///     fn derive(&self, derivation: &Derivation<'_>, keys: SessionKeysMut<'_>) {
    ///         keys.encrypt_key.fill(derivation.index as u8);
    ///         keys.auth_key.fill(0);
    ///         keys.salt.fill(0);
    ///     }
    /// }
    ///
    /// let mut db = Database::new(DatabaseOptions::default()).unwrap();
    /// let key = db.key_add(&[0, 0, 0, 1], &[1; 16], &[2; 14], 0).unwrap();
    /// let stream = db.source_add(0x1234, true, 0).unwrap();
    /// db.context_add(stream, 0, Some(key), false).unwrap();
    ///
    /// let selected = db.prepare_keys(stream, 3, Direction::Decrypt, &Fill).unwrap();
    /// assert_eq!(selected.slot, KeySlot::Current);
    /// assert_eq!(db.context(selected.context).unwrap().current_encrypt_key(), &[3; 16]);
    ///
    /// db.commit(stream, selected.context, 3, Direction::Decrypt).unwrap();
    /// assert_eq!(db.stream_max_index(stream), Ok(3));
    ///
    /// assert_eq!(
    ///     db.prepare_keys(stream, 3, Direction::Decrypt, &Fill),
    ///     Err(Error::ReplayedPacket)
    /// );
    /// ```
    pub fn prepare_keys<T: KeyDeriver>(
        &mut self,
        stream: StreamId,
        index: u64,
        direction: Direction,
        deriver: &T,
    ) -> Result<Selected, Error> {
        if !self.stream_test_replay_list(stream, index, direction == Direction::Encrypt)? {
            log::warn!("replayed packet: stream={stream:?}, index={index}, direction={direction:?}");
            return Err(Error::ReplayedPacket);
        }

        let context = match self.context_find(stream, index) {
            Ok(context) => context,
            Err(e) => {
                log::warn!("stream has no key: stream={stream:?}, index={index}");
                return Err(e);
            }
        };

        let key = self.context(context)?.master_key().ok_or(Error::NotFound)?;
        if direction == Direction::Encrypt && self.key(key)?.is_max_limit() {
            log::warn!("master key exhausted: stream={stream:?}, key={key:?}");
            deriver.on_key_limit(key);
            return Err(Error::KeyLimitReached);
        }

        let slot = self.context_update_keys(context, index)?;
        if slot == KeySlot::Current && !self.context(context)?.has_current_keys() {
            let is_rtp = self.stream(stream)?.is_rtp();
            let first_use = self.context(context)?.never_used();

            {
                let master = self.arena.keys.get(key).ok_or(Error::NotFound)?;
                let keys = self
                    .arena
                    .contexts
                    .get_mut(context)
                    .ok_or(Error::NotFound)?
                    .current_keys_mut();

                deriver.derive(
                    &Derivation {
                        master,
                        direction,
                        is_rtp,
                        index,
                    },
                    keys,
                );
            }

            self.context_enable_current_keys(context, index)?;
            log::debug!("session keys derived: stream={stream:?}, context={context:?}, index={index}");

            if first_use {
                for switch in self.apply_trigger(context)?.unwrap_or_default() {
                    deriver.on_key_switch(&switch);
                }
            }
        }

        Ok(Selected { context, slot, key })
    }

    /// Records a packet processed with keys from [`Database::prepare_keys`].
    ///
    /// Moves the stream forward when the packet is the newest one, marks an
    /// incoming packet in the replay list and counts an outgoing packet
    /// against its master key.
    ///
    /// Outgoing packets have to be sent in order, one that is not ahead of
    /// the newest index fails with [`Error::InvalidIndex`] and is not counted.
    pub fn commit(
        &mut self,
        stream: StreamId,
        context: ContextId,
        index: u64,
        direction: Direction,
    ) -> Result<(), Error> {
        if direction == Direction::Decrypt && !self.stream_test_replay_list(stream, index, true)? {
            log::error!("replay list changed under packet: stream={stream:?}, index={index}");
            return Err(Error::ReplayedPacket);
        }

        let advanced = self.stream_update_max_index(stream, index)?;

        if direction == Direction::Encrypt {
            if !advanced {
                log::warn!("outgoing packet behind the stream: stream={stream:?}, index={index}");
                return Err(Error::InvalidIndex);
            }

            self.context_inc_encrypt_count(context)?;
        }

        Ok(())
    }

    /// Switches the stream over to the master key named by the MKI of an
    /// incoming packet, from the packet index on.
    ///
    /// Returns the context that applies to the packet afterwards, the current
    /// one when it already uses that key.
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
    /// db.context_add(stream, 0, Some(a), false).unwrap();
    ///
    /// let context = db.rekey_from_mki(stream, 50, &[0, 0, 0, 1]).unwrap();
    /// assert_eq!(db.context(context).unwrap().from_index(), 0);
    ///
    /// let context = db.rekey_from_mki(stream, 50, &[0, 0, 0, 2]).unwrap();
    /// assert_eq!(db.context(context).unwrap().master_key(), Some(b));
    /// assert_eq!(db.context_find(stream, 10).map(|it| db.context(it).unwrap().master_key()), Ok(Some(a)));
    ///
    /// assert_eq!(db.rekey_from_mki(stream, 60, &[0, 0, 0, 3]), Err(Error::NotFound));
    /// ```
    pub fn rekey_from_mki(&mut self, stream: StreamId, index: u64, mki: &[u8]) -> Result<ContextId, Error> {
        let key = match self.key_find(mki) {
            Ok(key) => key,
            Err(e) => {
                log::warn!("packet names an unknown master key: stream={stream:?}, mki={mki:?}");
                return Err(e);
            }
        };

        if let Ok(context) = self.context_find(stream, index) {
            if self.context(context)?.master_key() == Some(key) {
                return Ok(context);
            }
        }

        self.context_add(stream, index, Some(key), false)?
            .map(|scheduled| scheduled.context)
            .ok_or(Error::NotFound)
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::*;
    use crate::{DatabaseOptions, SessionKeysMut};

    #[derive(Default)]
    struct Observer {
        limited: Cell<Option<KeyId>>,
    }

    impl KeyDeriver for Observer {
        fn derive(&self, _: &Derivation<'_>, keys: SessionKeysMut<'_>) {
            keys.encrypt_key.fill(1);
        }

        fn on_key_limit(&self, key: KeyId) {
            self.limited.set(Some(key));
        }
    }

    #[test]
    fn exhausted_key_refuses_encryption() {
        let mut db = Database::new(DatabaseOptions::default()).unwrap();
        let key = db.key_add(&[0, 0, 0, 1], &[1; 16], &[2; 14], 0).unwrap();
        let stream = db.dest_add(0x1234, true, 0, "127.0.0.1:5000".parse().unwrap()).unwrap();
        db.context_add(stream, 0, Some(key), false).unwrap();

        let observer = Observer::default();
        let selected = db.prepare_keys(stream, 0, Direction::Encrypt, &observer).unwrap();
        db.commit(stream, selected.context, 0, Direction::Encrypt).unwrap();

        db.arena.keys[key].set_max_limit(true);

        assert_eq!(
            db.prepare_keys(stream, 1, Direction::Encrypt, &observer),
            Err(Error::KeyLimitReached)
        );
        assert_eq!(observer.limited.get(), Some(key));

        // decryption with the key stays possible
        assert!(db.prepare_keys(stream, 1, Direction::Decrypt, &observer).is_ok());
    }
}
