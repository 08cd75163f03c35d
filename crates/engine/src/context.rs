use crate::{Error, KeyId, StreamId, index::distance};

/// Sizes of the session keys held in every key slot of a context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyLayout {
    pub encrypt_key_size: usize,
    pub auth_key_size: usize,
    pub salt_size: usize,
}

impl KeyLayout {
    fn slot_size(&self) -> usize {
        self.encrypt_key_size + self.auth_key_size + self.salt_size
    }
}

/// Which of the two key slots of a context a packet has to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeySlot {
    Current,
    Old,
}

/// Session keys of one slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionKeys<'a> {
    pub encrypt_key: &'a [u8],
    pub auth_key: &'a [u8],
    pub salt: &'a [u8],
}

/// Writable session keys of the current slot, filled in by key derivation.
#[derive(Debug)]
pub struct SessionKeysMut<'a> {
    pub encrypt_key: &'a mut [u8],
    pub auth_key: &'a mut [u8],
    pub salt: &'a mut [u8],
}

/// Cryptographic context
///
/// A context binds one master key to one stream for a range of indexes that
/// starts at `from_index` and lasts until the next context of the stream
/// timeline. It keeps two slots of derived session keys, the current ones
/// and the ones they replaced, plus the schedule of the next derivation.
///
/// A context without master key is a NULL context: it explicitly states that
/// no key applies to its range.
#[derive(Debug)]
pub struct Context {
    master_key: Option<KeyId>,
    stream: StreamId,
    derivation_rate: u64,
    from_index: u64,
    switch_index: u64,
    next_switch_index: u64,
    never_used: bool,
    trigger: bool,
    count: u64,
    current: usize,
    valid: [bool; 2],
    layout: KeyLayout,
    keys: Box<[u8]>,
}

impl Context {
    /// Every field starts from the same state, however the context was
    /// obtained.
    pub(crate) fn new(
        master_key: Option<KeyId>,
        derivation_rate: u64,
        stream: StreamId,
        from_index: u64,
        layout: KeyLayout,
    ) -> Self {
        Self {
            keys: vec![0; layout.slot_size() * 2].into_boxed_slice(),
            switch_index: 0,
            next_switch_index: 0,
            never_used: true,
            trigger: false,
            count: 0,
            current: 0,
            valid: [false; 2],
            derivation_rate,
            master_key,
            from_index,
            stream,
            layout,
        }
    }

    pub fn master_key(&self) -> Option<KeyId> {
        self.master_key
    }

    pub fn is_null(&self) -> bool {
        self.master_key.is_none()
    }

    pub fn stream(&self) -> StreamId {
        self.stream
    }

    pub fn from_index(&self) -> u64 {
        self.from_index
    }

    pub fn switch_index(&self) -> u64 {
        self.switch_index
    }

    pub fn next_switch_index(&self) -> u64 {
        self.next_switch_index
    }

    /// true until the first session keys of the context were enabled.
    pub fn never_used(&self) -> bool {
        self.never_used
    }

    /// whether enabling this context switches the sibling streams sharing
    /// the previous key too.
    pub fn trigger(&self) -> bool {
        self.trigger
    }

    /// number of packets encrypted with this context.
    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn has_current_keys(&self) -> bool {
        self.valid[self.current]
    }

    pub fn has_old_keys(&self) -> bool {
        self.valid[self.current ^ 1]
    }

    /// Decides whether keys exist, or can be derived, for a packet at
    /// `index`, and which slot the packet has to use.
    ///
    /// When the returned slot is [`KeySlot::Current`] and
    /// [`Context::has_current_keys`] is false, the caller derives new keys
    /// into [`Context::current_keys_mut`] and calls
    /// [`Context::enable_current_keys`].
    ///
    /// # Test
    ///
    /// ```
    /// use srtp_keydb_engine::{*, index::RTP_WRAP_INDEX};
    ///
    /// let mut db = Database::new(DatabaseOptions::default()).unwrap();
    /// let key = db.key_add(&[0, 0, 0, 1], &[1; 16], &[2; 14], 100).unwrap();
    /// let stream = db.source_add(0x1234, true, 0).unwrap();
    /// let context = db.context_add(stream, 0, Some(key), false).unwrap().unwrap().context;
    ///
    /// // first keys only from the start of the context
    /// assert_eq!(db.context_update_keys(context, 0), Ok(KeySlot::Current));
    /// db.context_enable_current_keys(context, 0).unwrap();
    ///
    /// assert_eq!(db.context(context).unwrap().next_switch_index(), 100);
    /// assert_eq!(db.context_update_keys(context, 99), Ok(KeySlot::Current));
    ///
    /// // rotation at the derivation boundary
    /// assert_eq!(db.context_update_keys(context, 100), Ok(KeySlot::Current));
    /// assert!(!db.context(context).unwrap().has_current_keys());
    /// db.context_enable_current_keys(context, 100).unwrap();
    ///
    /// assert_eq!(db.context_update_keys(context, 60), Ok(KeySlot::Old));
    /// assert_eq!(db.context_update_keys(context, 250), Err(Error::InvalidIndex));
    /// ```
    pub fn update_keys(&mut self, index: u64, wrap: u64) -> Result<KeySlot, Error> {
        if !self.has_current_keys() {
            // The first keys can only be derived from the exact start of the
            // context onwards, the index is part of the IV. A receiver that
            // was given the initial ROC but no initial SEQ desynchronises
            // when the first packet is lost across a sequence wrap, which is
            // what RFC 3711 prescribes.
            return if index >= self.from_index {
                Ok(KeySlot::Current)
            } else {
                Err(Error::InvalidIndex)
            };
        }

        let rate = self.derivation_rate;
        if rate == 0 {
            return Ok(KeySlot::Current);
        }

        if index == self.next_switch_index {
            self.current ^= 1;
            self.valid[self.current] = false;

            return Ok(KeySlot::Current);
        }

        let switch_index = distance(self.switch_index, self.from_index, wrap);
        let test_index = distance(index, self.from_index, wrap);
        if test_index < switch_index {
            if !self.has_old_keys() || switch_index - test_index > rate {
                return Err(Error::InvalidIndex);
            }

            return Ok(KeySlot::Old);
        }

        if test_index < distance(self.next_switch_index, self.from_index, wrap) {
            return Ok(KeySlot::Current);
        }

        if index % rate == 0 {
            self.valid = [false; 2];

            return Ok(KeySlot::Current);
        }

        Err(Error::InvalidIndex)
    }

    /// Marks the current slot valid from `index` on and schedules the next
    /// derivation at the following multiple of the derivation rate.
    ///
    /// # Test
    ///
    /// ```
    /// use srtp_keydb_engine::*;
    ///
    /// let mut db = Database::new(DatabaseOptions::default()).unwrap();
    /// let key = db.key_add(&[0, 0, 0, 1], &[1; 16], &[2; 14], 16).unwrap();
    /// let stream = db.source_add(0x1234, true, 0).unwrap();
    /// let context = db.context_add(stream, 5, Some(key), false).unwrap().unwrap().context;
    ///
    /// db.context_enable_current_keys(context, 5).unwrap();
    ///
    /// let context = db.context(context).unwrap();
    /// assert!(context.has_current_keys());
    /// assert!(!context.never_used());
    /// assert_eq!(context.switch_index(), 5);
    /// assert_eq!(context.next_switch_index(), 16);
    /// ```
    pub fn enable_current_keys(&mut self, index: u64, wrap: u64) {
        let rate = self.derivation_rate;

        self.valid[self.current] = true;
        self.switch_index = index;
        self.next_switch_index = if rate > 0 {
            (index.wrapping_add(rate) / rate).wrapping_mul(rate) & wrap
        } else {
            index & wrap
        };

        self.never_used = false;
    }

    /// # Test
    ///
    /// ```
    /// use srtp_keydb_engine::*;
    ///
    /// let mut db = Database::new(DatabaseOptions::default()).unwrap();
    /// let key = db.key_add(&[0, 0, 0, 1], &[1; 16], &[2; 14], 0).unwrap();
    /// let stream = db.source_add(0x1234, true, 0).unwrap();
    /// let context = db.context_add(stream, 0, Some(key), false).unwrap().unwrap().context;
    ///
    /// let keys = db.context(context).unwrap().keys(KeySlot::Current);
    /// assert_eq!(keys.encrypt_key.len(), 16);
    /// assert_eq!(keys.auth_key.len(), 20);
    /// assert_eq!(keys.salt.len(), 14);
    /// ```
    pub fn keys(&self, slot: KeySlot) -> SessionKeys<'_> {
        let (encrypt_key, rest) = self.slot(slot).split_at(self.layout.encrypt_key_size);
        let (auth_key, salt) = rest.split_at(self.layout.auth_key_size);

        SessionKeys {
            encrypt_key,
            auth_key,
            salt,
        }
    }

    pub fn current_encrypt_key(&self) -> &[u8] {
        self.keys(KeySlot::Current).encrypt_key
    }

    pub fn current_auth_key(&self) -> &[u8] {
        self.keys(KeySlot::Current).auth_key
    }

    pub fn current_salt(&self) -> &[u8] {
        self.keys(KeySlot::Current).salt
    }

    pub fn old_encrypt_key(&self) -> &[u8] {
        self.keys(KeySlot::Old).encrypt_key
    }

    pub fn old_auth_key(&self) -> &[u8] {
        self.keys(KeySlot::Old).auth_key
    }

    pub fn old_salt(&self) -> &[u8] {
        self.keys(KeySlot::Old).salt
    }

    pub fn current_keys_mut(&mut self) -> SessionKeysMut<'_> {
        let size = self.layout.slot_size();
        let offset = self.current * size;

        let (encrypt_key, rest) =
            self.keys[offset..offset + size].split_at_mut(self.layout.encrypt_key_size);
        let (auth_key, salt) = rest.split_at_mut(self.layout.auth_key_size);

        SessionKeysMut {
            encrypt_key,
            auth_key,
            salt,
        }
    }

    fn slot(&self, slot: KeySlot) -> &[u8] {
        let size = self.layout.slot_size();
        let offset = match slot {
            KeySlot::Current => self.current,
            KeySlot::Old => self.current ^ 1,
        } * size;

        &self.keys[offset..offset + size]
    }

    pub(crate) fn inc_count(&mut self) -> u64 {
        self.count += 1;
        self.count
    }

    pub(crate) fn set_trigger(&mut self, trigger: bool) {
        self.trigger = trigger;
    }

    pub(crate) fn detach(&mut self) -> Option<KeyId> {
        self.master_key.take()
    }

    /// Moves the start of the context forward when older indexes leave the
    /// timeline. A switch point before the new start is clamped to it.
    pub(crate) fn rebase(&mut self, from_index: u64, wrap: u64) {
        let advance = distance(from_index, self.from_index, wrap);
        if distance(self.switch_index, self.from_index, wrap) < advance {
            self.switch_index = from_index;
        }

        self.from_index = from_index;
    }
}
