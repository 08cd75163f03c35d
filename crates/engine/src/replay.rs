/// Replay list
///
/// Sliding bitmap over the most recent indexes of a stream. Bit 0 stands for
/// `max_index` itself, bit `n` for the index `n` positions older. A set bit
/// means the index was already seen.
///
/// # Test
///
/// ```
/// use srtp_keydb_engine::ReplayList;
///
/// let mut list = ReplayList::new(64);
///
/// // nothing older than the start of the stream is accepted
/// assert!(!list.test(3, true));
///
/// list.shift(10);
/// assert!(list.test(3, true));
/// assert!(!list.test(3, true));
/// assert!(!list.test(0, true));
/// ```
#[derive(Debug, Clone)]
pub struct ReplayList {
    size: u64,
    buckets: Vec<u64>,
}

impl ReplayList {
    /// `size` is the number of packets tracked, 0 disables the list.
    pub fn new(size: u64) -> Self {
        // positions 0 ..= size are addressable
        let bucket_size = if size == 0 { 0 } else { (size as usize + 1).div_ceil(64) };

        Self {
            buckets: vec![u64::MAX; bucket_size],
            size,
        }
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn is_enabled(&self) -> bool {
        self.size > 0
    }

    /// Checks the index `distance` positions behind `max_index`.
    ///
    /// Returns false when it was already seen or when it is older than the
    /// list, otherwise marks it seen if `mark_seen` is set and returns true.
    pub fn test(&mut self, distance: u64, mark_seen: bool) -> bool {
        if !self.is_enabled() {
            return true;
        }

        if distance > self.size {
            return false;
        }

        let (offset, bit) = Self::locate(distance);
        if self.buckets[offset] & bit != 0 {
            return false;
        }

        if mark_seen {
            self.buckets[offset] |= bit;
        }

        true
    }

    /// `max_index` moved `distance` positions forward, the new `max_index`
    /// counts as seen.
    ///
    /// # Test
    ///
    /// ```
    /// use srtp_keydb_engine::ReplayList;
    ///
    /// let mut list = ReplayList::new(128);
    ///
    /// list.shift(200);
    /// assert!(list.test(70, true));
    ///
    /// list.shift(65);
    /// assert!(!list.test(65, false));
    /// assert!(!list.test(135, false));
    /// assert!(list.test(64, false));
    /// assert!(!list.test(0, false));
    ///
    /// // a full window advance keeps the oldest position
    /// list.shift(128);
    /// assert!(!list.test(128, false));
    /// assert!(list.test(127, false));
    /// ```
    pub fn shift(&mut self, distance: u64) {
        if !self.is_enabled() {
            return;
        }

        // the old `max_index` still fits at position `size`
        if distance > self.size {
            self.buckets.fill(0);
        } else {
            let words = (distance / 64) as usize;
            let bits = (distance % 64) as u32;

            for index in (0..self.buckets.len()).rev() {
                let mut value = 0;
                if index >= words {
                    value = self.buckets[index - words] << bits;

                    if bits > 0 && index > words {
                        value |= self.buckets[index - words - 1] >> (64 - bits);
                    }
                }

                self.buckets[index] = value;
            }
        }

        self.buckets[0] |= 1;
    }

    fn locate(distance: u64) -> (usize, u64) {
        ((distance / 64) as usize, 1 << (distance % 64))
    }
}
