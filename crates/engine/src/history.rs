use crate::{Arena, ContextId, Error, KeyId, StreamId, context::KeyLayout, index::distance};

/// Result of scheduling a key on a timeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Scheduled {
    pub context: ContextId,
    /// false when an existing context already applies the same key at the
    /// requested index.
    pub created: bool,
}

/// History timeline
///
/// The chronological list of contexts of one stream, both historical and
/// scheduled. Contexts are sorted by their start index relative to the
/// start of the window, which always lies `size` indexes before
/// `max_index`. Every context applies from its start index up to the start
/// of the next one, the last one up to the end of the index space.
///
/// The timeline never holds two adjacent contexts using the same master key,
/// nor two adjacent NULL contexts.
#[derive(Debug)]
pub struct History {
    timeline: Vec<ContextId>,
    max_index: u64,
    init_index: u64,
    size: u64,
    wrap: u64,
    layout: KeyLayout,
}

impl History {
    /// `init_index` is the index of the first expected packet, `size` the
    /// number of indexes kept behind `max_index`.
    pub fn new(init_index: u64, size: u64, wrap: u64, layout: KeyLayout) -> Self {
        Self {
            timeline: Vec::new(),
            max_index: init_index.wrapping_sub(1) & wrap,
            init_index: init_index & wrap,
            size,
            wrap,
            layout,
        }
    }

    /// highest index processed so far.
    pub fn max_index(&self) -> u64 {
        self.max_index
    }

    pub fn init_index(&self) -> u64 {
        self.init_index
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn wrap_index(&self) -> u64 {
        self.wrap
    }

    pub fn layout(&self) -> KeyLayout {
        self.layout
    }

    pub fn len(&self) -> usize {
        self.timeline.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timeline.is_empty()
    }

    pub fn contexts(&self) -> &[ContextId] {
        &self.timeline
    }

    /// first index still covered by the timeline.
    pub fn window_start(&self) -> u64 {
        self.max_index.wrapping_sub(self.size) & self.wrap
    }

    /// An index is historical when it is older than `max_index` but still
    /// within the window.
    pub fn is_historical(&self, index: u64) -> bool {
        let age = distance(self.max_index, index, self.wrap);
        age > 0 && age <= self.size
    }

    pub fn previous(&self, context: ContextId) -> Option<ContextId> {
        let position = self.position(context)?;
        position
            .checked_sub(1)
            .map(|position| self.timeline[position])
    }

    pub fn next(&self, context: ContextId) -> Option<ContextId> {
        let position = self.position(context)?;
        self.timeline.get(position + 1).copied()
    }

    /// Context applying to `index`, which may be a NULL context.
    pub fn find(&self, arena: &Arena, index: u64) -> Option<ContextId> {
        if index > self.wrap {
            return None;
        }

        let position = self.upper_bound(arena, self.relative(index));
        position
            .checked_sub(1)
            .map(|position| self.timeline[position])
    }

    /// Whether `index` falls into the range of `context`.
    pub fn check_index(&self, arena: &Arena, index: u64, context: ContextId) -> bool {
        let Some(position) = self.position(context) else {
            return false;
        };

        let relative = self.relative(index);
        if relative < self.relative_from(arena, context) {
            return false;
        }

        match self.timeline.get(position + 1) {
            Some(next) => relative < self.relative_from(arena, *next),
            None => true,
        }
    }

    /// Schedules `key` from `start` on. `None` schedules a NULL context.
    ///
    /// A context starting at the same index is replaced, a following
    /// context with the same key is absorbed, and when the preceding context
    /// already uses the key nothing is created and that context is returned.
    /// A NULL context at the head of the timeline represents nothing and is
    /// not created either, `Ok(None)` is returned for it.
    pub fn add(
        &mut self,
        arena: &mut Arena,
        owner: StreamId,
        start: u64,
        key: Option<KeyId>,
    ) -> Result<Option<Scheduled>, Error> {
        if start > self.wrap || self.is_historical(start) {
            return Err(Error::InvalidIndex);
        }

        let mut position = self.upper_bound(arena, self.relative(start));

        if let Some(previous) = position.checked_sub(1).map(|it| self.timeline[it]) {
            let context = &arena.contexts[previous];
            if context.from_index() == start {
                if context.master_key() == key {
                    return Ok(Some(Scheduled {
                        context: previous,
                        created: false,
                    }));
                }

                log::debug!("replace context: start={}, previous={:?}", start, previous);

                self.timeline.remove(position - 1);
                arena.destroy_context(previous);
                position -= 1;
            }
        }

        if let Some(next) = self.timeline.get(position).copied() {
            if arena.contexts[next].master_key() == key {
                log::debug!("absorb context: start={}, next={:?}", start, next);

                self.timeline.remove(position);
                arena.destroy_context(next);
            }
        }

        match position.checked_sub(1).map(|it| self.timeline[it]) {
            Some(previous) if arena.contexts[previous].master_key() == key => {
                return Ok(Some(Scheduled {
                    context: previous,
                    created: false,
                }));
            }
            None if key.is_none() => return Ok(None),
            _ => (),
        }

        let context = arena.create_context(key, owner, start, self.layout)?;
        self.timeline.insert(position, context);

        Ok(Some(Scheduled {
            context,
            created: true,
        }))
    }

    /// Drops the master key of `context`, leaving a NULL context in its
    /// place, and merges it with NULL neighbours.
    pub fn remove(&mut self, arena: &mut Arena, context: ContextId) -> Result<(), Error> {
        let position = self.position(context).ok_or(Error::NotFound)?;
        arena.detach_context(context);

        while let Some(next) = self.timeline.get(position + 1).copied() {
            if !arena.contexts[next].is_null() {
                break;
            }

            self.timeline.remove(position + 1);
            arena.destroy_context(next);
        }

        if position > 0 && arena.contexts[self.timeline[position - 1]].is_null() {
            self.timeline.remove(position);
            arena.destroy_context(context);
        }

        Ok(())
    }

    /// Moves `max_index` forward and retires every context that left the
    /// window.
    ///
    /// Returns false, changing nothing, when `index` is out of range or is
    /// not ahead of the window.
    pub fn update_max_index(&mut self, arena: &mut Arena, index: u64) -> bool {
        if index > self.wrap || distance(self.max_index, index, self.wrap) <= self.size {
            return false;
        }

        let previous_start = self.window_start();
        let advance = distance(index, self.max_index, self.wrap);

        self.max_index = index;
        let start = self.window_start();

        let covering = self.timeline.partition_point(|context| {
            distance(arena.contexts[*context].from_index(), previous_start, self.wrap) <= advance
        });

        if covering > 0 {
            for context in self.timeline.drain(..covering - 1) {
                arena.destroy_context(context);
            }

            arena.contexts[self.timeline[0]].rebase(start, self.wrap);
        }

        while let Some(first) = self.timeline.first().copied() {
            if !arena.contexts[first].is_null() {
                break;
            }

            self.timeline.remove(0);
            arena.destroy_context(first);
        }

        true
    }

    /// Destroys every context of the timeline.
    pub fn clear(&mut self, arena: &mut Arena) {
        for context in self.timeline.drain(..) {
            arena.destroy_context(context);
        }
    }

    fn position(&self, context: ContextId) -> Option<usize> {
        self.timeline.iter().position(|it| *it == context)
    }

    fn relative(&self, index: u64) -> u64 {
        distance(index, self.window_start(), self.wrap)
    }

    fn relative_from(&self, arena: &Arena, context: ContextId) -> u64 {
        self.relative(arena.contexts[context].from_index())
    }

    /// number of contexts starting at or before the relative position.
    fn upper_bound(&self, arena: &Arena, relative: u64) -> usize {
        self.timeline
            .partition_point(|context| self.relative_from(arena, *context) <= relative)
    }
}

#[cfg(test)]
mod tests {
    use pool::{ObjectPool, PoolOptions};

    use super::*;
    use crate::{MasterKey, Stream, StreamId, index::RTP_WRAP_INDEX};

    const LAYOUT: KeyLayout = KeyLayout {
        encrypt_key_size: 16,
        auth_key_size: 20,
        salt_size: 14,
    };

    struct Fixture {
        arena: Arena,
        history: History,
        owner: StreamId,
        _streams: ObjectPool<Stream>,
    }

    impl Fixture {
        fn new(init_index: u64, size: u64) -> Self {
            let mut streams = ObjectPool::default();
            let owner = streams
                .alloc(Stream::new(0, true, None, 0, 0, 0, LAYOUT))
                .unwrap();

            Self {
                arena: Arena::new(PoolOptions::default(), PoolOptions::default()),
                history: History::new(init_index, size, RTP_WRAP_INDEX, LAYOUT),
                _streams: streams,
                owner,
            }
        }

        fn key(&mut self, mki: u8) -> KeyId {
            self.arena
                .keys
                .alloc(MasterKey::new(&[mki; 16], &[mki; 14], &[mki], 0))
                .unwrap()
        }

        fn add(&mut self, start: u64, key: Option<KeyId>) -> Result<Option<Scheduled>, Error> {
            self.history.add(&mut self.arena, self.owner, start, key)
        }

        fn starts(&self) -> Vec<(u64, Option<KeyId>)> {
            self.history
                .contexts()
                .iter()
                .map(|it| {
                    let context = &self.arena.contexts[*it];
                    (context.from_index(), context.master_key())
                })
                .collect()
        }
    }

    #[test]
    fn add_replaces_context_at_same_start() {
        let mut fixture = Fixture::new(0, 100);
        let a = fixture.key(1);
        let b = fixture.key(2);

        fixture.add(10, Some(a)).unwrap();
        fixture.add(10, Some(b)).unwrap();

        assert_eq!(fixture.starts(), vec![(10, Some(b))]);
        assert_eq!(fixture.arena.keys[a].context_count(), 0);
        assert_eq!(fixture.arena.keys[b].context_count(), 1);
    }

    #[test]
    fn add_absorbs_following_context_with_same_key() {
        let mut fixture = Fixture::new(0, 100);
        let a = fixture.key(1);
        let b = fixture.key(2);

        fixture.add(0, Some(a)).unwrap();
        fixture.add(20, Some(b)).unwrap();
        let scheduled = fixture.add(10, Some(b)).unwrap().unwrap();

        assert!(scheduled.created);
        assert_eq!(fixture.starts(), vec![(0, Some(a)), (10, Some(b))]);
        assert_eq!(fixture.arena.keys[b].context_count(), 1);
    }

    #[test]
    fn add_rejoins_neighbours_after_replacement() {
        let mut fixture = Fixture::new(0, 100);
        let a = fixture.key(1);
        let b = fixture.key(2);

        fixture.add(0, Some(a)).unwrap();
        fixture.add(10, Some(b)).unwrap();
        fixture.add(20, Some(a)).unwrap();

        let scheduled = fixture.add(10, Some(a)).unwrap().unwrap();

        assert!(!scheduled.created);
        assert_eq!(fixture.starts(), vec![(0, Some(a))]);
        assert_eq!(fixture.arena.keys[a].context_count(), 1);
        assert_eq!(fixture.arena.keys[b].context_count(), 0);
    }

    #[test]
    fn null_context_at_head_is_not_created() {
        let mut fixture = Fixture::new(0, 100);
        let a = fixture.key(1);

        assert_eq!(fixture.add(5, None), Ok(None));
        assert!(fixture.history.is_empty());

        fixture.add(10, Some(a)).unwrap();
        assert_eq!(fixture.add(5, None), Ok(None));
        assert_eq!(fixture.starts(), vec![(10, Some(a))]);

        let scheduled = fixture.add(30, None).unwrap().unwrap();
        assert!(scheduled.created);
        assert_eq!(fixture.starts(), vec![(10, Some(a)), (30, None)]);
    }

    #[test]
    fn remove_merges_null_neighbours() {
        let mut fixture = Fixture::new(0, 100);
        let a = fixture.key(1);
        let b = fixture.key(2);
        let c = fixture.key(3);

        fixture.add(0, Some(a)).unwrap();
        let second = fixture.add(10, Some(b)).unwrap().unwrap().context;
        let third = fixture.add(20, Some(c)).unwrap().unwrap().context;
        fixture.add(30, None).unwrap();

        fixture.history.remove(&mut fixture.arena, third).unwrap();
        assert_eq!(fixture.starts(), vec![(0, Some(a)), (10, Some(b)), (20, None)]);

        fixture.history.remove(&mut fixture.arena, second).unwrap();
        assert_eq!(fixture.starts(), vec![(0, Some(a)), (10, None)]);
        assert_eq!(fixture.arena.keys[b].context_count(), 0);
        assert_eq!(fixture.arena.keys[c].context_count(), 0);
        assert_eq!(fixture.arena.contexts.len(), 2);
    }

    #[test]
    fn update_max_index_retires_old_contexts() {
        let mut fixture = Fixture::new(0, 100);
        let a = fixture.key(1);
        let b = fixture.key(2);

        fixture.add(0, Some(a)).unwrap();
        fixture.add(50, None).unwrap();
        fixture.add(120, Some(b)).unwrap();

        assert!(fixture.history.update_max_index(&mut fixture.arena, 130));
        assert_eq!(fixture.history.window_start(), 30);
        assert_eq!(fixture.starts(), vec![(30, Some(a)), (50, None), (120, Some(b))]);

        // the NULL context becomes the oldest one and goes away
        assert!(fixture.history.update_max_index(&mut fixture.arena, 160));
        assert_eq!(fixture.starts(), vec![(120, Some(b))]);
        assert_eq!(fixture.history.find(&fixture.arena, 70), None);

        assert!(!fixture.history.update_max_index(&mut fixture.arena, 160));
        assert!(!fixture.history.update_max_index(&mut fixture.arena, 60));
        assert!(!fixture.history.update_max_index(&mut fixture.arena, RTP_WRAP_INDEX + 1));
    }

    #[test]
    fn add_rejects_historical_start() {
        let mut fixture = Fixture::new(0, 100);
        let a = fixture.key(1);

        assert!(fixture.history.update_max_index(&mut fixture.arena, 1000));
        assert_eq!(fixture.add(950, Some(a)), Err(Error::InvalidIndex));
        assert_eq!(fixture.add(900, Some(a)), Err(Error::InvalidIndex));
        assert_eq!(fixture.add(RTP_WRAP_INDEX + 1, Some(a)), Err(Error::InvalidIndex));
        assert!(fixture.add(1000, Some(a)).is_ok());
        assert!(fixture.add(1001, Some(a)).is_ok());
    }

    #[test]
    fn timeline_wraps_around_index_space() {
        let mut fixture = Fixture::new(RTP_WRAP_INDEX - 10, 100);
        let a = fixture.key(1);
        let b = fixture.key(2);

        fixture.add(RTP_WRAP_INDEX - 10, Some(a)).unwrap();
        fixture.add(5, Some(b)).unwrap();

        let first = fixture.history.find(&fixture.arena, RTP_WRAP_INDEX).unwrap();
        assert_eq!(fixture.arena.contexts[first].master_key(), Some(a));

        let second = fixture.history.find(&fixture.arena, 7).unwrap();
        assert_eq!(fixture.arena.contexts[second].master_key(), Some(b));

        assert!(fixture.history.check_index(&fixture.arena, 0, first));
        assert!(!fixture.history.check_index(&fixture.arena, 5, first));

        assert!(fixture.history.update_max_index(&mut fixture.arena, 200));
        assert_eq!(fixture.starts(), vec![(100, Some(b))]);
    }
}
