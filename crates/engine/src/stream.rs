use std::net::SocketAddr;

use pool::ObjectPool;

use crate::{
    Arena, ContextId, Error, History, KeyId, ReplayList, Scheduled, StreamId, context::KeyLayout,
    index::{distance, wrap_index},
};

/// A key switch another stream has to perform because a context it shares
/// a master key with was triggered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Switch {
    pub stream: StreamId,
    pub index: u64,
    pub key: Option<KeyId>,
}

/// One RTP or RTCP remote source or local destination.
#[derive(Debug)]
pub struct Stream {
    ssrc: u32,
    is_rtp: bool,
    address: Option<SocketAddr>,
    replay: ReplayList,
    history: History,
}

impl Stream {
    /// A stream with an address is a destination, without one it is a
    /// remote source.
    pub(crate) fn new(
        ssrc: u32,
        is_rtp: bool,
        address: Option<SocketAddr>,
        init_index: u64,
        replay_list_size: u64,
        history_size: u64,
        layout: KeyLayout,
    ) -> Self {
        Self {
            history: History::new(init_index, history_size, wrap_index(is_rtp), layout),
            replay: ReplayList::new(replay_list_size),
            ssrc,
            is_rtp,
            address,
        }
    }

    pub fn ssrc(&self) -> u32 {
        self.ssrc
    }

    pub fn is_rtp(&self) -> bool {
        self.is_rtp
    }

    pub fn is_remote(&self) -> bool {
        self.address.is_none()
    }

    pub fn address(&self) -> Option<SocketAddr> {
        self.address
    }

    pub fn max_index(&self) -> u64 {
        self.history.max_index()
    }

    pub fn wrap_index(&self) -> u64 {
        self.history.wrap_index()
    }

    pub fn history(&self) -> &History {
        &self.history
    }

    pub fn replay_list(&self) -> &ReplayList {
        &self.replay
    }

    /// Checks `index` against the replay list.
    ///
    /// Indexes ahead of the history window are always accepted, they are
    /// newer than anything seen so far.
    pub fn test_replay_list(&mut self, index: u64, mark_seen: bool) -> bool {
        if !self.replay.is_enabled() {
            return true;
        }

        let age = distance(self.history.max_index(), index, self.history.wrap_index());
        if age > self.history.size() {
            return true;
        }

        self.replay.test(age, mark_seen)
    }

    pub(crate) fn update_max_index(&mut self, arena: &mut Arena, index: u64) -> bool {
        let previous = self.history.max_index();
        if !self.history.update_max_index(arena, index) {
            return false;
        }

        self.replay
            .shift(distance(index, previous, self.history.wrap_index()));
        true
    }

    pub(crate) fn add_context(
        &mut self,
        arena: &mut Arena,
        owner: StreamId,
        start: u64,
        key: Option<KeyId>,
        trigger: bool,
    ) -> Result<Option<Scheduled>, Error> {
        let scheduled = self.history.add(arena, owner, start, key)?;
        if let Some(Scheduled {
            context,
            created: true,
        }) = scheduled
        {
            arena.contexts[context].set_trigger(trigger);
        }

        Ok(scheduled)
    }

    pub(crate) fn remove_context(&mut self, arena: &mut Arena, context: ContextId) -> Result<(), Error> {
        self.history.remove(arena, context)
    }

    pub(crate) fn find_context(&self, arena: &Arena, index: u64) -> Option<ContextId> {
        self.history.find(arena, index)
    }

    pub(crate) fn clear(&mut self, arena: &mut Arena) {
        self.history.clear(arena);
    }

    /// Counts one more packet encrypted with `context`, flagging its master
    /// key once the index space of the stream is used up.
    pub(crate) fn inc_encrypt_count(&self, arena: &mut Arena, context: ContextId) {
        let count = arena.contexts[context].inc_count();
        if count < self.history.wrap_index() {
            return;
        }

        if let Some(key) = arena.contexts[context].master_key() {
            if let Some(key) = arena.keys.get_mut(key) {
                if !key.is_max_limit() {
                    log::warn!("master key reached its packet limit: context={:?}", context);
                }

                key.set_max_limit(true);
            }
        }
    }
}

/// Collects the key switches caused by `context`.
///
/// The key being switched away from is the one of the previous context in
/// the timeline of the stream. Every other stream still using that key at
/// its current `max_index`, and not already switching at its next packet,
/// switches to the key of `context` at its next packet.
///
/// Returns `None` when `context` triggers nothing: it is not a triggering
/// context, or there is no keyed context before it.
pub(crate) fn plan_trigger(
    streams: &ObjectPool<Stream>,
    arena: &Arena,
    context: ContextId,
) -> Option<Vec<Switch>> {
    let triggering = arena.contexts.get(context)?;
    if !triggering.trigger() {
        return None;
    }

    let owner = triggering.stream();
    let previous = streams.get(owner)?.history.previous(context)?;
    let old_key = arena.contexts[previous].master_key()?;

    let mut switches = Vec::new();
    for sibling in arena.keys[old_key].contexts() {
        let sibling_stream = arena.contexts[*sibling].stream();
        if sibling_stream == owner {
            continue;
        }

        let Some(stream) = streams.get(sibling_stream) else {
            continue;
        };

        let history = &stream.history;
        if !history.check_index(arena, history.max_index(), *sibling) {
            continue;
        }

        let index = history.max_index().wrapping_add(1) & history.wrap_index();
        if let Some(next) = history.next(*sibling) {
            if arena.contexts[next].from_index() == index {
                continue;
            }
        }

        switches.push(Switch {
            stream: sibling_stream,
            key: triggering.master_key(),
            index,
        });
    }

    Some(switches)
}
