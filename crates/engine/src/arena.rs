use pool::{ObjectPool, PoolOptions};

use crate::{Context, ContextId, Error, KeyId, MasterKey, StreamId, context::KeyLayout};

/// Storage shared by every stream timeline: the master keys and the
/// contexts derived from them.
///
/// A keyed context is always listed in the context list of its master key,
/// creating and destroying contexts through the arena keeps both sides in
/// step.
pub struct Arena {
    pub(crate) keys: ObjectPool<MasterKey>,
    pub(crate) contexts: ObjectPool<Context>,
}

impl Arena {
    pub fn new(keys: PoolOptions, contexts: PoolOptions) -> Self {
        Self {
            keys: ObjectPool::new(keys),
            contexts: ObjectPool::new(contexts),
        }
    }

    pub fn key(&self, key: KeyId) -> Option<&MasterKey> {
        self.keys.get(key)
    }

    pub fn context(&self, context: ContextId) -> Option<&Context> {
        self.contexts.get(context)
    }

    pub(crate) fn create_context(
        &mut self,
        master_key: Option<KeyId>,
        stream: StreamId,
        from_index: u64,
        layout: KeyLayout,
    ) -> Result<ContextId, Error> {
        let derivation_rate = match master_key {
            Some(key) => self.keys.get(key).ok_or(Error::NotFound)?.derivation_rate(),
            None => 0,
        };

        let context = self.contexts.alloc(Context::new(
            master_key,
            derivation_rate,
            stream,
            from_index,
            layout,
        ))?;

        if let Some(key) = master_key {
            self.keys[key].link(context);
        }

        Ok(context)
    }

    /// Turns the context into a NULL context.
    pub(crate) fn detach_context(&mut self, context: ContextId) {
        if let Some(key) = self.contexts[context].detach() {
            if let Some(key) = self.keys.get_mut(key) {
                key.unlink(context);
            }
        }
    }

    pub(crate) fn destroy_context(&mut self, context: ContextId) {
        self.detach_context(context);
        self.contexts.release(context);
    }
}
