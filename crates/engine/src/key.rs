use crate::ContextId;

/// Master key
///
/// Holds the long lived secret material and the contexts currently derived
/// from it. Key, salt and MKI live in one buffer that is never modified
/// after the key was added.
///
/// # Test
///
/// ```
/// use srtp_keydb_engine::*;
///
/// let key = MasterKey::new(&[1; 16], &[2; 14], &[0, 0, 0, 7], 0);
///
/// assert_eq!(key.master_key(), &[1; 16]);
/// assert_eq!(key.master_salt(), &[2; 14]);
/// assert_eq!(key.mki(), &[0, 0, 0, 7]);
/// assert_eq!(key.context_count(), 0);
/// assert!(!key.is_max_limit());
/// ```
#[derive(Debug)]
pub struct MasterKey {
    material: Box<[u8]>,
    salt_offset: usize,
    mki_offset: usize,
    derivation_rate: u64,
    max_limit: bool,
    contexts: Vec<ContextId>,
}

impl MasterKey {
    pub fn new(key: &[u8], salt: &[u8], mki: &[u8], derivation_rate: u64) -> Self {
        Self {
            material: [key, salt, mki].concat().into_boxed_slice(),
            salt_offset: key.len(),
            mki_offset: key.len() + salt.len(),
            max_limit: false,
            contexts: Vec::new(),
            derivation_rate,
        }
    }

    pub fn master_key(&self) -> &[u8] {
        &self.material[..self.salt_offset]
    }

    pub fn master_salt(&self) -> &[u8] {
        &self.material[self.salt_offset..self.mki_offset]
    }

    pub fn mki(&self) -> &[u8] {
        &self.material[self.mki_offset..]
    }

    /// packets per session key rotation, 0 derives once for the lifetime of
    /// the key.
    pub fn derivation_rate(&self) -> u64 {
        self.derivation_rate
    }

    /// Set once a context protected as many packets as the index space of its
    /// stream allows. No further encryption should use this key.
    pub fn is_max_limit(&self) -> bool {
        self.max_limit
    }

    pub fn contexts(&self) -> &[ContextId] {
        &self.contexts
    }

    pub fn context_count(&self) -> usize {
        self.contexts.len()
    }

    pub(crate) fn set_max_limit(&mut self, max_limit: bool) {
        self.max_limit = max_limit;
    }

    pub(crate) fn link(&mut self, context: ContextId) {
        debug_assert!(!self.contexts.contains(&context));

        self.contexts.push(context);
    }

    pub(crate) fn unlink(&mut self, context: ContextId) -> bool {
        match self.contexts.iter().position(|it| *it == context) {
            Some(position) => {
                self.contexts.remove(position);
                true
            }
            None => false,
        }
    }
}
