mod arena;
mod context;
mod database;
mod error;
mod history;
pub mod index;
mod key;
mod options;
mod process;
mod replay;
mod stream;

pub use self::{
    arena::Arena,
    context::{Context, KeyLayout, KeySlot, SessionKeys, SessionKeysMut},
    database::Database,
    error::{Entry, Error},
    history::{History, Scheduled},
    key::MasterKey,
    options::{DatabaseOptions, MIN_REPLAY_LIST_SIZE, ProtocolOptions},
    process::Selected,
    replay::ReplayList,
    stream::{Stream, Switch},
};

use pool::Handle;

pub type KeyId = Handle<MasterKey>;
pub type ContextId = Handle<Context>;
pub type StreamId = Handle<Stream>;

/// Whether a packet is being protected for sending or unprotected after
/// receiving.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Encrypt,
    Decrypt,
}

/// What session keys are derived for.
#[derive(Debug, Clone, Copy)]
pub struct Derivation<'a> {
    pub master: &'a MasterKey,
    pub direction: Direction,
    pub is_rtp: bool,
    /// packet index the keys are derived at, the key derivation function
    /// divides it by the derivation rate of the master key.
    pub index: u64,
}

/// Session key derivation plugged into the packet path.
///
/// The engine only decides when keys have to be derived and where they are
/// stored, the cipher lives with the implementer.
pub trait KeyDeriver {
    /// Fills `keys` with the session keys of `derivation`.
    ///
    /// [rfc3711](https://tools.ietf.org/html/rfc3711#section-4.3)
    ///
    /// Every buffer in `keys` is sized from the protocol options of the
    /// stream and has to be filled completely.
    fn derive(&self, derivation: &Derivation<'_>, keys: SessionKeysMut<'_>);

    /// A master key protected as many packets as the index space of a stream
    /// allows and must not be used to encrypt any more.
    #[allow(unused_variables)]
    fn on_key_limit(&self, key: KeyId) {}

    /// Another stream was switched to a new key because a context sharing
    /// its old key was used for the first time.
    #[allow(unused_variables)]
    fn on_key_switch(&self, switch: &Switch) {}
}
