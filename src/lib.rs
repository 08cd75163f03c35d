pub mod config;
pub mod trace;

pub use engine;
pub use pool;

use std::sync::Arc;

use engine::{
    Context, Database, DatabaseOptions, Direction, Error, KeyDeriver, Selected, StreamId,
};
use parking_lot::{Mutex, MutexGuard};

/// A key database shared between the threads sending and receiving packets.
///
/// Every packet is handled under a single lock: the keys are selected, the
/// caller protects or unprotects the packet with them, and the outcome is
/// recorded before the lock is released.
///
/// # Test
///
/// ```
/// use srtp_keydb::{SharedDatabase, engine::*};
///
/// struct Zero;
///
/// impl KeyDeriver for Zero {
///     fn derive(&self, _: &Derivation<'_>, keys: SessionKeysMut<'_>) {
///         keys.encrypt_key.fill(0);
///     }
/// }
///
/// let db = SharedDatabase::new(DatabaseOptions::default()).unwrap();
/// let stream = {
///     let mut db = db.lock();
///     let key = db.key_add(&[0, 0, 0, 1], &[1; 16], &[2; 14], 0).unwrap();
///     let stream = db.source_add(0x1234, true, 0).unwrap();
///     db.context_add(stream, 0, Some(key), false).unwrap();
///     stream
/// };
///
/// // authentication failed, nothing is recorded
/// let failed = db.process(stream, 7, Direction::Decrypt, &Zero, |_, _| Err::<(), _>(Error::BadParameter));
/// assert_eq!(failed, Err(Error::BadParameter));
/// assert_eq!(db.lock().stream_max_index(stream), Ok(0xFFFF_FFFF_FFFF));
///
/// let size = db.process(stream, 7, Direction::Decrypt, &Zero, |context, _| {
///     Ok(context.current_encrypt_key().len())
/// });
///
/// assert_eq!(size, Ok(16));
/// assert_eq!(db.lock().stream_max_index(stream), Ok(7));
/// ```
#[derive(Clone)]
pub struct SharedDatabase(Arc<Mutex<Database>>);

impl SharedDatabase {
    pub fn new(options: DatabaseOptions) -> Result<Self, Error> {
        Ok(Self(Arc::new(Mutex::new(Database::new(options)?))))
    }

    /// Direct access for key and stream management.
    pub fn lock(&self) -> MutexGuard<'_, Database> {
        self.0.lock()
    }

    /// Runs one packet through the database.
    ///
    /// `handler` receives the context holding the selected keys. When it
    /// fails the packet is dropped and only what key selection did sticks,
    /// an outgoing index stays marked as used.
    pub fn process<T, F, R>(
        &self,
        stream: StreamId,
        index: u64,
        direction: Direction,
        deriver: &T,
        handler: F,
    ) -> Result<R, Error>
    where
        T: KeyDeriver,
        F: FnOnce(&Context, Selected) -> Result<R, Error>,
    {
        let mut db = self.0.lock();

        let selected = db.prepare_keys(stream, index, direction, deriver)?;
        let result = handler(db.context(selected.context)?, selected)?;
        db.commit(stream, selected.context, index, direction)?;

        Ok(result)
    }
}
