use crate::{KeyId, StreamId};

/// The entry that was already registered when an add was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Entry {
    Key(KeyId),
    Stream(StreamId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// A pool or table has no room left.
    OutOfMemory,
    DuplicateEntry(Entry),
    NotFound,
    /// The index is out of range, already retired, or no key can be derived
    /// for it.
    InvalidIndex,
    BadParameter,
    ReplayedPacket,
    /// The master key protected as many packets as the index space allows.
    KeyLimitReached,
}

impl std::error::Error for Error {}

/// # Test
///
/// ```
/// use srtp_keydb_engine::Error;
///
/// assert_eq!(Error::ReplayedPacket.to_string(), "packet index already seen");
/// assert_eq!(Error::InvalidIndex.to_string(), "index out of range or retired");
/// ```
impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Self::OutOfMemory => write!(f, "pool or table exhausted"),
            Self::DuplicateEntry(Entry::Key(key)) => write!(f, "master key already registered: {key:?}"),
            Self::DuplicateEntry(Entry::Stream(stream)) => {
                write!(f, "stream already registered: {stream:?}")
            }
            Self::NotFound => write!(f, "no such entry"),
            Self::InvalidIndex => write!(f, "index out of range or retired"),
            Self::BadParameter => write!(f, "bad parameter"),
            Self::ReplayedPacket => write!(f, "packet index already seen"),
            Self::KeyLimitReached => write!(f, "master key reached its packet limit"),
        }
    }
}

impl From<pool::Error> for Error {
    fn from(value: pool::Error) -> Self {
        match value {
            pool::Error::Exhausted => Self::OutOfMemory,
        }
    }
}
