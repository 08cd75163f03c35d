use pool::{PoolOptions, TableOptions};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::{
    Error,
    context::KeyLayout,
    index::{RTCP_WRAP_INDEX, RTP_WRAP_INDEX},
};

/// smallest replay list allowed by RFC 3711.
pub const MIN_REPLAY_LIST_SIZE: u64 = 64;

/// Session key sizes and window sizes of one protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Deserialize, Serialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "kebab-case"))]
pub struct ProtocolOptions {
    #[cfg_attr(feature = "serde", serde(default = "ProtocolOptions::encrypt_key_size"))]
    pub encrypt_key_size: usize,
    #[cfg_attr(feature = "serde", serde(default = "ProtocolOptions::auth_key_size"))]
    pub auth_key_size: usize,
    #[cfg_attr(feature = "serde", serde(default = "ProtocolOptions::salt_size"))]
    pub salt_size: usize,
    ///
    /// Number of packets tracked for replay detection, 0 disables it.
    ///
    #[cfg_attr(feature = "serde", serde(default = "ProtocolOptions::replay_list_size"))]
    pub replay_list_size: u64,
    ///
    /// Number of indexes of context history kept behind the newest packet.
    /// Indexes further back count as future indexes.
    ///
    #[cfg_attr(feature = "serde", serde(default = "ProtocolOptions::history_size"))]
    pub history_size: u64,
}

impl ProtocolOptions {
    fn encrypt_key_size() -> usize {
        16
    }

    fn auth_key_size() -> usize {
        20
    }

    fn salt_size() -> usize {
        14
    }

    fn replay_list_size() -> u64 {
        MIN_REPLAY_LIST_SIZE
    }

    fn history_size() -> u64 {
        65536
    }

    pub fn layout(&self) -> KeyLayout {
        KeyLayout {
            encrypt_key_size: self.encrypt_key_size,
            auth_key_size: self.auth_key_size,
            salt_size: self.salt_size,
        }
    }

    fn validate(&mut self, wrap: u64) -> Result<(), Error> {
        if self.encrypt_key_size == 0 || self.salt_size == 0 {
            return Err(Error::BadParameter);
        }

        if self.replay_list_size > 0 && self.replay_list_size < MIN_REPLAY_LIST_SIZE {
            return Err(Error::BadParameter);
        }

        if self.history_size < self.replay_list_size {
            self.history_size = self.replay_list_size;
        }

        if self.history_size >= wrap {
            return Err(Error::BadParameter);
        }

        Ok(())
    }
}

impl Default for ProtocolOptions {
    fn default() -> Self {
        Self {
            encrypt_key_size: Self::encrypt_key_size(),
            auth_key_size: Self::auth_key_size(),
            salt_size: Self::salt_size(),
            replay_list_size: Self::replay_list_size(),
            history_size: Self::history_size(),
        }
    }
}

/// Sizing of a [`Database`](crate::Database).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Deserialize, Serialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "kebab-case"))]
pub struct DatabaseOptions {
    #[cfg_attr(feature = "serde", serde(default = "DatabaseOptions::master_key_size"))]
    pub master_key_size: usize,
    #[cfg_attr(feature = "serde", serde(default = "DatabaseOptions::master_salt_size"))]
    pub master_salt_size: usize,
    ///
    /// Length of the master key identifier, 0 when packets carry no MKI.
    ///
    #[cfg_attr(feature = "serde", serde(default = "DatabaseOptions::mki_size"))]
    pub mki_size: usize,
    #[cfg_attr(feature = "serde", serde(default))]
    pub rtp: ProtocolOptions,
    #[cfg_attr(feature = "serde", serde(default))]
    pub rtcp: ProtocolOptions,
    #[cfg_attr(feature = "serde", serde(default = "DatabaseOptions::key_pool"))]
    pub key_pool: PoolOptions,
    #[cfg_attr(feature = "serde", serde(default = "DatabaseOptions::stream_pool"))]
    pub stream_pool: PoolOptions,
    #[cfg_attr(feature = "serde", serde(default = "DatabaseOptions::context_pool"))]
    pub context_pool: PoolOptions,
    #[cfg_attr(feature = "serde", serde(default))]
    pub key_table: TableOptions,
    #[cfg_attr(feature = "serde", serde(default))]
    pub source_table: TableOptions,
    #[cfg_attr(feature = "serde", serde(default))]
    pub destination_table: TableOptions,
}

impl DatabaseOptions {
    fn master_key_size() -> usize {
        16
    }

    fn master_salt_size() -> usize {
        14
    }

    fn mki_size() -> usize {
        4
    }

    fn key_pool() -> PoolOptions {
        PoolOptions::with_page_items(10)
    }

    fn stream_pool() -> PoolOptions {
        PoolOptions::with_page_items(20)
    }

    fn context_pool() -> PoolOptions {
        PoolOptions::with_page_items(40)
    }

    pub fn protocol(&self, is_rtp: bool) -> &ProtocolOptions {
        if is_rtp { &self.rtp } else { &self.rtcp }
    }

    /// Checks the sizes and raises each history size to at least its replay
    /// list size.
    ///
    /// # Test
    ///
    /// ```
    /// use srtp_keydb_engine::*;
    ///
    /// let mut options = DatabaseOptions::default();
    /// options.rtp.history_size = 10;
    /// assert!(options.validate().is_ok());
    /// assert_eq!(options.rtp.history_size, 64);
    ///
    /// options.rtcp.replay_list_size = 32;
    /// assert_eq!(options.validate(), Err(Error::BadParameter));
    /// ```
    pub fn validate(&mut self) -> Result<(), Error> {
        if self.master_key_size == 0 || self.master_salt_size == 0 {
            return Err(Error::BadParameter);
        }

        self.rtp.validate(RTP_WRAP_INDEX)?;
        self.rtcp.validate(RTCP_WRAP_INDEX)?;
        Ok(())
    }
}

impl Default for DatabaseOptions {
    fn default() -> Self {
        Self {
            master_key_size: Self::master_key_size(),
            master_salt_size: Self::master_salt_size(),
            mki_size: Self::mki_size(),
            rtp: ProtocolOptions::default(),
            rtcp: ProtocolOptions::default(),
            key_pool: Self::key_pool(),
            stream_pool: Self::stream_pool(),
            context_pool: Self::context_pool(),
            key_table: TableOptions::default(),
            source_table: TableOptions::default(),
            destination_table: TableOptions::default(),
        }
    }
}
