//! Rolling packet index arithmetic.
//!
//! RTP packets are indexed by a 48 bit value made of the rollover counter
//! and the sequence number, RTCP packets by the 31 bit SRTCP index. Both
//! wrap values are of the form `2^n - 1`, so every distance is a wrapping
//! subtraction masked with the wrap value.

/// maximum RTP index, `2^48 - 1`.
pub const RTP_WRAP_INDEX: u64 = 0xFFFF_FFFF_FFFF;

/// maximum RTCP index, `2^31 - 1`.
pub const RTCP_WRAP_INDEX: u64 = 0x7FFF_FFFF;

/// wrap value of the index space used by the protocol.
///
/// # Test
///
/// ```
/// use srtp_keydb_engine::index::*;
///
/// assert_eq!(wrap_index(true), RTP_WRAP_INDEX);
/// assert_eq!(wrap_index(false), RTCP_WRAP_INDEX);
/// ```
pub const fn wrap_index(is_rtp: bool) -> u64 {
    if is_rtp {
        RTP_WRAP_INDEX
    } else {
        RTCP_WRAP_INDEX
    }
}

/// How far `from` has to move forward to reach `to`.
///
/// # Test
///
/// ```
/// use srtp_keydb_engine::index::*;
///
/// assert_eq!(distance(10, 4, RTP_WRAP_INDEX), 6);
/// assert_eq!(distance(2, RTP_WRAP_INDEX - 1, RTP_WRAP_INDEX), 4);
/// assert_eq!(distance(4, 10, RTCP_WRAP_INDEX), RTCP_WRAP_INDEX - 5);
/// ```
#[inline]
pub const fn distance(to: u64, from: u64, wrap: u64) -> u64 {
    to.wrapping_sub(from) & wrap
}

/// RFC 3711 section 3.3.1: `i = 2^16 * ROC + SEQ`.
///
/// # Test
///
/// ```
/// use srtp_keydb_engine::index::*;
///
/// assert_eq!(rtp_index(0, 0xFFFF), 0xFFFF);
/// assert_eq!(rtp_index(1, 0), 0x10000);
/// assert_eq!(rtp_index(u32::MAX, u16::MAX), RTP_WRAP_INDEX);
/// ```
#[inline]
pub const fn rtp_index(roc: u32, seq: u16) -> u64 {
    ((roc as u64) << 16) | seq as u64
}
