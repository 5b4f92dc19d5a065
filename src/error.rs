//! Error taxonomy for the RTP/RTCP transport core.
//!
//! Format errors and size mismatches are per-datagram: the caller gets one
//! back from a decode call and drops the offending packet. I/O errors split
//! into `BindFailed` (fatal, surfaced from `start()`) and `SendFailed`/
//! `RecvFailed` (transient, logged and counted by the event loop).

use std::io;

#[derive(Debug, thiserror::Error)]
pub enum SamError {
    /// RTP/RTCP datagram shorter than its fixed header.
    #[error("packet too short: {len} bytes")]
    TooShort { len: usize },

    /// First octet was not exactly `0x80` (V=2, P=0, X=0, CC=0).
    #[error("unsupported RTP/RTCP version byte: {0:#04x}")]
    BadVersion(u8),

    /// Payload type outside {96, 97, 98}.
    #[error("invalid payload type: {0}")]
    InvalidPayloadType(u8),

    /// Decoded payload length didn't match channels * samples * bytes-per-sample.
    #[error("payload size mismatch: expected {expected} bytes, got {actual}")]
    PayloadSizeMismatch { expected: usize, actual: usize },

    /// A channel plane handed to `send_audio` didn't carry `samples` elements,
    /// same as every other plane in the call.
    #[error("channel plane length mismatch: expected {samples} samples, got {actual}")]
    PlaneLengthMismatch { samples: usize, actual: usize },

    /// RTCP `length` field didn't match the known body size for its packet type.
    #[error("bad RTCP length field: {0}")]
    BadRtcpLength(u16),

    /// Socket bind failed; fatal for the owning flow.
    #[error("failed to bind socket: {0}")]
    BindFailed(#[source] io::Error),

    /// Transient send failure; flow continues.
    #[error("failed to send datagram: {0}")]
    SendFailed(#[source] io::Error),

    /// Transient receive failure; flow continues.
    #[error("failed to receive datagram: {0}")]
    RecvFailed(#[source] io::Error),
}

pub type Result<T> = std::result::Result<T, SamError>;
