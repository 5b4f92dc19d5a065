//! RTCP codec: Sender Reports (PT=200) and Receiver Reports (PT=201), each
//! with a single report block. Compound RTCP packets are neither generated
//! nor required to be parsed here (spec section 9, open question 1) — a
//! single UDP datagram carries exactly one report.

use bytes::BytesMut;

use crate::error::{Result, SamError};

pub const RTCP_SR_PACKET_TYPE: u8 = 200;
pub const RTCP_RR_PACKET_TYPE: u8 = 201;

const SR_LENGTH_WORDS: u16 = 6;
const RR_LENGTH_WORDS: u16 = 7;
const SR_BODY_LEN: usize = 24;
const RR_BODY_LEN: usize = 28;
const COMMON_HEADER_LEN: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SenderReport {
    pub reporter_ssrc: u32,
    pub ntp_seconds: u32,
    pub ntp_fraction: u32,
    pub rtp_timestamp: u32,
    pub packets_sent: u32,
    pub octets_sent: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReceiverReport {
    pub reporter_ssrc: u32,
    pub reportee_ssrc: u32,
    pub loss_fraction: u8,
    /// Cumulative packets lost, sign-extended from the wire's 24-bit field.
    pub cumulative_lost: i32,
    pub extended_highest_sequence: u32,
    pub jitter: u32,
    pub last_sr_middle32: u32,
    pub delay_since_last_sr: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RtcpPacket {
    SenderReport(SenderReport),
    ReceiverReport(ReceiverReport),
    /// A recognized-but-unhandled packet type: log and skip, don't abort the datagram.
    Unknown(u8),
}

pub fn encode_sender_report(sr: &SenderReport) -> BytesMut {
    let mut buf = BytesMut::with_capacity(COMMON_HEADER_LEN + SR_BODY_LEN);
    buf.extend_from_slice(&[0x80, RTCP_SR_PACKET_TYPE]);
    buf.extend_from_slice(&SR_LENGTH_WORDS.to_be_bytes());
    buf.extend_from_slice(&sr.reporter_ssrc.to_be_bytes());
    buf.extend_from_slice(&sr.ntp_seconds.to_be_bytes());
    buf.extend_from_slice(&sr.ntp_fraction.to_be_bytes());
    buf.extend_from_slice(&sr.rtp_timestamp.to_be_bytes());
    buf.extend_from_slice(&sr.packets_sent.to_be_bytes());
    buf.extend_from_slice(&sr.octets_sent.to_be_bytes());
    buf
}

pub fn encode_receiver_report(rr: &ReceiverReport) -> BytesMut {
    let mut buf = BytesMut::with_capacity(COMMON_HEADER_LEN + RR_BODY_LEN);
    buf.extend_from_slice(&[0x80 | 0x01, RTCP_RR_PACKET_TYPE]);
    buf.extend_from_slice(&RR_LENGTH_WORDS.to_be_bytes());
    buf.extend_from_slice(&rr.reporter_ssrc.to_be_bytes());
    buf.extend_from_slice(&rr.reportee_ssrc.to_be_bytes());
    buf.extend_from_slice(&[rr.loss_fraction]);
    let loss_bytes = rr.cumulative_lost.to_be_bytes();
    buf.extend_from_slice(&loss_bytes[1..4]);
    buf.extend_from_slice(&rr.extended_highest_sequence.to_be_bytes());
    buf.extend_from_slice(&rr.jitter.to_be_bytes());
    buf.extend_from_slice(&rr.last_sr_middle32.to_be_bytes());
    buf.extend_from_slice(&rr.delay_since_last_sr.to_be_bytes());
    buf
}

/// Compute the RR loss fraction, Q0.8, from this interval's expected/lost counts.
pub fn loss_fraction(expected_this_interval: i64, lost_this_interval: i64) -> u8 {
    if expected_this_interval <= 0 {
        return 0;
    }
    let fraction = lost_this_interval as f64 / expected_this_interval as f64;
    (fraction * 256.0).round().clamp(0.0, 255.0) as u8
}

pub fn decode(data: &[u8]) -> Result<RtcpPacket> {
    if data.len() < COMMON_HEADER_LEN {
        return Err(SamError::TooShort { len: data.len() });
    }

    let version = data[0] >> 6;
    if version != 2 {
        return Err(SamError::BadVersion(data[0]));
    }

    let packet_type = data[1];
    let length = u16::from_be_bytes([data[2], data[3]]);

    match packet_type {
        RTCP_SR_PACKET_TYPE => decode_sender_report(data, length).map(RtcpPacket::SenderReport),
        RTCP_RR_PACKET_TYPE => decode_receiver_report(data, length).map(RtcpPacket::ReceiverReport),
        other => Ok(RtcpPacket::Unknown(other)),
    }
}

fn decode_sender_report(data: &[u8], length: u16) -> Result<SenderReport> {
    if length != SR_LENGTH_WORDS {
        return Err(SamError::BadRtcpLength(length));
    }
    if data.len() < COMMON_HEADER_LEN + SR_BODY_LEN {
        return Err(SamError::TooShort { len: data.len() });
    }

    let b = &data[COMMON_HEADER_LEN..];
    Ok(SenderReport {
        reporter_ssrc: u32::from_be_bytes(b[0..4].try_into().unwrap()),
        ntp_seconds: u32::from_be_bytes(b[4..8].try_into().unwrap()),
        ntp_fraction: u32::from_be_bytes(b[8..12].try_into().unwrap()),
        rtp_timestamp: u32::from_be_bytes(b[12..16].try_into().unwrap()),
        packets_sent: u32::from_be_bytes(b[16..20].try_into().unwrap()),
        octets_sent: u32::from_be_bytes(b[20..24].try_into().unwrap()),
    })
}

fn decode_receiver_report(data: &[u8], length: u16) -> Result<ReceiverReport> {
    if length != RR_LENGTH_WORDS {
        return Err(SamError::BadRtcpLength(length));
    }
    // Trailing bytes beyond the known body are tolerated (spec section 9,
    // open question 1): only malformed/undersized datagrams are rejected.
    if data.len() < COMMON_HEADER_LEN + RR_BODY_LEN {
        return Err(SamError::TooShort { len: data.len() });
    }

    let b = &data[COMMON_HEADER_LEN..];
    let loss_fraction = b[8];
    let loss_word = i32::from_be_bytes([b[9], b[10], b[11], 0]) >> 8;

    Ok(ReceiverReport {
        reporter_ssrc: u32::from_be_bytes(b[0..4].try_into().unwrap()),
        reportee_ssrc: u32::from_be_bytes(b[4..8].try_into().unwrap()),
        loss_fraction,
        cumulative_lost: loss_word,
        extended_highest_sequence: u32::from_be_bytes(b[12..16].try_into().unwrap()),
        jitter: u32::from_be_bytes(b[16..20].try_into().unwrap()),
        last_sr_middle32: u32::from_be_bytes(b[20..24].try_into().unwrap()),
        delay_since_last_sr: u32::from_be_bytes(b[24..28].try_into().unwrap()),
    })
}
