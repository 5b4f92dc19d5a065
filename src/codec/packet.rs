//! RTP packet codec: the 12-byte fixed header plus one of three non-interleaved
//! PCM payload codings.
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |V=2|P|X|  CC   |M|     PT      |       sequence number         |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                           timestamp                           |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |           synchronization source (SSRC) identifier            |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```
//!
//! Only `V=2, P=0, X=0, CC=0` (first octet exactly `0x80`) is accepted on
//! decode; the marker bit is always written 0 and ignored on read.

use bytes::{Bytes, BytesMut};

use crate::error::{Result, SamError};

/// Signed 16-bit linear PCM.
pub const PAYLOAD_PCM16: u8 = 96;
/// Signed 24-bit linear PCM, big-endian, 3 bytes/sample.
pub const PAYLOAD_PCM24: u8 = 97;
/// 32-bit IEEE float PCM.
pub const PAYLOAD_PCM32F: u8 = 98;

const RTP_HEADER_LEN: usize = 12;
const VERSION_BYTE: u8 = 0x80;

/// Quantization scale for 16-bit PCM: `2^15 + 0.5`.
const Q_16BIT: f32 = 32768.5;
/// Quantization scale for 24-bit PCM: `2^23 - 0.5`.
const Q_24BIT: f32 = 8388607.5;

/// One of the three audio payload codings this transport supports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadCoding {
    Pcm16,
    Pcm24,
    Pcm32Float,
}

impl PayloadCoding {
    pub fn bytes_per_sample(self) -> usize {
        match self {
            PayloadCoding::Pcm16 => 2,
            PayloadCoding::Pcm24 => 3,
            PayloadCoding::Pcm32Float => 4,
        }
    }

    pub fn payload_type(self) -> u8 {
        match self {
            PayloadCoding::Pcm16 => PAYLOAD_PCM16,
            PayloadCoding::Pcm24 => PAYLOAD_PCM24,
            PayloadCoding::Pcm32Float => PAYLOAD_PCM32F,
        }
    }
}

impl TryFrom<u8> for PayloadCoding {
    type Error = SamError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            PAYLOAD_PCM16 => Ok(PayloadCoding::Pcm16),
            PAYLOAD_PCM24 => Ok(PayloadCoding::Pcm24),
            PAYLOAD_PCM32F => Ok(PayloadCoding::Pcm32Float),
            other => Err(SamError::InvalidPayloadType(other)),
        }
    }
}

/// A decoded RTP packet. The payload is left as raw bytes until
/// [`decode_payload`] is called against caller-supplied sample planes; that
/// split mirrors the wire decode (header only) versus the sample decode
/// (channels/samples-aware) described in spec section 4.1.
#[derive(Debug, Clone)]
pub struct RtpPacket {
    pub payload_type: u8,
    pub sequence: u16,
    pub timestamp: u32,
    pub ssrc: u32,
    pub payload: Bytes,
    /// Arrival time in milliseconds, stamped by the receiver on decode.
    pub arrival_time_ms: u32,
    /// 64-bit extended sequence number; starts equal to `sequence` and is
    /// overwritten by the receiver's wraparound tracking before enqueue.
    pub extended_sequence: u64,
    /// Scheduled playout time, set by the jitter buffer.
    pub playout_time_ms: u32,
    /// Whether this packet has already been delivered to (or skipped by) the
    /// consumer and is eligible to return to the free list.
    pub used: bool,
}

/// Encode one RTP packet: header plus the PCM payload for `planes`.
///
/// `planes[ch]` holds `samples` values in `[-1.0, 1.0]`; channel 0's samples
/// are written first, then channel 1's, and so on (non-interleaved).
pub fn encode(
    timestamp: u32,
    sequence: u16,
    payload_type: u8,
    ssrc: u32,
    planes: &[&[f32]],
) -> Result<BytesMut> {
    let mut buf = BytesMut::new();
    encode_into(&mut buf, timestamp, sequence, payload_type, ssrc, planes)?;
    Ok(buf)
}

/// Like [`encode`], but writes into (and first clears) a caller-owned scratch
/// buffer instead of allocating a fresh one. Intended for the sender's
/// steady-state path, which must not allocate per spec section 5.
pub fn encode_into(
    buf: &mut BytesMut,
    timestamp: u32,
    sequence: u16,
    payload_type: u8,
    ssrc: u32,
    planes: &[&[f32]],
) -> Result<()> {
    let coding = PayloadCoding::try_from(payload_type)?;

    buf.clear();
    let samples = planes.first().map_or(0, |p| p.len());
    buf.reserve(RTP_HEADER_LEN + planes.len() * samples * coding.bytes_per_sample());

    buf.extend_from_slice(&[VERSION_BYTE, payload_type & 0x7F]);
    buf.extend_from_slice(&sequence.to_be_bytes());
    buf.extend_from_slice(&timestamp.to_be_bytes());
    buf.extend_from_slice(&ssrc.to_be_bytes());

    encode_payload(coding, planes, buf);

    Ok(())
}

fn encode_payload(coding: PayloadCoding, planes: &[&[f32]], out: &mut BytesMut) {
    match coding {
        PayloadCoding::Pcm16 => {
            for plane in planes {
                for &sample in *plane {
                    let clamped = sample.clamp(-1.0, 1.0);
                    let scaled = (clamped * Q_16BIT).round();
                    let quantized = scaled.clamp(i16::MIN as f32, i16::MAX as f32) as i16;
                    out.extend_from_slice(&quantized.to_be_bytes());
                }
            }
        }
        PayloadCoding::Pcm24 => {
            for plane in planes {
                for &sample in *plane {
                    let clamped = sample.clamp(-1.0, 1.0);
                    let scaled = (clamped * Q_24BIT).round();
                    let quantized = scaled.clamp(-8_388_608.0, 8_388_607.0) as i32;
                    let bytes = quantized.to_be_bytes();
                    out.extend_from_slice(&bytes[1..4]);
                }
            }
        }
        PayloadCoding::Pcm32Float => {
            for plane in planes {
                for &sample in *plane {
                    out.extend_from_slice(&sample.to_be_bytes());
                }
            }
        }
    }
}

/// Parse an RTP packet's header and stash the remaining bytes as its raw
/// payload. `arrival_time_ms` should be the receiver's local clock at
/// datagram arrival.
pub fn decode(data: &[u8], arrival_time_ms: u32) -> Result<RtpPacket> {
    if data.len() < RTP_HEADER_LEN + 1 {
        return Err(SamError::TooShort { len: data.len() });
    }

    if data[0] != VERSION_BYTE {
        return Err(SamError::BadVersion(data[0]));
    }

    let payload_type = data[1] & 0x7F;
    PayloadCoding::try_from(payload_type)?;

    let sequence = u16::from_be_bytes([data[2], data[3]]);
    let timestamp = u32::from_be_bytes([data[4], data[5], data[6], data[7]]);
    let ssrc = u32::from_be_bytes([data[8], data[9], data[10], data[11]]);
    let payload = Bytes::copy_from_slice(&data[RTP_HEADER_LEN..]);

    Ok(RtpPacket {
        payload_type,
        sequence,
        timestamp,
        ssrc,
        payload,
        arrival_time_ms,
        extended_sequence: sequence as u64,
        playout_time_ms: 0,
        used: false,
    })
}

/// Decode a packet's raw payload bytes into caller-supplied PCM planes.
pub fn decode_payload(
    payload_type: u8,
    channels: usize,
    samples: usize,
    payload: &[u8],
    out: &mut [&mut [f32]],
) -> Result<()> {
    let coding = PayloadCoding::try_from(payload_type)?;
    let expected = channels * samples * coding.bytes_per_sample();
    if payload.len() != expected {
        return Err(SamError::PayloadSizeMismatch {
            expected,
            actual: payload.len(),
        });
    }
    if !crate::planes::validate_plane_lengths_mut(out, samples) {
        let actual = out
            .iter()
            .map(|p| p.len())
            .find(|&len| len != samples)
            .unwrap_or(samples);
        return Err(SamError::PlaneLengthMismatch { samples, actual });
    }

    match coding {
        PayloadCoding::Pcm16 => {
            for (ch, plane) in out.iter_mut().enumerate() {
                for n in 0..samples {
                    let off = (ch * samples + n) * 2;
                    let raw = i16::from_be_bytes([payload[off], payload[off + 1]]);
                    plane[n] = raw as f32 / Q_16BIT;
                }
            }
        }
        PayloadCoding::Pcm24 => {
            for (ch, plane) in out.iter_mut().enumerate() {
                for n in 0..samples {
                    let off = (ch * samples + n) * 3;
                    let word = i32::from_be_bytes([
                        payload[off],
                        payload[off + 1],
                        payload[off + 2],
                        0,
                    ]);
                    // upper 3 bytes hold the value; arithmetic shift sign-extends.
                    let signed = word >> 8;
                    plane[n] = signed as f32 / Q_24BIT;
                }
            }
        }
        PayloadCoding::Pcm32Float => {
            for (ch, plane) in out.iter_mut().enumerate() {
                for n in 0..samples {
                    let off = (ch * samples + n) * 4;
                    let bytes = [
                        payload[off],
                        payload[off + 1],
                        payload[off + 2],
                        payload[off + 3],
                    ];
                    plane[n] = f32::from_be_bytes(bytes);
                }
            }
        }
    }

    Ok(())
}
