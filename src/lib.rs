//! Real-time audio transport core for a Streaming Audio Manager flow: RTP
//! packet encode/decode, the paired RTCP sender/receiver report protocol, and
//! the sender and receiver state machines built on top of them.
//!
//! CLI glue, mixing/device I/O, session negotiation, and the audio-callback
//! pumping that drives [`RtpSender::send_audio`] from a host's real-time
//! producer are all out of scope here; this crate exposes the plain types and
//! traits at those seams (`FlowConfig`, `FlowDiagnostics`, the plane slices in
//! [`planes`]) for a host to wire in.

pub mod codec;
pub mod config;
pub mod diag;
pub mod error;
pub mod planes;
pub mod receiver;
pub mod rtcp_endpoint;
pub mod sender;
pub mod time;

pub use codec::{
    decode_packet, decode_payload, decode_rtcp, encode_packet, encode_packet_into,
    encode_receiver_report, encode_sender_report, loss_fraction, PayloadCoding, ReceiverReport,
    RtcpPacket, RtpPacket, SenderReport, PAYLOAD_PCM16, PAYLOAD_PCM24, PAYLOAD_PCM32F,
};
pub use config::FlowConfig;
pub use diag::{FlowDiagnostics, NullDiagnostics};
pub use error::{Result, SamError};
pub use receiver::{ReceiverStats, RtpReceiver};
pub use rtcp_endpoint::{RtcpEndpoint, RtcpObserver};
pub use sender::RtpSender;
pub use time::NtpTimestamp;
