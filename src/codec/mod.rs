//! Wire codecs for the RTP packet format and the paired RTCP SR/RR reports.

pub mod packet;
pub mod rtcp;

pub use packet::{
    decode as decode_packet, decode_payload, encode as encode_packet, encode_into as encode_packet_into,
    PayloadCoding, RtpPacket, PAYLOAD_PCM16, PAYLOAD_PCM24, PAYLOAD_PCM32F,
};
pub use rtcp::{
    decode as decode_rtcp, encode_receiver_report, encode_sender_report, loss_fraction,
    ReceiverReport, RtcpPacket, SenderReport, RTCP_RR_PACKET_TYPE, RTCP_SR_PACKET_TYPE,
};
