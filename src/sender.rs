//! The RTP sender: owns the outbound RTP socket, the sequence-number and
//! timestamp counters, and schedules SR emission at a media-sample-count
//! interval (spec section 4.4).

use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};
use std::sync::Arc;

use bytes::BytesMut;
use rand::Rng;
use tracing::{debug, trace};

use crate::codec::{self, PayloadCoding};
use crate::error::{Result, SamError};
use crate::rtcp_endpoint::{RtcpEndpoint, RtcpObserver};
use crate::time::NtpTimestamp;

/// An observer that does nothing with inbound RTCP traffic; a sender only
/// cares about reports it emits, not ones it (atypically) might receive.
struct Mute;
impl RtcpObserver for Mute {
    fn on_sender_report(&self, _last_sr_middle32: u32) {}
    fn on_receiver_report(&self, _report: crate::codec::ReceiverReport) {}
}

pub struct RtpSender {
    socket: UdpSocket,
    remote_rtp_addr: SocketAddr,
    ssrc: u32,
    payload_type: u8,
    sample_rate: u32,

    timestamp: u32,
    sequence: u16,
    packets_sent: u32,
    octets_sent: u32,

    report_interval_ts: u32,
    next_report_tick: u32,

    rtcp: RtcpEndpoint,
    scratch: BytesMut,
}

impl RtpSender {
    /// Bind the RTP socket, draw random starting counters, and prepare (but
    /// do not yet start) the paired RTCP endpoint.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        remote_host: &str,
        remote_rtp_port: u16,
        local_rtcp_port: u16,
        remote_rtcp_port: u16,
        report_interval_ms: u32,
        sample_rate: u32,
        payload_type: u8,
        ssrc: u32,
    ) -> Result<Self> {
        PayloadCoding::try_from(payload_type)?;

        let socket = UdpSocket::bind("0.0.0.0:0").map_err(SamError::BindFailed)?;
        let remote_rtp_addr = (remote_host, remote_rtp_port)
            .to_socket_addrs()
            .map_err(SamError::BindFailed)?
            .next()
            .ok_or_else(|| {
                SamError::BindFailed(std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    "couldn't resolve remote RTP host",
                ))
            })?;
        let remote_rtcp_addr = SocketAddr::new(remote_rtp_addr.ip(), remote_rtcp_port);

        let mut rng = rand::thread_rng();
        let timestamp: u32 = rng.gen();
        let sequence: u16 = rng.gen();
        debug!(timestamp, sequence, "RtpSender starting counters");

        let report_interval_ts = ((sample_rate as u64 * report_interval_ms as u64) / 1000) as u32;
        let next_report_tick = timestamp.wrapping_add(report_interval_ts);

        let rtcp = RtcpEndpoint::new(
            local_rtcp_port,
            ssrc,
            Some(remote_rtcp_addr),
            Arc::new(Mute),
        );

        Ok(Self {
            socket,
            remote_rtp_addr,
            ssrc,
            payload_type,
            sample_rate,
            timestamp,
            sequence,
            packets_sent: 0,
            octets_sent: 0,
            report_interval_ts,
            next_report_tick,
            rtcp,
            scratch: BytesMut::new(),
        })
    }

    /// Bring up the paired RTCP endpoint.
    pub fn start(&mut self) -> Result<()> {
        self.rtcp.start()
    }

    /// Observe RTCP traffic arriving at this sender (normally just RRs from
    /// its paired receiver). Must be called before [`start`](Self::start).
    pub fn set_rtcp_observer(&mut self, observer: Arc<dyn RtcpObserver>) {
        self.rtcp.set_observer(observer);
    }

    pub fn ssrc(&self) -> u32 {
        self.ssrc
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// The locally bound RTP port (useful when constructed with port 0).
    pub fn local_rtp_port(&self) -> Result<u16> {
        self.socket
            .local_addr()
            .map(|a| a.port())
            .map_err(SamError::BindFailed)
    }

    /// The locally bound RTCP port, once [`start`](Self::start) has run.
    pub fn local_rtcp_port(&self) -> Result<u16> {
        self.rtcp.local_addr().map(|a| a.port())
    }

    /// Encode and send one RTP packet for `planes`, then advance counters and
    /// fire an RTCP sender report if this send crossed the reporting tick.
    pub fn send_audio(&mut self, planes: &[&[f32]]) -> Result<()> {
        let samples = planes.first().map_or(0, |p| p.len());
        if !crate::planes::validate_plane_lengths(planes, samples) {
            let actual = planes
                .iter()
                .map(|p| p.len())
                .find(|&len| len != samples)
                .unwrap_or(samples);
            return Err(SamError::PlaneLengthMismatch { samples, actual });
        }

        codec::encode_packet_into(
            &mut self.scratch,
            self.timestamp,
            self.sequence,
            self.payload_type,
            self.ssrc,
            planes,
        )?;

        self.socket
            .send_to(&self.scratch, self.remote_rtp_addr)
            .map_err(SamError::SendFailed)?;

        let payload_len = self.scratch.len() - 12;
        trace!(
            seq = self.sequence,
            ts = self.timestamp,
            samples,
            "sent RTP packet"
        );

        self.timestamp = self.timestamp.wrapping_add(samples as u32);
        self.sequence = self.sequence.wrapping_add(1);

        // Unsigned comparison robust to 32-bit wraparound: due when the gap
        // from next_report_tick to timestamp has its high bit clear. The SR
        // body is built from packets_sent/octets_sent before they include
        // the packet just sent, matching the original sender's ordering
        // (those counts are part of the wire-visible report, unlike
        // timestamp/sequence above).
        if self.timestamp.wrapping_sub(self.next_report_tick) & 0x8000_0000 == 0 {
            self.emit_sender_report();
            self.next_report_tick = self.next_report_tick.wrapping_add(self.report_interval_ts);
        }

        self.packets_sent = self.packets_sent.wrapping_add(1);
        self.octets_sent = self.octets_sent.wrapping_add(payload_len as u32);

        Ok(())
    }

    fn emit_sender_report(&self) {
        let ntp = NtpTimestamp::now();
        if let Err(e) =
            self.rtcp
                .send_sender_report(ntp, self.timestamp, self.packets_sent, self.octets_sent)
        {
            tracing::warn!(error = %e, "failed to send RTCP sender report");
        }
    }

    /// Debug hook: overwrite the timestamp counter directly. Contract-required
    /// for bit-exact packet output tests (spec section 4.4).
    pub fn force_timestamp(&mut self, timestamp: u32) {
        self.timestamp = timestamp;
    }

    /// Debug hook: overwrite the sequence-number counter directly.
    pub fn force_sequence_num(&mut self, sequence: u16) {
        self.sequence = sequence;
    }

    pub fn packets_sent(&self) -> u32 {
        self.packets_sent
    }

    pub fn octets_sent(&self) -> u32 {
        self.octets_sent
    }

    pub fn timestamp(&self) -> u32 {
        self.timestamp
    }

    pub fn sequence(&self) -> u16 {
        self.sequence
    }
}

impl Drop for RtpSender {
    fn drop(&mut self) {
        self.rtcp.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_sender(payload_type: u8) -> RtpSender {
        let mut sender = RtpSender::new(
            "127.0.0.1",
            0, // port 0: OS picks an ephemeral port, fine for send-only tests
            0,
            0,
            1000,
            48000,
            payload_type,
            0x1234,
        )
        .unwrap();
        sender.force_timestamp(0);
        sender.force_sequence_num(0);
        sender
    }

    #[test]
    fn monotonic_counters_wrap_correctly() {
        let mut sender = make_sender(codec::PAYLOAD_PCM16);
        sender.force_timestamp(u32::MAX - 1);
        sender.force_sequence_num(u16::MAX - 1);

        let plane = [0.0f32; 4];
        let planes: [&[f32]; 1] = [&plane];

        for k in 0..4u64 {
            let expected_ts = (u32::MAX as u64 - 1 + k * 4) as u32;
            let expected_seq = (u16::MAX as u64 - 1 + k) as u16;
            assert_eq!(sender.timestamp(), expected_ts);
            assert_eq!(sender.sequence(), expected_seq);
            sender.send_audio(&planes).unwrap();
        }
    }

    #[test]
    fn sr_scheduling_matches_worked_example() {
        // sampleRate=48000, interval=1000ms, samples=512/packet (Testable Property 7).
        let mut sender = make_sender(codec::PAYLOAD_PCM16);
        assert_eq!(sender.report_interval_ts, 48000);
        sender.force_timestamp(0);
        sender.next_report_tick = 48000;

        let plane = [0.0f32; 512];
        let planes: [&[f32]; 1] = [&plane];

        let mut sends = 0;
        while sender.next_report_tick == 48000 {
            sender.send_audio(&planes).unwrap();
            sends += 1;
        }
        assert_eq!(sends, 94);
        assert_eq!(sender.next_report_tick, 96000);

        let mut more_sends = 0;
        while sender.next_report_tick == 96000 {
            sender.send_audio(&planes).unwrap();
            more_sends += 1;
        }
        assert_eq!(more_sends, 94);
    }
}
