//! RTP receiver: inbound RTP socket, extended-sequence/jitter tracking, loss
//! accounting, and the paired RTCP receiver-report emission (spec section 4.5).

pub mod jitter;

use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use socket2::{Domain, Protocol, Socket, Type};
use tracing::{debug, warn};

use crate::codec::{self, ReceiverReport};
use crate::diag::{FlowDiagnostics, NullDiagnostics};
use crate::error::{Result, SamError};
use crate::rtcp_endpoint::{RtcpEndpoint, RtcpObserver};
use crate::time;

use jitter::{ExtendedSequenceTracker, InsertOutcome, JitterEstimator, PacketPool};

const RECV_TIMEOUT: Duration = Duration::from_millis(20);
const MAX_DATAGRAM: usize = 2048;

/// Bind a UDP socket with `SO_REUSEADDR` set, so a flow can be restarted
/// without waiting out the previous socket's TIME_WAIT.
fn bind_reuse_addr(port: u16) -> Result<UdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP)).map_err(SamError::BindFailed)?;
    socket.set_reuse_address(true).map_err(SamError::BindFailed)?;
    let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port);
    socket.bind(&addr.into()).map_err(SamError::BindFailed)?;
    Ok(socket.into())
}

/// Shared hand-off for the most recent SR, written from the RTCP endpoint's
/// receive thread and read from the RTP receive thread when an RR is due.
struct SenderReportState {
    middle32: AtomicU32,
    arrival_ms: AtomicU32,
    seen: AtomicBool,
}

impl SenderReportState {
    fn new() -> Self {
        Self {
            middle32: AtomicU32::new(0),
            arrival_ms: AtomicU32::new(0),
            seen: AtomicBool::new(false),
        }
    }
}

struct ReportObserver {
    state: Arc<SenderReportState>,
}

impl RtcpObserver for ReportObserver {
    fn on_sender_report(&self, last_sr_middle32: u32) {
        self.state.middle32.store(last_sr_middle32, Ordering::SeqCst);
        self.state.arrival_ms.store(time::now_millis(), Ordering::SeqCst);
        self.state.seen.store(true, Ordering::SeqCst);
    }

    fn on_receiver_report(&self, _report: ReceiverReport) {}
}

/// Per-source statistics and the playout queue; guarded by a mutex shared
/// between the RTP receive thread and the host's pull callback.
struct Stats {
    ssrc: Option<u32>,
    ext_tracker: ExtendedSequenceTracker,
    jitter: JitterEstimator,
    queue: PacketPool,

    first_ext_overall: Option<u64>,
    max_ext_overall: u64,
    count_overall: u64,

    first_ext_interval: Option<u64>,
    max_ext_interval: u64,
    count_interval: u64,

    late_drops: u64,
    duplicate_drops: u64,
    overflow_drops: u64,
}

impl Stats {
    fn new(jitter_buffer_capacity: usize) -> Self {
        Self {
            ssrc: None,
            ext_tracker: ExtendedSequenceTracker::new(),
            jitter: JitterEstimator::new(),
            queue: PacketPool::new(jitter_buffer_capacity),
            first_ext_overall: None,
            max_ext_overall: 0,
            count_overall: 0,
            first_ext_interval: None,
            max_ext_interval: 0,
            count_interval: 0,
            late_drops: 0,
            duplicate_drops: 0,
            overflow_drops: 0,
        }
    }

    /// SSRC change handling (spec section 9, open question 2): reset all
    /// per-source state rather than mixing statistics across sources.
    fn reset_for_new_source(&mut self) {
        self.ext_tracker.reset();
        self.jitter.reset();
        self.queue.clear();
        self.first_ext_overall = None;
        self.max_ext_overall = 0;
        self.count_overall = 0;
        self.reset_interval();
    }

    fn reset_interval(&mut self) {
        self.first_ext_interval = None;
        self.max_ext_interval = 0;
        self.count_interval = 0;
    }

    fn note_distinct_packet(&mut self, ext: u64) {
        match self.first_ext_overall {
            None => {
                self.first_ext_overall = Some(ext);
                self.max_ext_overall = ext;
            }
            Some(_) if ext > self.max_ext_overall => self.max_ext_overall = ext,
            Some(_) => {}
        }
        self.count_overall += 1;

        match self.first_ext_interval {
            None => {
                self.first_ext_interval = Some(ext);
                self.max_ext_interval = ext;
            }
            Some(_) if ext > self.max_ext_interval => self.max_ext_interval = ext,
            Some(_) => {}
        }
        self.count_interval += 1;
    }

    fn interval_loss(&self) -> (i64, i64) {
        match self.first_ext_interval {
            None => (0, 0),
            Some(first) => {
                let expected = (self.max_ext_interval - first + 1) as i64;
                let lost = expected - self.count_interval as i64;
                (expected, lost)
            }
        }
    }

    fn cumulative_lost(&self) -> i32 {
        match self.first_ext_overall {
            None => 0,
            Some(first) => {
                let expected = (self.max_ext_overall - first + 1) as i64;
                (expected - self.count_overall as i64) as i32
            }
        }
    }
}

/// Snapshot of receiver statistics, for a host that wants to display/log them.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReceiverStats {
    pub ssrc: Option<u32>,
    pub packets_received: u64,
    pub cumulative_lost: i32,
    pub jitter: u32,
    pub late_drops: u64,
    pub duplicate_drops: u64,
    pub overflow_drops: u64,
    pub queue_depth: usize,
    pub highest_extended_sequence: u64,
}

pub struct RtpReceiver {
    socket: UdpSocket,
    running: Arc<AtomicBool>,
    receive_thread: Option<JoinHandle<()>>,
    stats: Arc<Mutex<Stats>>,
    rtcp: RtcpEndpoint,
    report_state: Arc<SenderReportState>,
    diagnostics: Arc<dyn FlowDiagnostics>,

    sample_rate: u32,
    channels: usize,
    samples_per_packet: usize,
    remote_rtcp_port: u16,
    own_ssrc: u32,
    rr_interval: Duration,
}

impl RtpReceiver {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        local_rtp_port: u16,
        local_rtcp_port: u16,
        remote_rtcp_port: u16,
        rr_interval_ms: u32,
        sample_rate: u32,
        channels: usize,
        samples_per_packet: usize,
        jitter_buffer_capacity: usize,
    ) -> Result<Self> {
        let socket = bind_reuse_addr(local_rtp_port)?;
        socket
            .set_read_timeout(Some(RECV_TIMEOUT))
            .map_err(SamError::BindFailed)?;

        let own_ssrc: u32 = rand::random();

        let report_state = Arc::new(SenderReportState::new());
        let observer = Arc::new(ReportObserver {
            state: report_state.clone(),
        });
        // The remote address is unknown until the first RTP datagram arrives;
        // it is filled in with the learned IP and this configured port below.
        let rtcp = RtcpEndpoint::new(local_rtcp_port, own_ssrc, None, observer);

        Ok(Self {
            socket,
            running: Arc::new(AtomicBool::new(false)),
            receive_thread: None,
            stats: Arc::new(Mutex::new(Stats::new(jitter_buffer_capacity))),
            rtcp,
            report_state,
            diagnostics: Arc::new(NullDiagnostics),
            sample_rate,
            channels,
            samples_per_packet,
            remote_rtcp_port,
            own_ssrc,
            rr_interval: Duration::from_millis(rr_interval_ms as u64),
        })
    }

    pub fn set_diagnostics(&mut self, diagnostics: Arc<dyn FlowDiagnostics>) {
        self.diagnostics = diagnostics;
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

    /// Point this receiver's outbound RRs at the sender's RTCP port. The
    /// sender's IP is learned automatically from the first RTP datagram; its
    /// RTCP port is configuration the host supplies (spec section 4.3).
    pub fn set_remote_rtcp_port(&mut self, port: u16) {
        self.remote_rtcp_port = port;
    }

    pub fn stats(&self) -> ReceiverStats {
        let stats = self.stats.lock();
        ReceiverStats {
            ssrc: stats.ssrc,
            packets_received: stats.count_overall,
            cumulative_lost: stats.cumulative_lost(),
            jitter: stats.jitter.value(),
            late_drops: stats.late_drops,
            duplicate_drops: stats.duplicate_drops,
            overflow_drops: stats.overflow_drops,
            queue_depth: stats.queue.len(),
            highest_extended_sequence: stats.ext_tracker.current(),
        }
    }

    /// Bind the paired RTCP endpoint and start the RTP event thread.
    pub fn start(&mut self) -> Result<()> {
        self.rtcp.start()?;

        let rr_socket = self.rtcp.try_clone_socket()?;
        let remote_addr = self.rtcp.remote_addr_handle();

        self.running.store(true, Ordering::SeqCst);

        let socket = self.socket.try_clone().map_err(SamError::BindFailed)?;
        let running = self.running.clone();
        let stats = self.stats.clone();
        let report_state = self.report_state.clone();
        let diagnostics = self.diagnostics.clone();
        let sample_rate = self.sample_rate;
        let remote_rtcp_port = self.remote_rtcp_port;
        let own_ssrc = self.own_ssrc;
        let rr_interval = self.rr_interval;

        self.receive_thread = Some(std::thread::spawn(move || {
            receive_loop(
                socket,
                rr_socket,
                remote_addr,
                remote_rtcp_port,
                own_ssrc,
                running,
                stats,
                report_state,
                diagnostics,
                sample_rate,
                rr_interval,
            );
        }));

        debug!(port = ?self.socket.local_addr(), "RTP receiver started");
        Ok(())
    }

    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.receive_thread.take() {
            let _ = handle.join();
        }
        self.rtcp.stop();
    }

    /// Dequeue the next-in-order packet and decode it into `out_planes`.
    /// Returns `true` if a real packet was decoded, `false` if the buffer was
    /// silence-filled due to underrun (spec section 4.6).
    pub fn pull(&self, out_planes: &mut [&mut [f32]]) -> Result<bool> {
        let mut stats = self.stats.lock();
        match stats.queue.dequeue_next() {
            Some(packet) => {
                codec::decode_payload(
                    packet.payload_type,
                    self.channels,
                    self.samples_per_packet,
                    &packet.payload,
                    out_planes,
                )?;
                Ok(true)
            }
            None => {
                for plane in out_planes.iter_mut() {
                    plane.fill(0.0);
                }
                Ok(false)
            }
        }
    }
}

impl Drop for RtpReceiver {
    fn drop(&mut self) {
        self.stop();
    }
}

#[allow(clippy::too_many_arguments)]
fn receive_loop(
    socket: UdpSocket,
    rr_socket: UdpSocket,
    remote_addr: Arc<RwLock<Option<SocketAddr>>>,
    remote_rtcp_port: u16,
    own_ssrc: u32,
    running: Arc<AtomicBool>,
    stats: Arc<Mutex<Stats>>,
    report_state: Arc<SenderReportState>,
    diagnostics: Arc<dyn FlowDiagnostics>,
    sample_rate: u32,
    rr_interval: Duration,
) {
    let mut buf = [0u8; MAX_DATAGRAM];
    let mut last_rr_at = Instant::now();

    while running.load(Ordering::SeqCst) {
        match socket.recv_from(&mut buf) {
            Ok((len, src)) => {
                if remote_addr.read().is_none() {
                    *remote_addr.write() = Some(SocketAddr::new(src.ip(), remote_rtcp_port));
                }

                match codec::decode_packet(&buf[..len], time::now_millis()) {
                    Ok(packet) => {
                        let mut stats = stats.lock();
                        handle_packet(&mut stats, packet, sample_rate, diagnostics.as_ref());
                    }
                    Err(e) => {
                        warn!(error = %e, "malformed RTP datagram, dropping");
                        diagnostics.on_format_error(&e.to_string());
                    }
                }
            }
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock || e.kind() == io::ErrorKind::TimedOut => {}
            Err(e) => {
                warn!(error = %e, "RTP receive error");
                diagnostics.on_io_error(&e.to_string());
            }
        }

        if last_rr_at.elapsed() >= rr_interval {
            last_rr_at = Instant::now();
            maybe_send_rr(&rr_socket, &remote_addr, own_ssrc, &stats, &report_state);
        }
    }
}

fn handle_packet(
    stats: &mut Stats,
    mut packet: codec::RtpPacket,
    sample_rate: u32,
    diagnostics: &dyn FlowDiagnostics,
) {
    match stats.ssrc {
        Some(bound) if bound != packet.ssrc => {
            warn!(old_ssrc = bound, new_ssrc = packet.ssrc, "SSRC changed, resetting receiver state");
            stats.reset_for_new_source();
            stats.ssrc = Some(packet.ssrc);
        }
        Some(_) => {}
        None => stats.ssrc = Some(packet.ssrc),
    }

    let ext = stats.ext_tracker.track(packet.sequence);
    packet.extended_sequence = ext;

    let arrival_rtp_units = ((packet.arrival_time_ms as u64 * sample_rate as u64) / 1000) as u32;
    stats.jitter.update(arrival_rtp_units, packet.timestamp);

    match stats.queue.insert(packet) {
        InsertOutcome::Inserted => stats.note_distinct_packet(ext),
        InsertOutcome::Overflowed(_) => {
            stats.note_distinct_packet(ext);
            stats.overflow_drops += 1;
            diagnostics.on_queue_overflow();
        }
        InsertOutcome::Duplicate => {
            stats.duplicate_drops += 1;
            diagnostics.on_duplicate_packet();
        }
        InsertOutcome::Late => {
            stats.late_drops += 1;
            diagnostics.on_late_packet();
        }
    }
}

fn maybe_send_rr(
    socket: &UdpSocket,
    remote_addr: &Arc<RwLock<Option<SocketAddr>>>,
    reporter_ssrc: u32,
    stats: &Arc<Mutex<Stats>>,
    report_state: &Arc<SenderReportState>,
) {
    let Some(addr) = *remote_addr.read() else {
        return;
    };

    let (expected, lost) = {
        let stats = stats.lock();
        stats.interval_loss()
    };
    let loss_fraction = codec::loss_fraction(expected, lost);

    let (cumulative_lost, extended_highest_sequence, jitter, reportee_ssrc) = {
        let mut stats = stats.lock();
        let snapshot = (
            stats.cumulative_lost(),
            stats.ext_tracker.current() as u32,
            stats.jitter.value(),
            stats.ssrc.unwrap_or(0),
        );
        stats.reset_interval();
        snapshot
    };

    let (last_sr_middle32, delay_since_last_sr) = if report_state.seen.load(Ordering::SeqCst) {
        let middle32 = report_state.middle32.load(Ordering::SeqCst);
        let sr_arrival = report_state.arrival_ms.load(Ordering::SeqCst);
        let delay_ms = time::now_millis().wrapping_sub(sr_arrival) as u64;
        (middle32, time::millis_to_dlsr_units(delay_ms))
    } else {
        (0, 0)
    };

    let report = ReceiverReport {
        reporter_ssrc,
        reportee_ssrc,
        loss_fraction,
        cumulative_lost,
        extended_highest_sequence,
        jitter,
        last_sr_middle32,
        delay_since_last_sr,
    };

    let bytes = codec::encode_receiver_report(&report);
    if let Err(e) = socket.send_to(&bytes, addr) {
        warn!(error = %e, "failed to send RTCP receiver report");
    }
}
