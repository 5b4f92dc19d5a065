//! The RTCP control-traffic endpoint: one bidirectional UDP socket shared by
//! sender-report and receiver-report traffic for a flow.
//!
//! Dispatch to the host replaces the original implementation's signal/slot
//! pair (`senderReportReceived`, `receiverReportReceived`) with a plain
//! observer trait invoked inline from the receive loop (spec section 9).

use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::RwLock;
use socket2::{Domain, Protocol, Socket, Type};
use tracing::{debug, warn};

use crate::codec::{self, ReceiverReport, RtcpPacket, SenderReport};
use crate::diag::{FlowDiagnostics, NullDiagnostics};
use crate::error::{Result, SamError};
use crate::time::NtpTimestamp;

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

/// Receives dispatch for inbound SR/RR traffic on the event thread.
pub trait RtcpObserver: Send + Sync {
    /// A sender report arrived; `last_sr_middle32` is the value to echo back
    /// as LSR in this endpoint's next receiver report.
    fn on_sender_report(&self, last_sr_middle32: u32);

    /// A receiver report arrived.
    fn on_receiver_report(&self, report: ReceiverReport);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EndpointState {
    Unbound,
    Bound,
    Closed,
}

/// Owns one UDP socket used both to send SR/RR reports and to receive them
/// from the remote peer.
pub struct RtcpEndpoint {
    local_port: u16,
    ssrc: u32,
    remote_addr: Arc<RwLock<Option<SocketAddr>>>,
    state: Arc<RwLock<EndpointState>>,
    running: Arc<AtomicBool>,
    socket: Option<UdpSocket>,
    observer: Arc<dyn RtcpObserver>,
    diagnostics: Arc<dyn FlowDiagnostics>,
    receive_thread: Option<JoinHandle<()>>,
}

impl RtcpEndpoint {
    pub fn new(
        local_port: u16,
        ssrc: u32,
        remote_addr: Option<SocketAddr>,
        observer: Arc<dyn RtcpObserver>,
    ) -> Self {
        Self {
            local_port,
            ssrc,
            remote_addr: Arc::new(RwLock::new(remote_addr)),
            state: Arc::new(RwLock::new(EndpointState::Unbound)),
            running: Arc::new(AtomicBool::new(false)),
            socket: None,
            observer,
            diagnostics: Arc::new(NullDiagnostics),
            receive_thread: None,
        }
    }

    pub fn set_diagnostics(&mut self, diagnostics: Arc<dyn FlowDiagnostics>) {
        self.diagnostics = diagnostics;
    }

    /// Swap the inbound-report observer. Must be called before `start()`;
    /// the receive thread captures the observer in place at that point.
    pub fn set_observer(&mut self, observer: Arc<dyn RtcpObserver>) {
        self.observer = observer;
    }

    /// The receiver learns the sender's address from the first RTP packet;
    /// the sender learns the receiver's RTCP port from configuration. Either
    /// way the remote address can be (re)pointed after construction.
    pub fn set_remote_addr(&self, addr: SocketAddr) {
        *self.remote_addr.write() = Some(addr);
    }

    /// Bind the RTCP socket and start the background receive loop.
    /// Idempotent before the first successful bind; rejected afterwards.
    pub fn start(&mut self) -> Result<()> {
        match *self.state.read() {
            EndpointState::Bound => {
                return Err(SamError::BindFailed(io::Error::new(
                    io::ErrorKind::AlreadyExists,
                    "RTCP endpoint already bound",
                )))
            }
            EndpointState::Closed => {
                return Err(SamError::BindFailed(io::Error::new(
                    io::ErrorKind::Other,
                    "RTCP endpoint closed",
                )))
            }
            EndpointState::Unbound => {}
        }

        let socket = bind_reuse_addr(self.local_port)?;
        socket
            .set_read_timeout(Some(RECV_TIMEOUT))
            .map_err(SamError::BindFailed)?;
        let recv_socket = socket.try_clone().map_err(SamError::BindFailed)?;

        self.running.store(true, Ordering::SeqCst);
        *self.state.write() = EndpointState::Bound;

        let running = self.running.clone();
        let observer = self.observer.clone();
        let diagnostics = self.diagnostics.clone();

        self.receive_thread = Some(std::thread::spawn(move || {
            receive_loop(recv_socket, running, observer, diagnostics);
        }));

        self.socket = Some(socket);
        debug!(port = self.local_port, "RTCP endpoint bound");
        Ok(())
    }

    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        *self.state.write() = EndpointState::Closed;
        if let Some(handle) = self.receive_thread.take() {
            let _ = handle.join();
        }
        self.socket = None;
    }

    pub fn send_sender_report(
        &self,
        ntp: NtpTimestamp,
        rtp_timestamp: u32,
        packets_sent: u32,
        octets_sent: u32,
    ) -> Result<()> {
        let report = SenderReport {
            reporter_ssrc: self.ssrc,
            ntp_seconds: ntp.seconds,
            ntp_fraction: ntp.fraction,
            rtp_timestamp,
            packets_sent,
            octets_sent,
        };
        let bytes = codec::encode_sender_report(&report);
        self.send(&bytes)
    }

    pub fn send_receiver_report(&self, mut report: ReceiverReport) -> Result<()> {
        report.reporter_ssrc = self.ssrc;
        let bytes = codec::encode_receiver_report(&report);
        self.send(&bytes)
    }

    /// Clone the bound socket so another thread can send datagrams directly
    /// (the RTP receiver's event thread sends RRs this way, keeping RR
    /// emission on the same thread that drains the RTP socket rather than
    /// hopping back onto this endpoint's owner).
    pub fn try_clone_socket(&self) -> Result<UdpSocket> {
        self.socket
            .as_ref()
            .ok_or_else(|| {
                SamError::BindFailed(io::Error::new(
                    io::ErrorKind::NotConnected,
                    "RTCP endpoint not bound",
                ))
            })?
            .try_clone()
            .map_err(SamError::BindFailed)
    }

    /// The locally bound address, once `start()` has succeeded.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        let socket = self.socket.as_ref().ok_or_else(|| {
            SamError::BindFailed(io::Error::new(
                io::ErrorKind::NotConnected,
                "RTCP endpoint not bound",
            ))
        })?;
        socket.local_addr().map_err(SamError::BindFailed)
    }

    /// Share the remote-address cell so a caller holding a cloned socket (see
    /// [`try_clone_socket`](Self::try_clone_socket)) can also learn/update
    /// the remote RTCP address, e.g. from the first RTP packet's source IP.
    pub fn remote_addr_handle(&self) -> Arc<RwLock<Option<SocketAddr>>> {
        self.remote_addr.clone()
    }

    fn send(&self, bytes: &[u8]) -> Result<()> {
        let Some(socket) = self.socket.as_ref() else {
            warn!("RTCP endpoint not bound, dropping outbound report");
            return Ok(());
        };
        let Some(addr) = *self.remote_addr.read() else {
            warn!(ssrc = self.ssrc, "RTCP remote host not set, dropping outbound report");
            return Ok(());
        };
        socket.send_to(bytes, addr).map_err(SamError::SendFailed)?;
        Ok(())
    }
}

impl Drop for RtcpEndpoint {
    fn drop(&mut self) {
        self.stop();
    }
}

fn receive_loop(
    socket: UdpSocket,
    running: Arc<AtomicBool>,
    observer: Arc<dyn RtcpObserver>,
    diagnostics: Arc<dyn FlowDiagnostics>,
) {
    let mut buf = [0u8; MAX_DATAGRAM];
    while running.load(Ordering::SeqCst) {
        match socket.recv_from(&mut buf) {
            Ok((len, _src)) => match codec::decode_rtcp(&buf[..len]) {
                Ok(RtcpPacket::SenderReport(sr)) => {
                    let ntp = NtpTimestamp {
                        seconds: sr.ntp_seconds,
                        fraction: sr.ntp_fraction,
                    };
                    observer.on_sender_report(ntp.middle32());
                }
                Ok(RtcpPacket::ReceiverReport(rr)) => observer.on_receiver_report(rr),
                Ok(RtcpPacket::Unknown(pt)) => {
                    debug!(packet_type = pt, "skipping unrecognized RTCP packet type");
                }
                Err(e) => {
                    warn!(error = %e, "malformed RTCP datagram, dropping");
                    diagnostics.on_format_error(&e.to_string());
                }
            },
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock || e.kind() == io::ErrorKind::TimedOut => {}
            Err(e) => {
                warn!(error = %e, "RTCP receive error");
                diagnostics.on_io_error(&e.to_string());
            }
        }
    }
}
