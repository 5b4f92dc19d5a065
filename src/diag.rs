//! Optional diagnostics hand-off for steady-state errors.
//!
//! Format errors, size mismatches and transient I/O errors are always logged
//! via `tracing`; a host that wants machine-readable counts (for a metrics
//! exporter, say) can additionally implement [`FlowDiagnostics`] and hand it
//! to a sender/receiver at construction. The default implementation does
//! nothing, so wiring one in is optional.

/// Observer for steady-state conditions that the core never surfaces as a
/// hard `Err` (spec section 7: "steady-state errors are counted and
/// optionally reported via a diagnostics observer").
pub trait FlowDiagnostics: Send + Sync {
    /// A datagram failed to parse (format error) and was dropped.
    fn on_format_error(&self, _description: &str) {}

    /// A transient send or receive I/O error occurred; the flow continues.
    fn on_io_error(&self, _description: &str) {}

    /// A packet was dropped because the jitter buffer was full.
    fn on_queue_overflow(&self) {}

    /// A packet arrived whose position in the stream had already passed.
    fn on_late_packet(&self) {}

    /// A duplicate packet (already enqueued or already delivered) was dropped.
    fn on_duplicate_packet(&self) {}
}

/// No-op diagnostics observer, used when the host doesn't register one.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullDiagnostics;

impl FlowDiagnostics for NullDiagnostics {}
