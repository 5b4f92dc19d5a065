//! Wall-clock <-> NTP timestamp conversions used by RTCP sender reports.
//!
//! NTP timestamps are seconds since 1900-01-01 plus a 32-bit fixed-point
//! fraction of a second. RTP/RTCP use the Unix epoch everywhere else, so the
//! well-known offset of 2,208,988,800 seconds bridges the two.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Seconds between the NTP epoch (1900) and the Unix epoch (1970).
pub const NTP_UNIX_EPOCH_OFFSET: u64 = 2_208_988_800;

/// An NTP 64-bit timestamp split into its two 32-bit halves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NtpTimestamp {
    pub seconds: u32,
    pub fraction: u32,
}

impl NtpTimestamp {
    /// Capture the current wall-clock time as an NTP timestamp.
    pub fn now() -> Self {
        let since_epoch = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or(Duration::ZERO);
        Self::from_unix_duration(since_epoch)
    }

    /// Convert a duration since the Unix epoch into an NTP timestamp.
    pub fn from_unix_duration(since_epoch: Duration) -> Self {
        let unix_secs = since_epoch.as_secs();
        let seconds = unix_secs.wrapping_add(NTP_UNIX_EPOCH_OFFSET) as u32;
        // fraction = (subsecond_nanos / 1e9) * 2^32
        let fraction = ((since_epoch.subsec_nanos() as u64) << 32) / 1_000_000_000;
        Self {
            seconds,
            fraction: fraction as u32,
        }
    }

    /// The "middle 32 bits" used as LSR in a receiver report: the low 16 bits
    /// of the NTP seconds concatenated with the high 16 bits of the fraction.
    pub fn middle32(&self) -> u32 {
        ((self.seconds & 0xFFFF) << 16) | (self.fraction >> 16)
    }
}

/// Convert a millisecond delay into RTCP's 1/65536-second DLSR units.
pub fn millis_to_dlsr_units(delay_millis: u64) -> u32 {
    ((delay_millis.wrapping_mul(65536)) / 1000) as u32
}

/// Current wall-clock time in milliseconds since the Unix epoch, truncated to
/// 32 bits. Used for packet arrival stamps and RTCP round-trip timing; a local
/// flow never needs to compare stamps taken more than ~49 days apart, and
/// callers that do (DLSR, jitter) already difference via wrapping arithmetic.
pub fn now_millis() -> u32 {
    let since_epoch = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO);
    since_epoch.as_millis() as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dlsr_units_conversion() {
        // 1500ms delay -> 1500 * 65536 / 1000 = 98304 (Testable Property 9).
        assert_eq!(millis_to_dlsr_units(1500), 98304);
    }

    #[test]
    fn middle32_matches_formula() {
        let ntp = NtpTimestamp {
            seconds: 0xAABB_CCDD,
            fraction: 0x1122_3344,
        };
        let expected = ((0xCCDDu32) << 16) | 0x1122u32;
        assert_eq!(ntp.middle32(), expected);
    }

    #[test]
    fn from_unix_duration_adds_epoch_offset() {
        let ntp = NtpTimestamp::from_unix_duration(Duration::from_secs(0));
        assert_eq!(ntp.seconds, NTP_UNIX_EPOCH_OFFSET as u32);
        assert_eq!(ntp.fraction, 0);
    }
}
