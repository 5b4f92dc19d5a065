//! Flow configuration
//!
//! The parameters a host needs to construct an [`RtpSender`](crate::sender::RtpSender)
//! or [`RtpReceiver`](crate::receiver::RtpReceiver). Parsing command-line flags
//! or a plugin host's settings into this struct is the host's job (out of
//! scope here); this is a plain, serde-deserializable value so it can also be
//! loaded from a TOML file, the way the original host application's
//! configuration was.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Configuration shared by an RTP sender and its paired receiver.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowConfig {
    /// Remote host to send RTP/RTCP datagrams to.
    pub remote_host: String,

    /// Remote RTP port.
    pub remote_rtp_port: u16,

    /// Local RTCP port to bind.
    #[serde(default)]
    pub local_rtcp_port: u16,

    /// Remote RTCP port.
    pub remote_rtcp_port: u16,

    /// Payload type: 96 (16-bit), 97 (24-bit) or 98 (float).
    #[serde(default = "default_payload_type")]
    pub payload_type: u8,

    /// Source sample rate in Hz.
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,

    /// Number of channels carried per packet.
    #[serde(default = "default_channels")]
    pub channels: usize,

    /// RTCP sender report interval, in milliseconds.
    #[serde(default = "default_report_interval_ms")]
    pub report_interval_ms: u32,

    /// Jitter buffer capacity, in packets.
    #[serde(default = "default_jitter_buffer_capacity")]
    pub jitter_buffer_capacity: usize,
}

fn default_payload_type() -> u8 {
    crate::codec::PAYLOAD_PCM24
}
fn default_sample_rate() -> u32 {
    48000
}
fn default_channels() -> usize {
    2
}
fn default_report_interval_ms() -> u32 {
    1000
}
fn default_jitter_buffer_capacity() -> usize {
    64
}

impl FlowConfig {
    /// Load configuration from a TOML file.
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("couldn't read {}", path.display()))?;
        let config: FlowConfig = toml::from_str(&content)
            .with_context(|| format!("couldn't parse {}", path.display()))?;
        tracing::info!(path = %path.display(), "loaded flow configuration");
        Ok(config)
    }

    /// Save configuration to a TOML file.
    pub fn save_to_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let content = toml::to_string_pretty(self).context("failed to serialize flow config")?;
        fs::write(path, content).with_context(|| format!("couldn't write {}", path.display()))?;
        Ok(())
    }
}
