//! Session discovery interface
//!
//! The RTSP side of a RAOP session (ANNOUNCE, SETUP, keep-alive timers) is
//! owned by the host. The protocol only needs the negotiated session
//! parameters and a way to tell whether the session is still alive.

use std::net::IpAddr;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::error::StreamError;
use crate::pipeline::StreamFormat;
use crate::protocol::rtp::constants::{FRAMES_PER_PACKET, SAMPLE_RATE};

/// Session parameters negotiated over RTSP
pub trait RaopDiscovery: Send + Sync {
    /// Whether the session is still alive
    fn active(&self) -> bool;

    /// End the session
    fn close(&self);

    /// Note activity so the session does not time out
    fn keep_alive(&self);

    /// AES key, if the session is encrypted
    fn aes_key(&self) -> Option<[u8; 16]>;

    /// AES IV, if the session is encrypted
    fn aes_iv(&self) -> Option<[u8; 16]>;

    /// Format parameters from the SDP `a=fmtp` line
    fn fmtp(&self) -> String;

    /// Address of the sending device
    fn client_addr(&self) -> Option<IpAddr>;
}

/// ALAC format parameters
///
/// The fmtp line is a list of space separated integers:
/// payload type, frames per packet, compatible version, bit depth,
/// rice history mult, rice initial history, rice limit, channels,
/// max run, max frame bytes, average bit rate, sample rate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fmtp {
    /// Frames per packet
    pub frames_per_packet: u32,
    /// Bits per sample
    pub bit_depth: u8,
    /// Channel count
    pub channels: u8,
    /// Sample rate
    pub sample_rate: u32,
    raw: String,
}

impl Default for Fmtp {
    fn default() -> Self {
        Self {
            frames_per_packet: FRAMES_PER_PACKET,
            bit_depth: 16,
            channels: 2,
            sample_rate: SAMPLE_RATE,
            raw: String::new(),
        }
    }
}

impl Fmtp {
    /// Parse an fmtp line; missing or malformed fields keep their defaults
    #[must_use]
    pub fn parse(line: &str) -> Self {
        let fields: Vec<&str> = line.split_whitespace().collect();
        let field = |i: usize| fields.get(i).and_then(|f| f.parse::<u32>().ok());

        let defaults = Self::default();
        Self {
            frames_per_packet: field(1)
                .filter(|&n| n > 0)
                .unwrap_or(defaults.frames_per_packet),
            bit_depth: field(3)
                .and_then(|n| u8::try_from(n).ok())
                .unwrap_or(defaults.bit_depth),
            channels: field(7)
                .and_then(|n| u8::try_from(n).ok())
                .filter(|&n| n > 0)
                .unwrap_or(defaults.channels),
            sample_rate: field(11)
                .filter(|&n| n > 0)
                .unwrap_or(defaults.sample_rate),
            raw: line.trim().to_string(),
        }
    }

    /// The line as received
    #[must_use]
    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// Pipeline format description for this stream
    #[must_use]
    pub fn stream_format(&self) -> StreamFormat {
        StreamFormat {
            codec: "alac".to_string(),
            codec_params: self.raw.clone(),
            sample_rate: self.sample_rate,
            channels: self.channels,
            bit_depth: self.bit_depth,
            frames_per_packet: self.frames_per_packet,
        }
    }
}

#[derive(Debug, Default)]
struct SessionState {
    active: bool,
    aes_key: Option<[u8; 16]>,
    aes_iv: Option<[u8; 16]>,
    fmtp: String,
    client_addr: Option<IpAddr>,
    keep_alives: u64,
    closes: u64,
}

/// Discovery state set by the host's RTSP handler
#[derive(Debug, Default)]
pub struct SessionDiscovery {
    state: Mutex<SessionState>,
}

impl SessionDiscovery {
    /// Create an inactive session
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start a session
    pub fn begin(&self, fmtp: impl Into<String>, client_addr: Option<IpAddr>) {
        let mut state = self.lock();
        state.active = true;
        state.fmtp = fmtp.into();
        state.client_addr = client_addr;
        tracing::info!(client = ?client_addr, "raop session started");
    }

    /// Set the session key material
    pub fn set_keys(&self, key: [u8; 16], iv: [u8; 16]) {
        let mut state = self.lock();
        state.aes_key = Some(key);
        state.aes_iv = Some(iv);
    }

    /// Set the session key material from bytes decoded out of the ANNOUNCE
    ///
    /// # Errors
    ///
    /// Returns `StreamError::InvalidKey` unless both are 16 bytes; the
    /// previous keys are kept.
    pub fn set_key_bytes(&self, key: &[u8], iv: &[u8]) -> Result<(), StreamError> {
        let key: [u8; 16] = key.try_into().map_err(|_| StreamError::InvalidKey)?;
        let iv: [u8; 16] = iv.try_into().map_err(|_| StreamError::InvalidKey)?;
        self.set_keys(key, iv);
        Ok(())
    }

    /// Clear the key material for an unencrypted session
    pub fn clear_keys(&self) {
        let mut state = self.lock();
        state.aes_key = None;
        state.aes_iv = None;
    }

    /// Mark the session alive or dead
    pub fn set_active(&self, active: bool) {
        self.lock().active = active;
    }

    /// Number of keep-alive calls seen
    #[must_use]
    pub fn keep_alive_count(&self) -> u64 {
        self.lock().keep_alives
    }

    /// Number of close calls seen
    #[must_use]
    pub fn close_count(&self) -> u64 {
        self.lock().closes
    }
}

impl RaopDiscovery for SessionDiscovery {
    fn active(&self) -> bool {
        self.lock().active
    }

    fn close(&self) {
        let mut state = self.lock();
        if state.active {
            tracing::info!("raop session closed");
        }
        state.active = false;
        state.closes += 1;
    }

    fn keep_alive(&self) {
        self.lock().keep_alives += 1;
    }

    fn aes_key(&self) -> Option<[u8; 16]> {
        self.lock().aes_key
    }

    fn aes_iv(&self) -> Option<[u8; 16]> {
        self.lock().aes_iv
    }

    fn fmtp(&self) -> String {
        self.lock().fmtp.clone()
    }

    fn client_addr(&self) -> Option<IpAddr> {
        self.lock().client_addr
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_fmtp() {
        let fmtp = Fmtp::parse("96 352 0 16 40 10 14 2 255 0 0 44100");
        assert_eq!(fmtp.frames_per_packet, 352);
        assert_eq!(fmtp.bit_depth, 16);
        assert_eq!(fmtp.channels, 2);
        assert_eq!(fmtp.sample_rate, 44100);
        assert_eq!(fmtp.raw(), "96 352 0 16 40 10 14 2 255 0 0 44100");
    }

    #[test]
    fn test_parse_fmtp_non_default() {
        let fmtp = Fmtp::parse("96 4096 0 24 40 10 14 1 255 0 0 48000");
        assert_eq!(fmtp.frames_per_packet, 4096);
        assert_eq!(fmtp.bit_depth, 24);
        assert_eq!(fmtp.channels, 1);
        assert_eq!(fmtp.sample_rate, 48000);

        let format = fmtp.stream_format();
        assert_eq!(format.codec, "alac");
        assert_eq!(format.sample_rate, 48000);
    }

    #[test]
    fn test_parse_fmtp_defaults() {
        let fmtp = Fmtp::parse("");
        assert_eq!(fmtp, Fmtp::default());

        let fmtp = Fmtp::parse("96 zero");
        assert_eq!(fmtp.frames_per_packet, 352);
        assert_eq!(fmtp.sample_rate, 44100);
    }

    #[test]
    fn test_session_discovery() {
        let discovery = SessionDiscovery::new();
        assert!(!discovery.active());

        discovery.begin("96 352", Some("10.0.0.2".parse().unwrap()));
        discovery.set_keys([1; 16], [2; 16]);
        assert!(discovery.active());
        assert_eq!(discovery.aes_key(), Some([1; 16]));
        assert_eq!(discovery.fmtp(), "96 352");

        discovery.keep_alive();
        discovery.keep_alive();
        assert_eq!(discovery.keep_alive_count(), 2);

        discovery.close();
        assert!(!discovery.active());
        assert_eq!(discovery.close_count(), 1);
    }

    #[test]
    fn test_set_key_bytes() {
        let discovery = SessionDiscovery::new();
        discovery.set_key_bytes(&[3; 16], &[4; 16]).unwrap();
        assert_eq!(discovery.aes_key(), Some([3; 16]));
        assert_eq!(discovery.aes_iv(), Some([4; 16]));

        assert_eq!(
            discovery.set_key_bytes(&[5; 15], &[4; 16]),
            Err(StreamError::InvalidKey)
        );
        assert_eq!(
            discovery.set_key_bytes(&[5; 16], &[]),
            Err(StreamError::InvalidKey)
        );
        assert_eq!(discovery.aes_key(), Some([3; 16]));
    }
}
