//! RAOP receiver configuration

use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::protocol::rtp::constants::DEFAULT_LATENCY_SAMPLES;

/// RAOP protocol configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RaopConfig {
    /// Audio channel bind address (port 0 = auto-assign)
    pub audio_addr: SocketAddr,

    /// Control channel bind address (port 0 = auto-assign)
    pub control_addr: SocketAddr,

    /// Frames the repairer may hold while waiting for a gap to fill
    pub repair_capacity: usize,

    /// Largest audio payload a repairable slot can hold
    pub slot_bytes: usize,

    /// Upper bound of the random delay before the first resend request
    #[serde(with = "crate::config::duration_ms")]
    pub initial_repair_jitter: Duration,

    /// Interval between resend requests for an unfilled gap
    #[serde(with = "crate::config::duration_ms")]
    pub repair_retry_interval: Duration,

    /// Resend rounds before a gap is declared unrecoverable
    pub max_repair_attempts: u32,

    /// Longest wait for the pipeline to drain during a discontinuity
    #[serde(with = "crate::config::duration_ms")]
    pub drain_timeout: Duration,

    /// Pause after a socket error before the server reads again
    #[serde(with = "crate::config::duration_ms")]
    pub socket_retry_interval: Duration,

    /// Latency assumed until the sender reports one
    pub default_latency_samples: u32,

    /// Smallest latency change, in samples, that is passed to the pipeline
    pub latency_change_threshold: u32,
}

impl Default for RaopConfig {
    fn default() -> Self {
        let any = SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0));
        Self {
            audio_addr: any,
            control_addr: any,
            repair_capacity: 50,
            slot_bytes: 2048,
            initial_repair_jitter: Duration::from_millis(10),
            repair_retry_interval: Duration::from_millis(30),
            max_repair_attempts: 40,
            drain_timeout: Duration::from_secs(5),
            socket_retry_interval: Duration::from_millis(50),
            default_latency_samples: DEFAULT_LATENCY_SAMPLES,
            latency_change_threshold: 441,
        }
    }
}

impl RaopConfig {
    /// Bind both channels on loopback with auto-assigned ports
    #[must_use]
    pub fn loopback() -> Self {
        let local = SocketAddr::from((Ipv4Addr::LOCALHOST, 0));
        Self {
            audio_addr: local,
            control_addr: local,
            ..Default::default()
        }
    }

    /// Set repairer capacity
    #[must_use]
    pub fn repair_capacity(mut self, frames: usize) -> Self {
        self.repair_capacity = frames;
        self
    }

    /// Set resend timing
    #[must_use]
    pub fn repair_timing(mut self, initial_jitter: Duration, retry_interval: Duration) -> Self {
        self.initial_repair_jitter = initial_jitter;
        self.repair_retry_interval = retry_interval;
        self
    }

    /// Set resend attempt limit
    #[must_use]
    pub fn max_repair_attempts(mut self, attempts: u32) -> Self {
        self.max_repair_attempts = attempts;
        self
    }

    /// Set drain timeout
    #[must_use]
    pub fn drain_timeout(mut self, timeout: Duration) -> Self {
        self.drain_timeout = timeout;
        self
    }

    /// Repairable pool size: everything the repairer can hold, the packet
    /// that overflows it, and one in flight from each server
    #[must_use]
    pub fn allocator_slots(&self) -> usize {
        self.repair_capacity + 3
    }
}
