//! RTP/RAOP packet model
//!
//! Parsing is zero-copy: payloads are [`bytes::Bytes`] slices of the
//! receive buffer. Every decode failure is an [`RtpDecodeError`] and means
//! the datagram should be dropped.

mod packet;
pub mod raop;

#[cfg(test)]
mod tests;

pub use packet::{RtpDecodeError, RtpHeader, RtpPacket};
pub use raop::{
    AudioPacket, ControlPacket, RaopPayloadType, ResendRequest, ResendResponse, SyncPacket,
};

/// RAOP protocol constants
pub mod constants {
    /// Largest datagram a sender emits
    pub const MAX_PACKET_SIZE: usize = 1472;

    /// Receive buffer for the control channel
    pub const CONTROL_BUFFER_SIZE: usize = 1500;

    /// Audio frames per RTP packet (352 samples at 44.1kHz ≈ 8ms)
    pub const FRAMES_PER_PACKET: u32 = 352;

    /// Audio sample rate
    pub const SAMPLE_RATE: u32 = 44100;

    /// Latency assumed until the first sync packet arrives (1750ms at 44.1kHz)
    pub const DEFAULT_LATENCY_SAMPLES: u32 = 77175;
}
