use std::io;
use thiserror::Error;

use crate::protocol::rtp::RtpDecodeError;

/// Signals raised by the repairer
///
/// All three are recovered from by a pipeline discontinuity.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RepairError {
    /// Backlog capacity exceeded before the earliest gap was filled
    #[error("repairer buffer full")]
    BufferFull,

    /// A non-resent frame arrived from before the current position
    #[error("repairer stream restarted")]
    StreamRestarted,

    /// Resend attempts for a gap were exhausted
    #[error("gap starting at {start} unrecoverable after {attempts} resend attempts")]
    GapUnrecoverable {
        /// First missing sequence number
        start: u16,
        /// Resend rounds issued
        attempts: u32,
    },
}

/// Repairable pool errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AllocationError {
    /// Every slot is in use
    #[error("repairable pool exhausted ({capacity} slots)")]
    PoolExhausted {
        /// Pool size
        capacity: usize,
    },

    /// Payload larger than a slot
    #[error("payload of {len} bytes exceeds slot size {max}")]
    PayloadTooLarge {
        /// Payload length
        len: usize,
        /// Slot size
        max: usize,
    },
}

/// UDP session server errors
#[derive(Debug, Error)]
pub enum ServerError {
    /// Server is closed
    #[error("server closed")]
    Closed,

    /// Receive aborted by interrupt
    #[error("receive interrupted")]
    Interrupted,

    /// Socket error
    #[error("socket error: {0}")]
    Io(#[from] io::Error),
}

/// Pipeline errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PipelineError {
    /// No free message slots
    #[error("message pool exhausted ({capacity} slots)")]
    PoolExhausted {
        /// Pool size
        capacity: usize,
    },

    /// Quit has passed this point
    #[error("pipeline has quit")]
    Quit,

    /// Downstream side dropped
    #[error("pipeline closed")]
    Closed,
}

/// Errors starting a protocol stream
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StreamError {
    /// URI scheme not handled by this protocol
    #[error("unsupported scheme: {0}")]
    UnsupportedScheme(String),

    /// URI could not be parsed
    #[error("invalid stream uri: {0}")]
    InvalidUri(String),

    /// AES key or IV has the wrong length
    #[error("invalid session key material")]
    InvalidKey,
}

/// Errors produced by the renderer
#[derive(Debug, Error)]
pub enum RendererError {
    /// Malformed datagram
    #[error("invalid packet: {0}")]
    InvalidPacket(#[from] RtpDecodeError),

    /// Repairer signal
    #[error("repair: {0}")]
    Repair(#[from] RepairError),

    /// Repairable pool
    #[error("allocation failure: {0}")]
    Allocation(#[from] AllocationError),

    /// UDP server
    #[error("server: {0}")]
    Server(#[from] ServerError),

    /// Pipeline
    #[error("pipeline: {0}")]
    Pipeline(#[from] PipelineError),

    /// Stream start
    #[error("stream: {0}")]
    Stream(#[from] StreamError),

    /// Network error
    #[error("network error: {0}")]
    Network(#[from] io::Error),

    /// Configuration could not be parsed
    #[error("config error: {0}")]
    Config(#[from] serde_json::Error),
}

impl RendererError {
    /// Check if the error is handled without ending the session
    ///
    /// Malformed packets and pool exhaustion are dropped, network faults are
    /// retried and repair signals become a discontinuity.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::InvalidPacket(_)
                | Self::Repair(_)
                | Self::Allocation(_)
                | Self::Network(_)
                | Self::Server(ServerError::Io(_) | ServerError::Closed)
                | Self::Pipeline(PipelineError::PoolExhausted { .. })
        )
    }

    /// Check if the error should trigger a drain-and-restart
    #[must_use]
    pub fn is_discontinuity(&self) -> bool {
        matches!(self, Self::Repair(_))
    }
}

/// Result type alias for renderer operations
pub type Result<T> = std::result::Result<T, RendererError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = RendererError::from(RepairError::GapUnrecoverable {
            start: 7,
            attempts: 40,
        });
        assert_eq!(
            err.to_string(),
            "repair: gap starting at 7 unrecoverable after 40 resend attempts"
        );
    }

    #[test]
    fn test_error_is_recoverable() {
        assert!(RendererError::from(RepairError::BufferFull).is_recoverable());
        assert!(
            RendererError::from(RtpDecodeError::BufferTooSmall { needed: 4, have: 1 })
                .is_recoverable()
        );
        assert!(
            RendererError::from(AllocationError::PoolExhausted { capacity: 53 }).is_recoverable()
        );
        assert!(!RendererError::from(PipelineError::Quit).is_recoverable());
        assert!(
            !RendererError::from(StreamError::UnsupportedScheme("http".to_string()))
                .is_recoverable()
        );
    }

    #[test]
    fn test_error_is_discontinuity() {
        assert!(RendererError::from(RepairError::StreamRestarted).is_discontinuity());
        assert!(!RendererError::from(ServerError::Interrupted).is_discontinuity());
    }
}
