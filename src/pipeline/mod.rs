//! Bounded, staged message pipeline
//!
//! Protocols push [`Msg`]s through a [`Supply`]; messages pass a chain of
//! [`Stage`]s separated by bounded [`Reservoir`]s and are pulled by the
//! driver from [`PipelineOutput`]. Capacities are measured in
//! [`jiffies`], so buffering does not depend on sample rate.

mod builder;
mod config;
mod element;
pub mod ids;
pub mod jiffies;
mod msg;
mod reservoir;
pub mod stages;
mod supply;

#[cfg(test)]
mod tests;

pub use builder::{Pipeline, PipelineBuilder, PipelineControl, PipelineOutput};
pub use config::PipelineConfig;
pub use element::{PullElement, PushElement};
pub use ids::{ID_INVALID, IdProvider};
pub use msg::{
    AudioChunk, Drain, Msg, MsgBody, MsgFactory, MsgPoolSizes, Ramp, StreamFormat, StreamInfo,
    Track,
};
pub use reservoir::Reservoir;
pub use stages::{Stage, StageDescriptor, StageKind};
pub use supply::{PipelineSupply, Supply};

/// Callbacks from the pipeline into the protocol that owns a stream
pub trait StreamHandler: Send + Sync {
    /// Ask the protocol to stop `stream_id`
    ///
    /// Returns the flush id the protocol will output to mark the stop, or
    /// `None` if the stream is not the protocol's current one. Audio already
    /// queued keeps playing unless the flushers are told about the id; see
    /// [`PipelineControl::stop_stream`].
    fn try_stop(&self, stream_id: u32) -> Option<u32>;

    /// Report that the pipeline has started or stopped starving
    fn notify_starving(&self, mode: &str, stream_id: u32, starving: bool);
}

/// Events published by the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineEvent {
    /// A stream start reached the driver
    StreamStarted {
        /// Stream id
        stream_id: u32,
    },
    /// A flush reached the driver
    FlushCompleted {
        /// Flush id
        id: u32,
    },
    /// A halt reached the driver
    HaltReached {
        /// Halt id
        id: u32,
    },
    /// A drain completed
    DrainCompleted {
        /// Drain id
        id: u32,
    },
    /// Starvation started or ended
    Starving {
        /// Stream id
        stream_id: u32,
        /// Whether the pipeline is now starving
        starving: bool,
    },
    /// Quit reached the driver
    Quit,
}
