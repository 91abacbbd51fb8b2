//! Processing stages
//!
//! A stage is synchronous: it takes one message and emits zero or more.
//! Stages never block; blocking happens only at reservoirs and the message
//! pools, in the async segment runner.

mod flusher;
mod muter;
mod pre_driver;
mod ramper;
mod starvation;
mod variable_delay;


pub use flusher::{FlushControl, Flusher};
pub use muter::{MuteControl, Muter};
pub use pre_driver::PreDriver;
pub use ramper::Ramper;
pub use starvation::StarvationMonitor;
pub use variable_delay::VariableDelay;

use serde::{Deserialize, Serialize};

use super::msg::Msg;

/// A synchronous pipeline stage
pub trait Stage: Send {
    /// Name used in logs
    fn name(&self) -> &'static str;

    /// Handle one message, appending whatever should continue downstream
    fn process(&mut self, msg: Msg, out: &mut Vec<Msg>);

    /// Called when the reservoir feeding this stage's segment stays empty
    /// past the starvation timeout
    fn on_starved(&mut self, _out: &mut Vec<Msg>) {}
}

/// Declarative description of one pipeline element
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StageKind {
    /// Bounded reservoir; splits the chain into independently running segments
    Reservoir {
        /// Capacity in milliseconds
        max_ms: u64,
        /// Capacity in audio messages
        max_msgs: usize,
    },
    /// Discards audio between a stop request and its flush
    Flusher,
    /// Ramps gain up at stream starts and after flushes
    Ramper,
    /// Replaces audio with silence while muted
    Muter,
    /// Applies delay changes by inserting silence or skipping audio
    VariableDelay,
    /// Reports starvation to the stream's protocol
    StarvationMonitor,
    /// Terminal bookkeeping: drain callbacks and events
    PreDriver,
}

/// A stage kind plus whether it is built
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageDescriptor {
    /// Stage kind
    #[serde(flatten)]
    pub kind: StageKind,
    /// Disabled descriptors are skipped by the builder
    #[serde(default = "enabled_default")]
    pub enabled: bool,
}

fn enabled_default() -> bool {
    true
}

impl StageDescriptor {
    /// Enabled descriptor
    #[must_use]
    pub fn new(kind: StageKind) -> Self {
        Self {
            kind,
            enabled: true,
        }
    }

    /// Descriptor enabled only if `enabled`
    #[must_use]
    pub fn when(enabled: bool, kind: StageKind) -> Self {
        Self { kind, enabled }
    }
}
