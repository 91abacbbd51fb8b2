use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::stages::{StageDescriptor, StageKind};

/// Pipeline configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Audio/silence message pool size
    pub audio_msgs: usize,

    /// Pool size for every other message kind
    pub control_msgs: usize,

    /// Gain ramp length after stream starts and flushes
    #[serde(with = "crate::config::duration_ms")]
    pub ramp_duration: Duration,

    /// How long the output waits on an empty reservoir before reporting
    /// starvation
    #[serde(with = "crate::config::duration_ms")]
    pub starvation_timeout: Duration,

    /// Broadcast capacity for pipeline events
    pub event_capacity: usize,

    /// Elements in push order, head first
    pub stages: Vec<StageDescriptor>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            audio_msgs: 1024,
            control_msgs: 256,
            ramp_duration: Duration::from_millis(100),
            starvation_timeout: Duration::from_millis(100),
            event_capacity: 64,
            stages: vec![
                StageDescriptor::new(StageKind::Flusher),
                StageDescriptor::new(StageKind::Reservoir {
                    max_ms: 3000,
                    max_msgs: 512,
                }),
                StageDescriptor::new(StageKind::Ramper),
                StageDescriptor::new(StageKind::Muter),
                StageDescriptor::new(StageKind::VariableDelay),
                StageDescriptor::new(StageKind::Reservoir {
                    max_ms: 1000,
                    max_msgs: 256,
                }),
                StageDescriptor::new(StageKind::StarvationMonitor),
                StageDescriptor::new(StageKind::PreDriver),
            ],
        }
    }
}

impl PipelineConfig {
    /// Set message pool sizes
    #[must_use]
    pub fn pools(mut self, audio_msgs: usize, control_msgs: usize) -> Self {
        self.audio_msgs = audio_msgs;
        self.control_msgs = control_msgs;
        self
    }

    /// Set ramp duration
    #[must_use]
    pub fn ramp_duration(mut self, duration: Duration) -> Self {
        self.ramp_duration = duration;
        self
    }

    /// Set starvation timeout
    #[must_use]
    pub fn starvation_timeout(mut self, timeout: Duration) -> Self {
        self.starvation_timeout = timeout;
        self
    }

    /// Replace the stage list
    #[must_use]
    pub fn stages(mut self, stages: Vec<StageDescriptor>) -> Self {
        self.stages = stages;
        self
    }
}
