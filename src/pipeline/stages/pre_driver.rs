use tokio::sync::broadcast;

use super::Stage;
use crate::pipeline::PipelineEvent;
use crate::pipeline::msg::{Msg, MsgBody};

/// Last stage before the driver
///
/// Completes drains, reports flushes, halts and stream starts, and records
/// that quit has passed.
#[derive(Debug)]
pub struct PreDriver {
    events: broadcast::Sender<PipelineEvent>,
}

impl PreDriver {
    /// Create a pre-driver publishing to `events`
    #[must_use]
    pub fn new(events: broadcast::Sender<PipelineEvent>) -> Self {
        Self { events }
    }

    fn publish(&self, event: PipelineEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }
}

impl Stage for PreDriver {
    fn name(&self) -> &'static str {
        "pre_driver"
    }

    fn process(&mut self, mut msg: Msg, out: &mut Vec<Msg>) {
        match msg.body_mut() {
            MsgBody::Drain(drain) => {
                drain.complete();
                let id = drain.id;
                self.publish(PipelineEvent::DrainCompleted { id });
            }
            MsgBody::Flush { id } => {
                let id = *id;
                self.publish(PipelineEvent::FlushCompleted { id });
            }
            MsgBody::Halt { id } => {
                let id = *id;
                self.publish(PipelineEvent::HaltReached { id });
            }
            MsgBody::Stream(info) => {
                let stream_id = info.stream_id;
                self.publish(PipelineEvent::StreamStarted { stream_id });
            }
            MsgBody::Quit => self.publish(PipelineEvent::Quit),
            _ => {}
        }
        out.push(msg);
    }
}
