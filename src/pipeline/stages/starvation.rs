use std::sync::Arc;

use tokio::sync::broadcast;

use super::Stage;
use crate::pipeline::msg::{Msg, MsgBody};
use crate::pipeline::{PipelineEvent, StreamHandler};

/// Tells the current stream's protocol when the pipeline runs dry
///
/// While starving, emits silence of `silence_jiffies` each time the
/// upstream reservoir times out. The mode reported to the protocol is the
/// stream uri's scheme.
pub struct StarvationMonitor {
    mode: String,
    silence_jiffies: u64,
    events: broadcast::Sender<PipelineEvent>,
    stream_id: u32,
    handler: Option<Arc<dyn StreamHandler>>,
    streaming: bool,
    starving: bool,
}

impl StarvationMonitor {
    /// Create a monitor
    #[must_use]
    pub fn new(silence_jiffies: u64, events: broadcast::Sender<PipelineEvent>) -> Self {
        Self {
            mode: String::new(),
            silence_jiffies,
            events,
            stream_id: 0,
            handler: None,
            streaming: false,
            starving: false,
        }
    }

    fn set_starving(&mut self, starving: bool) {
        self.starving = starving;
        tracing::debug!(stream_id = self.stream_id, starving, "starvation");
        if let Some(handler) = &self.handler {
            handler.notify_starving(&self.mode, self.stream_id, starving);
        }
        let _ = self.events.send(PipelineEvent::Starving {
            stream_id: self.stream_id,
            starving,
        });
    }
}

impl Stage for StarvationMonitor {
    fn name(&self) -> &'static str {
        "starvation_monitor"
    }

    fn process(&mut self, msg: Msg, out: &mut Vec<Msg>) {
        match msg.body() {
            MsgBody::Stream(info) => {
                self.stream_id = info.stream_id;
                self.mode = info.uri.split("://").next().unwrap_or_default().to_string();
                self.handler.clone_from(&info.handler);
                self.streaming = false;
                self.starving = false;
            }
            MsgBody::Audio(_) => {
                self.streaming = true;
                if self.starving {
                    self.set_starving(false);
                }
            }
            MsgBody::Halt { .. } | MsgBody::Quit => {
                self.streaming = false;
                self.starving = false;
            }
            _ => {}
        }
        out.push(msg);
    }

    fn on_starved(&mut self, out: &mut Vec<Msg>) {
        if !self.streaming {
            return;
        }
        if !self.starving {
            self.set_starving(true);
        }
        out.push(Msg::new(MsgBody::Silence {
            stream_id: self.stream_id,
            jiffies: self.silence_jiffies,
        }));
    }
}
