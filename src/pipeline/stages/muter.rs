use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use super::Stage;
use crate::pipeline::msg::{Msg, MsgBody};

/// Mute switch shared with the pipeline's owner
#[derive(Debug, Default)]
pub struct MuteControl {
    muted: AtomicBool,
}

impl MuteControl {
    /// Mute or unmute
    pub fn set_muted(&self, muted: bool) {
        self.muted.store(muted, Ordering::Release);
    }

    /// Current mute state
    #[must_use]
    pub fn is_muted(&self) -> bool {
        self.muted.load(Ordering::Acquire)
    }
}

/// Swaps audio for the same duration of silence while muted
#[derive(Debug)]
pub struct Muter {
    control: Arc<MuteControl>,
}

impl Muter {
    /// Create a muter driven by `control`
    #[must_use]
    pub fn new(control: Arc<MuteControl>) -> Self {
        Self { control }
    }
}

impl Stage for Muter {
    fn name(&self) -> &'static str {
        "muter"
    }

    fn process(&mut self, mut msg: Msg, out: &mut Vec<Msg>) {
        if self.control.is_muted() {
            if let MsgBody::Audio(chunk) = msg.body() {
                let silence = MsgBody::Silence {
                    stream_id: chunk.stream_id,
                    jiffies: chunk.jiffies,
                };
                *msg.body_mut() = silence;
            }
        }
        out.push(msg);
    }
}
