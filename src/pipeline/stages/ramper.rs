use super::Stage;
use crate::pipeline::msg::{Msg, MsgBody, Ramp};

/// Ramps gain up after each stream start and flush
#[derive(Debug)]
pub struct Ramper {
    duration: u64,
    remaining: u64,
}

impl Ramper {
    /// Create a ramper with a ramp length in jiffies
    #[must_use]
    pub fn new(duration_jiffies: u64) -> Self {
        Self {
            duration: duration_jiffies,
            remaining: 0,
        }
    }

    #[allow(clippy::cast_precision_loss)]
    fn gain(&self, remaining: u64) -> f32 {
        1.0 - (remaining as f32 / self.duration as f32)
    }
}

impl Stage for Ramper {
    fn name(&self) -> &'static str {
        "ramper"
    }

    fn process(&mut self, mut msg: Msg, out: &mut Vec<Msg>) {
        match msg.body_mut() {
            MsgBody::Stream(_) | MsgBody::Flush { .. } => {
                self.remaining = self.duration;
            }
            MsgBody::Audio(chunk) if self.remaining > 0 => {
                let after = self.remaining.saturating_sub(chunk.jiffies);
                chunk.ramp = Ramp {
                    start: self.gain(self.remaining),
                    end: self.gain(after),
                };
                self.remaining = after;
            }
            _ => {}
        }
        out.push(msg);
    }
}
