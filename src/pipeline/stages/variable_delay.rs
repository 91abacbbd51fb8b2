use super::Stage;
use crate::pipeline::msg::{Msg, MsgBody};

/// Applies `Delay` changes to the audio stream
///
/// An increase is filled with silence ahead of the next audio; a decrease
/// is taken by skipping whole audio messages.
#[derive(Debug, Default)]
pub struct VariableDelay {
    applied: u64,
    target: u64,
}

impl VariableDelay {
    /// Create with no delay applied
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay currently applied, in jiffies
    #[must_use]
    pub fn applied(&self) -> u64 {
        self.applied
    }
}

impl Stage for VariableDelay {
    fn name(&self) -> &'static str {
        "variable_delay"
    }

    fn process(&mut self, msg: Msg, out: &mut Vec<Msg>) {
        match msg.body() {
            MsgBody::Delay { jiffies } => {
                tracing::debug!(from = self.applied, to = *jiffies, "delay change");
                self.target = *jiffies;
            }
            MsgBody::Audio(chunk) => {
                if self.target > self.applied {
                    out.push(Msg::new(MsgBody::Silence {
                        stream_id: chunk.stream_id,
                        jiffies: self.target - self.applied,
                    }));
                    self.applied = self.target;
                } else if self.target < self.applied {
                    let excess = self.applied - self.target;
                    if chunk.jiffies <= excess {
                        self.applied -= chunk.jiffies;
                        tracing::trace!(remaining = self.applied - self.target, "skipping audio");
                        return;
                    }
                    // Audio cannot be split, so the residue is absorbed
                    self.applied = self.target;
                }
            }
            _ => {}
        }
        out.push(msg);
    }
}
