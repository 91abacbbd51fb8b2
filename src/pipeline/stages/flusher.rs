use std::sync::{Arc, Mutex, PoisonError};

use super::Stage;
use crate::pipeline::ids::ID_INVALID;
use crate::pipeline::msg::{Msg, MsgBody};

#[derive(Debug, Default)]
struct FlushTargets {
    flush: Option<u32>,
    halt: Option<u32>,
    last_flush: u32,
    last_halt: u32,
}

/// Handle used to start discarding from outside the pipeline
#[derive(Debug, Default)]
pub struct FlushControl {
    targets: Mutex<FlushTargets>,
}

impl FlushControl {
    /// Create a control with no pending target
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, FlushTargets> {
        self.targets.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Discard audio until the flush with `id` passes
    ///
    /// Ignored if that flush has already gone by.
    pub fn discard_until_flush(&self, id: u32) {
        let mut targets = self.lock();
        if id == ID_INVALID || id <= targets.last_flush {
            tracing::debug!(id, last = targets.last_flush, "flush already passed");
            return;
        }
        targets.flush = Some(id);
    }

    /// Discard audio until the halt with `id` passes
    pub fn discard_until_halt(&self, id: u32) {
        let mut targets = self.lock();
        if id == ID_INVALID || id <= targets.last_halt {
            return;
        }
        targets.halt = Some(id);
    }

    /// Whether audio is currently being discarded
    #[must_use]
    pub fn is_flushing(&self) -> bool {
        let targets = self.lock();
        targets.flush.is_some() || targets.halt.is_some()
    }

    /// Record a flush; returns false if it is a repeat of one already seen
    fn flush_seen(&self, id: u32) -> bool {
        let mut targets = self.lock();
        if id != ID_INVALID && id <= targets.last_flush {
            return false;
        }
        if targets.flush.is_some_and(|target| id >= target) {
            targets.flush = None;
        }
        targets.last_flush = targets.last_flush.max(id);
        true
    }

    fn halt_seen(&self, id: u32) {
        let mut targets = self.lock();
        if targets.halt.is_some_and(|target| id >= target) {
            targets.halt = None;
        }
        targets.last_halt = targets.last_halt.max(id);
    }
}

/// Drops audio between a discard request and the matching flush or halt
///
/// Each flush id is forwarded downstream once; repeats are dropped.
#[derive(Debug)]
pub struct Flusher {
    control: Arc<FlushControl>,
}

impl Flusher {
    /// Create a flusher driven by `control`
    #[must_use]
    pub fn new(control: Arc<FlushControl>) -> Self {
        Self { control }
    }
}

impl Stage for Flusher {
    fn name(&self) -> &'static str {
        "flusher"
    }

    fn process(&mut self, msg: Msg, out: &mut Vec<Msg>) {
        match msg.body() {
            MsgBody::Flush { id } => {
                if self.control.flush_seen(*id) {
                    out.push(msg);
                } else {
                    tracing::debug!(id, "dropping repeated flush");
                }
            }
            MsgBody::Halt { id } => {
                self.control.halt_seen(*id);
                out.push(msg);
            }
            MsgBody::Audio(_) | MsgBody::Silence { .. } | MsgBody::Delay { .. } => {
                if self.control.is_flushing() {
                    tracing::trace!(kind = msg.body().kind(), "flushing");
                } else {
                    out.push(msg);
                }
            }
            MsgBody::Track(_) | MsgBody::Stream(_) | MsgBody::Drain(_) | MsgBody::Quit => {
                out.push(msg);
            }
        }
    }
}
