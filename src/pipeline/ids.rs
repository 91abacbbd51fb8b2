//! Id providers for streams, flushes, halts, drains and tracks

use std::sync::atomic::{AtomicU32, Ordering};

use super::msg::Track;

/// Never issued; marks "no id"
pub const ID_INVALID: u32 = 0;

/// Issues monotonically increasing ids, one sequence per kind
#[derive(Debug)]
pub struct IdProvider {
    next_stream: AtomicU32,
    next_flush: AtomicU32,
    next_halt: AtomicU32,
    next_drain: AtomicU32,
    next_track: AtomicU32,
}

impl Default for IdProvider {
    fn default() -> Self {
        Self {
            next_stream: AtomicU32::new(1),
            next_flush: AtomicU32::new(1),
            next_halt: AtomicU32::new(1),
            next_drain: AtomicU32::new(1),
            next_track: AtomicU32::new(1),
        }
    }
}

fn next(counter: &AtomicU32) -> u32 {
    let id = counter.fetch_add(1, Ordering::Relaxed);
    if id == ID_INVALID {
        // Wrapped; skip the invalid id
        counter.fetch_add(1, Ordering::Relaxed)
    } else {
        id
    }
}

impl IdProvider {
    /// Create a provider starting every sequence at 1
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Next stream id
    pub fn next_stream_id(&self) -> u32 {
        next(&self.next_stream)
    }

    /// Next flush id
    pub fn next_flush_id(&self) -> u32 {
        next(&self.next_flush)
    }

    /// Next halt id
    pub fn next_halt_id(&self) -> u32 {
        next(&self.next_halt)
    }

    /// Next drain id
    pub fn next_drain_id(&self) -> u32 {
        next(&self.next_drain)
    }

    /// Create a track handle for `uri`
    pub fn create_track(&self, uri: impl Into<String>) -> Track {
        Track {
            id: next(&self.next_track),
            uri: uri.into(),
        }
    }
}
