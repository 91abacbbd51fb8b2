//! Reordering buffer that requests resends for missing frames
//!
//! The repairer is owned by the coordinating task. It never blocks and
//! holds no timer of its own: the owner polls [`Repairer::deadline`] and
//! calls [`Repairer::timer_expired`] when it passes, then sends whatever
//! ranges come back.

use std::time::Duration;

use rand::Rng;
use tokio::time::Instant;

use super::allocator::Repairable;
use super::config::RaopConfig;
use crate::error::RepairError;

/// Signed distance from `b` to `a` on the 16-bit sequence circle
#[allow(clippy::cast_possible_wrap)]
fn seq_diff(a: u16, b: u16) -> i16 {
    a.wrapping_sub(b) as i16
}

/// Inclusive range of missing sequence numbers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResendRange {
    /// First missing frame
    pub start: u16,
    /// Last missing frame
    pub end: u16,
}

impl ResendRange {
    /// Number of frames in the range
    #[must_use]
    pub fn count(&self) -> u16 {
        self.end.wrapping_sub(self.start).wrapping_add(1)
    }
}

/// Repairer state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepairState {
    /// No stream running; the next frame starts one
    Idle,
    /// Frames pass straight through in order
    Draining,
    /// Waiting for missing frames; later frames are held back
    Buffering,
}

/// Reorder/gap-fill buffer keyed by RTP sequence number
pub struct Repairer {
    capacity: usize,
    max_ranges: usize,
    initial_jitter: Duration,
    retry_interval: Duration,
    max_attempts: u32,

    running: bool,
    /// Last frame released downstream
    frame: u16,
    /// Earliest held frame; `Some` while buffering
    first: Option<Repairable>,
    /// Frames after `first`, ascending
    backlog: Vec<Repairable>,
    deadline: Option<Instant>,
    attempts: u32,
}

impl Repairer {
    /// Create a repairer holding at most `capacity` frames
    #[must_use]
    pub fn new(
        capacity: usize,
        initial_jitter: Duration,
        retry_interval: Duration,
        max_attempts: u32,
    ) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            max_ranges: (capacity / 2).max(1),
            initial_jitter,
            retry_interval,
            max_attempts,
            running: false,
            frame: 0,
            first: None,
            backlog: Vec::with_capacity(capacity),
            deadline: None,
            attempts: 0,
        }
    }

    /// Create from protocol configuration
    #[must_use]
    pub fn from_config(config: &RaopConfig) -> Self {
        Self::new(
            config.repair_capacity,
            config.initial_repair_jitter,
            config.repair_retry_interval,
            config.max_repair_attempts,
        )
    }

    /// Current state
    #[must_use]
    pub fn state(&self) -> RepairState {
        if !self.running {
            RepairState::Idle
        } else if self.first.is_some() {
            RepairState::Buffering
        } else {
            RepairState::Draining
        }
    }

    /// Frames currently held
    #[must_use]
    pub fn held(&self) -> usize {
        usize::from(self.first.is_some()) + self.backlog.len()
    }

    /// When the owner should next call [`timer_expired`](Self::timer_expired)
    #[must_use]
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Accept a frame and return those now ready, in sequence order
    ///
    /// # Errors
    ///
    /// Returns `RepairError::StreamRestarted` when a frame that is not a
    /// resend arrives from behind the current position, and
    /// `RepairError::BufferFull` when a frame must be held but the buffer is
    /// at capacity. Either way the buffer has been reset and the next frame
    /// starts a new run.
    pub fn output_audio(&mut self, repairable: Repairable) -> Result<Vec<Repairable>, RepairError> {
        let mut output = Vec::new();

        if !self.running {
            self.frame = repairable.frame();
            self.running = true;
            output.push(repairable);
            return Ok(output);
        }

        if self.first.is_some() {
            self.repair(repairable, &mut output)?;
            return Ok(output);
        }

        let diff = seq_diff(repairable.frame(), self.frame);
        if diff == 1 {
            self.frame = repairable.frame();
            output.push(repairable);
        } else if diff < 1 {
            if !repairable.resend() {
                tracing::debug!(
                    frame = repairable.frame(),
                    last = self.frame,
                    "sender restarted sequence"
                );
                // Next frame begins a new run
                self.running = false;
                return Err(RepairError::StreamRestarted);
            }
            tracing::trace!(frame = repairable.frame(), "duplicate resend dropped");
        } else {
            self.begin_repair(repairable);
        }

        Ok(output)
    }

    /// Discard everything held and return to idle
    pub fn drop_audio(&mut self) {
        tracing::debug!(held = self.held(), "repairer reset");
        self.first = None;
        self.backlog.clear();
        self.running = false;
        self.deadline = None;
        self.attempts = 0;
    }

    /// Handle the retry timer
    ///
    /// Returns the ranges to request: the gap before the first held frame,
    /// then gaps inside the backlog, up to half the capacity in ranges.
    /// Returns nothing if no repair is in progress or `now` is before the
    /// deadline.
    ///
    /// # Errors
    ///
    /// Returns `RepairError::GapUnrecoverable` once the attempt limit is
    /// exceeded; the buffer has been reset.
    pub fn timer_expired(&mut self, now: Instant) -> Result<Vec<ResendRange>, RepairError> {
        let (Some(deadline), Some(first)) = (self.deadline, self.first.as_ref()) else {
            return Ok(Vec::new());
        };
        if now < deadline {
            return Ok(Vec::new());
        }

        if self.attempts >= self.max_attempts {
            let start = self.frame.wrapping_add(1);
            let attempts = self.attempts;
            tracing::warn!(start, attempts, "abandoning repair");
            self.drop_audio();
            return Err(RepairError::GapUnrecoverable { start, attempts });
        }
        self.attempts += 1;

        let mut ranges = Vec::new();
        let mut end = first.frame();
        ranges.push(ResendRange {
            start: self.frame.wrapping_add(1),
            end: end.wrapping_sub(1),
        });

        for held in &self.backlog {
            if ranges.len() >= self.max_ranges {
                break;
            }
            let start = end.wrapping_add(1);
            end = held.frame();
            if end != start {
                ranges.push(ResendRange {
                    start,
                    end: end.wrapping_sub(1),
                });
            }
        }

        tracing::trace!(?ranges, attempt = self.attempts, "requesting resend");
        self.deadline = Some(now + self.retry_interval);
        Ok(ranges)
    }

    fn begin_repair(&mut self, repairable: Repairable) {
        tracing::debug!(
            frame = repairable.frame(),
            expected = self.frame.wrapping_add(1),
            "repair begin"
        );
        self.first = Some(repairable);
        self.attempts = 0;

        let max_jitter = u64::try_from(self.initial_jitter.as_millis()).unwrap_or(u64::MAX);
        let jitter = rand::thread_rng().gen_range(0..=max_jitter);
        self.deadline = Some(Instant::now() + Duration::from_millis(jitter));
    }

    fn end_repair(&mut self) {
        tracing::debug!(frame = self.frame, "repair end");
        self.first = None;
        self.deadline = None;
        self.attempts = 0;
    }

    fn repair(
        &mut self,
        repairable: Repairable,
        output: &mut Vec<Repairable>,
    ) -> Result<(), RepairError> {
        let frame = repairable.frame();

        let diff = seq_diff(frame, self.frame);
        if diff < 1 {
            if !repairable.resend() {
                self.drop_audio();
                return Err(RepairError::StreamRestarted);
            }
            return Ok(());
        }

        if diff == 1 {
            self.frame = frame;
            self.attempts = 0;
            output.push(repairable);

            // Release whatever is now contiguous
            loop {
                let next = self.frame.wrapping_add(1);
                let Some(first) = self.first.take_if(|f| f.frame() == next) else {
                    return Ok(());
                };
                self.frame = next;
                output.push(first);
                if self.backlog.is_empty() {
                    self.end_repair();
                    return Ok(());
                }
                self.first = Some(self.backlog.remove(0));
            }
        }

        let Some(first) = self.first.as_ref() else {
            return Ok(());
        };
        let diff = seq_diff(frame, first.frame());
        if diff == 0 {
            return Ok(());
        }

        if self.held() >= self.capacity {
            // Duplicates of backlog frames are dropped before overflowing
            let offset = |f: u16| f.wrapping_sub(self.frame);
            if diff > 0
                && self
                    .backlog
                    .binary_search_by_key(&offset(frame), |r| offset(r.frame()))
                    .is_ok()
            {
                return Ok(());
            }
            tracing::warn!(frame, held = self.held(), "repair buffer full");
            self.drop_audio();
            return Err(RepairError::BufferFull);
        }

        if diff < 0 {
            // New earliest frame
            if let Some(old) = self.first.replace(repairable) {
                self.backlog.insert(0, old);
            }
            return Ok(());
        }

        let base = self.frame;
        let offset = |f: u16| f.wrapping_sub(base);
        match self
            .backlog
            .binary_search_by_key(&offset(frame), |r| offset(r.frame()))
        {
            Ok(_) => {}
            Err(pos) => self.backlog.insert(pos, repairable),
        }
        Ok(())
    }
}
