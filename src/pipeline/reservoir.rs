//! Bounded FIFO between pipeline segments

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::Notify;

use super::element::{PullElement, PushElement};
use super::msg::Msg;
use crate::error::PipelineError;

#[derive(Debug, Default)]
struct ReservoirState {
    queue: VecDeque<Msg>,
    jiffies: u64,
    audio_msgs: usize,
}

/// Bounded reservoir
///
/// Capacity is measured in jiffies and in audio message count. Messages with
/// no duration (stream, flush, halt, quit...) are always accepted so that
/// control flow cannot deadlock behind a full buffer.
#[derive(Debug)]
pub struct Reservoir {
    name: &'static str,
    max_jiffies: u64,
    max_msgs: usize,
    state: Mutex<ReservoirState>,
    space: Notify,
    data: Notify,
}

impl Reservoir {
    /// Create a reservoir
    #[must_use]
    pub fn new(name: &'static str, max_jiffies: u64, max_msgs: usize) -> Self {
        Self {
            name,
            max_jiffies,
            max_msgs,
            state: Mutex::new(ReservoirState::default()),
            space: Notify::new(),
            data: Notify::new(),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ReservoirState> {
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn try_enqueue(&self, msg: Msg) -> Result<(), Msg> {
        let mut state = self.lock();
        let jiffies = msg.jiffies();
        let is_audio = msg.body().is_audio();
        if is_audio
            && !state.queue.is_empty()
            && (state.jiffies >= self.max_jiffies || state.audio_msgs >= self.max_msgs)
        {
            return Err(msg);
        }
        state.jiffies += jiffies;
        if is_audio {
            state.audio_msgs += 1;
        }
        state.queue.push_back(msg);
        Ok(())
    }

    /// Dequeue without waiting
    #[must_use]
    pub fn try_pull(&self) -> Option<Msg> {
        let msg = {
            let mut state = self.lock();
            let msg = state.queue.pop_front()?;
            state.jiffies = state.jiffies.saturating_sub(msg.jiffies());
            if msg.body().is_audio() {
                state.audio_msgs = state.audio_msgs.saturating_sub(1);
            }
            msg
        };
        self.space.notify_waiters();
        Some(msg)
    }

    /// Buffered duration
    #[must_use]
    pub fn jiffies(&self) -> u64 {
        self.lock().jiffies
    }

    /// Queued message count
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().queue.len()
    }

    /// Whether nothing is queued
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().queue.is_empty()
    }

    /// Reservoir name used in logs
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }
}

#[async_trait]
impl PushElement for Reservoir {
    async fn push(&self, msg: Msg) -> Result<(), PipelineError> {
        let mut msg = msg;
        loop {
            let notified = self.space.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            match self.try_enqueue(msg) {
                Ok(()) => {
                    self.data.notify_waiters();
                    return Ok(());
                }
                Err(rejected) => msg = rejected,
            }

            tracing::trace!(reservoir = self.name, "full, waiting for space");
            notified.await;
        }
    }
}

#[async_trait]
impl PullElement for Reservoir {
    async fn pull(&self) -> Msg {
        loop {
            let notified = self.data.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(msg) = self.try_pull() {
                return msg;
            }
            notified.await;
        }
    }
}
