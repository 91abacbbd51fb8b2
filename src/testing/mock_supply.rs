//! Recording [`Supply`] for protocol tests

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::Notify;

use crate::error::PipelineError;
use crate::pipeline::{Drain, MsgBody, StreamFormat, StreamHandler, Supply};

/// A message as seen by [`MockSupply`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordedMsg {
    /// Track
    Track {
        /// Track id
        id: u32,
        /// Track uri
        uri: String,
    },
    /// Stream start
    Stream {
        /// Stream id
        stream_id: u32,
        /// Stream uri
        uri: String,
        /// Format
        format: StreamFormat,
    },
    /// Audio
    Audio {
        /// Stream id
        stream_id: u32,
        /// Decrypted payload
        data: Bytes,
        /// Duration
        jiffies: u64,
    },
    /// Silence
    Silence {
        /// Duration
        jiffies: u64,
    },
    /// Delay
    Delay {
        /// Delay
        jiffies: u64,
    },
    /// Flush
    Flush {
        /// Flush id
        id: u32,
    },
    /// Drain
    Drain {
        /// Drain id
        id: u32,
    },
    /// Halt
    Halt {
        /// Halt id
        id: u32,
    },
    /// Quit
    Quit,
}

impl RecordedMsg {
    /// Short name, matching [`MsgBody::kind`]
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Track { .. } => "track",
            Self::Stream { .. } => "stream",
            Self::Audio { .. } => "audio",
            Self::Silence { .. } => "silence",
            Self::Delay { .. } => "delay",
            Self::Flush { .. } => "flush",
            Self::Drain { .. } => "drain",
            Self::Halt { .. } => "halt",
            Self::Quit => "quit",
        }
    }
}

#[derive(Default)]
struct Recorded {
    msgs: Vec<RecordedMsg>,
    handler: Option<Arc<dyn StreamHandler>>,
    held: Vec<Drain>,
    closed: bool,
}

/// [`Supply`] that records every message
///
/// Drains complete as soon as they are output unless
/// [`hold_drains`](Self::hold_drains) is set, in which case they are kept
/// pending until [`release_drains`](Self::release_drains).
#[derive(Default)]
pub struct MockSupply {
    recorded: Mutex<Recorded>,
    changed: Notify,
    hold_drains: AtomicBool,
}

impl MockSupply {
    /// Create an empty recorder
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Recorded> {
        self.recorded.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Stop completing drains
    pub fn hold_drains(&self, hold: bool) {
        self.hold_drains.store(hold, Ordering::Relaxed);
    }

    /// Complete every held drain
    pub fn release_drains(&self) {
        let held = std::mem::take(&mut self.lock().held);
        for mut drain in held {
            drain.complete();
        }
    }

    /// Fail every later output with `PipelineError::Closed`
    pub fn close(&self) {
        self.lock().closed = true;
    }

    /// Everything recorded so far
    #[must_use]
    pub fn messages(&self) -> Vec<RecordedMsg> {
        self.lock().msgs.clone()
    }

    /// Kinds of everything recorded so far
    #[must_use]
    pub fn kinds(&self) -> Vec<&'static str> {
        self.lock().msgs.iter().map(RecordedMsg::kind).collect()
    }

    /// Audio payloads recorded so far
    #[must_use]
    pub fn audio(&self) -> Vec<Bytes> {
        self.lock()
            .msgs
            .iter()
            .filter_map(|m| match m {
                RecordedMsg::Audio { data, .. } => Some(data.clone()),
                _ => None,
            })
            .collect()
    }

    /// Handler from the latest stream message
    #[must_use]
    pub fn handler(&self) -> Option<Arc<dyn StreamHandler>> {
        self.lock().handler.clone()
    }

    /// Wait until `done` holds for the recorded messages
    ///
    /// Returns `false` on timeout.
    pub async fn wait_until<F>(&self, timeout: Duration, done: F) -> bool
    where
        F: Fn(&[RecordedMsg]) -> bool,
    {
        tokio::time::timeout(timeout, async {
            loop {
                let changed = self.changed.notified();
                tokio::pin!(changed);
                changed.as_mut().enable();
                if done(&self.lock().msgs) {
                    return;
                }
                changed.await;
            }
        })
        .await
        .is_ok()
    }
}

#[async_trait]
impl Supply for MockSupply {
    async fn output_msg(&self, body: MsgBody) -> Result<(), PipelineError> {
        let mut recorded = self.lock();
        if recorded.closed {
            return Err(PipelineError::Closed);
        }

        let msg = match body {
            MsgBody::Track(track) => RecordedMsg::Track {
                id: track.id,
                uri: track.uri,
            },
            MsgBody::Stream(info) => {
                recorded.handler.clone_from(&info.handler);
                RecordedMsg::Stream {
                    stream_id: info.stream_id,
                    uri: info.uri,
                    format: info.format,
                }
            }
            MsgBody::Audio(chunk) => RecordedMsg::Audio {
                stream_id: chunk.stream_id,
                data: chunk.data,
                jiffies: chunk.jiffies,
            },
            MsgBody::Silence { jiffies, .. } => RecordedMsg::Silence { jiffies },
            MsgBody::Delay { jiffies } => RecordedMsg::Delay { jiffies },
            MsgBody::Flush { id } => RecordedMsg::Flush { id },
            MsgBody::Drain(mut drain) => {
                let id = drain.id;
                if self.hold_drains.load(Ordering::Relaxed) {
                    recorded.held.push(drain);
                } else {
                    drain.complete();
                }
                RecordedMsg::Drain { id }
            }
            MsgBody::Halt { id } => RecordedMsg::Halt { id },
            MsgBody::Quit => RecordedMsg::Quit,
        };
        recorded.msgs.push(msg);
        drop(recorded);

        self.changed.notify_waiters();
        Ok(())
    }
}
