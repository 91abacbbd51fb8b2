//! Pipeline messages and the pooled message factory

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, TryAcquireError, oneshot};

use super::StreamHandler;
use crate::error::PipelineError;

/// Opaque track handle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Track {
    /// Track id, unique per pipeline
    pub id: u32,
    /// Track uri
    pub uri: String,
}

/// Audio format announced at stream start
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamFormat {
    /// Codec name
    pub codec: String,
    /// Codec specific parameters (fmtp for RAOP)
    pub codec_params: String,
    /// Sample rate
    pub sample_rate: u32,
    /// Channel count
    pub channels: u8,
    /// Bits per sample
    pub bit_depth: u8,
    /// Samples per packet
    pub frames_per_packet: u32,
}

/// Start of a new stream
#[derive(Clone)]
pub struct StreamInfo {
    /// Stream uri
    pub uri: String,
    /// Stream id issued by the id provider
    pub stream_id: u32,
    /// Live streams cannot be seeked or paused
    pub live: bool,
    /// Audio format
    pub format: StreamFormat,
    /// Protocol callbacks for stop and starvation
    pub handler: Option<Arc<dyn StreamHandler>>,
}

impl fmt::Debug for StreamInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamInfo")
            .field("uri", &self.uri)
            .field("stream_id", &self.stream_id)
            .field("live", &self.live)
            .field("format", &self.format)
            .field("handler", &self.handler.is_some())
            .finish()
    }
}

/// Gain ramp applied across an audio chunk, 0.0 (silent) to 1.0 (full)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ramp {
    /// Gain at the first sample
    pub start: f32,
    /// Gain at the last sample
    pub end: f32,
}

impl Ramp {
    /// No ramp
    pub const NONE: Self = Self {
        start: 1.0,
        end: 1.0,
    };

    /// Whether the chunk plays at full gain throughout
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.start >= 1.0 && self.end >= 1.0
    }
}

impl Default for Ramp {
    fn default() -> Self {
        Self::NONE
    }
}

/// A chunk of (possibly still encoded) audio
#[derive(Debug, Clone, PartialEq)]
pub struct AudioChunk {
    /// Stream the chunk belongs to
    pub stream_id: u32,
    /// Audio bytes
    pub data: Bytes,
    /// Duration
    pub jiffies: u64,
    /// Gain ramp
    pub ramp: Ramp,
}

/// Drain request; fires once everything ahead of it has been played
pub struct Drain {
    /// Drain id
    pub id: u32,
    callback: Option<oneshot::Sender<()>>,
}

impl Drain {
    /// Create a drain that signals `callback` on completion
    #[must_use]
    pub fn new(id: u32, callback: oneshot::Sender<()>) -> Self {
        Self {
            id,
            callback: Some(callback),
        }
    }

    /// Signal completion. Later calls do nothing.
    pub fn complete(&mut self) {
        if let Some(callback) = self.callback.take() {
            // Waiter may have timed out and gone away
            let _ = callback.send(());
        }
    }

    /// Whether the callback has fired
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.callback.is_none()
    }
}

impl fmt::Debug for Drain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Drain")
            .field("id", &self.id)
            .field("complete", &self.is_complete())
            .finish()
    }
}

/// Message payloads
#[derive(Debug)]
pub enum MsgBody {
    /// New track
    Track(Track),
    /// New stream within the current track
    Stream(StreamInfo),
    /// Audio data
    Audio(AudioChunk),
    /// Generated silence
    Silence {
        /// Stream the silence belongs to
        stream_id: u32,
        /// Duration
        jiffies: u64,
    },
    /// Change of required output delay
    Delay {
        /// Delay
        jiffies: u64,
    },
    /// Discard point for a stop or flush
    Flush {
        /// Flush id
        id: u32,
    },
    /// Drain request
    Drain(Drain),
    /// Playback halts here
    Halt {
        /// Halt id
        id: u32,
    },
    /// Teardown marker; nothing follows
    Quit,
}

impl MsgBody {
    /// Short name used in logs
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Track(_) => "track",
            Self::Stream(_) => "stream",
            Self::Audio(_) => "audio",
            Self::Silence { .. } => "silence",
            Self::Delay { .. } => "delay",
            Self::Flush { .. } => "flush",
            Self::Drain(_) => "drain",
            Self::Halt { .. } => "halt",
            Self::Quit => "quit",
        }
    }

    /// Playback duration carried by the message
    #[must_use]
    pub fn jiffies(&self) -> u64 {
        match self {
            Self::Audio(chunk) => chunk.jiffies,
            Self::Silence { jiffies, .. } => *jiffies,
            _ => 0,
        }
    }

    /// Whether the message occupies an audio pool slot
    #[must_use]
    pub fn is_audio(&self) -> bool {
        matches!(self, Self::Audio(_) | Self::Silence { .. })
    }
}

/// A message travelling through the pipeline
///
/// Holds a pool slot for as long as it lives; dropping the message returns
/// the slot. Messages generated inside a stage start without a slot and are
/// given one before they are handed across a reservoir.
#[derive(Debug)]
pub struct Msg {
    body: MsgBody,
    slot: Option<OwnedSemaphorePermit>,
}

impl Msg {
    /// Create a message that does not yet hold a pool slot
    #[must_use]
    pub fn new(body: MsgBody) -> Self {
        Self { body, slot: None }
    }

    /// Message payload
    #[must_use]
    pub fn body(&self) -> &MsgBody {
        &self.body
    }

    /// Mutable message payload
    pub fn body_mut(&mut self) -> &mut MsgBody {
        &mut self.body
    }

    /// Take the payload, releasing the slot
    #[must_use]
    pub fn into_body(self) -> MsgBody {
        self.body
    }

    /// Whether the message holds a pool slot
    #[must_use]
    pub fn is_pooled(&self) -> bool {
        self.slot.is_some()
    }

    /// Playback duration
    #[must_use]
    pub fn jiffies(&self) -> u64 {
        self.body.jiffies()
    }
}

/// Message pool sizes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MsgPoolSizes {
    /// Audio and silence messages
    pub audio: usize,
    /// Every other message kind
    pub control: usize,
}

/// Fixed-size message pools
///
/// [`create`](Self::create) waits for a free slot, which is how pool
/// exhaustion turns into backpressure. [`try_create`](Self::try_create)
/// reports exhaustion instead.
#[derive(Debug, Clone)]
pub struct MsgFactory {
    audio: Arc<Semaphore>,
    control: Arc<Semaphore>,
    sizes: MsgPoolSizes,
}

impl MsgFactory {
    /// Create pools with the given sizes
    #[must_use]
    pub fn new(sizes: MsgPoolSizes) -> Self {
        Self {
            audio: Arc::new(Semaphore::new(sizes.audio)),
            control: Arc::new(Semaphore::new(sizes.control)),
            sizes,
        }
    }

    fn pool_for(&self, body: &MsgBody) -> (&Arc<Semaphore>, usize) {
        if body.is_audio() {
            (&self.audio, self.sizes.audio)
        } else {
            (&self.control, self.sizes.control)
        }
    }

    /// Create a message, waiting for a free slot
    ///
    /// # Errors
    ///
    /// Returns `PipelineError::Closed` if the pool has been closed.
    pub async fn create(&self, body: MsgBody) -> Result<Msg, PipelineError> {
        let mut msg = Msg::new(body);
        self.attach(&mut msg).await?;
        Ok(msg)
    }

    /// Create a message if a slot is free
    ///
    /// # Errors
    ///
    /// Returns `PipelineError::PoolExhausted` if every slot is in use.
    pub fn try_create(&self, body: MsgBody) -> Result<Msg, PipelineError> {
        let (pool, capacity) = self.pool_for(&body);
        let permit = pool.clone().try_acquire_owned().map_err(|e| match e {
            TryAcquireError::NoPermits => PipelineError::PoolExhausted { capacity },
            TryAcquireError::Closed => PipelineError::Closed,
        })?;
        Ok(Msg {
            body,
            slot: Some(permit),
        })
    }

    /// Give a stage-generated message a pool slot, waiting if needed
    ///
    /// # Errors
    ///
    /// Returns `PipelineError::Closed` if the pool has been closed.
    pub async fn attach(&self, msg: &mut Msg) -> Result<(), PipelineError> {
        if msg.slot.is_none() {
            let (pool, _) = self.pool_for(&msg.body);
            let permit = pool
                .clone()
                .acquire_owned()
                .await
                .map_err(|_| PipelineError::Closed)?;
            msg.slot = Some(permit);
        }
        Ok(())
    }

    /// Free audio slots
    #[must_use]
    pub fn available_audio(&self) -> usize {
        self.audio.available_permits()
    }

    /// Free control slots
    #[must_use]
    pub fn available_control(&self) -> usize {
        self.control.available_permits()
    }

    /// Wake every waiter with `PipelineError::Closed`
    pub fn close(&self) {
        self.audio.close();
        self.control.close();
    }
}
