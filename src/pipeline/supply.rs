//! Entry point protocols use to feed the pipeline

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::oneshot;

use super::element::PushElement;
use super::msg::{AudioChunk, Drain, MsgBody, MsgFactory, Ramp, StreamInfo, Track};
use crate::error::PipelineError;

/// Messages a protocol can output
///
/// Only [`output_msg`](Self::output_msg) is required; the rest build the
/// matching message.
#[async_trait]
pub trait Supply: Send + Sync {
    /// Push a message into the pipeline, waiting if it is full
    ///
    /// # Errors
    ///
    /// Returns `PipelineError` if the pipeline has shut down.
    async fn output_msg(&self, body: MsgBody) -> Result<(), PipelineError>;

    /// Output a new track
    ///
    /// # Errors
    ///
    /// See [`output_msg`](Self::output_msg).
    async fn output_track(&self, track: Track) -> Result<(), PipelineError> {
        self.output_msg(MsgBody::Track(track)).await
    }

    /// Output a stream start
    ///
    /// # Errors
    ///
    /// See [`output_msg`](Self::output_msg).
    async fn output_stream(&self, info: StreamInfo) -> Result<(), PipelineError> {
        self.output_msg(MsgBody::Stream(info)).await
    }

    /// Output a delay change
    ///
    /// # Errors
    ///
    /// See [`output_msg`](Self::output_msg).
    async fn output_delay(&self, jiffies: u64) -> Result<(), PipelineError> {
        self.output_msg(MsgBody::Delay { jiffies }).await
    }

    /// Output audio
    ///
    /// # Errors
    ///
    /// See [`output_msg`](Self::output_msg).
    async fn output_audio(
        &self,
        stream_id: u32,
        data: Bytes,
        jiffies: u64,
    ) -> Result<(), PipelineError> {
        self.output_msg(MsgBody::Audio(AudioChunk {
            stream_id,
            data,
            jiffies,
            ramp: Ramp::NONE,
        }))
        .await
    }

    /// Output a flush
    ///
    /// # Errors
    ///
    /// See [`output_msg`](Self::output_msg).
    async fn output_flush(&self, id: u32) -> Result<(), PipelineError> {
        self.output_msg(MsgBody::Flush { id }).await
    }

    /// Output a drain; `callback` fires when it reaches the driver
    ///
    /// # Errors
    ///
    /// See [`output_msg`](Self::output_msg).
    async fn output_drain(&self, id: u32, callback: oneshot::Sender<()>) -> Result<(), PipelineError> {
        self.output_msg(MsgBody::Drain(Drain::new(id, callback)))
            .await
    }

    /// Output a halt
    ///
    /// # Errors
    ///
    /// See [`output_msg`](Self::output_msg).
    async fn output_halt(&self, id: u32) -> Result<(), PipelineError> {
        self.output_msg(MsgBody::Halt { id }).await
    }

    /// Output quit
    ///
    /// # Errors
    ///
    /// See [`output_msg`](Self::output_msg).
    async fn output_quit(&self) -> Result<(), PipelineError> {
        self.output_msg(MsgBody::Quit).await
    }
}

/// [`Supply`] that allocates from the pipeline's pools and pushes into its
/// head element
pub struct PipelineSupply {
    factory: MsgFactory,
    head: Arc<dyn PushElement>,
}

impl PipelineSupply {
    /// Create a supply feeding `head`
    #[must_use]
    pub fn new(factory: MsgFactory, head: Arc<dyn PushElement>) -> Self {
        Self { factory, head }
    }
}

#[async_trait]
impl Supply for PipelineSupply {
    async fn output_msg(&self, body: MsgBody) -> Result<(), PipelineError> {
        let msg = self.factory.create(body).await?;
        self.head.push(msg).await
    }
}
