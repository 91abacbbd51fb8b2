//! Push and pull element interfaces

use async_trait::async_trait;

use super::msg::Msg;
use crate::error::PipelineError;

/// Element that accepts messages from upstream
///
/// `push` may wait when the element is full.
#[async_trait]
pub trait PushElement: Send + Sync {
    /// Push a message downstream
    ///
    /// # Errors
    ///
    /// Returns `PipelineError::Closed` if the element can no longer accept
    /// messages.
    async fn push(&self, msg: Msg) -> Result<(), PipelineError>;
}

/// Element that hands messages to a downstream puller
#[async_trait]
pub trait PullElement: Send + Sync {
    /// Wait for the next message
    async fn pull(&self) -> Msg;
}
