//! # raop-renderer
//!
//! RAOP (`AirPlay` 1) audio ingestion feeding a bounded, staged audio
//! pipeline.
//!
//! ## Features
//!
//! - Zero-copy RTP/RAOP packet parsing
//! - Audio and control UDP servers with one-at-a-time packet hand-off
//! - Packet repair: reordering, resend requests and gap recovery
//! - AES-128-CBC payload decryption
//! - Pipeline with flush, drain, halt, mute, ramping and starvation handling
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use raop_renderer::pipeline::{IdProvider, PipelineBuilder, PipelineConfig};
//! use raop_renderer::receiver::{ProtocolRaop, RaopConfig, SessionDiscovery};
//!
//! # async fn example() -> raop_renderer::Result<()> {
//! let pipeline = PipelineBuilder::new(PipelineConfig::default()).build();
//! let discovery = Arc::new(SessionDiscovery::new());
//! discovery.begin("96 352 0 16 40 10 14 2 255 0 0 44100", None);
//!
//! let mut protocol = ProtocolRaop::new(
//!     RaopConfig::default(),
//!     discovery,
//!     pipeline.supply(),
//!     Arc::new(IdProvider::new()),
//! )
//! .await?;
//!
//! // Ports come from the sender's RTSP SETUP
//! let result = protocol.stream("raop://6001.6002").await?;
//! println!("stream ended: {result:?}");
//! # Ok(())
//! # }
//! ```
//!
//! # Architecture
//!
//! - **Protocol**: [`receiver::ProtocolRaop`] owns the session servers,
//!   repairer and decryptor
//! - **Pipeline**: [`pipeline`] stages separated by bounded reservoirs
//! - **Wire**: [`protocol::rtp`] packet model

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

/// Configuration
pub mod config;
/// Error types
pub mod error;
pub mod pipeline;
pub mod protocol;
pub mod receiver;

/// Testing utilities
pub mod testing;

// Re-exports
pub use config::RendererConfig;
pub use error::{RendererError, Result};
pub use pipeline::{Pipeline, PipelineBuilder, PipelineConfig, StreamHandler, Supply};
pub use receiver::{ProtocolRaop, ProtocolStreamResult, RaopConfig, RaopStreamHandle};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
