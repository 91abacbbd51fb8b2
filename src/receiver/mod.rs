//! RAOP receiver
//!
//! [`ProtocolRaop`] coordinates a session: two [`UdpSessionServer`]s hand
//! packets over one at a time, the [`Repairer`] restores sequence order and
//! asks for retransmissions, and the [`AudioDecryptor`] strips the session
//! encryption before audio reaches the pipeline.

pub mod allocator;
pub mod audio_server;
pub mod config;
pub mod control_server;
pub mod decryptor;
pub mod discovery;
pub mod protocol_raop;
pub mod repairer;
pub mod udp_server;

#[cfg(test)]
mod repairer_tests;

pub use allocator::{Repairable, RepairableAllocator};
pub use audio_server::{AudioChannel, AudioServer};
pub use config::RaopConfig;
pub use control_server::{ControlChannel, ControlServer};
pub use decryptor::AudioDecryptor;
pub use discovery::{Fmtp, RaopDiscovery, SessionDiscovery};
pub use protocol_raop::{ProtocolRaop, ProtocolStreamResult, RaopStreamHandle, SCHEME};
pub use repairer::{RepairState, Repairer, ResendRange};
pub use udp_server::{ChannelAction, PacketChannel, ServerState, UdpSessionServer};
