//! Audio channel server

use std::net::SocketAddr;

use bytes::Bytes;

use super::udp_server::{ChannelAction, PacketChannel, UdpSessionServer};
use crate::protocol::rtp::AudioPacket;

/// Delivers every structurally valid audio datagram
///
/// The payload type is not checked; some senders mislabel audio.
#[derive(Debug, Default)]
pub struct AudioChannel;

impl PacketChannel for AudioChannel {
    type Packet = AudioPacket;

    const NAME: &'static str = "audio";

    fn classify(&self, datagram: Bytes, from: SocketAddr) -> ChannelAction<AudioPacket> {
        match AudioPacket::decode(datagram) {
            Ok(packet) => ChannelAction::Deliver(packet),
            Err(e) => {
                tracing::debug!(%from, error = %e, "invalid audio packet");
                ChannelAction::Drop
            }
        }
    }
}

/// Server for the RAOP audio port
pub type AudioServer = UdpSessionServer<AudioChannel>;
