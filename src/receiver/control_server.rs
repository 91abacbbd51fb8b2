//! Control channel server
//!
//! Sync packets are consumed on the receive task, updating the sender's
//! latency. Resend responses are handed to the consumer like audio.

use std::io;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::Notify;

use super::udp_server::{ChannelAction, PacketChannel, ServerState, UdpSessionServer};
use crate::error::ServerError;
use crate::protocol::rtp::{ControlPacket, ResendRequest, ResendResponse};

#[derive(Debug)]
struct ControlState {
    latency: u32,
    sender: Option<SocketAddr>,
}

/// Decodes control datagrams and tracks sync state
#[derive(Debug)]
pub struct ControlChannel {
    state: Mutex<ControlState>,
}

impl ControlChannel {
    /// Create with the latency assumed before any sync arrives
    #[must_use]
    pub fn new(default_latency: u32) -> Self {
        Self {
            state: Mutex::new(ControlState {
                latency: default_latency,
                sender: None,
            }),
        }
    }

    /// Latest latency in samples
    #[must_use]
    pub fn latency(&self) -> u32 {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .latency
    }

    /// Endpoint of the last control datagram
    #[must_use]
    pub fn sender(&self) -> Option<SocketAddr> {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .sender
    }
}

impl PacketChannel for ControlChannel {
    type Packet = ResendResponse;

    const NAME: &'static str = "control";

    fn classify(&self, datagram: Bytes, from: SocketAddr) -> ChannelAction<ResendResponse> {
        let packet = match ControlPacket::decode(datagram) {
            Ok(packet) => packet,
            Err(e) => {
                tracing::debug!(%from, error = %e, "invalid control packet");
                return ChannelAction::Drop;
            }
        };

        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.sender = Some(from);
        match packet {
            ControlPacket::Sync(sync) => {
                let latency = sync.latency();
                if latency != state.latency {
                    tracing::debug!(old = state.latency, new = latency, "latency changed");
                    state.latency = latency;
                }
                ChannelAction::Consumed
            }
            ControlPacket::ResendResponse(response) => ChannelAction::Deliver(response),
        }
    }
}

/// Server for the RAOP control port
pub struct ControlServer {
    server: UdpSessionServer<ControlChannel>,
    client: Mutex<Option<SocketAddr>>,
}

impl ControlServer {
    /// Bind and start the receive task; the server starts closed
    ///
    /// # Errors
    ///
    /// Returns `std::io::Error` if the socket cannot be bound.
    pub async fn bind(
        addr: SocketAddr,
        default_latency: u32,
        consumer: Arc<Notify>,
        retry_interval: Duration,
    ) -> io::Result<Self> {
        let server = UdpSessionServer::bind(
            addr,
            ControlChannel::new(default_latency),
            consumer,
            retry_interval,
        )
        .await?;
        Ok(Self {
            server,
            client: Mutex::new(None),
        })
    }

    /// Set the client control endpoint used until the sender is heard from
    pub fn reset(&self, client: Option<SocketAddr>) {
        *self.client.lock().unwrap_or_else(PoisonError::into_inner) = client;
    }

    /// Latest latency in samples
    #[must_use]
    pub fn latency(&self) -> u32 {
        self.server.channel().latency()
    }

    /// Ask the sender to retransmit `count` packets from `start`
    ///
    /// Does nothing if no sender endpoint is known yet.
    ///
    /// # Errors
    ///
    /// Returns `ServerError::Io` if the request cannot be sent.
    pub async fn request_resend(&self, start: u16, count: u16) -> Result<(), ServerError> {
        let target = self.server.channel().sender().or_else(|| {
            *self.client.lock().unwrap_or_else(PoisonError::into_inner)
        });
        let Some(target) = target else {
            tracing::debug!(start, count, "no endpoint for resend request");
            return Ok(());
        };

        tracing::trace!(start, count, %target, "request resend");
        let request = ResendRequest::new(start, count).encode();
        self.server.send_to(&request, target).await
    }

    /// Local socket address
    ///
    /// # Errors
    ///
    /// Returns `std::io::Error` if the address cannot be read.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.server.local_addr()
    }

    /// Start reading
    pub fn open(&self) {
        self.server.open();
    }

    /// Stop reading and discard any unconsumed packet
    pub fn close(&self) {
        self.server.close();
    }

    /// Whether the server is open
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.server.is_open()
    }

    /// Abort or re-arm the receive
    pub fn interrupt(&self, interrupt: bool) {
        self.server.interrupt(interrupt);
    }

    /// The pending resend response, if any
    #[must_use]
    pub fn try_packet(&self) -> Option<ResendResponse> {
        self.server.try_packet()
    }

    /// Release the pending resend response
    pub fn packet_consumed(&self) {
        self.server.packet_consumed();
    }

    /// Current hand-off state
    #[must_use]
    pub fn state(&self) -> ServerState<ResendResponse> {
        self.server.state()
    }

    /// Stop the receive task
    pub fn shutdown(&self) {
        self.server.shutdown();
    }
}
