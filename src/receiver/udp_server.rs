//! UDP session server with single-packet hand-off
//!
//! Each server owns one socket and a receive task. A decoded packet is held
//! until the consumer calls [`UdpSessionServer::packet_consumed`]; nothing
//! more is read from the socket in the meantime, so the kernel buffer is the
//! only queue.

use std::io;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use bytes::Bytes;
use tokio::net::UdpSocket;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

use crate::error::ServerError;

/// Receive buffer size; larger than any RAOP datagram
const RECV_BUFFER_SIZE: usize = 2048;

/// Outcome of classifying one datagram
#[derive(Debug)]
pub enum ChannelAction<P> {
    /// Hold the packet for the consumer
    Deliver(P),
    /// Handled inside the channel; keep reading
    Consumed,
    /// Malformed or unexpected; keep reading
    Drop,
}

/// Decodes datagrams for one server
pub trait PacketChannel: Send + Sync + 'static {
    /// Packet handed to the consumer
    type Packet: Clone + Send + 'static;

    /// Name used in logs
    const NAME: &'static str;

    /// Decode a datagram received from `from`
    fn classify(&self, datagram: Bytes, from: SocketAddr) -> ChannelAction<Self::Packet>;
}

/// Hand-off state
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerState<P> {
    /// Not reading
    Closed,
    /// Waiting for a datagram
    Idle,
    /// Holding a packet until the consumer releases it
    AwaitingConsumer(P),
}

struct Inner<P> {
    state: ServerState<P>,
    interrupted: bool,
    generation: u64,
    shutdown: bool,
}

struct Shared<C: PacketChannel> {
    socket: UdpSocket,
    channel: C,
    inner: Mutex<Inner<C::Packet>>,
    /// Wakes the receive task on any state change
    wake: Notify,
    /// Wakes the consumer when a packet is ready
    consumer: Arc<Notify>,
    retry_interval: Duration,
}

impl<C: PacketChannel> Shared<C> {
    fn lock(&self) -> MutexGuard<'_, Inner<C::Packet>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A UDP socket presenting one decoded packet at a time
pub struct UdpSessionServer<C: PacketChannel> {
    shared: Arc<Shared<C>>,
    task: JoinHandle<()>,
}

impl<C: PacketChannel> UdpSessionServer<C> {
    /// Bind a socket and start the receive task. The server starts closed.
    ///
    /// `consumer` is notified whenever a packet becomes available.
    ///
    /// # Errors
    ///
    /// Returns `std::io::Error` if the socket cannot be bound.
    pub async fn bind(
        addr: SocketAddr,
        channel: C,
        consumer: Arc<Notify>,
        retry_interval: Duration,
    ) -> io::Result<Self> {
        let socket = UdpSocket::bind(addr).await?;
        tracing::debug!(server = C::NAME, addr = %socket.local_addr()?, "bound");

        let shared = Arc::new(Shared {
            socket,
            channel,
            inner: Mutex::new(Inner {
                state: ServerState::Closed,
                interrupted: false,
                generation: 0,
                shutdown: false,
            }),
            wake: Notify::new(),
            consumer,
            retry_interval,
        });
        let task = tokio::spawn(run(shared.clone()));

        Ok(Self { shared, task })
    }

    /// Local socket address
    ///
    /// # Errors
    ///
    /// Returns `std::io::Error` if the address cannot be read.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.shared.socket.local_addr()
    }

    /// Channel state
    pub fn channel(&self) -> &C {
        &self.shared.channel
    }

    /// Start reading
    ///
    /// Datagrams that queued on the socket while closed are discarded.
    pub fn open(&self) {
        let mut inner = self.shared.lock();
        if !matches!(inner.state, ServerState::Closed) {
            return;
        }

        let mut buf = [0u8; RECV_BUFFER_SIZE];
        let mut purged = 0usize;
        while self.shared.socket.try_recv_from(&mut buf).is_ok() {
            purged += 1;
        }

        inner.state = ServerState::Idle;
        inner.generation = inner.generation.wrapping_add(1);
        drop(inner);

        tracing::debug!(server = C::NAME, purged, "open");
        self.shared.wake.notify_waiters();
    }

    /// Stop reading and discard any unconsumed packet
    pub fn close(&self) {
        let mut inner = self.shared.lock();
        if matches!(inner.state, ServerState::Closed) {
            return;
        }
        inner.state = ServerState::Closed;
        inner.generation = inner.generation.wrapping_add(1);
        drop(inner);

        tracing::debug!(server = C::NAME, "close");
        self.shared.wake.notify_waiters();
    }

    /// Whether the server is reading or holding a packet
    #[must_use]
    pub fn is_open(&self) -> bool {
        !matches!(self.shared.lock().state, ServerState::Closed)
    }

    /// Abort a blocking receive (`true`) or re-arm (`false`)
    ///
    /// Interrupting also discards any packet the consumer has not taken.
    pub fn interrupt(&self, interrupt: bool) {
        let mut inner = self.shared.lock();
        inner.interrupted = interrupt;
        if interrupt {
            inner.generation = inner.generation.wrapping_add(1);
            if matches!(inner.state, ServerState::AwaitingConsumer(_)) {
                inner.state = ServerState::Idle;
            }
        }
        drop(inner);

        tracing::trace!(server = C::NAME, interrupt, "interrupt");
        self.shared.wake.notify_waiters();
    }

    /// The pending packet, if any. Repeated calls return the same packet
    /// until [`packet_consumed`](Self::packet_consumed).
    #[must_use]
    pub fn try_packet(&self) -> Option<C::Packet> {
        match &self.shared.lock().state {
            ServerState::AwaitingConsumer(packet) => Some(packet.clone()),
            _ => None,
        }
    }

    /// Release the pending packet so the next datagram can be read
    pub fn packet_consumed(&self) {
        let mut inner = self.shared.lock();
        if matches!(inner.state, ServerState::AwaitingConsumer(_)) {
            inner.state = ServerState::Idle;
            drop(inner);
            self.shared.wake.notify_waiters();
        }
    }

    /// Current hand-off state
    #[must_use]
    pub fn state(&self) -> ServerState<C::Packet> {
        self.shared.lock().state.clone()
    }

    /// Send a datagram from the server's socket
    ///
    /// # Errors
    ///
    /// Returns `ServerError::Io` if the send fails.
    pub async fn send_to(&self, buf: &[u8], target: SocketAddr) -> Result<(), ServerError> {
        self.shared.socket.send_to(buf, target).await?;
        Ok(())
    }

    /// Stop the receive task. The server cannot be reopened.
    pub fn shutdown(&self) {
        let mut inner = self.shared.lock();
        inner.shutdown = true;
        inner.state = ServerState::Closed;
        drop(inner);
        self.shared.wake.notify_waiters();
        self.task.abort();
    }
}

impl<C: PacketChannel> Drop for UdpSessionServer<C> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

async fn run<C: PacketChannel>(shared: Arc<Shared<C>>) {
    let mut buf = vec![0u8; RECV_BUFFER_SIZE];

    loop {
        let wake = shared.wake.notified();
        tokio::pin!(wake);
        wake.as_mut().enable();

        let generation = {
            let inner = shared.lock();
            if inner.shutdown {
                return;
            }
            if matches!(inner.state, ServerState::Idle) && !inner.interrupted {
                Some(inner.generation)
            } else {
                None
            }
        };
        let Some(generation) = generation else {
            wake.await;
            continue;
        };

        let received = tokio::select! {
            received = shared.socket.recv_from(&mut buf) => received,
            () = &mut wake => continue,
        };

        match received {
            Ok((len, from)) => {
                let datagram = Bytes::copy_from_slice(&buf[..len]);
                match shared.channel.classify(datagram, from) {
                    ChannelAction::Deliver(packet) => {
                        let mut inner = shared.lock();
                        if inner.generation != generation
                            || inner.interrupted
                            || !matches!(inner.state, ServerState::Idle)
                        {
                            tracing::trace!(server = C::NAME, "discarding stale packet");
                            continue;
                        }
                        inner.state = ServerState::AwaitingConsumer(packet);
                        drop(inner);
                        shared.consumer.notify_one();
                    }
                    ChannelAction::Consumed => {}
                    ChannelAction::Drop => {
                        tracing::trace!(server = C::NAME, len, %from, "dropped datagram");
                    }
                }
            }
            Err(e) => {
                tracing::error!(server = C::NAME, error = %e, "receive failed");
                tokio::time::sleep(shared.retry_interval).await;
            }
        }
    }
}
