//! Mock RAOP sender for testing the receiver
//!
//! Plays the part of the sending device on the UDP side of a session: audio
//! packets to the audio port, sync packets to the control port, and resend
//! responses for every resend request the receiver makes.

use std::collections::HashMap;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bytes::Bytes;
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;

use super::network_sim::NetworkSimulator;
use crate::protocol::rtp::constants::{CONTROL_BUFFER_SIZE, FRAMES_PER_PACKET};
use crate::protocol::rtp::{
    AudioPacket, RaopPayloadType, ResendRequest, ResendResponse, RtpHeader, SyncPacket,
};
use crate::receiver::decryptor::encrypt_payload;

/// Size of the generated audio payloads; not a whole number of AES blocks
pub const PAYLOAD_SIZE: usize = 40;

/// Mock sender configuration
#[derive(Debug, Clone)]
pub struct MockSenderConfig {
    /// Receiver audio port
    pub audio_addr: SocketAddr,
    /// Receiver control port
    pub control_addr: SocketAddr,
    /// SSRC written in every audio packet
    pub ssrc: u32,
    /// Sequence number of the first packet
    pub first_sequence: u16,
    /// Frames per packet, used to advance timestamps
    pub frames_per_packet: u32,
    /// AES key and IV, if the session is encrypted
    pub encryption: Option<([u8; 16], [u8; 16])>,
    /// Conditions applied by [`MockRaopSender::send_batch`]
    pub network: NetworkSimulator,
}

impl MockSenderConfig {
    /// Send to the given receiver ports over a perfect network
    #[must_use]
    pub fn new(audio_addr: SocketAddr, control_addr: SocketAddr) -> Self {
        Self {
            audio_addr,
            control_addr,
            ssrc: 0x1234_5678,
            first_sequence: 100,
            frames_per_packet: FRAMES_PER_PACKET,
            encryption: None,
            network: NetworkSimulator::perfect(),
        }
    }

    /// Set the SSRC
    #[must_use]
    pub fn ssrc(mut self, ssrc: u32) -> Self {
        self.ssrc = ssrc;
        self
    }

    /// Set the first sequence number
    #[must_use]
    pub fn first_sequence(mut self, sequence: u16) -> Self {
        self.first_sequence = sequence;
        self
    }

    /// Encrypt payloads with `key` and `iv`
    #[must_use]
    pub fn encrypted(mut self, key: [u8; 16], iv: [u8; 16]) -> Self {
        self.encryption = Some((key, iv));
        self
    }

    /// Apply `network` to batched sends
    #[must_use]
    pub fn network(mut self, network: NetworkSimulator) -> Self {
        self.network = network;
        self
    }
}

/// Mock sender errors
#[derive(Debug, thiserror::Error)]
pub enum MockSenderError {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Default)]
struct SentLog {
    history: HashMap<u16, AudioPacket>,
    requests: Vec<ResendRequest>,
}

struct Responder {
    log: Mutex<SentLog>,
    answer: AtomicBool,
}

impl Responder {
    fn lock(&self) -> MutexGuard<'_, SentLog> {
        self.log.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Mock RAOP sender
pub struct MockRaopSender {
    config: MockSenderConfig,
    audio: UdpSocket,
    control: Arc<UdpSocket>,
    responder: Arc<Responder>,
    task: JoinHandle<()>,
    sequence: u16,
    timestamp: u32,
    synced: bool,
}

impl MockRaopSender {
    /// Bind the sender's sockets on loopback and start answering resends
    ///
    /// # Errors
    ///
    /// Returns `MockSenderError::Io` if a socket cannot be bound.
    pub async fn bind(config: MockSenderConfig) -> Result<Self, MockSenderError> {
        let local = SocketAddr::from((Ipv4Addr::LOCALHOST, 0));
        let audio = UdpSocket::bind(local).await?;
        let control = Arc::new(UdpSocket::bind(local).await?);

        let responder = Arc::new(Responder {
            log: Mutex::new(SentLog::default()),
            answer: AtomicBool::new(true),
        });
        let task = tokio::spawn(answer_resends(control.clone(), responder.clone()));

        let sequence = config.first_sequence;
        let timestamp = u32::from(sequence).wrapping_mul(config.frames_per_packet);
        Ok(Self {
            config,
            audio,
            control,
            responder,
            task,
            sequence,
            timestamp,
            synced: false,
        })
    }

    /// Port the sender listens on for resend requests
    ///
    /// # Errors
    ///
    /// Returns `MockSenderError::Io` if the address cannot be read.
    pub fn control_port(&self) -> Result<u16, MockSenderError> {
        Ok(self.control.local_addr()?.port())
    }

    /// Stream uri naming this sender's control and timing ports
    ///
    /// # Errors
    ///
    /// Returns `MockSenderError::Io` if the address cannot be read.
    pub fn uri(&self) -> Result<String, MockSenderError> {
        let port = self.control_port()?;
        Ok(format!("raop://{port}.{}", port.wrapping_add(1)))
    }

    /// Sequence number of the next packet
    #[must_use]
    pub fn next_sequence(&self) -> u16 {
        self.sequence
    }

    /// Timestamp of the next packet
    #[must_use]
    pub fn next_timestamp(&self) -> u32 {
        self.timestamp
    }

    /// Jump to a new sequence number, as a sender does when it restarts
    pub fn restart_at(&mut self, sequence: u16) {
        let timestamp = u32::from(sequence).wrapping_mul(self.config.frames_per_packet);
        self.restart_with(sequence, timestamp);
    }

    /// Jump to a new sequence number and timestamp
    pub fn restart_with(&mut self, sequence: u16, timestamp: u32) {
        self.sequence = sequence;
        self.timestamp = timestamp;
    }

    /// Stop (or resume) answering resend requests
    pub fn answer_resends(&self, answer: bool) {
        self.responder.answer.store(answer, Ordering::Relaxed);
    }

    /// Every resend request received so far
    #[must_use]
    pub fn resend_requests(&self) -> Vec<ResendRequest> {
        self.responder.lock().requests.clone()
    }

    fn next_packet(&mut self) -> AudioPacket {
        let plain = plain_payload(self.sequence);
        let payload = match self.config.encryption {
            Some((key, iv)) => encrypt_payload(key, iv, &plain),
            None => plain,
        };
        let packet = AudioPacket::new(self.sequence, self.timestamp, self.config.ssrc, payload);

        self.responder
            .lock()
            .history
            .insert(self.sequence, packet.clone());
        self.sequence = self.sequence.wrapping_add(1);
        self.timestamp = self.timestamp.wrapping_add(self.config.frames_per_packet);
        packet
    }

    /// Send the next audio packet, bypassing the network simulator
    ///
    /// # Errors
    ///
    /// Returns `MockSenderError::Io` if the send fails.
    pub async fn send_audio(&mut self) -> Result<u16, MockSenderError> {
        let packet = self.next_packet();
        self.audio
            .send_to(&packet.encode(), self.config.audio_addr)
            .await?;
        Ok(packet.sequence())
    }

    /// Create the next packet without sending it, as if it were lost
    ///
    /// It is still answered if the receiver asks for it again.
    pub fn skip(&mut self) -> u16 {
        self.next_packet().sequence()
    }

    /// Create `count` packets and send them through the network simulator
    ///
    /// Returns the sequence numbers that were actually sent, in send order.
    ///
    /// # Errors
    ///
    /// Returns `MockSenderError::Io` if a send fails.
    pub async fn send_batch(&mut self, count: usize) -> Result<Vec<u16>, MockSenderError> {
        let packets: Vec<AudioPacket> = (0..count).map(|_| self.next_packet()).collect();
        let delivered = self.config.network.schedule(packets);

        let mut sent = Vec::with_capacity(delivered.len());
        for packet in delivered {
            let delay = self.config.network.get_delay();
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            self.audio
                .send_to(&packet.encode(), self.config.audio_addr)
                .await?;
            sent.push(packet.sequence());
        }
        Ok(sent)
    }

    /// Send an audio packet as-is
    ///
    /// # Errors
    ///
    /// Returns `MockSenderError::Io` if the send fails.
    pub async fn send_packet(&self, packet: &AudioPacket) -> Result<(), MockSenderError> {
        self.audio
            .send_to(&packet.encode(), self.config.audio_addr)
            .await?;
        Ok(())
    }

    /// Send a sync packet announcing `latency` samples
    ///
    /// The first sync carries the extension flag.
    ///
    /// # Errors
    ///
    /// Returns `MockSenderError::Io` if the send fails.
    pub async fn send_sync(&mut self, latency: u32) -> Result<(), MockSenderError> {
        let sync = SyncPacket::new(
            self.timestamp.wrapping_sub(latency),
            0,
            0,
            self.timestamp,
            !self.synced,
        );
        self.synced = true;
        self.control
            .send_to(&sync.encode(), self.config.control_addr)
            .await?;
        Ok(())
    }
}

impl Drop for MockRaopSender {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Payload of the packet with sequence number `sequence`, before encryption
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn plain_payload(sequence: u16) -> Bytes {
    let seed = sequence.to_be_bytes();
    (0..PAYLOAD_SIZE)
        .map(|i| seed[i % 2].wrapping_add(i as u8))
        .collect::<Vec<u8>>()
        .into()
}

async fn answer_resends(control: Arc<UdpSocket>, responder: Arc<Responder>) {
    let mut buf = vec![0u8; CONTROL_BUFFER_SIZE];
    loop {
        let (len, from) = match control.recv_from(&mut buf).await {
            Ok(received) => received,
            Err(e) => {
                tracing::debug!(error = %e, "mock sender control receive failed");
                continue;
            }
        };

        let datagram = &buf[..len];
        if datagram.len() < RtpHeader::SIZE
            || datagram[1] & 0x7F != RaopPayloadType::ResendRequest as u8
        {
            continue;
        }
        let Ok(request) = ResendRequest::decode(datagram) else {
            continue;
        };

        let responses: Vec<Bytes> = {
            let mut log = responder.lock();
            log.requests.push(request);
            if !responder.answer.load(Ordering::Relaxed) {
                continue;
            }
            (0..request.count)
                .filter_map(|i| log.history.get(&request.seq_start.wrapping_add(i)))
                .map(|packet| ResendResponse::new(packet.clone()).encode())
                .collect()
        };

        tracing::trace!(
            start = request.seq_start,
            count = request.count,
            answered = responses.len(),
            "mock sender resend"
        );
        for response in responses {
            if let Err(e) = control.send_to(&response, from).await {
                tracing::debug!(error = %e, "mock sender resend failed");
            }
        }
    }
}
