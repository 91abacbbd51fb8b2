//! RAOP-specific RTP packet types

use super::packet::{RtpDecodeError, RtpHeader, RtpPacket};
use bytes::{BufMut, Bytes, BytesMut};

/// RAOP RTP payload types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RaopPayloadType {
    /// Sync packet (sender -> receiver on control channel)
    Sync = 0x54,
    /// Resend request (receiver -> sender on control channel)
    ResendRequest = 0x55,
    /// Resend response (sender -> receiver on control channel)
    ResendResponse = 0x56,
    /// Audio data
    Audio = 0x60,
}

impl RaopPayloadType {
    /// Parse from the 7-bit payload type field
    #[must_use]
    pub fn from_u7(b: u8) -> Option<Self> {
        match b & 0x7F {
            0x54 => Some(Self::Sync),
            0x55 => Some(Self::ResendRequest),
            0x56 => Some(Self::ResendResponse),
            0x60 => Some(Self::Audio),
            _ => None,
        }
    }
}

/// RAOP audio packet
///
/// An RTP packet whose payload starts with an 8-byte sub-header
/// (timestamp, SSRC). Version and payload type are not checked, since
/// senders are known to mislabel retransmitted audio.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AudioPacket {
    header: RtpHeader,
    timestamp: u32,
    ssrc: u32,
    payload: Bytes,
}

impl AudioPacket {
    /// Audio sub-header size
    pub const SUB_HEADER_SIZE: usize = 8;
    /// Smallest valid datagram
    pub const MIN_SIZE: usize = RtpHeader::SIZE + Self::SUB_HEADER_SIZE;

    /// Create an audio packet for sending
    #[must_use]
    pub fn new(sequence: u16, timestamp: u32, ssrc: u32, payload: impl Into<Bytes>) -> Self {
        Self {
            header: RtpHeader::new(false, false, 0, false, RaopPayloadType::Audio as u8, sequence)
                .unwrap_or_default(),
            timestamp,
            ssrc,
            payload: payload.into(),
        }
    }

    /// Parse from an already decoded RTP packet
    ///
    /// # Errors
    ///
    /// Returns `RtpDecodeError::BufferTooSmall` if the audio sub-header is
    /// truncated.
    pub fn from_rtp(packet: &RtpPacket) -> Result<Self, RtpDecodeError> {
        let body = packet.payload();
        if body.len() < Self::SUB_HEADER_SIZE {
            return Err(RtpDecodeError::BufferTooSmall {
                needed: Self::MIN_SIZE,
                have: RtpHeader::SIZE + body.len(),
            });
        }

        Ok(Self {
            header: *packet.header(),
            timestamp: u32::from_be_bytes([body[0], body[1], body[2], body[3]]),
            ssrc: u32::from_be_bytes([body[4], body[5], body[6], body[7]]),
            payload: body.slice(Self::SUB_HEADER_SIZE..),
        })
    }

    /// Parse a datagram into `self`, clearing it first
    ///
    /// # Errors
    ///
    /// Returns `RtpDecodeError` if the datagram is structurally invalid.
    pub fn set(&mut self, datagram: Bytes) -> Result<(), RtpDecodeError> {
        *self = Self::default();
        let packet = RtpPacket::decode(datagram)?;
        *self = Self::from_rtp(&packet)?;
        Ok(())
    }

    /// Decode a datagram
    ///
    /// # Errors
    ///
    /// Returns `RtpDecodeError` if the datagram is structurally invalid.
    pub fn decode(datagram: Bytes) -> Result<Self, RtpDecodeError> {
        let mut packet = Self::default();
        packet.set(datagram)?;
        Ok(packet)
    }

    /// Serialize into `buf`
    pub fn write<B: BufMut>(&self, buf: &mut B) {
        self.header.write(buf);
        buf.put_u32(self.timestamp);
        buf.put_u32(self.ssrc);
        buf.put_slice(&self.payload);
    }

    /// Encode to a new buffer
    #[must_use]
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(Self::MIN_SIZE + self.payload.len());
        self.write(&mut buf);
        buf.freeze()
    }

    /// RTP header
    #[must_use]
    pub fn header(&self) -> &RtpHeader {
        &self.header
    }

    /// Sequence number
    #[must_use]
    pub fn sequence(&self) -> u16 {
        self.header.sequence()
    }

    /// RTP timestamp
    #[must_use]
    pub fn timestamp(&self) -> u32 {
        self.timestamp
    }

    /// Synchronization source, used as the session id
    #[must_use]
    pub fn ssrc(&self) -> u32 {
        self.ssrc
    }

    /// Audio payload (usually encrypted)
    #[must_use]
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }
}

/// RAOP sync packet (control channel)
///
/// Correlates RTP time with NTP time and carries the sender's latency.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncPacket {
    header: RtpHeader,
    /// RTP timestamp minus latency
    pub rtp_timestamp_minus_latency: u32,
    /// NTP seconds
    pub ntp_seconds: u32,
    /// NTP fraction
    pub ntp_fraction: u32,
    /// RTP timestamp at the NTP instant
    pub rtp_timestamp: u32,
}

impl SyncPacket {
    /// Payload size following the RTP header
    pub const PAYLOAD_SIZE: usize = 16;
    /// Full datagram size
    pub const SIZE: usize = RtpHeader::SIZE + Self::PAYLOAD_SIZE;

    /// Create a sync packet for sending
    #[must_use]
    pub fn new(
        rtp_timestamp_minus_latency: u32,
        ntp_seconds: u32,
        ntp_fraction: u32,
        rtp_timestamp: u32,
        extension: bool,
    ) -> Self {
        Self {
            header: RtpHeader::new(false, extension, 0, true, RaopPayloadType::Sync as u8, 7)
                .unwrap_or_default(),
            rtp_timestamp_minus_latency,
            ntp_seconds,
            ntp_fraction,
            rtp_timestamp,
        }
    }

    /// Parse from a decoded RTP packet
    ///
    /// # Errors
    ///
    /// Returns `RtpDecodeError` if the packet is not a sync packet or is
    /// truncated.
    pub fn from_rtp(packet: &RtpPacket) -> Result<Self, RtpDecodeError> {
        let payload_type = packet.header().payload_type();
        if payload_type != RaopPayloadType::Sync as u8 {
            return Err(RtpDecodeError::UnexpectedPayloadType(payload_type));
        }
        let body = packet.payload();
        if body.len() < Self::PAYLOAD_SIZE {
            return Err(RtpDecodeError::BufferTooSmall {
                needed: Self::SIZE,
                have: RtpHeader::SIZE + body.len(),
            });
        }

        let word = |i: usize| u32::from_be_bytes([body[i], body[i + 1], body[i + 2], body[i + 3]]);
        Ok(Self {
            header: *packet.header(),
            rtp_timestamp_minus_latency: word(0),
            ntp_seconds: word(4),
            ntp_fraction: word(8),
            rtp_timestamp: word(12),
        })
    }

    /// Latency in samples announced by the sender
    #[must_use]
    pub fn latency(&self) -> u32 {
        self.rtp_timestamp
            .wrapping_sub(self.rtp_timestamp_minus_latency)
    }

    /// Extension flag (set on the first sync after record/flush)
    #[must_use]
    pub fn extension(&self) -> bool {
        self.header.extension()
    }

    /// Encode to bytes
    #[must_use]
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(Self::SIZE);
        self.header.write(&mut buf);
        buf.put_u32(self.rtp_timestamp_minus_latency);
        buf.put_u32(self.ntp_seconds);
        buf.put_u32(self.ntp_fraction);
        buf.put_u32(self.rtp_timestamp);
        buf.freeze()
    }
}

/// Resend request sent to the sender's control port
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResendRequest {
    /// First sequence number to resend
    pub seq_start: u16,
    /// Number of packets to resend
    pub count: u16,
}

impl ResendRequest {
    /// Datagram size
    pub const SIZE: usize = RtpHeader::SIZE + 4;
    /// Sequence number written in the request's own header
    const HEADER_SEQUENCE: u16 = 1;

    /// Create a request
    #[must_use]
    pub fn new(seq_start: u16, count: u16) -> Self {
        Self { seq_start, count }
    }

    /// Serialize into `buf`
    pub fn write<B: BufMut>(&self, buf: &mut B) {
        let header = RtpHeader::new(
            false,
            false,
            0,
            true,
            RaopPayloadType::ResendRequest as u8,
            Self::HEADER_SEQUENCE,
        )
        .unwrap_or_default();
        header.write(buf);
        buf.put_u16(self.seq_start);
        buf.put_u16(self.count);
    }

    /// Encode to bytes
    #[must_use]
    pub fn encode(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        self.write(&mut &mut buf[..]);
        buf
    }

    /// Decode a request, ignoring version and payload type
    ///
    /// # Errors
    ///
    /// Returns `RtpDecodeError::BufferTooSmall` if truncated.
    pub fn decode(buf: &[u8]) -> Result<Self, RtpDecodeError> {
        if buf.len() < Self::SIZE {
            return Err(RtpDecodeError::BufferTooSmall {
                needed: Self::SIZE,
                have: buf.len(),
            });
        }
        Ok(Self {
            seq_start: u16::from_be_bytes([buf[4], buf[5]]),
            count: u16::from_be_bytes([buf[6], buf[7]]),
        })
    }
}

/// Resend response: an RTP header wrapping a complete audio packet
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResendResponse {
    header: RtpHeader,
    audio: AudioPacket,
}

impl ResendResponse {
    /// Wrap an audio packet for sending
    #[must_use]
    pub fn new(audio: AudioPacket) -> Self {
        Self {
            header: RtpHeader::new(
                false,
                false,
                0,
                true,
                RaopPayloadType::ResendResponse as u8,
                audio.sequence(),
            )
            .unwrap_or_default(),
            audio,
        }
    }

    /// Parse from a decoded RTP packet
    ///
    /// The outer payload type is checked by the caller; the inner packet's
    /// version and type are ignored.
    ///
    /// # Errors
    ///
    /// Returns `RtpDecodeError` if the nested audio packet is truncated.
    pub fn from_rtp(packet: &RtpPacket) -> Result<Self, RtpDecodeError> {
        let audio = AudioPacket::decode(packet.payload().clone())?;
        Ok(Self {
            header: *packet.header(),
            audio,
        })
    }

    /// Decode a datagram
    ///
    /// # Errors
    ///
    /// Returns `RtpDecodeError` if either header is truncated.
    pub fn decode(datagram: Bytes) -> Result<Self, RtpDecodeError> {
        let packet = RtpPacket::decode(datagram)?;
        Self::from_rtp(&packet)
    }

    /// Nested audio packet
    #[must_use]
    pub fn audio(&self) -> &AudioPacket {
        &self.audio
    }

    /// Take the nested audio packet
    #[must_use]
    pub fn into_audio(self) -> AudioPacket {
        self.audio
    }

    /// Encode to bytes
    #[must_use]
    pub fn encode(&self) -> Bytes {
        let mut buf =
            BytesMut::with_capacity(RtpHeader::SIZE + AudioPacket::MIN_SIZE + self.audio.payload.len());
        self.header.write(&mut buf);
        self.audio.write(&mut buf);
        buf.freeze()
    }
}

/// Packets the control channel can carry towards the receiver
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlPacket {
    /// Timing and latency update
    Sync(SyncPacket),
    /// Retransmitted audio
    ResendResponse(ResendResponse),
}

impl ControlPacket {
    /// Classify and decode a control datagram
    ///
    /// # Errors
    ///
    /// Returns `RtpDecodeError::UnexpectedPayloadType` for anything other
    /// than sync or resend response, or a structural error.
    pub fn decode(datagram: Bytes) -> Result<Self, RtpDecodeError> {
        let packet = RtpPacket::decode(datagram)?;
        let payload_type = packet.header().payload_type();
        match RaopPayloadType::from_u7(payload_type) {
            Some(RaopPayloadType::Sync) => Ok(Self::Sync(SyncPacket::from_rtp(&packet)?)),
            Some(RaopPayloadType::ResendResponse) => {
                Ok(Self::ResendResponse(ResendResponse::from_rtp(&packet)?))
            }
            _ => Err(RtpDecodeError::UnexpectedPayloadType(payload_type)),
        }
    }
}
