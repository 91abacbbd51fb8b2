use bytes::{BufMut, Bytes};
use thiserror::Error;

/// Fixed RTP header as used by RAOP
///
/// RAOP strips the standard 12-byte RTP header down to its first four bytes;
/// timestamp and SSRC move into the per-packet sub-header (see
/// [`AudioPacket`](super::AudioPacket)).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RtpHeader {
    padding: bool,
    extension: bool,
    csrc_count: u8,
    marker: bool,
    payload_type: u8,
    sequence: u16,
}

impl RtpHeader {
    /// Header size in bytes
    pub const SIZE: usize = 4;
    /// Version written on encode
    pub const VERSION: u8 = 2;
    /// Largest CSRC count representable in the header
    pub const MAX_CSRC_COUNT: u8 = 0x0F;
    /// Largest payload type representable in the header
    pub const MAX_PAYLOAD_TYPE: u8 = 0x7F;

    /// Create a header, validating field ranges
    ///
    /// # Errors
    ///
    /// Returns `RtpDecodeError::FieldOutOfRange` if `csrc_count` exceeds 15 or
    /// `payload_type` exceeds 127.
    pub fn new(
        padding: bool,
        extension: bool,
        csrc_count: u8,
        marker: bool,
        payload_type: u8,
        sequence: u16,
    ) -> Result<Self, RtpDecodeError> {
        if csrc_count > Self::MAX_CSRC_COUNT {
            return Err(RtpDecodeError::FieldOutOfRange {
                field: "csrc_count",
                value: u32::from(csrc_count),
                max: u32::from(Self::MAX_CSRC_COUNT),
            });
        }
        if payload_type > Self::MAX_PAYLOAD_TYPE {
            return Err(RtpDecodeError::FieldOutOfRange {
                field: "payload_type",
                value: u32::from(payload_type),
                max: u32::from(Self::MAX_PAYLOAD_TYPE),
            });
        }

        Ok(Self {
            padding,
            extension,
            csrc_count,
            marker,
            payload_type,
            sequence,
        })
    }

    /// Parse a header into `self`, reusing the existing value
    ///
    /// `self` is reset before parsing, so a failed call never leaves a
    /// partially updated header behind. The version bits are ignored.
    ///
    /// # Errors
    ///
    /// Returns `RtpDecodeError::BufferTooSmall` if `buf` is shorter than
    /// [`Self::SIZE`].
    pub fn set(&mut self, buf: &[u8]) -> Result<(), RtpDecodeError> {
        *self = Self::default();

        if buf.len() < Self::SIZE {
            return Err(RtpDecodeError::BufferTooSmall {
                needed: Self::SIZE,
                have: buf.len(),
            });
        }

        // Byte 0: V(2) | P(1) | X(1) | CC(4)
        self.padding = buf[0] & 0x20 != 0;
        self.extension = buf[0] & 0x10 != 0;
        self.csrc_count = buf[0] & 0x0F;

        // Byte 1: M(1) | PT(7)
        self.marker = buf[1] & 0x80 != 0;
        self.payload_type = buf[1] & 0x7F;

        self.sequence = u16::from_be_bytes([buf[2], buf[3]]);
        Ok(())
    }

    /// Decode a header from bytes
    ///
    /// # Errors
    ///
    /// Returns `RtpDecodeError` if the buffer is too small.
    pub fn decode(buf: &[u8]) -> Result<Self, RtpDecodeError> {
        let mut header = Self::default();
        header.set(buf)?;
        Ok(header)
    }

    /// Serialize the header, always writing version 2
    pub fn write<B: BufMut>(&self, buf: &mut B) {
        buf.put_u8(
            (Self::VERSION << 6)
                | (u8::from(self.padding) << 5)
                | (u8::from(self.extension) << 4)
                | self.csrc_count,
        );
        buf.put_u8((u8::from(self.marker) << 7) | self.payload_type);
        buf.put_u16(self.sequence);
    }

    /// Encode header to bytes
    #[must_use]
    pub fn encode(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        self.write(&mut &mut buf[..]);
        buf
    }

    /// Padding flag
    #[must_use]
    pub fn padding(&self) -> bool {
        self.padding
    }

    /// Extension flag
    #[must_use]
    pub fn extension(&self) -> bool {
        self.extension
    }

    /// CSRC count (0..=15)
    #[must_use]
    pub fn csrc_count(&self) -> u8 {
        self.csrc_count
    }

    /// Marker bit
    #[must_use]
    pub fn marker(&self) -> bool {
        self.marker
    }

    /// Payload type (0..=127)
    #[must_use]
    pub fn payload_type(&self) -> u8 {
        self.payload_type
    }

    /// Sequence number
    #[must_use]
    pub fn sequence(&self) -> u16 {
        self.sequence
    }
}

/// RTP packet: header plus a zero-copy view of the payload
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RtpPacket {
    header: RtpHeader,
    payload: Bytes,
}

impl RtpPacket {
    /// Parse a datagram into `self`, clearing any previous contents first
    ///
    /// # Errors
    ///
    /// Returns `RtpDecodeError::BufferTooSmall` for datagrams shorter than
    /// the header.
    pub fn set(&mut self, datagram: Bytes) -> Result<(), RtpDecodeError> {
        self.payload = Bytes::new();
        self.header.set(&datagram)?;
        self.payload = datagram.slice(RtpHeader::SIZE..);
        Ok(())
    }

    /// Decode a datagram
    ///
    /// # Errors
    ///
    /// Returns `RtpDecodeError::BufferTooSmall` for datagrams shorter than
    /// the header.
    pub fn decode(datagram: Bytes) -> Result<Self, RtpDecodeError> {
        let mut packet = Self::default();
        packet.set(datagram)?;
        Ok(packet)
    }

    /// Packet header
    #[must_use]
    pub fn header(&self) -> &RtpHeader {
        &self.header
    }

    /// Bytes following the header
    #[must_use]
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }
}

/// RTP decoding errors
///
/// Every variant means "drop this datagram"; none is fatal to a session.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RtpDecodeError {
    /// Buffer too small
    #[error("buffer too small: need {needed} bytes, have {have}")]
    BufferTooSmall {
        /// Bytes required
        needed: usize,
        /// Bytes available
        have: usize,
    },

    /// A header or sub-header field does not fit its wire width
    #[error("{field} out of range: {value} > {max}")]
    FieldOutOfRange {
        /// Field name
        field: &'static str,
        /// Supplied value
        value: u32,
        /// Largest permitted value
        max: u32,
    },

    /// Payload type not valid on this channel
    #[error("unexpected payload type: 0x{0:02x}")]
    UnexpectedPayloadType(u8),
}
