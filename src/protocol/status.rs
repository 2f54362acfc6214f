//! Status and re-send packets.
//!
//! Both exist for the reliability mechanism and are big-endian only; a
//! byte-swapped status or re-send packet is ignored by the receiver.
//!
//! Status packet (request and response are both 16 words):
//! ```text
//! word  0      packet header (type 0x1)
//! word  1      MTU in bytes
//! word  2      number of response buffers
//! word  3      header of the next expected control packet
//! words 4-7    incoming traffic history (16 bytes)
//! words 8-11   last 4 received control packet headers
//! words 12-15  last 4 outgoing control packet headers
//! ```
//! A status request has the header followed by 15 zero words.

use super::wire_format::{
    byte_order, detect_wire_order, read_word, PacketHeader, PacketType, WireOrder, HEADER_SIZE,
    WORD_SIZE,
};
use crate::error::{IpbusError, Result};

/// Status packet size in words.
pub const STATUS_PACKET_WORDS: usize = 16;

/// Status packet size in bytes.
pub const STATUS_PACKET_BYTES: usize = STATUS_PACKET_WORDS * WORD_SIZE;

/// Number of control packet headers kept in each history.
pub const HEADER_HISTORY_LEN: usize = 4;

/// Size of the incoming traffic history in bytes.
pub const TRAFFIC_HISTORY_LEN: usize = 16;

// Decode a big-endian-only header of `expected` type from the first word.
fn decode_big_endian_header(buf: &[u8], expected: PacketType) -> Result<PacketHeader> {
    let word = read_word(buf, 0)?;
    if detect_wire_order(word) == Some(WireOrder::LittleEndian) {
        tracing::warn!("Ignoring byte-swapped {:?} packet", expected);
        return Err(IpbusError::Protocol(format!(
            "{:?} packets must be big-endian",
            expected
        )));
    }

    let header = PacketHeader::from_word(word)?;
    if header.packet_type != expected {
        return Err(IpbusError::UnexpectedPacketType {
            expected: expected as u8,
            found: header.packet_type as u8,
        });
    }
    if header.byte_order != byte_order::BIG_ENDIAN {
        return Err(IpbusError::Protocol(format!(
            "Invalid byte-order marker {:#x} in {:?} packet",
            header.byte_order, expected
        )));
    }
    Ok(header)
}

fn check_exact_len(buf: &[u8], expected: usize) -> Result<()> {
    if buf.len() < expected {
        return Err(IpbusError::Truncated {
            needed: expected,
            available: buf.len(),
        });
    }
    if buf.len() > expected {
        return Err(IpbusError::Protocol(format!(
            "Packet length {} bytes, expected {}",
            buf.len(),
            expected
        )));
    }
    Ok(())
}

/// Status request sent by a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatusRequest;

impl StatusRequest {
    /// Header word of every status request.
    pub const HEADER_WORD: u32 = 0x2000_00F1;

    /// Create a status request.
    pub fn new() -> Self {
        Self
    }

    /// Encode: the header followed by 15 zero words.
    pub fn encode(&self) -> [u8; STATUS_PACKET_BYTES] {
        let mut buf = [0u8; STATUS_PACKET_BYTES];
        buf[..HEADER_SIZE].copy_from_slice(&Self::HEADER_WORD.to_be_bytes());
        buf
    }

    /// Decode on the target side. Only the header is checked.
    pub fn decode(buf: &[u8]) -> Result<Self> {
        check_exact_len(buf, STATUS_PACKET_BYTES)?;
        decode_big_endian_header(buf, PacketType::Status)?;
        Ok(Self)
    }
}

/// Status response sent by a target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusResponse {
    /// Maximum packet size the target accepts, in bytes.
    pub mtu: u32,
    /// Number of response buffers the target keeps for re-sends.
    pub response_buffers: u32,
    /// Header of the next control packet the target expects.
    pub next_expected: PacketHeader,
    /// Incoming traffic history, one byte per received packet, newest first.
    pub traffic_history: [u8; TRAFFIC_HISTORY_LEN],
    /// Headers of the last received control packets, newest first.
    pub received_headers: [u32; HEADER_HISTORY_LEN],
    /// Headers of the last outgoing control packets, newest first.
    pub outgoing_headers: [u32; HEADER_HISTORY_LEN],
}

impl StatusResponse {
    /// Packet ID the target expects next.
    #[inline]
    pub fn next_packet_id(&self) -> u16 {
        self.next_expected.packet_id
    }

    /// Encode on the target side.
    pub fn encode(&self) -> [u8; STATUS_PACKET_BYTES] {
        let mut words = [0u32; STATUS_PACKET_WORDS];
        words[0] = StatusRequest::HEADER_WORD;
        words[1] = self.mtu;
        words[2] = self.response_buffers;
        words[3] = self.next_expected.to_word();
        for (i, chunk) in self.traffic_history.chunks(WORD_SIZE).enumerate() {
            words[4 + i] = u32::from_be_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        }
        words[8..12].copy_from_slice(&self.received_headers);
        words[12..16].copy_from_slice(&self.outgoing_headers);

        let mut buf = [0u8; STATUS_PACKET_BYTES];
        for (dst, word) in buf.chunks_mut(WORD_SIZE).zip(words) {
            dst.copy_from_slice(&word.to_be_bytes());
        }
        buf
    }

    /// Decode a 64-byte big-endian status response.
    pub fn decode(buf: &[u8]) -> Result<Self> {
        check_exact_len(buf, STATUS_PACKET_BYTES)?;
        decode_big_endian_header(buf, PacketType::Status)?;

        let word = |i: usize| read_word(buf, i * WORD_SIZE);

        let mut traffic_history = [0u8; TRAFFIC_HISTORY_LEN];
        traffic_history.copy_from_slice(&buf[4 * WORD_SIZE..8 * WORD_SIZE]);

        let mut received_headers = [0u32; HEADER_HISTORY_LEN];
        let mut outgoing_headers = [0u32; HEADER_HISTORY_LEN];
        for i in 0..HEADER_HISTORY_LEN {
            received_headers[i] = word(8 + i)?;
            outgoing_headers[i] = word(12 + i)?;
        }

        let response = Self {
            mtu: word(1)?,
            response_buffers: word(2)?,
            next_expected: PacketHeader::from_word(word(3)?)?,
            traffic_history,
            received_headers,
            outgoing_headers,
        };

        tracing::debug!(
            "Status: mtu={} buffers={} next_id={:#06x}",
            response.mtu,
            response.response_buffers,
            response.next_packet_id()
        );
        Ok(response)
    }
}

/// Request to re-send one of the target's recent control responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResendRequest {
    /// ID of the control packet to re-send.
    pub packet_id: u16,
}

impl ResendRequest {
    /// Request a re-send of control packet `packet_id`.
    pub fn new(packet_id: u16) -> Self {
        Self { packet_id }
    }

    /// Packet header carrying the ID.
    pub fn header(&self) -> PacketHeader {
        PacketHeader::new(self.packet_id, PacketType::Resend)
    }

    /// Encode to one big-endian word.
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        self.header().encode()
    }

    /// Decode a one-word big-endian re-send request.
    pub fn decode(buf: &[u8]) -> Result<Self> {
        check_exact_len(buf, HEADER_SIZE)?;
        let header = decode_big_endian_header(buf, PacketType::Resend)?;
        Ok(Self {
            packet_id: header.packet_id,
        })
    }
}
