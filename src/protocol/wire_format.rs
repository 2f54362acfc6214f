//! Wire format encoding and decoding.
//!
//! Implements the two 32-bit IPbus 2.0 header words:
//! ```text
//! Packet header
//! ┌─────────┬──────┬──────────────┬────────────┬─────────────┐
//! │ Version │ Rsvd │ Packet ID    │ Byte-order │ Packet Type │
//! │ 31..28  │27..24│ 23..8        │ 7..4       │ 3..0        │
//! └─────────┴──────┴──────────────┴────────────┴─────────────┘
//!
//! Transaction header
//! ┌─────────┬────────────────┬──────────┬─────────┬───────────┐
//! │ Version │ Transaction ID │ Words    │ Type ID │ Info Code │
//! │ 31..28  │ 27..16         │ 15..8    │ 7..4    │ 3..0      │
//! └─────────┴────────────────┴──────────┴─────────┴───────────┘
//! ```
//!
//! All words are Big Endian on the wire.

use crate::error::{IpbusError, Result};

/// Protocol version carried in the top nibble of every header.
pub const PROTOCOL_VERSION: u8 = 2;

/// Size of one IPbus word in bytes.
pub const WORD_SIZE: usize = 4;

/// Size of a packet or transaction header in bytes.
pub const HEADER_SIZE: usize = WORD_SIZE;

/// Largest IPbus packet over standard Ethernet: 1500 - 20 (IP) - 8 (UDP).
pub const MAX_PACKET_BYTES: usize = 1472;

/// [`MAX_PACKET_BYTES`] in words.
pub const MAX_PACKET_WORDS: usize = MAX_PACKET_BYTES / WORD_SIZE;

/// Largest value of the 8-bit word count field.
pub const MAX_WORD_COUNT: usize = 0xFF;

/// Wrap boundary of the 16-bit packet ID.
pub const MAX_PACKET_ID: u16 = 0xFFFF;

/// Wrap boundary of the 12-bit transaction ID.
pub const MAX_TRANSACTION_ID: u16 = 0x0FFF;

/// Byte-order field values.
pub mod byte_order {
    /// Marker written by a big-endian sender. Always used for control packets.
    pub const BIG_ENDIAN: u8 = 0xF;

    /// Mask of the 4-bit field.
    pub const MASK: u8 = 0xF;
}

/// Endianness of a received packet, detected from its header word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireOrder {
    /// Words arrive in network order.
    BigEndian,
    /// Every word arrives byte-swapped.
    LittleEndian,
}

impl WireOrder {
    /// Bring a word read as big-endian into host value order.
    #[inline]
    pub fn normalize(self, word: u32) -> u32 {
        match self {
            WireOrder::BigEndian => word,
            WireOrder::LittleEndian => word.swap_bytes(),
        }
    }
}

/// Decide whether `word` (read big-endian) is a packet header, and in which order.
///
/// A packet header has version 2 in the top nibble and the byte-order
/// marker 0xF in bits 7..4. Seen byte-swapped, those nibbles land at
/// 0xF in the top nibble and 0x2 in bits 7..4.
pub fn detect_wire_order(word: u32) -> Option<WireOrder> {
    let top = word >> 28;
    let marker = (word >> 4) & 0xF;

    if top == PROTOCOL_VERSION as u32 && marker == byte_order::BIG_ENDIAN as u32 {
        Some(WireOrder::BigEndian)
    } else if top == byte_order::BIG_ENDIAN as u32 && marker == PROTOCOL_VERSION as u32 {
        Some(WireOrder::LittleEndian)
    } else {
        None
    }
}

/// Packet type (bits 3..0 of the packet header).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PacketType {
    /// Carries IPbus transactions.
    Control = 0x0,
    /// Status request/response, always big-endian.
    Status = 0x1,
    /// Re-send request, always big-endian.
    Resend = 0x2,
}

impl TryFrom<u8> for PacketType {
    type Error = IpbusError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0x0 => Ok(PacketType::Control),
            0x1 => Ok(PacketType::Status),
            0x2 => Ok(PacketType::Resend),
            other => Err(IpbusError::UnsupportedPacketType(other)),
        }
    }
}

/// Transaction type (the Type ID field).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TransactionKind {
    /// Incrementing block read.
    Read = 0x0,
    /// Incrementing block write.
    Write = 0x1,
    /// FIFO read from a single address.
    NonIncrementingRead = 0x2,
    /// FIFO write to a single address.
    NonIncrementingWrite = 0x3,
    /// `X <= (X & and_term) | or_term`.
    ReadModifyWriteBits = 0x4,
    /// `X <= X + addend`.
    ReadModifyWriteSum = 0x5,
    /// Read from the target's configuration space.
    ConfigSpaceRead = 0x6,
    /// Write to the target's configuration space.
    ConfigSpaceWrite = 0x7,
}

impl TransactionKind {
    /// All eight kinds, in type ID order.
    pub const ALL: [TransactionKind; 8] = [
        TransactionKind::Read,
        TransactionKind::Write,
        TransactionKind::NonIncrementingRead,
        TransactionKind::NonIncrementingWrite,
        TransactionKind::ReadModifyWriteBits,
        TransactionKind::ReadModifyWriteSum,
        TransactionKind::ConfigSpaceRead,
        TransactionKind::ConfigSpaceWrite,
    ];

    /// Type ID nibble.
    #[inline]
    pub fn type_id(self) -> u8 {
        self as u8
    }

    /// Reads return `word_count` words in the response.
    #[inline]
    pub fn is_read(self) -> bool {
        matches!(
            self,
            TransactionKind::Read
                | TransactionKind::NonIncrementingRead
                | TransactionKind::ConfigSpaceRead
        )
    }

    /// Writes carry `word_count` words in the request.
    #[inline]
    pub fn is_write(self) -> bool {
        matches!(
            self,
            TransactionKind::Write
                | TransactionKind::NonIncrementingWrite
                | TransactionKind::ConfigSpaceWrite
        )
    }

    /// Read-modify-write kinds return the register's prior value.
    #[inline]
    pub fn is_read_modify_write(self) -> bool {
        matches!(
            self,
            TransactionKind::ReadModifyWriteBits | TransactionKind::ReadModifyWriteSum
        )
    }
}

impl TryFrom<u8> for TransactionKind {
    type Error = IpbusError;

    fn try_from(value: u8) -> Result<Self> {
        TransactionKind::ALL
            .get(value as usize)
            .copied()
            .ok_or(IpbusError::UnsupportedTransactionType(value))
    }
}

/// Info code (bits 3..0 of the transaction header).
///
/// Requests always carry [`InfoCode::Request`]; successful responses carry
/// [`InfoCode::Success`]. Codes the protocol leaves unassigned are kept as
/// transmitted in [`InfoCode::Reserved`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InfoCode {
    /// 0x0
    Success,
    /// 0x1
    BadHeader,
    /// 0x4
    BusErrorOnRead,
    /// 0x5
    BusErrorOnWrite,
    /// 0x6
    BusTimeoutOnRead,
    /// 0x7
    BusTimeoutOnWrite,
    /// 0xF
    Request,
    /// Any other nibble.
    Reserved(u8),
}

impl InfoCode {
    /// Decode a 4-bit info code. Never fails.
    pub fn from_nibble(nibble: u8) -> Self {
        match nibble & 0xF {
            0x0 => InfoCode::Success,
            0x1 => InfoCode::BadHeader,
            0x4 => InfoCode::BusErrorOnRead,
            0x5 => InfoCode::BusErrorOnWrite,
            0x6 => InfoCode::BusTimeoutOnRead,
            0x7 => InfoCode::BusTimeoutOnWrite,
            0xF => InfoCode::Request,
            other => InfoCode::Reserved(other),
        }
    }

    /// 4-bit wire value.
    pub fn nibble(self) -> u8 {
        match self {
            InfoCode::Success => 0x0,
            InfoCode::BadHeader => 0x1,
            InfoCode::BusErrorOnRead => 0x4,
            InfoCode::BusErrorOnWrite => 0x5,
            InfoCode::BusTimeoutOnRead => 0x6,
            InfoCode::BusTimeoutOnWrite => 0x7,
            InfoCode::Request => 0xF,
            InfoCode::Reserved(n) => n & 0xF,
        }
    }

    /// Client-to-target direction.
    #[inline]
    pub fn is_request(self) -> bool {
        self.nibble() == 0xF
    }

    /// Target-to-client, no error.
    #[inline]
    pub fn is_success(self) -> bool {
        self.nibble() == 0x0
    }

    /// Target-to-client error code (anything but request or success).
    #[inline]
    pub fn is_error(self) -> bool {
        !self.is_request() && !self.is_success()
    }

    /// The variant a decoder produces for this code's wire nibble.
    #[inline]
    pub fn canonical(self) -> Self {
        Self::from_nibble(self.nibble())
    }

    /// True if decoding the wire nibble gives back this exact value.
    #[inline]
    pub fn is_canonical(self) -> bool {
        self.canonical() == self
    }
}

#[inline]
fn check_version(word: u32) -> Result<()> {
    let found = (word >> 28) as u8;
    if found != PROTOCOL_VERSION {
        return Err(IpbusError::ProtocolVersionMismatch { found });
    }
    Ok(())
}

#[inline]
pub(crate) fn read_word(buf: &[u8], offset: usize) -> Result<u32> {
    let end = offset + WORD_SIZE;
    if buf.len() < end {
        return Err(IpbusError::Truncated {
            needed: end,
            available: buf.len(),
        });
    }
    Ok(u32::from_be_bytes([
        buf[offset],
        buf[offset + 1],
        buf[offset + 2],
        buf[offset + 3],
    ]))
}

/// Sequential word reader over a byte buffer in a given wire order.
pub(crate) struct WordReader<'a> {
    buf: &'a [u8],
    order: WireOrder,
    pos: usize,
}

impl<'a> WordReader<'a> {
    pub(crate) fn new(buf: &'a [u8], order: WireOrder) -> Self {
        Self { buf, order, pos: 0 }
    }

    /// Fail with `Truncated` unless `words` more words are available.
    pub(crate) fn require(&self, words: usize) -> Result<()> {
        let needed = self.pos + words * WORD_SIZE;
        if self.buf.len() < needed {
            return Err(IpbusError::Truncated {
                needed,
                available: self.buf.len(),
            });
        }
        Ok(())
    }

    pub(crate) fn next_word(&mut self) -> Result<u32> {
        let word = read_word(self.buf, self.pos)?;
        self.pos += WORD_SIZE;
        Ok(self.order.normalize(word))
    }

    /// Bytes consumed so far.
    #[inline]
    pub(crate) fn position(&self) -> usize {
        self.pos
    }

    #[inline]
    pub(crate) fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }
}

/// Decoded packet header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    /// Packet ID (0 = non-reliable traffic).
    pub packet_id: u16,
    /// Byte-order marker nibble.
    pub byte_order: u8,
    /// Packet type.
    pub packet_type: PacketType,
}

impl PacketHeader {
    /// Create a header with the big-endian marker.
    pub fn new(packet_id: u16, packet_type: PacketType) -> Self {
        Self::with_byte_order(packet_id, byte_order::BIG_ENDIAN, packet_type)
    }

    /// Create a header with an explicit byte-order nibble.
    pub fn with_byte_order(packet_id: u16, byte_order: u8, packet_type: PacketType) -> Self {
        Self {
            packet_id,
            byte_order: byte_order & byte_order::MASK,
            packet_type,
        }
    }

    /// Protocol version (always 2 for a decoded or built header).
    #[inline]
    pub fn version(&self) -> u8 {
        PROTOCOL_VERSION
    }

    /// Pack into a 32-bit word.
    ///
    /// # Example
    ///
    /// ```
    /// use ipbus_client::protocol::{PacketHeader, PacketType};
    ///
    /// let header = PacketHeader::new(2, PacketType::Control);
    /// assert_eq!(header.to_word(), 0x2000_02F0);
    /// ```
    pub fn to_word(&self) -> u32 {
        (PROTOCOL_VERSION as u32) << 28
            | (self.packet_id as u32) << 8
            | ((self.byte_order & byte_order::MASK) as u32) << 4
            | self.packet_type as u32
    }

    /// Encode to bytes (Big Endian).
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        self.to_word().to_be_bytes()
    }

    /// Unpack a 32-bit word, validating version and packet type.
    pub fn from_word(word: u32) -> Result<Self> {
        check_version(word)?;
        let packet_type = PacketType::try_from((word & 0xF) as u8)?;
        Ok(Self {
            packet_id: ((word >> 8) & 0xFFFF) as u16,
            byte_order: ((word >> 4) & 0xF) as u8,
            packet_type,
        })
    }

    /// Decode from the first 4 bytes of `buf` (Big Endian).
    pub fn decode(buf: &[u8]) -> Result<Self> {
        Self::from_word(read_word(buf, 0)?)
    }

    /// Packets with ID 0 bypass the reliability mechanism.
    #[inline]
    pub fn is_reliable(&self) -> bool {
        self.packet_id != 0
    }
}

/// Decoded transaction header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransactionHeader {
    /// 12-bit transaction ID.
    pub transaction_id: u16,
    /// Words field.
    pub word_count: u8,
    /// Type ID.
    pub kind: TransactionKind,
    /// Info code.
    pub info: InfoCode,
}

impl TransactionHeader {
    /// Create a header.
    pub fn new(transaction_id: u16, word_count: u8, kind: TransactionKind, info: InfoCode) -> Self {
        Self {
            transaction_id: transaction_id & MAX_TRANSACTION_ID,
            word_count,
            kind,
            info,
        }
    }

    /// Create a request header (info code 0xF).
    pub fn request(transaction_id: u16, kind: TransactionKind, word_count: u8) -> Self {
        Self::new(transaction_id, word_count, kind, InfoCode::Request)
    }

    /// Protocol version (always 2 for a decoded or built header).
    #[inline]
    pub fn version(&self) -> u8 {
        PROTOCOL_VERSION
    }

    /// Pack into a 32-bit word.
    ///
    /// # Example
    ///
    /// ```
    /// use ipbus_client::protocol::{TransactionHeader, TransactionKind};
    ///
    /// let header = TransactionHeader::request(1, TransactionKind::Read, 0x0A);
    /// assert_eq!(header.to_word(), 0x2001_0A0F);
    /// ```
    pub fn to_word(&self) -> u32 {
        (PROTOCOL_VERSION as u32) << 28
            | ((self.transaction_id & MAX_TRANSACTION_ID) as u32) << 16
            | (self.word_count as u32) << 8
            | (self.kind.type_id() as u32) << 4
            | self.info.nibble() as u32
    }

    /// Encode to bytes (Big Endian).
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        self.to_word().to_be_bytes()
    }

    /// Unpack a 32-bit word, validating version and type ID.
    pub fn from_word(word: u32) -> Result<Self> {
        check_version(word)?;
        let kind = TransactionKind::try_from(((word >> 4) & 0xF) as u8)?;
        Ok(Self {
            transaction_id: ((word >> 16) & MAX_TRANSACTION_ID as u32) as u16,
            word_count: ((word >> 8) & 0xFF) as u8,
            kind,
            info: InfoCode::from_nibble((word & 0xF) as u8),
        })
    }

    /// Decode from the first 4 bytes of `buf` (Big Endian).
    pub fn decode(buf: &[u8]) -> Result<Self> {
        Self::from_word(read_word(buf, 0)?)
    }
}

/// Decode a packet header word (standalone function).
#[inline]
pub fn decode_packet_header(word: u32) -> Result<PacketHeader> {
    PacketHeader::from_word(word)
}

/// Decode a transaction header word (standalone function).
#[inline]
pub fn decode_transaction_header(word: u32) -> Result<TransactionHeader> {
    TransactionHeader::from_word(word)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_packet_header_layout() {
        let header = PacketHeader::new(0x1234, PacketType::Control);
        assert_eq!(header.to_word(), 0x2012_34F0);
        assert_eq!(header.encode(), [0x20, 0x12, 0x34, 0xF0]);
    }

    #[test]
    fn test_packet_header_roundtrip_all_types() {
        for packet_type in [PacketType::Control, PacketType::Status, PacketType::Resend] {
            for packet_id in [0u16, 1, 0x00FF, 0xABCD, MAX_PACKET_ID] {
                let header = PacketHeader::new(packet_id, packet_type);
                let decoded = PacketHeader::decode(&header.encode()).unwrap();
                assert_eq!(decoded, header);
                assert_eq!(decoded.version(), PROTOCOL_VERSION);
            }
        }
    }

    #[test]
    fn test_packet_header_ignores_reserved_nibble() {
        let decoded = PacketHeader::from_word(0x2A00_01F0).unwrap();
        assert_eq!(decoded.packet_id, 1);
        assert_eq!(decoded.packet_type, PacketType::Control);
    }

    #[test]
    fn test_packet_header_bad_version() {
        let result = PacketHeader::from_word(0x1000_00F0);
        assert!(matches!(
            result,
            Err(IpbusError::ProtocolVersionMismatch { found: 1 })
        ));
    }

    #[test]
    fn test_packet_header_bad_type() {
        let result = PacketHeader::from_word(0x2000_00F3);
        assert!(matches!(result, Err(IpbusError::UnsupportedPacketType(3))));
    }

    #[test]
    fn test_transaction_header_layout() {
        let header = TransactionHeader::request(0x123, TransactionKind::Write, 0x08);
        assert_eq!(header.to_word(), 0x2123_081F);
    }

    #[test]
    fn test_transaction_header_masks_id_to_12_bits() {
        let header = TransactionHeader::request(0xF001, TransactionKind::Read, 1);
        assert_eq!(header.transaction_id, 0x001);
        assert_eq!(header.to_word() >> 28, 2);
    }

    #[test]
    fn test_transaction_header_roundtrip_grid() {
        for kind in TransactionKind::ALL {
            for word_count in 0..=255u8 {
                for transaction_id in (0..=MAX_TRANSACTION_ID).step_by(0x111) {
                    let header = TransactionHeader::request(transaction_id, kind, word_count);
                    let decoded = decode_transaction_header(header.to_word()).unwrap();
                    assert_eq!(decoded.version(), 2);
                    assert_eq!(decoded.kind, kind);
                    assert_eq!(decoded.word_count, word_count);
                    assert_eq!(decoded.transaction_id, transaction_id);
                    assert_eq!(decoded.info, InfoCode::Request);
                }
            }
        }
    }

    #[test]
    fn test_transaction_header_keeps_response_info_code() {
        let decoded = TransactionHeader::from_word(0x2005_0104).unwrap();
        assert_eq!(decoded.info, InfoCode::BusErrorOnRead);
        assert!(decoded.info.is_error());

        let decoded = TransactionHeader::from_word(0x2005_010A).unwrap();
        assert_eq!(decoded.info, InfoCode::Reserved(0xA));
        assert_eq!(decoded.to_word(), 0x2005_010A);
    }

    #[test]
    fn test_transaction_header_unsupported_type() {
        let result = TransactionHeader::from_word(0x2000_008F);
        assert!(matches!(
            result,
            Err(IpbusError::UnsupportedTransactionType(8))
        ));
    }

    #[test]
    fn test_transaction_header_bad_version() {
        let result = decode_transaction_header(0x3000_000F);
        assert!(matches!(
            result,
            Err(IpbusError::ProtocolVersionMismatch { found: 3 })
        ));
    }

    #[test]
    fn test_decode_too_short_buffer() {
        let result = TransactionHeader::decode(&[0x20, 0x00, 0x01]);
        assert!(matches!(
            result,
            Err(IpbusError::Truncated {
                needed: 4,
                available: 3
            })
        ));
    }

    #[test]
    fn test_detect_wire_order() {
        let word = PacketHeader::new(7, PacketType::Control).to_word();
        assert_eq!(detect_wire_order(word), Some(WireOrder::BigEndian));
        assert_eq!(
            detect_wire_order(word.swap_bytes()),
            Some(WireOrder::LittleEndian)
        );
        assert_eq!(
            WireOrder::LittleEndian.normalize(word.swap_bytes()),
            word
        );

        // A transaction header is never mistaken for a packet header
        let transaction = TransactionHeader::request(0x0F0, TransactionKind::ConfigSpaceWrite, 0xFF);
        assert_eq!(detect_wire_order(transaction.to_word()), None);
    }

    #[test]
    fn test_info_code_nibbles() {
        for nibble in 0..=0xFu8 {
            assert_eq!(InfoCode::from_nibble(nibble).nibble(), nibble);
        }
        assert!(InfoCode::Request.is_request());
        assert!(InfoCode::Success.is_success());
        assert!(!InfoCode::Success.is_error());
        assert!(InfoCode::BusTimeoutOnWrite.is_error());
    }

    #[test]
    fn test_reserved_info_code_classified_by_nibble() {
        assert!(InfoCode::Reserved(0xF).is_request());
        assert!(InfoCode::Reserved(0x0).is_success());
        assert!(!InfoCode::Reserved(0x0).is_error());
        assert!(InfoCode::Reserved(0x9).is_error());

        assert_eq!(InfoCode::Reserved(0xF).canonical(), InfoCode::Request);
        assert_eq!(InfoCode::Reserved(0x14).canonical(), InfoCode::BusErrorOnRead);
        assert!(!InfoCode::Reserved(0x4).is_canonical());
        assert!(InfoCode::Reserved(0x9).is_canonical());
        assert!(InfoCode::BadHeader.is_canonical());
    }

    #[test]
    fn test_kind_classification() {
        assert!(TransactionKind::NonIncrementingRead.is_read());
        assert!(TransactionKind::ConfigSpaceWrite.is_write());
        assert!(TransactionKind::ReadModifyWriteSum.is_read_modify_write());
        assert!(!TransactionKind::ReadModifyWriteBits.is_write());
        for (type_id, kind) in TransactionKind::ALL.iter().enumerate() {
            assert_eq!(kind.type_id() as usize, type_id);
        }
    }
}
