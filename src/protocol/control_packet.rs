//! Control packet: a packet header followed by one or more transactions.
//!
//! ```text
//! ┌───────────────┬───────────────┬───────────────┬─────┐
//! │ Packet header │ Transaction 0 │ Transaction 1 │ ... │
//! │ 1 word        │ 1..=256 words │               │     │
//! └───────────────┴───────────────┴───────────────┴─────┘
//! ```
//!
//! A control packet never exceeds the path MTU, 1472 bytes (368 words).
//! Longer block transfers must be split by the caller.

use bytes::{BufMut, Bytes, BytesMut};

use super::transaction::Transaction;
use super::wire_format::{
    byte_order, detect_wire_order, read_word, PacketHeader, PacketType, WordReader, HEADER_SIZE,
    MAX_PACKET_BYTES, MAX_PACKET_WORDS, WORD_SIZE,
};
use crate::error::{IpbusError, Result};

/// Default transaction capacity: every word after the header a transaction.
pub const DEFAULT_CAPACITY: usize = MAX_PACKET_WORDS - 1;

/// A packet header plus its ordered transactions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlPacket {
    /// Packet header (type control).
    pub header: PacketHeader,
    transactions: Vec<Transaction>,
    capacity: usize,
    max_bytes: usize,
}

impl ControlPacket {
    /// Empty packet with the default capacity and MTU bound.
    pub fn new(header: PacketHeader) -> Self {
        Self::with_capacity(header, DEFAULT_CAPACITY)
    }

    /// Empty packet holding at most `capacity` transactions.
    pub fn with_capacity(header: PacketHeader, capacity: usize) -> Self {
        Self {
            header,
            transactions: Vec::with_capacity(capacity.min(DEFAULT_CAPACITY)),
            capacity,
            max_bytes: MAX_PACKET_BYTES,
        }
    }

    /// Lower the size bound below the MTU (values above it are clamped).
    pub fn with_max_bytes(mut self, max_bytes: usize) -> Self {
        self.max_bytes = max_bytes.min(MAX_PACKET_BYTES);
        self
    }

    /// Append a transaction.
    ///
    /// Fails with `TooManyTransactions` when the packet is full and with
    /// `PacketTooLarge` when the transaction would not fit the size bound.
    /// The packet is unchanged on failure.
    pub fn push(&mut self, tx: Transaction) -> Result<()> {
        if self.transactions.len() >= self.capacity {
            return Err(IpbusError::TooManyTransactions {
                capacity: self.capacity,
            });
        }
        let size = self.encoded_len() + tx.encoded_len();
        if size > self.max_bytes {
            return Err(IpbusError::PacketTooLarge {
                size,
                max: self.max_bytes,
            });
        }
        self.transactions.push(tx);
        Ok(())
    }

    /// Transactions in packet order.
    #[inline]
    pub fn transactions(&self) -> &[Transaction] {
        &self.transactions
    }

    /// Take ownership of the transactions.
    pub fn into_transactions(self) -> Vec<Transaction> {
        self.transactions
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.transactions.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.transactions.is_empty()
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Packet ID from the header.
    #[inline]
    pub fn packet_id(&self) -> u16 {
        self.header.packet_id
    }

    /// Encoded size in bytes.
    pub fn encoded_len(&self) -> usize {
        HEADER_SIZE
            + self
                .transactions
                .iter()
                .map(Transaction::encoded_len)
                .sum::<usize>()
    }

    fn check(&self) -> Result<usize> {
        if self.header.packet_type != PacketType::Control {
            return Err(IpbusError::UnexpectedPacketType {
                expected: PacketType::Control as u8,
                found: self.header.packet_type as u8,
            });
        }
        if self.header.byte_order != byte_order::BIG_ENDIAN {
            return Err(IpbusError::Protocol(format!(
                "Invalid byte-order marker {:#x} in control packet header",
                self.header.byte_order
            )));
        }
        for tx in &self.transactions {
            tx.validate()?;
        }
        let size = self.encoded_len();
        if size > self.max_bytes {
            tracing::warn!("Rejecting control packet of {} bytes", size);
            return Err(IpbusError::PacketTooLarge {
                size,
                max: self.max_bytes,
            });
        }
        Ok(size)
    }

    /// Encode to a new buffer (Big Endian).
    pub fn encode(&self) -> Result<Bytes> {
        let size = self.check()?;
        let mut buf = BytesMut::with_capacity(size);
        self.put(&mut buf);
        Ok(buf.freeze())
    }

    /// Encode into `buf`, returning the number of bytes written.
    ///
    /// Size and destination are checked before any byte is written.
    pub fn encode_into(&self, buf: &mut [u8]) -> Result<usize> {
        let size = self.check()?;
        if buf.len() < size {
            return Err(IpbusError::BufferTooSmall {
                needed: size,
                available: buf.len(),
            });
        }
        let mut dst = &mut buf[..size];
        self.put(&mut dst);
        Ok(size)
    }

    fn put<B: BufMut>(&self, buf: &mut B) {
        buf.put_slice(&self.header.encode());
        for tx in &self.transactions {
            tx.put(buf);
        }
    }

    /// Decode a complete control packet.
    ///
    /// Packets from a little-endian sender are accepted and every word is
    /// swapped before decoding.
    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() > MAX_PACKET_BYTES {
            return Err(IpbusError::PacketTooLarge {
                size: buf.len(),
                max: MAX_PACKET_BYTES,
            });
        }
        if buf.len() % WORD_SIZE != 0 {
            return Err(IpbusError::Protocol(format!(
                "Packet length {} is not a whole number of words",
                buf.len()
            )));
        }

        let first = read_word(buf, 0)?;
        let Some(order) = detect_wire_order(first) else {
            // Not a recognizable header in either order; report why.
            PacketHeader::from_word(first)?;
            return Err(IpbusError::Protocol(format!(
                "Invalid byte-order marker in packet header {:#010x}",
                first
            )));
        };

        let mut reader = WordReader::new(buf, order);
        let header = PacketHeader::from_word(reader.next_word()?)?;
        if header.packet_type != PacketType::Control {
            return Err(IpbusError::UnexpectedPacketType {
                expected: PacketType::Control as u8,
                found: header.packet_type as u8,
            });
        }

        let mut transactions = Vec::new();
        while reader.remaining() > 0 {
            transactions.push(Transaction::read_from(&mut reader)?);
        }

        tracing::debug!(
            "Decoded control packet {:#06x}: {} transactions ({:?})",
            header.packet_id,
            transactions.len(),
            order
        );

        Ok(Self {
            header,
            capacity: transactions.len().max(DEFAULT_CAPACITY),
            transactions,
            max_bytes: MAX_PACKET_BYTES,
        })
    }
}

/// Build a control packet as a single buffer.
///
/// # Example
///
/// ```
/// use ipbus_client::protocol::{build_control_packet, PacketHeader, PacketType, Transaction};
///
/// let header = PacketHeader::new(2, PacketType::Control);
/// let bytes = build_control_packet(header, vec![Transaction::read(0xEFB, 0x0A).with_id(1)]).unwrap();
/// assert_eq!(bytes.len(), 12);
/// ```
pub fn build_control_packet(header: PacketHeader, transactions: Vec<Transaction>) -> Result<Bytes> {
    let mut packet = ControlPacket::new(header);
    for tx in transactions {
        packet.push(tx)?;
    }
    packet.encode()
}
