//! Stream buffer for reassembling IPbus traffic from a byte stream.
//!
//! Stream transports (TCP, serial) deliver packets without datagram
//! boundaries. The buffer accumulates bytes in a `bytes::BytesMut` and runs
//! a state machine:
//! - `WaitingForHeader`: need one word, either a packet header or a
//!   transaction header
//! - `WaitingForBody`: transaction header parsed, need N more words
//!
//! A packet header is recognized by its byte-order marker and fixes the
//! byte order for the transactions that follow it.
//!
//! # Example
//!
//! ```
//! use ipbus_client::protocol::{build_control_packet, PacketHeader, PacketType};
//! use ipbus_client::protocol::{StreamBuffer, StreamItem, Transaction};
//!
//! let bytes = build_control_packet(
//!     PacketHeader::new(1, PacketType::Control),
//!     vec![Transaction::read(0x10, 2)],
//! )
//! .unwrap();
//!
//! let mut buffer = StreamBuffer::new();
//! assert!(buffer.push(&bytes[..6]).unwrap().len() == 1);
//! let items = buffer.push(&bytes[6..]).unwrap();
//! assert!(matches!(items[0], StreamItem::Transaction(_)));
//! ```

use bytes::{Buf, BytesMut};

use super::transaction::{body_words, Transaction};
use super::wire_format::{
    detect_wire_order, read_word, PacketHeader, TransactionHeader, WireOrder, WORD_SIZE,
    MAX_PACKET_BYTES,
};
use crate::error::{IpbusError, Result};

/// One complete unit extracted from the stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamItem {
    /// Start of a packet.
    Packet(PacketHeader),
    /// A transaction belonging to the most recent packet.
    Transaction(Transaction),
}

#[derive(Debug, Clone)]
enum State {
    /// Waiting for a complete header word.
    WaitingForHeader,
    /// Transaction header parsed, waiting for its body words.
    WaitingForBody {
        header: TransactionHeader,
        words: usize,
    },
}

/// Buffer for accumulating stream bytes and extracting packets and transactions.
///
/// After an error the stream position is unknown; call [`clear`] before
/// pushing more data.
///
/// [`clear`]: StreamBuffer::clear
pub struct StreamBuffer {
    buffer: BytesMut,
    state: State,
    order: Option<WireOrder>,
    max_buffered: usize,
}

impl StreamBuffer {
    /// Create a buffer bounded by the packet MTU.
    pub fn new() -> Self {
        Self::with_max_buffered(MAX_PACKET_BYTES)
    }

    /// Create a buffer that holds at most `max_buffered` incomplete bytes.
    pub fn with_max_buffered(max_buffered: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(MAX_PACKET_BYTES),
            state: State::WaitingForHeader,
            order: None,
            max_buffered,
        }
    }

    /// Push data into the buffer and extract all complete items.
    ///
    /// Partial words and transactions stay buffered for the next push.
    ///
    /// # Errors
    ///
    /// Malformed headers, a transaction before any packet header, or more
    /// than `max_buffered` bytes waiting for one item.
    pub fn push(&mut self, data: &[u8]) -> Result<Vec<StreamItem>> {
        self.buffer.extend_from_slice(data);

        let mut items = Vec::new();
        while let Some(item) = self.try_extract_one()? {
            items.push(item);
        }

        if self.buffer.len() > self.max_buffered {
            tracing::warn!("Stream buffer holds {} incomplete bytes", self.buffer.len());
            return Err(IpbusError::PacketTooLarge {
                size: self.buffer.len(),
                max: self.max_buffered,
            });
        }

        if !items.is_empty() {
            tracing::debug!("Stream buffer extracted {} items", items.len());
        }
        Ok(items)
    }

    fn try_extract_one(&mut self) -> Result<Option<StreamItem>> {
        match &self.state {
            State::WaitingForHeader => {
                if self.buffer.len() < WORD_SIZE {
                    return Ok(None);
                }
                let word = read_word(&self.buffer, 0)?;

                if let Some(order) = detect_wire_order(word) {
                    let header = PacketHeader::from_word(order.normalize(word))?;
                    self.buffer.advance(WORD_SIZE);
                    self.order = Some(order);
                    return Ok(Some(StreamItem::Packet(header)));
                }

                let order = self.order.ok_or_else(|| {
                    IpbusError::Protocol(format!(
                        "Transaction header {:#010x} before any packet header",
                        word
                    ))
                })?;
                let header = TransactionHeader::from_word(order.normalize(word))?;
                let words = body_words(header.kind, header.info, header.word_count);

                let needed = words * WORD_SIZE;
                if needed > self.max_buffered {
                    return Err(IpbusError::PacketTooLarge {
                        size: needed,
                        max: self.max_buffered,
                    });
                }

                self.buffer.advance(WORD_SIZE);
                self.state = State::WaitingForBody { header, words };
                self.try_extract_one()
            }

            State::WaitingForBody { header, words } => {
                let (header, words) = (*header, *words);
                if self.buffer.len() < words * WORD_SIZE {
                    return Ok(None);
                }

                let order = self.order.unwrap_or(WireOrder::BigEndian);
                let body = (0..words)
                    .map(|_| order.normalize(self.buffer.get_u32()))
                    .collect();

                self.state = State::WaitingForHeader;
                Ok(Some(StreamItem::Transaction(Transaction::from_parts(
                    header, body,
                ))))
            }
        }
    }

    /// Byte order set by the last packet header, if any.
    pub fn wire_order(&self) -> Option<WireOrder> {
        self.order
    }

    /// Get the number of buffered bytes.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Check if the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Clear the buffer and reset state.
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.state = State::WaitingForHeader;
        self.order = None;
    }

    #[cfg(test)]
    fn state_name(&self) -> &'static str {
        match &self.state {
            State::WaitingForHeader => "WaitingForHeader",
            State::WaitingForBody { .. } => "WaitingForBody",
        }
    }
}

impl Default for StreamBuffer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{build_control_packet, InfoCode, PacketType, TransactionKind};

    fn packet_bytes(id: u16, transactions: Vec<Transaction>) -> Vec<u8> {
        build_control_packet(PacketHeader::new(id, PacketType::Control), transactions)
            .unwrap()
            .to_vec()
    }

    #[test]
    fn test_single_complete_packet() {
        let mut buffer = StreamBuffer::new();
        let bytes = packet_bytes(3, vec![Transaction::write(0x10, &[1, 2]).unwrap().with_id(5)]);

        let items = buffer.push(&bytes).unwrap();

        assert_eq!(items.len(), 2);
        assert!(matches!(items[0], StreamItem::Packet(h) if h.packet_id == 3));
        match &items[1] {
            StreamItem::Transaction(tx) => {
                assert_eq!(tx.id, 5);
                assert_eq!(tx.base_address, Some(0x10));
                assert_eq!(tx.payload, vec![1, 2]);
            }
            other => panic!("unexpected item {:?}", other),
        }
        assert!(buffer.is_empty());
        assert_eq!(buffer.wire_order(), Some(WireOrder::BigEndian));
    }

    #[test]
    fn test_multiple_packets_in_one_push() {
        let mut buffer = StreamBuffer::new();
        let mut combined = packet_bytes(1, vec![Transaction::read(0, 1)]);
        combined.extend(packet_bytes(2, vec![Transaction::rmw_sum(4, 1), Transaction::read(8, 2)]));

        let items = buffer.push(&combined).unwrap();

        assert_eq!(items.len(), 5);
        assert!(matches!(items[2], StreamItem::Packet(h) if h.packet_id == 2));
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_fragmented_header_word() {
        let mut buffer = StreamBuffer::new();
        let bytes = packet_bytes(1, vec![Transaction::read(0, 1)]);

        assert!(buffer.push(&bytes[..2]).unwrap().is_empty());
        assert_eq!(buffer.state_name(), "WaitingForHeader");

        let items = buffer.push(&bytes[2..]).unwrap();
        assert_eq!(items.len(), 2);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_fragmented_body() {
        let mut buffer = StreamBuffer::new();
        let data: Vec<u32> = (0..50).collect();
        let bytes = packet_bytes(1, vec![Transaction::write(0x100, &data).unwrap()]);

        let items = buffer.push(&bytes[..30]).unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(buffer.state_name(), "WaitingForBody");

        // Byte at a time
        let mut items = Vec::new();
        for b in &bytes[30..] {
            items.extend(buffer.push(&[*b]).unwrap());
        }
        assert_eq!(items.len(), 1);
        match &items[0] {
            StreamItem::Transaction(tx) => assert_eq!(tx.payload, data),
            other => panic!("unexpected item {:?}", other),
        }
        assert_eq!(buffer.state_name(), "WaitingForHeader");
    }

    #[test]
    fn test_response_without_body() {
        let mut buffer = StreamBuffer::new();
        let mut bytes = PacketHeader::new(1, PacketType::Control).encode().to_vec();
        let response =
            Transaction::response(1, TransactionKind::Write, InfoCode::Success, 4, vec![]);
        bytes.extend_from_slice(&response.encode().unwrap());

        let items = buffer.push(&bytes).unwrap();
        assert_eq!(items[1], StreamItem::Transaction(response));
    }

    #[test]
    fn test_byte_swapped_stream() {
        let mut buffer = StreamBuffer::new();
        let tx = Transaction::write(0xABCD, &[0x1122_3344]).unwrap().with_id(7);
        let bytes = packet_bytes(9, vec![tx.clone()]);
        let swapped: Vec<u8> = bytes
            .chunks(4)
            .flat_map(|w| [w[3], w[2], w[1], w[0]])
            .collect();

        let items = buffer.push(&swapped).unwrap();
        assert_eq!(buffer.wire_order(), Some(WireOrder::LittleEndian));
        assert!(matches!(items[0], StreamItem::Packet(h) if h.packet_id == 9));
        assert_eq!(items[1], StreamItem::Transaction(tx));
    }

    #[test]
    fn test_transaction_before_packet_header() {
        let mut buffer = StreamBuffer::new();
        let bytes = Transaction::read(0, 1).encode().unwrap();
        let result = buffer.push(&bytes);
        assert!(result.unwrap_err().to_string().contains("before any packet header"));
    }

    #[test]
    fn test_max_buffered_validation() {
        let mut buffer = StreamBuffer::with_max_buffered(64);
        let bytes = packet_bytes(1, vec![Transaction::write(0, &[0u32; 100]).unwrap()]);

        let result = buffer.push(&bytes[..8]);
        assert!(matches!(
            result,
            Err(IpbusError::PacketTooLarge { size: 404, max: 64 })
        ));
    }

    #[test]
    fn test_clear_resets_state() {
        let mut buffer = StreamBuffer::new();
        let bytes = packet_bytes(1, vec![Transaction::write(0, &[1, 2, 3]).unwrap()]);

        buffer.push(&bytes[..10]).unwrap();
        assert_eq!(buffer.state_name(), "WaitingForBody");
        assert_eq!(buffer.len(), 2);

        buffer.clear();

        assert_eq!(buffer.state_name(), "WaitingForHeader");
        assert!(buffer.is_empty());
        assert_eq!(buffer.wire_order(), None);
    }
}
