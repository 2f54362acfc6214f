//! Transaction value type and its encode/decode.
//!
//! A transaction is one header word followed by a direction-dependent body:
//! ```text
//! Request:   [ header ][ base address ][ payload words ... ]
//! Response:  [ header ][ payload words ... ]
//! ```
//! The body length is derived from the kind, the info code and the word
//! count, see [`body_words`].
//!
//! # Example
//!
//! ```
//! use ipbus_client::protocol::{Transaction, TransactionKind};
//!
//! let tx = Transaction::read(0xEFB, 0x0A).with_id(1);
//! let bytes = tx.encode().unwrap();
//! assert_eq!(&bytes[..], &[0x20, 0x01, 0x0A, 0x0F, 0x00, 0x00, 0x0E, 0xFB]);
//!
//! let decoded = Transaction::decode(&bytes).unwrap();
//! assert_eq!(decoded.kind, TransactionKind::Read);
//! assert_eq!(decoded.base_address, Some(0xEFB));
//! ```

use bytes::{BufMut, Bytes, BytesMut};

use super::wire_format::{
    InfoCode, TransactionHeader, TransactionKind, WireOrder, WordReader, MAX_TRANSACTION_ID,
    WORD_SIZE,
};
use crate::error::{IpbusError, Result};

/// Number of words following the transaction header on the wire.
///
/// Includes the base address for requests. Error responses carry no body.
pub fn body_words(kind: TransactionKind, info: InfoCode, word_count: u8) -> usize {
    let words = word_count as usize;
    if info.is_request() {
        let payload = match kind {
            k if k.is_write() => words,
            TransactionKind::ReadModifyWriteBits => 2,
            TransactionKind::ReadModifyWriteSum => 1,
            _ => 0,
        };
        1 + payload
    } else if info.is_success() {
        match kind {
            k if k.is_read() => words,
            k if k.is_read_modify_write() => 1,
            _ => 0,
        }
    } else {
        0
    }
}

/// One IPbus transaction, request or response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    /// 12-bit transaction ID.
    pub id: u16,
    /// Transaction type.
    pub kind: TransactionKind,
    /// Info code ([`InfoCode::Request`] for requests).
    pub info: InfoCode,
    /// Words field of the header.
    pub word_count: u8,
    /// Target address, present exactly for requests.
    pub base_address: Option<u32>,
    /// Words after the address (requests) or header (responses).
    pub payload: Vec<u32>,
}

impl Transaction {
    fn request(kind: TransactionKind, address: u32, word_count: u8, payload: Vec<u32>) -> Self {
        Self {
            id: 0,
            kind,
            info: InfoCode::Request,
            word_count,
            base_address: Some(address),
            payload,
        }
    }

    fn block_write(kind: TransactionKind, address: u32, data: &[u32]) -> Result<Self> {
        let word_count =
            u8::try_from(data.len()).map_err(|_| IpbusError::WordCountOverflow(data.len()))?;
        Ok(Self::request(kind, address, word_count, data.to_vec()))
    }

    /// Incrementing read of `size` words starting at `address`.
    pub fn read(address: u32, size: u8) -> Self {
        Self::request(TransactionKind::Read, address, size, Vec::new())
    }

    /// `size` reads from the single FIFO address `address`.
    pub fn non_incrementing_read(address: u32, size: u8) -> Self {
        Self::request(TransactionKind::NonIncrementingRead, address, size, Vec::new())
    }

    /// Read of `size` words from configuration space.
    pub fn config_space_read(address: u32, size: u8) -> Self {
        Self::request(TransactionKind::ConfigSpaceRead, address, size, Vec::new())
    }

    /// Incrementing write of `data` starting at `address`.
    ///
    /// Fails with `WordCountOverflow` for more than 255 words.
    pub fn write(address: u32, data: &[u32]) -> Result<Self> {
        Self::block_write(TransactionKind::Write, address, data)
    }

    /// Write every word of `data` to the FIFO address `address`.
    pub fn non_incrementing_write(address: u32, data: &[u32]) -> Result<Self> {
        Self::block_write(TransactionKind::NonIncrementingWrite, address, data)
    }

    /// Write `data` to configuration space.
    pub fn config_space_write(address: u32, data: &[u32]) -> Result<Self> {
        Self::block_write(TransactionKind::ConfigSpaceWrite, address, data)
    }

    /// `X <= (X & and_term) | or_term` on one register.
    pub fn rmw_bits(address: u32, and_term: u32, or_term: u32) -> Self {
        Self::request(
            TransactionKind::ReadModifyWriteBits,
            address,
            1,
            vec![and_term, or_term],
        )
    }

    /// `X <= X + addend` on one register.
    pub fn rmw_sum(address: u32, addend: u32) -> Self {
        Self::request(TransactionKind::ReadModifyWriteSum, address, 1, vec![addend])
    }

    /// Target-side response. `payload` must match [`body_words`].
    pub fn response(
        id: u16,
        kind: TransactionKind,
        info: InfoCode,
        word_count: u8,
        payload: Vec<u32>,
    ) -> Self {
        Self {
            id,
            kind,
            info,
            word_count,
            base_address: None,
            payload,
        }
    }

    /// Set the transaction ID.
    pub fn with_id(mut self, id: u16) -> Self {
        self.id = id;
        self
    }

    /// Header word for this transaction.
    pub fn header(&self) -> TransactionHeader {
        TransactionHeader::new(self.id, self.word_count, self.kind, self.info)
    }

    /// Client-to-target (info code 0xF).
    #[inline]
    pub fn is_request(&self) -> bool {
        self.info.is_request()
    }

    /// Target-to-client, success or error.
    #[inline]
    pub fn is_response(&self) -> bool {
        !self.info.is_request()
    }

    /// Response carrying an error info code.
    #[inline]
    pub fn is_error(&self) -> bool {
        self.info.is_error()
    }

    /// Payload words (read data, write data or RMW operands).
    #[inline]
    pub fn data(&self) -> &[u32] {
        &self.payload
    }

    /// Encoded size in bytes.
    pub fn encoded_len(&self) -> usize {
        (1 + body_words(self.kind, self.info, self.word_count)) * WORD_SIZE
    }

    /// Check that address and payload agree with the header fields.
    pub fn validate(&self) -> Result<()> {
        if self.id > MAX_TRANSACTION_ID {
            return Err(IpbusError::CounterExhaustion {
                value: self.id as u32,
                max: MAX_TRANSACTION_ID as u32,
            });
        }
        if !self.info.is_canonical() {
            return Err(IpbusError::Protocol(format!(
                "Transaction {:#05x}: info code {:?} does not match its wire value {:#x}",
                self.id,
                self.info,
                self.info.nibble()
            )));
        }
        if self.base_address.is_some() != self.is_request() {
            return Err(IpbusError::Protocol(format!(
                "Transaction {:#05x}: base address must be present exactly for requests",
                self.id
            )));
        }
        let expected = body_words(self.kind, self.info, self.word_count)
            - usize::from(self.base_address.is_some());
        if self.payload.len() != expected {
            return Err(IpbusError::Protocol(format!(
                "Transaction {:#05x} ({:?}): payload has {} words, header implies {}",
                self.id,
                self.kind,
                self.payload.len(),
                expected
            )));
        }
        Ok(())
    }

    /// Encode to a new buffer (Big Endian).
    pub fn encode(&self) -> Result<Bytes> {
        self.validate()?;
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        self.put(&mut buf);
        Ok(buf.freeze())
    }

    /// Encode into `buf`, returning the number of bytes written.
    ///
    /// Nothing is written if `buf` is too small.
    pub fn encode_into(&self, buf: &mut [u8]) -> Result<usize> {
        self.validate()?;
        let needed = self.encoded_len();
        if buf.len() < needed {
            return Err(IpbusError::BufferTooSmall {
                needed,
                available: buf.len(),
            });
        }
        let mut dst = &mut buf[..needed];
        self.put(&mut dst);
        Ok(needed)
    }

    pub(crate) fn put<B: BufMut>(&self, buf: &mut B) {
        buf.put_u32(self.header().to_word());
        if let Some(address) = self.base_address {
            buf.put_u32(address);
        }
        for word in &self.payload {
            buf.put_u32(*word);
        }
    }

    /// Decode exactly one transaction occupying all of `buf`.
    pub fn decode(buf: &[u8]) -> Result<Self> {
        let (tx, consumed) = Self::decode_prefix(buf)?;
        if consumed != buf.len() {
            return Err(IpbusError::Protocol(format!(
                "{} trailing bytes after transaction",
                buf.len() - consumed
            )));
        }
        Ok(tx)
    }

    /// Decode one transaction from the start of `buf`.
    ///
    /// Returns the transaction and the number of bytes consumed.
    pub fn decode_prefix(buf: &[u8]) -> Result<(Self, usize)> {
        let mut reader = WordReader::new(buf, WireOrder::BigEndian);
        let tx = Self::read_from(&mut reader)?;
        Ok((tx, reader.position()))
    }

    pub(crate) fn read_from(reader: &mut WordReader<'_>) -> Result<Self> {
        reader.require(1)?;
        let header = TransactionHeader::from_word(reader.next_word()?)?;
        let body = body_words(header.kind, header.info, header.word_count);
        reader.require(body)?;
        let words = (0..body)
            .map(|_| reader.next_word())
            .collect::<Result<Vec<_>>>()?;
        Ok(Self::from_parts(header, words))
    }

    // `body` holds exactly `body_words(..)` words in host order.
    pub(crate) fn from_parts(header: TransactionHeader, mut body: Vec<u32>) -> Self {
        let base_address = if header.info.is_request() && !body.is_empty() {
            Some(body.remove(0))
        } else {
            None
        };
        Self {
            id: header.transaction_id,
            kind: header.kind,
            info: header.info,
            word_count: header.word_count,
            base_address,
            payload: body,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_requests() -> Vec<Transaction> {
        vec![
            Transaction::read(0x1000, 4),
            Transaction::non_incrementing_read(0x2000, 255),
            Transaction::config_space_read(0x0, 2),
            Transaction::write(0x3000, &[1, 2, 3]).unwrap(),
            Transaction::non_incrementing_write(0x4000, &[0xDEAD_BEEF]).unwrap(),
            Transaction::config_space_write(0x5, &[7, 8]).unwrap(),
            Transaction::rmw_bits(0x6000, 0xFFFF_0000, 0x0000_00FF),
            Transaction::rmw_sum(0x7000, 5),
        ]
    }

    #[test]
    fn test_body_words_requests() {
        use TransactionKind::*;
        assert_eq!(body_words(Read, InfoCode::Request, 10), 1);
        assert_eq!(body_words(NonIncrementingRead, InfoCode::Request, 10), 1);
        assert_eq!(body_words(ConfigSpaceRead, InfoCode::Request, 10), 1);
        assert_eq!(body_words(Write, InfoCode::Request, 8), 9);
        assert_eq!(body_words(ConfigSpaceWrite, InfoCode::Request, 0), 1);
        assert_eq!(body_words(ReadModifyWriteBits, InfoCode::Request, 1), 3);
        assert_eq!(body_words(ReadModifyWriteSum, InfoCode::Request, 1), 2);
    }

    #[test]
    fn test_body_words_responses() {
        use TransactionKind::*;
        assert_eq!(body_words(Read, InfoCode::Success, 10), 10);
        assert_eq!(body_words(Write, InfoCode::Success, 8), 0);
        assert_eq!(body_words(ReadModifyWriteBits, InfoCode::Success, 1), 1);
        assert_eq!(body_words(ReadModifyWriteSum, InfoCode::Success, 1), 1);
        assert_eq!(body_words(Read, InfoCode::BusErrorOnRead, 10), 0);
        assert_eq!(body_words(Read, InfoCode::Reserved(0x9), 10), 0);
    }

    #[test]
    fn test_read_request_bytes() {
        let tx = Transaction::read(0xEFB, 0x0A).with_id(1);
        assert_eq!(tx.encoded_len(), 8);
        assert_eq!(
            &tx.encode().unwrap()[..],
            &[0x20, 0x01, 0x0A, 0x0F, 0x00, 0x00, 0x0E, 0xFB]
        );
    }

    #[test]
    fn test_write_request_layout() {
        let data: Vec<u32> = (1..=8).collect();
        let tx = Transaction::write(0x10, &data).unwrap().with_id(3);
        assert_eq!(tx.word_count, 8);

        let bytes = tx.encode().unwrap();
        assert_eq!(bytes.len(), 40);
        assert_eq!(&bytes[..4], &[0x20, 0x03, 0x08, 0x1F]);
        assert_eq!(&bytes[4..8], &[0, 0, 0, 0x10]);
        assert_eq!(&bytes[36..], &[0, 0, 0, 8]);
    }

    #[test]
    fn test_write_word_count_overflow() {
        let data = vec![0u32; 256];
        assert!(matches!(
            Transaction::write(0, &data),
            Err(IpbusError::WordCountOverflow(256))
        ));
        assert!(Transaction::write(0, &data[..255]).is_ok());
    }

    #[test]
    fn test_rmw_bits_word_count() {
        let tx = Transaction::rmw_bits(0x20, 0xF0F0_F0F0, 0x0101_0101);
        assert_eq!(tx.word_count, 1);
        assert_eq!(tx.payload, vec![0xF0F0_F0F0, 0x0101_0101]);
        assert_eq!(tx.encoded_len(), 16);
    }

    #[test]
    fn test_request_roundtrip_all_kinds() {
        for (i, tx) in sample_requests().into_iter().enumerate() {
            let tx = tx.with_id(i as u16 * 0x111);
            let bytes = tx.encode().unwrap();
            assert_eq!(bytes.len(), tx.encoded_len());
            let decoded = Transaction::decode(&bytes).unwrap();
            assert_eq!(decoded, tx);
        }
    }

    #[test]
    fn test_response_roundtrip_all_kinds() {
        for kind in TransactionKind::ALL {
            let word_count = 3;
            let payload_len = body_words(kind, InfoCode::Success, word_count);
            let payload: Vec<u32> = (0..payload_len as u32).map(|w| w * 0x0101).collect();
            let tx = Transaction::response(0xABC, kind, InfoCode::Success, word_count, payload);

            let decoded = Transaction::decode(&tx.encode().unwrap()).unwrap();
            assert_eq!(decoded, tx);
            assert_eq!(decoded.base_address, None);
            assert!(decoded.is_response());
        }
    }

    #[test]
    fn test_error_response_has_no_body() {
        let tx = Transaction::response(
            7,
            TransactionKind::Read,
            InfoCode::BusTimeoutOnRead,
            4,
            vec![],
        );
        let bytes = tx.encode().unwrap();
        assert_eq!(bytes.len(), 4);

        let decoded = Transaction::decode(&bytes).unwrap();
        assert!(decoded.is_error());
        assert_eq!(decoded.word_count, 4);
        assert!(decoded.payload.is_empty());
    }

    #[test]
    fn test_decode_truncated() {
        let tx = Transaction::write(0x10, &[1, 2, 3]).unwrap();
        let bytes = tx.encode().unwrap();

        let result = Transaction::decode(&bytes[..12]);
        assert!(matches!(
            result,
            Err(IpbusError::Truncated {
                needed: 20,
                available: 12
            })
        ));

        let result = Transaction::decode(&bytes[..2]);
        assert!(matches!(result, Err(IpbusError::Truncated { needed: 4, .. })));
    }

    #[test]
    fn test_decode_trailing_bytes() {
        let mut bytes = Transaction::read(0, 1).encode().unwrap().to_vec();
        bytes.extend_from_slice(&[0, 0, 0, 0]);
        let result = Transaction::decode(&bytes);
        assert!(result.unwrap_err().to_string().contains("trailing"));
    }

    #[test]
    fn test_decode_prefix_consumed() {
        let mut bytes = Transaction::rmw_sum(0x40, 9).encode().unwrap().to_vec();
        bytes.extend_from_slice(&Transaction::read(0, 1).encode().unwrap());

        let (tx, consumed) = Transaction::decode_prefix(&bytes).unwrap();
        assert_eq!(consumed, 12);
        assert_eq!(tx.payload, vec![9]);
    }

    #[test]
    fn test_decode_bad_type() {
        let result = Transaction::decode(&[0x20, 0x00, 0x01, 0x8F, 0, 0, 0, 0]);
        assert!(matches!(
            result,
            Err(IpbusError::UnsupportedTransactionType(0x8))
        ));
    }

    #[test]
    fn test_encode_into_buffer_too_small() {
        let tx = Transaction::write(0, &[1, 2]).unwrap();
        let mut buf = [0xAAu8; 8];
        let result = tx.encode_into(&mut buf);
        assert!(matches!(
            result,
            Err(IpbusError::BufferTooSmall {
                needed: 16,
                available: 8
            })
        ));
        assert_eq!(buf, [0xAA; 8]);
    }

    #[test]
    fn test_encode_into_exact() {
        let tx = Transaction::rmw_sum(0x40, 9).with_id(2);
        let mut buf = [0u8; 16];
        let written = tx.encode_into(&mut buf).unwrap();
        assert_eq!(written, 12);
        assert_eq!(&buf[..12], &tx.encode().unwrap()[..]);
        assert_eq!(&buf[12..], &[0; 4]);
    }

    #[test]
    fn test_encode_rejects_id_beyond_12_bits() {
        let tx = Transaction::read(0x10, 1).with_id(0x1ABC);
        assert!(matches!(
            tx.encode(),
            Err(IpbusError::CounterExhaustion {
                value: 0x1ABC,
                max: 0xFFF
            })
        ));
        let mut buf = [0u8; 16];
        assert!(tx.encode_into(&mut buf).is_err());

        let tx = tx.with_id(MAX_TRANSACTION_ID);
        assert_eq!(Transaction::decode(&tx.encode().unwrap()).unwrap(), tx);
    }

    #[test]
    fn test_encode_rejects_non_canonical_info_code() {
        let mut tx = Transaction::read(0x10, 1);
        tx.info = InfoCode::Reserved(0xF);
        assert!(matches!(tx.encode(), Err(IpbusError::Protocol(_))));

        let tx = Transaction::response(1, TransactionKind::Read, InfoCode::Reserved(0x0), 2, vec![]);
        assert!(matches!(tx.encode(), Err(IpbusError::Protocol(_))));

        let tx = Transaction::response(1, TransactionKind::Read, InfoCode::Reserved(0x9), 2, vec![]);
        let decoded = Transaction::decode(&tx.encode().unwrap()).unwrap();
        assert_eq!(decoded, tx);
    }

    #[test]
    fn test_encode_rejects_inconsistent_payload() {
        let mut tx = Transaction::read(0, 2);
        tx.payload.push(1);
        assert!(matches!(tx.encode(), Err(IpbusError::Protocol(_))));

        let mut tx = Transaction::read(0, 2);
        tx.base_address = None;
        assert!(matches!(tx.encode(), Err(IpbusError::Protocol(_))));
    }
}
