//! Per-target session: sequence state plus the request/response boundary.
//!
//! The [`SessionBuilder`] provides a fluent API for configuring a
//! [`Session`]. A session owns the packet-ID and transaction-ID counters of
//! one target and hands encoded packets to the transport collaborator:
//! 1. Build a request (`build_*_request` or `build_packet`)
//! 2. Transport sends it and receives the reply
//! 3. Decode the reply (`decode_response` / `decode_response_packet`)
//!
//! # Example
//!
//! ```
//! use ipbus_client::Session;
//!
//! let session = Session::builder()
//!     .target("192.168.0.10:50001")
//!     .initial_packet_id(2)
//!     .initial_transaction_id(1)
//!     .build()
//!     .unwrap();
//!
//! let request = session.build_read_request(0xEFB, 0x0A).unwrap();
//! assert_eq!(
//!     &request[..],
//!     &[0x20, 0x00, 0x02, 0xF0, 0x20, 0x01, 0x0A, 0x0F, 0x00, 0x00, 0x0E, 0xFB]
//! );
//! assert_eq!(session.packet_id(), 3);
//! ```

use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::{IpbusError, Result};
use crate::protocol::{
    byte_order, ControlPacket, PacketType, ResendRequest, StatusRequest, StatusResponse,
    Transaction, DEFAULT_CAPACITY, HEADER_SIZE, MAX_PACKET_BYTES, MAX_TRANSACTION_ID, WORD_SIZE,
};
use crate::sequence::SequenceCounters;

/// Smallest useful packet: header plus one 2-word transaction.
pub const MIN_PACKET_BYTES: usize = 3 * WORD_SIZE;

/// Session configuration, loadable from JSON.
///
/// Every field has a default, so a partial document is accepted:
///
/// ```
/// use ipbus_client::SessionConfig;
///
/// let config = SessionConfig::from_json(r#"{"target": "board-1", "max_packet_bytes": 1024}"#).unwrap();
/// assert_eq!(config.target, "board-1");
/// assert_eq!(config.max_packet_bytes, 1024);
/// assert_eq!(config.initial_packet_id, 0);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Free-form target label used in log output.
    pub target: String,
    /// First packet ID to use.
    pub initial_packet_id: u16,
    /// First transaction ID to use (at most 0xFFF).
    pub initial_transaction_id: u16,
    /// Size bound for built packets, in bytes.
    pub max_packet_bytes: usize,
    /// Maximum number of transactions per built packet.
    pub max_transactions: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            target: String::new(),
            initial_packet_id: 0,
            initial_transaction_id: 0,
            max_packet_bytes: MAX_PACKET_BYTES,
            max_transactions: DEFAULT_CAPACITY,
        }
    }
}

impl SessionConfig {
    /// Parse a JSON document.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Read and parse a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    /// Serialize to pretty-printed JSON.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Check bounds.
    pub fn validate(&self) -> Result<()> {
        if !(MIN_PACKET_BYTES..=MAX_PACKET_BYTES).contains(&self.max_packet_bytes)
            || self.max_packet_bytes % WORD_SIZE != 0
        {
            return Err(IpbusError::Protocol(format!(
                "max_packet_bytes must be a multiple of {} in [{}, {}], got {}",
                WORD_SIZE, MIN_PACKET_BYTES, MAX_PACKET_BYTES, self.max_packet_bytes
            )));
        }
        if self.initial_transaction_id > MAX_TRANSACTION_ID {
            return Err(IpbusError::CounterExhaustion {
                value: self.initial_transaction_id as u32,
                max: MAX_TRANSACTION_ID as u32,
            });
        }
        if self.max_transactions == 0 {
            return Err(IpbusError::Protocol(
                "max_transactions must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// Builder for configuring and creating a [`Session`].
#[derive(Debug, Clone, Default)]
pub struct SessionBuilder {
    config: SessionConfig,
}

impl SessionBuilder {
    /// Create a builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from a loaded configuration.
    pub fn config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the target label.
    pub fn target(mut self, target: impl Into<String>) -> Self {
        self.config.target = target.into();
        self
    }

    /// Set the first packet ID.
    ///
    /// Default: 0
    pub fn initial_packet_id(mut self, id: u16) -> Self {
        self.config.initial_packet_id = id;
        self
    }

    /// Set the first transaction ID.
    ///
    /// Default: 0
    pub fn initial_transaction_id(mut self, id: u16) -> Self {
        self.config.initial_transaction_id = id;
        self
    }

    /// Set the packet size bound.
    ///
    /// Default: 1472
    pub fn max_packet_bytes(mut self, bytes: usize) -> Self {
        self.config.max_packet_bytes = bytes;
        self
    }

    /// Set the maximum transactions per packet.
    ///
    /// Default: 367
    pub fn max_transactions(mut self, count: usize) -> Self {
        self.config.max_transactions = count;
        self
    }

    /// Validate the configuration and create the session.
    pub fn build(self) -> Result<Session> {
        Session::from_config(self.config)
    }
}

/// Codec state for one target.
///
/// All methods take `&self`; the counters sit behind a mutex so a session
/// can be shared across threads. Each build locks once, making
/// "read counter, build header, advance" atomic per target.
#[derive(Debug)]
pub struct Session {
    config: SessionConfig,
    counters: Mutex<SequenceCounters>,
}

impl Session {
    /// Session with default configuration.
    pub fn new() -> Self {
        Self {
            config: SessionConfig::default(),
            counters: Mutex::new(SequenceCounters::new()),
        }
    }

    /// Create a builder.
    pub fn builder() -> SessionBuilder {
        SessionBuilder::new()
    }

    /// Create a session from a configuration.
    pub fn from_config(config: SessionConfig) -> Result<Self> {
        config.validate()?;
        let counters = SequenceCounters::starting_at(
            config.initial_packet_id,
            config.initial_transaction_id,
        )?;
        Ok(Self {
            config,
            counters: Mutex::new(counters),
        })
    }

    /// Active configuration.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    fn counters(&self) -> MutexGuard<'_, SequenceCounters> {
        self.counters.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Build one control packet from `transactions`.
    ///
    /// Transaction IDs are assigned consecutively. Size and capacity are
    /// checked before any counter is consumed, so a failure skips no IDs.
    pub fn build_packet(&self, transactions: Vec<Transaction>) -> Result<Bytes> {
        if transactions.is_empty() {
            return Err(IpbusError::Protocol(
                "Control packet needs at least one transaction".into(),
            ));
        }
        if transactions.len() > self.config.max_transactions {
            return Err(IpbusError::TooManyTransactions {
                capacity: self.config.max_transactions,
            });
        }
        let mut size = HEADER_SIZE;
        for tx in &transactions {
            if !tx.is_request() {
                return Err(IpbusError::Protocol(format!(
                    "Cannot send {:?} transaction with info code {:?}",
                    tx.kind, tx.info
                )));
            }
            tx.validate()?;
            size += tx.encoded_len();
        }
        if size > self.config.max_packet_bytes {
            tracing::warn!(
                "[{}] Rejecting packet of {} bytes (max {})",
                self.config.target,
                size,
                self.config.max_packet_bytes
            );
            return Err(IpbusError::PacketTooLarge {
                size,
                max: self.config.max_packet_bytes,
            });
        }

        let mut counters = self.counters();
        let header = counters.packet_header(byte_order::BIG_ENDIAN, PacketType::Control);
        let mut packet = ControlPacket::with_capacity(header, self.config.max_transactions)
            .with_max_bytes(self.config.max_packet_bytes);
        for tx in transactions {
            let id = counters.transaction.take();
            packet.push(tx.with_id(id))?;
        }
        drop(counters);

        tracing::debug!(
            "[{}] Built packet {:#06x} with {} transactions ({} bytes)",
            self.config.target,
            header.packet_id,
            packet.len(),
            size
        );
        packet.encode()
    }

    fn build_single(&self, tx: Transaction) -> Result<Bytes> {
        self.build_packet(vec![tx])
    }

    /// Incrementing read of `size` words.
    pub fn build_read_request(&self, address: u32, size: u8) -> Result<Bytes> {
        self.build_single(Transaction::read(address, size))
    }

    /// Incrementing write of `data`.
    pub fn build_write_request(&self, address: u32, data: &[u32]) -> Result<Bytes> {
        self.build_single(Transaction::write(address, data)?)
    }

    /// FIFO read of `size` words.
    pub fn build_non_incrementing_read_request(&self, address: u32, size: u8) -> Result<Bytes> {
        self.build_single(Transaction::non_incrementing_read(address, size))
    }

    /// FIFO write of `data`.
    pub fn build_non_incrementing_write_request(&self, address: u32, data: &[u32]) -> Result<Bytes> {
        self.build_single(Transaction::non_incrementing_write(address, data)?)
    }

    /// `X <= (X & and_term) | or_term`.
    pub fn build_rmw_bits_request(&self, address: u32, and_term: u32, or_term: u32) -> Result<Bytes> {
        self.build_single(Transaction::rmw_bits(address, and_term, or_term))
    }

    /// `X <= X + addend`.
    pub fn build_rmw_sum_request(&self, address: u32, addend: u32) -> Result<Bytes> {
        self.build_single(Transaction::rmw_sum(address, addend))
    }

    /// Configuration-space read of `size` words.
    pub fn build_config_space_read_request(&self, address: u32, size: u8) -> Result<Bytes> {
        self.build_single(Transaction::config_space_read(address, size))
    }

    /// Configuration-space write of `data`.
    pub fn build_config_space_write_request(&self, address: u32, data: &[u32]) -> Result<Bytes> {
        self.build_single(Transaction::config_space_write(address, data)?)
    }

    /// Decode a response packet that carries exactly one transaction.
    pub fn decode_response(&self, buf: &[u8]) -> Result<Transaction> {
        let packet = self.decode_response_packet(buf)?;
        if packet.len() != 1 {
            return Err(IpbusError::Protocol(format!(
                "Expected one transaction in response, found {}",
                packet.len()
            )));
        }
        Ok(packet.into_transactions().remove(0))
    }

    /// Decode a whole response packet.
    ///
    /// Fails if any transaction in it is a request.
    pub fn decode_response_packet(&self, buf: &[u8]) -> Result<ControlPacket> {
        let packet = ControlPacket::decode(buf)?;
        if let Some(tx) = packet.transactions().iter().find(|tx| tx.is_request()) {
            return Err(IpbusError::Protocol(format!(
                "Transaction {:#05x} in response packet has request info code",
                tx.id
            )));
        }
        for tx in packet.transactions().iter().filter(|tx| tx.is_error()) {
            tracing::debug!(
                "[{}] Transaction {:#05x} ({:?}) failed: {:?}",
                self.config.target,
                tx.id,
                tx.kind,
                tx.info
            );
        }
        Ok(packet)
    }

    /// Encoded status request. Does not consume a packet ID.
    pub fn status_request(&self) -> Bytes {
        Bytes::copy_from_slice(&StatusRequest::new().encode())
    }

    /// Decode a status response.
    pub fn decode_status(&self, buf: &[u8]) -> Result<StatusResponse> {
        StatusResponse::decode(buf)
    }

    /// Encoded re-send request for `packet_id`. Does not consume a packet ID.
    pub fn resend_request(&self, packet_id: u16) -> Bytes {
        Bytes::copy_from_slice(&ResendRequest::new(packet_id).encode())
    }

    /// Packet ID the next control packet will carry.
    pub fn packet_id(&self) -> u16 {
        self.counters().packet.get()
    }

    /// Transaction ID the next transaction will carry.
    pub fn transaction_id(&self) -> u16 {
        self.counters().transaction.get()
    }

    /// Override the next packet ID.
    pub fn set_packet_id(&self, id: u16) -> Result<()> {
        self.counters().packet.set(id)
    }

    /// Override the next transaction ID (at most 0xFFF).
    pub fn set_transaction_id(&self, id: u16) -> Result<()> {
        self.counters().transaction.set(id)
    }

    /// Reset both counters to 0.
    pub fn reset_counters(&self) {
        self.counters().reset();
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}
