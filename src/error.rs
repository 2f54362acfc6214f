//! Error types for ipbus-client.

use thiserror::Error;

/// Main error type for all IPbus codec operations.
#[derive(Debug, Error)]
pub enum IpbusError {
    /// Decoded protocol version nibble is not 2.
    #[error("Protocol version mismatch: expected 2, found {found}")]
    ProtocolVersionMismatch {
        /// Version nibble found on the wire.
        found: u8,
    },

    /// Transaction type ID outside the eight defined kinds.
    #[error("Unsupported transaction type ID: {0:#x}")]
    UnsupportedTransactionType(u8),

    /// Packet type outside control/status/re-send.
    #[error("Unsupported packet type: {0:#x}")]
    UnsupportedPacketType(u8),

    /// A valid packet type, but not the one the decoder was asked for.
    #[error("Unexpected packet type: expected {expected:#x}, found {found:#x}")]
    UnexpectedPacketType {
        /// Packet type the caller asked to decode.
        expected: u8,
        /// Packet type found in the header.
        found: u8,
    },

    /// Destination buffer cannot hold the encoded bytes.
    #[error("Buffer too small: need {needed} bytes, have {available}")]
    BufferTooSmall {
        /// Bytes required.
        needed: usize,
        /// Bytes available in the destination.
        available: usize,
    },

    /// Encoded packet would exceed the MTU bound.
    #[error("Packet size {size} exceeds maximum {max}")]
    PacketTooLarge {
        /// Size the packet would have, in bytes.
        size: usize,
        /// Configured maximum, in bytes.
        max: usize,
    },

    /// Control packet already holds as many transactions as it was allocated for.
    #[error("Control packet is full ({capacity} transactions)")]
    TooManyTransactions {
        /// Number of transactions the packet was allocated to hold.
        capacity: usize,
    },

    /// Payload longer than the 8-bit word count field allows.
    #[error("Word count {0} exceeds 255, split the transfer")]
    WordCountOverflow(usize),

    /// Non-zero packet ID not consecutive with the last accepted one.
    #[error("Packet ID sequence gap: expected {expected:#06x}, received {received:#06x}")]
    SequenceGap {
        /// Packet ID the target expected next.
        expected: u16,
        /// Packet ID actually received.
        received: u16,
    },

    /// Input ended before a complete header or transaction.
    #[error("Truncated input: need {needed} bytes, have {available}")]
    Truncated {
        /// Bytes required to finish decoding.
        needed: usize,
        /// Bytes present.
        available: usize,
    },

    /// Counter value or wrap boundary not representable.
    #[error("Counter value {value:#x} exceeds wrap boundary {max:#x}")]
    CounterExhaustion {
        /// Requested value or boundary.
        value: u32,
        /// Largest representable value.
        max: u32,
    },

    /// Other malformed input.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// I/O error while loading configuration.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON configuration error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias using IpbusError.
pub type Result<T> = std::result::Result<T, IpbusError>;
