//! Protocol module - header words, transactions and packets.
//!
//! This module implements the IPbus 2.0 wire format:
//! - 32-bit packet and transaction header encoding/decoding
//! - Transactions and control packets
//! - Status and re-send packets
//! - Stream buffer for accumulating partial reads

mod control_packet;
mod status;
mod stream_buffer;
mod transaction;
mod wire_format;

pub use control_packet::{build_control_packet, ControlPacket, DEFAULT_CAPACITY};
pub use status::{
    ResendRequest, StatusRequest, StatusResponse, HEADER_HISTORY_LEN, STATUS_PACKET_BYTES,
    STATUS_PACKET_WORDS, TRAFFIC_HISTORY_LEN,
};
pub use stream_buffer::{StreamBuffer, StreamItem};
pub use transaction::{body_words, Transaction};
pub use wire_format::{
    byte_order, decode_packet_header, decode_transaction_header, detect_wire_order, InfoCode,
    PacketHeader, PacketType, TransactionHeader, TransactionKind, WireOrder, HEADER_SIZE,
    MAX_PACKET_BYTES, MAX_PACKET_ID, MAX_PACKET_WORDS, MAX_TRANSACTION_ID, MAX_WORD_COUNT,
    PROTOCOL_VERSION, WORD_SIZE,
};
