//! # ipbus-client
//!
//! Client-side codec for the IPbus 2.0 register access protocol.
//!
//! IPbus reads and writes 32-bit registers and FIFOs on FPGA boards over
//! UDP (or a stream transport). This crate builds and parses the packets;
//! sending them is left to the caller.
//!
//! ## Architecture
//!
//! - **Protocol** ([`protocol`]): header words, transactions, control,
//!   status and re-send packets, stream reassembly
//! - **Sequence** ([`sequence`]): packet-ID and transaction-ID counters
//! - **Session** ([`Session`]): per-target counters plus request builders
//!   and response decoding
//!
//! ## Example
//!
//! ```
//! use ipbus_client::protocol::{InfoCode, PacketHeader, PacketType, Transaction, TransactionKind};
//! use ipbus_client::Session;
//!
//! let session = Session::builder().target("fpga-0").build().unwrap();
//! let request = session.build_write_request(0x1000, &[0xCAFE, 0xF00D]).unwrap();
//! assert_eq!(request.len(), 4 + 4 + 4 + 8);
//!
//! // What the target would send back
//! let mut reply = PacketHeader::new(0, PacketType::Control).encode().to_vec();
//! let ack = Transaction::response(0, TransactionKind::Write, InfoCode::Success, 2, vec![]);
//! reply.extend_from_slice(&ack.encode().unwrap());
//!
//! let tx = session.decode_response(&reply).unwrap();
//! assert!(tx.info.is_success());
//! ```

pub mod error;
pub mod protocol;
pub mod sequence;

mod session;

pub use error::IpbusError;
pub use session::{Session, SessionBuilder, SessionConfig, MIN_PACKET_BYTES};
