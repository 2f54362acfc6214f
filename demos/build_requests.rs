//! Build requests - encode every transaction kind and decode a reply.
//!
//! This example demonstrates:
//! - Creating a session with the builder pattern or from JSON
//! - Building one request per transaction kind
//! - Decoding a target response
//!
//! # Running
//!
//! ```text
//! RUST_LOG=debug cargo run --example build_requests
//! ```

use ipbus_client::protocol::{
    InfoCode, PacketHeader, PacketType, Transaction, TransactionKind,
};
use ipbus_client::{Session, SessionConfig};

fn hex(bytes: &[u8]) -> String {
    bytes
        .chunks(4)
        .map(|w| w.iter().map(|b| format!("{:02x}", b)).collect::<String>())
        .collect::<Vec<_>>()
        .join(" ")
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(true)
        .init();

    let config = SessionConfig::from_json(
        r#"{"target": "demo-board", "initial_packet_id": 1, "initial_transaction_id": 1}"#,
    )?;
    let session = Session::builder().config(config).build()?;

    let requests = [
        ("read", session.build_read_request(0x0000_0EFB, 0x0A)?),
        ("write", session.build_write_request(0x0000_1000, &[1, 2, 3, 4, 5, 6, 7, 8])?),
        ("fifo read", session.build_non_incrementing_read_request(0x2000, 4)?),
        ("fifo write", session.build_non_incrementing_write_request(0x2000, &[0xAA, 0xBB])?),
        ("rmw bits", session.build_rmw_bits_request(0x3000, 0xFFFF_FF00, 0x0000_0042)?),
        ("rmw sum", session.build_rmw_sum_request(0x3004, 1)?),
        ("config read", session.build_config_space_read_request(0x0, 2)?),
        ("config write", session.build_config_space_write_request(0x0, &[0x1])?),
        (
            "batch",
            session.build_packet(vec![
                Transaction::read(0x10, 1),
                Transaction::rmw_sum(0x14, 2),
            ])?,
        ),
    ];

    for (name, bytes) in &requests {
        println!("{:>12}: {}", name, hex(bytes));
    }
    println!("{:>12}: {}", "status", hex(&session.status_request()));
    println!("{:>12}: {}", "resend", hex(&session.resend_request(1)));

    // A reply to the first read, as the target would send it
    let mut reply = PacketHeader::new(1, PacketType::Control).encode().to_vec();
    let data: Vec<u32> = (0..10).map(|i| 0x1000 + i).collect();
    let tx = Transaction::response(1, TransactionKind::Read, InfoCode::Success, 10, data);
    reply.extend_from_slice(&tx.encode()?);

    let decoded = session.decode_response(&reply)?;
    println!(
        "reply to transaction {:#05x}: {:?}, data {:x?}",
        decoded.id,
        decoded.info,
        decoded.data()
    );
    println!(
        "next packet ID {:#06x}, next transaction ID {:#05x}",
        session.packet_id(),
        session.transaction_id()
    );

    Ok(())
}
