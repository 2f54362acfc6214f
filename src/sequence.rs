//! Packet and transaction sequence numbering.
//!
//! IPbus reliability depends on two wrap-around counters:
//! - packet ID, 16 bits, `0xFFFF -> 0`
//! - transaction ID, 12 bits, `0x0FFF -> 0`
//!
//! Counters are plain values. A [`Session`](crate::Session) owns one
//! [`SequenceCounters`] per target and serializes access to it; nothing here
//! is global.

use crate::error::{IpbusError, Result};
use crate::protocol::{
    PacketHeader, PacketType, TransactionHeader, TransactionKind, MAX_PACKET_ID,
    MAX_TRANSACTION_ID,
};

/// A wrap-around counter with a fixed upper bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SequenceCounter {
    value: u16,
    max: u16,
}

impl SequenceCounter {
    /// Create a counter that wraps from `max` back to 0.
    ///
    /// Fails with `CounterExhaustion` if `max` does not fit the 16-bit storage.
    pub fn new(max: u32) -> Result<Self> {
        let max = u16::try_from(max).map_err(|_| IpbusError::CounterExhaustion {
            value: max,
            max: u16::MAX as u32,
        })?;
        Ok(Self { value: 0, max })
    }

    /// 16-bit packet ID counter.
    pub const fn packet_id() -> Self {
        Self {
            value: 0,
            max: MAX_PACKET_ID,
        }
    }

    /// 12-bit transaction ID counter.
    pub const fn transaction_id() -> Self {
        Self {
            value: 0,
            max: MAX_TRANSACTION_ID,
        }
    }

    /// Current value.
    #[inline]
    pub fn get(&self) -> u16 {
        self.value
    }

    /// Wrap boundary.
    #[inline]
    pub fn max(&self) -> u16 {
        self.max
    }

    /// Set the current value.
    pub fn set(&mut self, value: u16) -> Result<()> {
        if value > self.max {
            return Err(IpbusError::CounterExhaustion {
                value: value as u32,
                max: self.max as u32,
            });
        }
        self.value = value;
        Ok(())
    }

    /// Reset to 0.
    #[inline]
    pub fn reset(&mut self) {
        self.value = 0;
    }

    /// Advance by one, wrapping at the boundary. Returns the new value.
    #[inline]
    pub fn increment(&mut self) -> u16 {
        self.value = if self.value >= self.max {
            0
        } else {
            self.value + 1
        };
        self.value
    }

    /// Return the current value and advance.
    #[inline]
    pub fn take(&mut self) -> u16 {
        let current = self.value;
        self.increment();
        current
    }

    /// Value `n` increments ahead of the current one, without advancing.
    pub fn peek_ahead(&self, n: usize) -> u16 {
        let span = self.max as usize + 1;
        ((self.value as usize + n % span) % span) as u16
    }
}

/// Packet-ID and transaction-ID counters for one target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SequenceCounters {
    /// Packet ID counter.
    pub packet: SequenceCounter,
    /// Transaction ID counter.
    pub transaction: SequenceCounter,
}

impl SequenceCounters {
    /// Both counters at 0.
    pub const fn new() -> Self {
        Self {
            packet: SequenceCounter::packet_id(),
            transaction: SequenceCounter::transaction_id(),
        }
    }

    /// Start from explicit values.
    pub fn starting_at(packet_id: u16, transaction_id: u16) -> Result<Self> {
        let mut counters = Self::new();
        counters.packet.set(packet_id)?;
        counters.transaction.set(transaction_id)?;
        Ok(counters)
    }

    /// Build a packet header with the current packet ID, then advance it.
    pub fn packet_header(&mut self, byte_order: u8, packet_type: PacketType) -> PacketHeader {
        PacketHeader::with_byte_order(self.packet.take(), byte_order, packet_type)
    }

    /// Build a request header with the current transaction ID, then advance it.
    pub fn transaction_header(
        &mut self,
        kind: TransactionKind,
        word_count: u8,
    ) -> TransactionHeader {
        TransactionHeader::request(self.transaction.take(), kind, word_count)
    }

    /// Reset both counters to 0.
    pub fn reset(&mut self) {
        self.packet.reset();
        self.transaction.reset();
    }
}

impl Default for SequenceCounters {
    fn default() -> Self {
        Self::new()
    }
}

/// Target-side packet ID acceptance.
///
/// A target accepts any packet with ID 0. Non-zero IDs must be consecutive;
/// a packet that breaks the sequence is silently dropped (no response is
/// sent). The transport loop that owns the target calls [`accept`] for each
/// incoming control packet and drops the packet on `SequenceGap`.
///
/// [`accept`]: PacketIdTracker::accept
#[derive(Debug, Clone, Default)]
pub struct PacketIdTracker {
    last: Option<u16>,
}

impl PacketIdTracker {
    /// Tracker that has not seen any reliable packet yet.
    pub fn new() -> Self {
        Self::default()
    }

    /// Next packet ID that will be accepted, if a reliable packet was seen.
    pub fn expected(&self) -> Option<u16> {
        self.last.map(next_packet_id)
    }

    /// Check `header` against the sequence and record it if accepted.
    pub fn accept(&mut self, header: &PacketHeader) -> Result<()> {
        let received = header.packet_id;
        if received == 0 {
            return Ok(());
        }

        if let Some(expected) = self.expected() {
            if received != expected {
                tracing::warn!(
                    "Dropping packet {:#06x}, expected {:#06x}",
                    received,
                    expected
                );
                return Err(IpbusError::SequenceGap { expected, received });
            }
        }

        self.last = Some(received);
        Ok(())
    }

    /// Forget the sequence (e.g. after a target reset).
    pub fn reset(&mut self) {
        self.last = None;
    }
}

// ID 0 never moves the sequence, so the successor of 0xFFFF is 1.
#[inline]
fn next_packet_id(id: u16) -> u16 {
    if id == MAX_PACKET_ID {
        1
    } else {
        id + 1
    }
}
