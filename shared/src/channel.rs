//! # Shared Packet Channel
//!
//! Reads telemetry out of the receive slots of the shared region. The
//! service writes packet `n` into slot `n % slot_count` and stamps it with
//! sequence number `n`; the channel keeps a cursor on the next sequence it
//! expects, so a slot is never consumed twice and a corrupt slot never
//! shifts the indexing of the ones after it.
//!
//! ```text
//!   cursor ──► slot[cursor % slot_count]
//!                 │
//!        ┌────────┼───────────────┬───────────────────┐
//!        ▼        ▼               ▼                   ▼
//!   not occupied  seq < cursor    len out of range    seq ≥ cursor
//!   → Empty       → Empty (stale) → Corrupt, advance  → Packet, advance
//! ```
//!
//! Decoding only reads the region; it never touches connection state.
//!
//! The cursor relies on the service numbering packets from zero after each
//! registration and never restarting while the region stays registered,
//! reconnects included. [`crate::session::TransportSession::open`] builds a
//! fresh channel for every registration. A service that restarted its
//! numbering mid-registration would read as stale `Empty` until the counter
//! caught up with the cursor.

use serde::Serialize;

use crate::buffer::ChannelGeometry;
use crate::protocol::{SlotHeader, TelemetryPacket, MAX_PAYLOAD_SIZE, PACKET_HEADER_SIZE, TELEMETRY_PAYLOAD_LEN};

/// Result of one [`SharedChannel::decode_next`] call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Decoded {
    /// A complete, well-formed packet
    Packet(TelemetryPacket),
    /// Nothing new in the next slot (spurious wake)
    Empty,
    /// The slot declared a length outside the valid range; it was skipped
    Corrupt { declared_len: u16 },
}

/// Counters kept for diagnostics
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ChannelStats {
    /// Packets decoded successfully
    pub decoded: u32,
    /// Slots dropped for an invalid declared length
    pub corrupt: u32,
    /// Reads that found nothing new
    pub empty: u32,
    /// Packets overwritten by the writer before they were read
    pub skipped: u32,
}

enum Slot<'r> {
    Payload(&'r [u8]),
    Empty,
    Corrupt(u16),
}

/// Reader side of the receive slots
#[derive(Debug, Clone)]
pub struct SharedChannel {
    geometry: ChannelGeometry,
    next_sequence: u32,
    stats: ChannelStats,
}

impl SharedChannel {
    pub fn new(geometry: ChannelGeometry) -> Self {
        Self {
            geometry,
            next_sequence: 0,
            stats: ChannelStats::default(),
        }
    }

    pub fn geometry(&self) -> &ChannelGeometry {
        &self.geometry
    }

    /// Sequence number the next read expects
    pub fn next_sequence(&self) -> u32 {
        self.next_sequence
    }

    pub fn stats(&self) -> ChannelStats {
        self.stats
    }

    /// Decode the next slot of `region` (the whole shared region)
    pub fn decode_next(&mut self, region: &[u8]) -> Decoded {
        match self.take(region) {
            Slot::Payload(payload) => match TelemetryPacket::decode(payload) {
                Ok(packet) => {
                    self.stats.decoded = self.stats.decoded.wrapping_add(1);
                    Decoded::Packet(packet)
                }
                Err(_) => {
                    self.stats.corrupt = self.stats.corrupt.wrapping_add(1);
                    Decoded::Corrupt {
                        declared_len: payload.len() as u16,
                    }
                }
            },
            Slot::Empty => {
                self.stats.empty = self.stats.empty.wrapping_add(1);
                Decoded::Empty
            }
            Slot::Corrupt(declared_len) => {
                self.stats.corrupt = self.stats.corrupt.wrapping_add(1);
                log::warn!("dropping slot with declared length {}", declared_len);
                Decoded::Corrupt { declared_len }
            }
        }
    }

    fn take<'r>(&mut self, region: &'r [u8]) -> Slot<'r> {
        let slot = self.next_sequence as usize % self.geometry.slot_count;
        let start = self.geometry.receive_slot_offset(slot);
        let end = start + self.geometry.slot_size();
        let Some(bytes) = region.get(start..end) else {
            return Slot::Empty;
        };

        let header = match SlotHeader::parse(bytes) {
            Ok(header) => header,
            Err(_) => return Slot::Empty,
        };
        if !header.occupied {
            return Slot::Empty;
        }

        // Signed distance so the comparison survives sequence wrap-around
        let ahead = header.sequence.wrapping_sub(self.next_sequence) as i32;
        if ahead < 0 {
            return Slot::Empty;
        }
        if ahead > 0 {
            self.stats.skipped = self.stats.skipped.wrapping_add(ahead as u32);
            log::debug!(
                "reader overrun: expected sequence {}, found {}",
                self.next_sequence,
                header.sequence
            );
        }
        self.next_sequence = header.sequence.wrapping_add(1);

        let len = header.payload_len as usize;
        if !(TELEMETRY_PAYLOAD_LEN..=self.geometry.max_payload_size.min(MAX_PAYLOAD_SIZE)).contains(&len) {
            return Slot::Corrupt(header.payload_len);
        }

        Slot::Payload(&bytes[PACKET_HEADER_SIZE..PACKET_HEADER_SIZE + len])
    }
}
