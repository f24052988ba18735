//! # Wire Format Definitions
//!
//! Fixed little-endian layouts shared between the privileged service and
//! this process: the status header at the start of the shared region, the
//! per-slot packet header, the accessory telemetry payload and the polling
//! request written to the send side.
//!
//! ## Shared Region Header (`HEADER_SIZE` bytes)
//!
//! ```text
//! ┌──────────┬──────────┬────────┬────────┬──────┬──────┬──────┬──────┬──────┐
//! │ rx error │ tx error │ status │ trying │ role │ local│target│ net  │ rsvd │
//! │   u32    │   u32    │   u8   │   u8   │  u8  │  u8  │  u8  │  u8  │ 2 B  │
//! ├──────────┴──────────┴────────┴────────┴──────┴──────┴──────┴──────┴──────┤
//! │ 0x10: rx packet count u32 │ 0x14: tx packet count u32 │ reserved → 0x30  │
//! └──────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Packet Slot
//!
//! ```text
//! ┌──────────┬──────┬─────────────┬──────────┬─────────────────────────────┐
//! │ occupied │ rsvd │ payload len │ sequence │ payload (MAX_PAYLOAD_SIZE)  │
//! │   u8     │  u8  │    u16      │   u32    │                             │
//! └──────────┴──────┴─────────────┴──────────┴─────────────────────────────┘
//! ```
//!
//! ## Telemetry Payload
//!
//! ```text
//! ┌──────────┬──────────┬─────────────┬────────────┬─────────┐
//! │  dx i16  │  dy i16  │ battery u16 │ status u16 │ unk u8  │
//! └──────────┴──────────┴─────────────┴────────────┴─────────┘
//! ```

use serde::{Deserialize, Serialize};

/// Size of the service-owned header at the start of the shared region
pub const HEADER_SIZE: usize = 0x30;

/// Size of the metadata preceding every packet payload in a slot
pub const PACKET_HEADER_SIZE: usize = 8;

/// Maximum payload carried by one slot
pub const MAX_PAYLOAD_SIZE: usize = 32;

/// Platform page size; the shared region is rounded up to a multiple of it
pub const PAGE_SIZE: usize = 0x1000;

/// Encoded length of a [`TelemetryPacket`]
pub const TELEMETRY_PAYLOAD_LEN: usize = 9;

/// Encoded length of a [`PollingRequest`]
pub const POLLING_REQUEST_LEN: usize = 3;

/// Device class of the target accessory
pub const ACCESSORY_DEVICE_ID: u8 = 1;

const POLLING_REQUEST_ID: u8 = 0x01;
const POLLING_REQUEST_TRAILER: u8 = 0x87;

// Header field offsets
const OFF_RX_ERROR: usize = 0x00;
const OFF_TX_ERROR: usize = 0x04;
const OFF_STATUS: usize = 0x08;
const OFF_TRYING: usize = 0x09;
const OFF_ROLE: usize = 0x0A;
const OFF_LOCAL_ID: usize = 0x0B;
const OFF_TARGET_ID: usize = 0x0C;
const OFF_NETWORK_ID: usize = 0x0D;
const OFF_RESERVED: usize = 0x0E;
const OFF_RX_COUNT: usize = 0x10;
const OFF_TX_COUNT: usize = 0x14;

/// Errors while reading or writing a fixed layout
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum WireError {
    /// Input or output slice shorter than the layout
    TooShort,
    /// Connection status byte outside the known codes
    InvalidStatus(u8),
    /// Connection role byte outside the known codes
    InvalidRole(u8),
}

impl core::fmt::Display for WireError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::TooShort => write!(f, "buffer too short for layout"),
            Self::InvalidStatus(code) => write!(f, "invalid connection status {code}"),
            Self::InvalidRole(code) => write!(f, "invalid connection role {code}"),
        }
    }
}

/// Link status as reported by the privileged service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum ConnectionStatus {
    /// No link and no attempt in progress
    Stopped = 0,
    /// Searching for the device
    TryingToConnect = 1,
    /// Device found, handshake in progress
    Connecting = 2,
    /// Link established
    Connected = 3,
    /// Teardown in progress
    Disconnecting = 4,
    /// Last attempt failed
    Failed = 5,
}

impl ConnectionStatus {
    /// True while the service still works on an attempt
    pub fn is_pending(&self) -> bool {
        matches!(self, Self::TryingToConnect | Self::Connecting)
    }
}

impl TryFrom<u8> for ConnectionStatus {
    type Error = WireError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Stopped),
            1 => Ok(Self::TryingToConnect),
            2 => Ok(Self::Connecting),
            3 => Ok(Self::Connected),
            4 => Ok(Self::Disconnecting),
            5 => Ok(Self::Failed),
            other => Err(WireError::InvalidStatus(other)),
        }
    }
}

/// Negotiated side of the link
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum ConnectionRole {
    /// Not negotiated yet
    None = 0,
    /// This side drives the link
    Host = 1,
    /// This side answers the peer
    Accessory = 2,
}

impl TryFrom<u8> for ConnectionRole {
    type Error = WireError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::None),
            1 => Ok(Self::Host),
            2 => Ok(Self::Accessory),
            other => Err(WireError::InvalidRole(other)),
        }
    }
}

/// Status record decoded from the shared region header
///
/// Recomputed on every query; it carries no lifecycle of its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DeviceStatusSnapshot {
    /// Result code of the latest failed receive (0 when none)
    pub latest_receive_error: u32,
    /// Result code of the latest failed send (0 when none)
    pub latest_send_error: u32,
    /// Current link status
    pub status: ConnectionStatus,
    /// Service is still trying to reach the device
    pub trying_to_connect: bool,
    /// Negotiated role
    pub role: ConnectionRole,
    /// Link identifier of this side
    pub local_id: u8,
    /// Link identifier of the peer
    pub target_id: u8,
    /// Network identifier shared by both sides
    pub network_id: u8,
    /// Reserved bytes, kept verbatim
    pub reserved: [u8; 2],
    /// Packets written to the receive slots since registration
    pub receive_count: u32,
    /// Packets taken from the send slots since registration
    pub send_count: u32,
}

impl DeviceStatusSnapshot {
    /// Snapshot of a freshly registered region
    pub const fn empty() -> Self {
        Self {
            latest_receive_error: 0,
            latest_send_error: 0,
            status: ConnectionStatus::Stopped,
            trying_to_connect: false,
            role: ConnectionRole::None,
            local_id: 0,
            target_id: 0,
            network_id: 0,
            reserved: [0; 2],
            receive_count: 0,
            send_count: 0,
        }
    }

    /// Decode the header region
    pub fn parse(header: &[u8]) -> Result<Self, WireError> {
        if header.len() < HEADER_SIZE {
            return Err(WireError::TooShort);
        }

        Ok(Self {
            latest_receive_error: read_u32(header, OFF_RX_ERROR),
            latest_send_error: read_u32(header, OFF_TX_ERROR),
            status: ConnectionStatus::try_from(header[OFF_STATUS])?,
            trying_to_connect: header[OFF_TRYING] != 0,
            role: ConnectionRole::try_from(header[OFF_ROLE])?,
            local_id: header[OFF_LOCAL_ID],
            target_id: header[OFF_TARGET_ID],
            network_id: header[OFF_NETWORK_ID],
            reserved: [header[OFF_RESERVED], header[OFF_RESERVED + 1]],
            receive_count: read_u32(header, OFF_RX_COUNT),
            send_count: read_u32(header, OFF_TX_COUNT),
        })
    }

    /// Encode into the header region (service side)
    pub fn write(&self, header: &mut [u8]) -> Result<(), WireError> {
        if header.len() < HEADER_SIZE {
            return Err(WireError::TooShort);
        }

        header[OFF_RX_ERROR..OFF_RX_ERROR + 4].copy_from_slice(&self.latest_receive_error.to_le_bytes());
        header[OFF_TX_ERROR..OFF_TX_ERROR + 4].copy_from_slice(&self.latest_send_error.to_le_bytes());
        header[OFF_STATUS] = self.status as u8;
        header[OFF_TRYING] = self.trying_to_connect as u8;
        header[OFF_ROLE] = self.role as u8;
        header[OFF_LOCAL_ID] = self.local_id;
        header[OFF_TARGET_ID] = self.target_id;
        header[OFF_NETWORK_ID] = self.network_id;
        header[OFF_RESERVED..OFF_RESERVED + 2].copy_from_slice(&self.reserved);
        header[OFF_RX_COUNT..OFF_RX_COUNT + 4].copy_from_slice(&self.receive_count.to_le_bytes());
        header[OFF_TX_COUNT..OFF_TX_COUNT + 4].copy_from_slice(&self.send_count.to_le_bytes());
        Ok(())
    }
}

impl Default for DeviceStatusSnapshot {
    fn default() -> Self {
        Self::empty()
    }
}

/// Metadata preceding each payload in a slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SlotHeader {
    /// Slot holds a packet
    pub occupied: bool,
    /// Declared payload length (not yet validated)
    pub payload_len: u16,
    /// Monotonic packet number assigned by the writer
    pub sequence: u32,
}

impl SlotHeader {
    /// Decode a slot header
    pub fn parse(data: &[u8]) -> Result<Self, WireError> {
        if data.len() < PACKET_HEADER_SIZE {
            return Err(WireError::TooShort);
        }

        Ok(Self {
            occupied: data[0] != 0,
            payload_len: u16::from_le_bytes([data[2], data[3]]),
            sequence: read_u32(data, 4),
        })
    }

    /// Encode a slot header
    pub fn write(&self, data: &mut [u8]) -> Result<(), WireError> {
        if data.len() < PACKET_HEADER_SIZE {
            return Err(WireError::TooShort);
        }

        data[0] = self.occupied as u8;
        data[1] = 0;
        data[2..4].copy_from_slice(&self.payload_len.to_le_bytes());
        data[4..8].copy_from_slice(&self.sequence.to_le_bytes());
        Ok(())
    }
}

/// Accessory button bits, taken from the high bits of the status word
///
/// A set bit means the button is released.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Buttons(pub u16);

impl Buttons {
    pub const ZL_UP: u16 = 0x001;
    pub const ZR_UP: u16 = 0x002;
    pub const R_UP: u16 = 0x004;

    /// Bits shifted out of the raw status word
    pub const SHIFT: u32 = 5;

    pub fn from_status_raw(status_raw: u16) -> Self {
        Self(status_raw >> Self::SHIFT)
    }

    pub fn bits(&self) -> u16 {
        self.0
    }

    /// The given mask reads as pressed
    pub fn is_pressed(&self, mask: u16) -> bool {
        self.0 & mask == 0
    }
}

/// One telemetry report from the accessory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TelemetryPacket {
    /// Stick delta, horizontal
    pub dx: i16,
    /// Stick delta, vertical
    pub dy: i16,
    /// Battery level as reported by the accessory
    pub battery_level: u16,
    /// Raw status word; button bits live above bit 4
    pub status_raw: u16,
    /// Trailing byte with no known meaning
    pub unknown_field: u8,
}

impl TelemetryPacket {
    /// Decode from a validated payload
    pub fn decode(payload: &[u8]) -> Result<Self, WireError> {
        if payload.len() < TELEMETRY_PAYLOAD_LEN {
            return Err(WireError::TooShort);
        }

        Ok(Self {
            dx: i16::from_le_bytes([payload[0], payload[1]]),
            dy: i16::from_le_bytes([payload[2], payload[3]]),
            battery_level: u16::from_le_bytes([payload[4], payload[5]]),
            status_raw: u16::from_le_bytes([payload[6], payload[7]]),
            unknown_field: payload[8],
        })
    }

    /// Encode into `buf`, returning the number of bytes written
    pub fn encode(&self, buf: &mut [u8]) -> Result<usize, WireError> {
        if buf.len() < TELEMETRY_PAYLOAD_LEN {
            return Err(WireError::TooShort);
        }

        buf[0..2].copy_from_slice(&self.dx.to_le_bytes());
        buf[2..4].copy_from_slice(&self.dy.to_le_bytes());
        buf[4..6].copy_from_slice(&self.battery_level.to_le_bytes());
        buf[6..8].copy_from_slice(&self.status_raw.to_le_bytes());
        buf[8] = self.unknown_field;
        Ok(TELEMETRY_PAYLOAD_LEN)
    }

    pub fn buttons(&self) -> Buttons {
        Buttons::from_status_raw(self.status_raw)
    }
}

/// Request asking the accessory to report every `period_ms`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PollingRequest {
    pub period_ms: u8,
}

impl PollingRequest {
    pub const fn new(period_ms: u8) -> Self {
        Self { period_ms }
    }

    pub fn to_bytes(&self) -> [u8; POLLING_REQUEST_LEN] {
        [POLLING_REQUEST_ID, self.period_ms, POLLING_REQUEST_TRAILER]
    }

    /// Parse a request previously produced by [`Self::to_bytes`]
    pub fn parse(data: &[u8]) -> Option<Self> {
        match data {
            [POLLING_REQUEST_ID, period_ms, POLLING_REQUEST_TRAILER, ..] => Some(Self {
                period_ms: *period_ms,
            }),
            _ => None,
        }
    }
}

fn read_u32(data: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        data[offset],
        data[offset + 1],
        data[offset + 2],
        data[offset + 3],
    ])
}
