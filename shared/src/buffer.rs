//! # Shared Channel Buffer
//!
//! The byte region registered with the privileged service. The service
//! writes status and received packets into it; this process reads them
//! back through [`crate::channel::SharedChannel`].
//!
//! ## Memory Layout
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────┐
//! │            SharedChannelBuffer (page aligned, N bytes)         │
//! ├──────────────┬──────────────────────────┬──────────────────────┤
//! │    header    │     receive slots        │     send slots       │
//! │ HEADER_SIZE  │ slot_count × slot_size   │ slot_count × slot_sz │
//! └──────────────┴──────────────────────────┴──────────────────────┘
//!                  slot_size = PACKET_HEADER_SIZE + max_payload_size
//! ```
//!
//! The region size and slot geometry must match what was registered with
//! the service exactly; [`SharedChannelBuffer::new`] refuses a geometry
//! whose page-rounded size differs from the backing storage.

use serde::{Deserialize, Serialize};

use crate::protocol::{HEADER_SIZE, MAX_PAYLOAD_SIZE, PACKET_HEADER_SIZE, PAGE_SIZE, TELEMETRY_PAYLOAD_LEN};

/// Errors specific to region geometry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BufferError {
    /// Slot count is zero, the payload size is outside
    /// `TELEMETRY_PAYLOAD_LEN..=MAX_PAYLOAD_SIZE`, or the region size
    /// does not fit in `usize`
    InvalidGeometry,
    /// Page-rounded geometry size differs from the backing storage
    SizeMismatch { expected: usize, actual: usize },
}

impl core::fmt::Display for BufferError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::InvalidGeometry => write!(f, "invalid slot geometry"),
            Self::SizeMismatch { expected, actual } => {
                write!(f, "region size mismatch: geometry needs {expected}, storage has {actual}")
            }
        }
    }
}

/// Slot layout of the shared region
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ChannelGeometry {
    /// Slots per direction
    pub slot_count: usize,
    /// Payload capacity of one slot
    pub max_payload_size: usize,
}

impl ChannelGeometry {
    pub const fn new(slot_count: usize) -> Self {
        Self {
            slot_count,
            max_payload_size: MAX_PAYLOAD_SIZE,
        }
    }

    /// Check the geometry; the size accessors below cannot overflow once
    /// this passes
    pub fn validate(&self) -> Result<(), BufferError> {
        if self.slot_count == 0 || !(TELEMETRY_PAYLOAD_LEN..=MAX_PAYLOAD_SIZE).contains(&self.max_payload_size) {
            return Err(BufferError::InvalidGeometry);
        }
        self.checked_region_size().ok_or(BufferError::InvalidGeometry)?;
        Ok(())
    }

    fn checked_region_size(&self) -> Option<usize> {
        let slots = self.slot_count.checked_mul(self.slot_size())?;
        let used = slots.checked_mul(2)?.checked_add(HEADER_SIZE)?;
        used.div_ceil(PAGE_SIZE).checked_mul(PAGE_SIZE)
    }

    /// Bytes occupied by one slot, header included
    pub const fn slot_size(&self) -> usize {
        PACKET_HEADER_SIZE + self.max_payload_size
    }

    /// Bytes occupied by all slots of one direction
    pub const fn slot_region_size(&self) -> usize {
        self.slot_count * self.slot_size()
    }

    /// Header plus both slot regions, before page rounding
    pub const fn used_size(&self) -> usize {
        HEADER_SIZE + 2 * self.slot_region_size()
    }

    /// Size registered with the service
    pub const fn region_size(&self) -> usize {
        round_up(self.used_size(), PAGE_SIZE)
    }

    pub const fn receive_slot_offset(&self, slot: usize) -> usize {
        HEADER_SIZE + slot * self.slot_size()
    }

    pub const fn send_slot_offset(&self, slot: usize) -> usize {
        HEADER_SIZE + self.slot_region_size() + slot * self.slot_size()
    }
}

impl Default for ChannelGeometry {
    fn default() -> Self {
        Self::new(1)
    }
}

/// Round `value` up to the next multiple of `multiple`
///
/// A value already on a boundary is returned unchanged.
pub const fn round_up(value: usize, multiple: usize) -> usize {
    value.div_ceil(multiple) * multiple
}

/// One-page region, enough for the standard geometry
pub type PageBuffer = SharedChannelBuffer<PAGE_SIZE>;

/// Page-aligned storage for the shared region
///
/// `N` is the registered size. The default of one page holds up to
/// 50 slots per direction with the standard payload size.
#[repr(C, align(4096))]
pub struct SharedChannelBuffer<const N: usize = PAGE_SIZE> {
    data: [u8; N],
    geometry: ChannelGeometry,
}

impl<const N: usize> SharedChannelBuffer<N> {
    /// Allocate a zeroed region for `geometry`
    pub fn new(geometry: ChannelGeometry) -> Result<Self, BufferError> {
        geometry.validate()?;
        let expected = geometry.region_size();
        if expected != N {
            return Err(BufferError::SizeMismatch { expected, actual: N });
        }

        Ok(Self {
            data: [0u8; N],
            geometry,
        })
    }

    #[inline]
    pub fn geometry(&self) -> &ChannelGeometry {
        &self.geometry
    }

    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub fn header(&self) -> &[u8] {
        &self.data[..HEADER_SIZE]
    }

    pub fn header_mut(&mut self) -> &mut [u8] {
        &mut self.data[..HEADER_SIZE]
    }

    /// One receive slot, header and payload. `slot` wraps at `slot_count`.
    pub fn receive_slot(&self, slot: usize) -> &[u8] {
        let start = self.geometry.receive_slot_offset(slot % self.geometry.slot_count);
        &self.data[start..start + self.geometry.slot_size()]
    }

    pub fn receive_slot_mut(&mut self, slot: usize) -> &mut [u8] {
        let start = self.geometry.receive_slot_offset(slot % self.geometry.slot_count);
        let end = start + self.geometry.slot_size();
        &mut self.data[start..end]
    }

    pub fn send_slot(&self, slot: usize) -> &[u8] {
        let start = self.geometry.send_slot_offset(slot % self.geometry.slot_count);
        &self.data[start..start + self.geometry.slot_size()]
    }

    pub fn send_slot_mut(&mut self, slot: usize) -> &mut [u8] {
        let start = self.geometry.send_slot_offset(slot % self.geometry.slot_count);
        let end = start + self.geometry.slot_size();
        &mut self.data[start..end]
    }

    /// Zero the whole region
    pub fn clear(&mut self) {
        self.data.fill(0);
    }
}
