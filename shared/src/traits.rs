//! # Privileged Service Port
//!
//! The trait the core uses to reach the platform service that owns the
//! infrared transport. The session never touches a platform API directly:
//!
//! - **Testability**: mock services script every reply in unit tests
//! - **Flexibility**: the demo swaps in a simulated accessory
//! - **Ownership**: the registered region is moved into the service for as
//!   long as it is registered, which is how the real platform maps it
//!
//! ## Notifications
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                     privileged service                       │
//! │                                                              │
//! │   link state change ──► Notification::ConnectionStatus       │
//! │   packet in rx slot ──► Notification::PacketReceived         │
//! └───────────────────────────┬──────────────────────────────────┘
//!                             │ wait(notification, timeout_ms)
//!                             ▼
//!                   Signaled  |  TimedOut
//! ```
//!
//! Each signal is consumed by the wait that observes it; callers wait again
//! for the next one. A timeout is a normal outcome, not an error.

use crate::buffer::PageBuffer;
use crate::protocol::{ConnectionRole, ConnectionStatus};

/// Errors reported by the privileged service
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ServiceError {
    /// A connect or disconnect request is already outstanding
    Busy,
    /// The service refused the request; carries the platform result code
    Rejected(u32),
    /// No region is registered
    NotInitialized,
}

impl core::fmt::Display for ServiceError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Busy => write!(f, "request already outstanding"),
            Self::Rejected(code) => write!(f, "service rejected request: {code:#010x}"),
            Self::NotInitialized => write!(f, "service not initialized"),
        }
    }
}

/// Result type alias for service calls
pub type ServiceResult<T> = Result<T, ServiceError>;

/// The two independent signals raised by the service
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Notification {
    ConnectionStatus,
    PacketReceived,
}

/// How a bounded wait ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum WaitOutcome {
    Signaled,
    TimedOut,
}

/// Primitives exposed by the privileged service
pub trait IrService {
    /// Register the shared region. The service owns it until
    /// [`Self::unregister`] hands it back.
    fn register(&mut self, buffer: PageBuffer) -> ServiceResult<()>;

    /// Tear down the registration and return the region
    fn unregister(&mut self) -> Option<PageBuffer>;

    /// Read view of the registered region
    fn region(&self) -> Option<&[u8]>;

    /// Ask the service to start pairing with `device_id`
    ///
    /// Success only means an attempt was registered.
    fn require_connection(&mut self, device_id: u8) -> ServiceResult<()>;

    /// Tear down the current link or attempt
    fn disconnect(&mut self) -> ServiceResult<()>;

    fn connection_status(&mut self) -> ServiceResult<ConnectionStatus>;

    fn connection_role(&mut self) -> ServiceResult<ConnectionRole>;

    /// Queue `data` for transmission to the connected device
    fn send(&mut self, data: &[u8]) -> ServiceResult<()>;

    /// Block until `notification` fires or `timeout_ms` elapses
    fn wait(&mut self, notification: Notification, timeout_ms: u32) -> ServiceResult<WaitOutcome>;

    /// Monotonic system time in milliseconds
    fn now_ms(&self) -> u64;
}
