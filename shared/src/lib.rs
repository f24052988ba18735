//! # irpad Core Library
//!
//! Connection and polling core for an infrared gamepad accessory reached
//! through a privileged platform service:
//!
//! - **Shared Region**: page-aligned header plus receive/send slots, written by the service
//! - **Transport Session**: connect, wait, query and disconnect against [`traits::IrService`]
//! - **Polling Scheduler**: asks the accessory to report at a fixed period
//! - **State Publisher**: tick-driven state machine with busy backoff and auto-reconnect
//!
//! ## Architecture
//!
//! ```text
//!   operator action ──► StatePublisher ──► latest TelemetryPacket ──► UI
//!                            │   ▲
//!                  ┌─────────┘   └──────────┐
//!                  ▼                        │
//!          PollingScheduler          SharedChannel (rx slots)
//!                  │                        ▲
//!                  ▼                        │
//!          TransportSession ──► IrService ──┘ (writes region, raises notifications)
//! ```
//!
//! Nothing here spawns threads. The caller drives [`publisher::StatePublisher::tick`]
//! from its own loop, and every wait inside a tick is bounded.

#![cfg_attr(not(feature = "std"), no_std)]

pub mod buffer;
pub mod channel;
pub mod config;
pub mod polling;
pub mod protocol;
pub mod publisher;
pub mod session;
pub mod traits;

pub use buffer::{BufferError, ChannelGeometry, PageBuffer, SharedChannelBuffer};
pub use channel::{ChannelStats, Decoded, SharedChannel};
pub use config::{ConfigError, LinkConfig, RetryPolicy};
pub use polling::PollingScheduler;
pub use protocol::{Buttons, ConnectionRole, ConnectionStatus, DeviceStatusSnapshot, TelemetryPacket};
pub use publisher::{OperatorAction, Phase, PublisherEvent, PublisherOutcome, StatePublisher};
pub use session::{ConnectionState, SessionError, TransportSession};
pub use traits::{IrService, Notification, ServiceError, WaitOutcome};

/// Library version reported by the demo
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
