//! # Transport Session
//!
//! Owns the connection lifecycle against the privileged service and the
//! registered shared region.
//!
//! ```text
//!            request_connection
//!   ┌──────┐ ─────────────────► ┌────────────┐  status: connected   ┌───────────┐
//!   │ Idle │                    │ Connecting │ ───────────────────► │ Connected │
//!   └──────┘ ◄───────┐          └────────────┘                      └───────────┘
//!      ▲             │            │ status: stopped/failed                │
//!      │        disconnect        ▼                                       │
//!      │             │          ┌────────┐                                │
//!      │             └───────── │ Failed │                                │
//!      │                        └────────┘                                │
//!      └──────────────────── status: not connected ───────────────────────┘
//! ```
//!
//! `Disconnecting` is held only while a teardown request is in flight.
//! Calls that would start a second request while one is outstanding fail
//! with [`SessionError::Busy`] and leave the state untouched.

use log::{debug, info, warn};
use serde::Serialize;

use crate::buffer::{BufferError, ChannelGeometry, PageBuffer};
use crate::channel::{ChannelStats, Decoded, SharedChannel};
use crate::protocol::{ConnectionRole, ConnectionStatus, DeviceStatusSnapshot, WireError};
use crate::traits::{IrService, Notification, ServiceError, WaitOutcome};

/// Session-side view of the link
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConnectionState {
    Idle,
    Connecting,
    Connected,
    Disconnecting,
    /// The attempt died on the service side and still has to be cleared
    Failed,
}

/// Errors that unwind from the session to its caller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SessionError {
    /// A request is already outstanding; wait and retry
    Busy,
    /// The service refused the request
    ServiceRejected(u32),
    /// Operation needs an established link
    NotConnected,
    /// No region is registered with the service
    NotInitialized,
    /// Argument outside the range the service accepts
    InvalidArgument,
    /// Region geometry does not match its storage
    Geometry(BufferError),
    /// Header bytes do not follow the layout
    Malformed(WireError),
}

impl core::fmt::Display for SessionError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Busy => write!(f, "busy"),
            Self::ServiceRejected(code) => write!(f, "service rejected request: {code:#010x}"),
            Self::NotConnected => write!(f, "not connected"),
            Self::NotInitialized => write!(f, "not initialized"),
            Self::InvalidArgument => write!(f, "invalid argument"),
            Self::Geometry(e) => write!(f, "geometry: {e}"),
            Self::Malformed(e) => write!(f, "malformed header: {e}"),
        }
    }
}

impl From<ServiceError> for SessionError {
    fn from(e: ServiceError) -> Self {
        match e {
            ServiceError::Busy => SessionError::Busy,
            ServiceError::Rejected(code) => SessionError::ServiceRejected(code),
            ServiceError::NotInitialized => SessionError::NotInitialized,
        }
    }
}

impl From<BufferError> for SessionError {
    fn from(e: BufferError) -> Self {
        SessionError::Geometry(e)
    }
}

impl From<WireError> for SessionError {
    fn from(e: WireError) -> Self {
        SessionError::Malformed(e)
    }
}

/// Result type alias for session operations
pub type SessionResult<T> = Result<T, SessionError>;

/// A registered region plus the link state built on top of it
pub struct TransportSession<S: IrService> {
    service: S,
    state: ConnectionState,
    channel: SharedChannel,
}

impl<S: IrService> TransportSession<S> {
    /// Register `buffer` with `service` and start in `Idle`
    pub fn open(mut service: S, buffer: PageBuffer) -> SessionResult<Self> {
        let geometry = *buffer.geometry();
        geometry.validate()?;
        service.register(buffer)?;
        info!(
            "Shared region registered: {} slot(s) per direction, {} bytes",
            geometry.slot_count,
            geometry.region_size()
        );

        Ok(Self {
            service,
            state: ConnectionState::Idle,
            channel: SharedChannel::new(geometry),
        })
    }

    /// Drop any link, unregister the region and hand both back
    pub fn close(mut self, disconnect_timeout_ms: u32) -> (S, Option<PageBuffer>) {
        if self.state != ConnectionState::Idle {
            if let Err(e) = self.disconnect(disconnect_timeout_ms) {
                warn!("Disconnect during teardown failed: {}", e);
            }
        }
        let buffer = self.service.unregister();
        info!("Shared region unregistered");
        (self.service, buffer)
    }

    /// Ask the service to begin pairing with `device_id`
    ///
    /// Only valid from `Idle`. On success the state is `Connecting`; a
    /// synchronous failure leaves the state unchanged.
    pub fn request_connection(&mut self, device_id: u8) -> SessionResult<()> {
        if self.state != ConnectionState::Idle {
            return Err(SessionError::Busy);
        }

        match self.service.require_connection(device_id) {
            Ok(()) => {
                self.set_state(ConnectionState::Connecting);
                Ok(())
            }
            Err(e) => {
                warn!("Connection request for device {} failed: {}", device_id, e);
                Err(e.into())
            }
        }
    }

    /// Wait for the connection-status notification
    ///
    /// Never changes the state; call [`Self::refresh_status`] afterwards,
    /// also after a timeout.
    pub fn wait_for_status_change(&mut self, timeout_ms: u32) -> SessionResult<WaitOutcome> {
        Ok(self.service.wait(Notification::ConnectionStatus, timeout_ms)?)
    }

    /// Wait for the packet-received notification
    pub fn wait_for_packet(&mut self, timeout_ms: u32) -> SessionResult<WaitOutcome> {
        Ok(self.service.wait(Notification::PacketReceived, timeout_ms)?)
    }

    /// Current state as last observed; never blocks
    pub fn query_status(&self) -> ConnectionState {
        self.state
    }

    /// Read the service-reported status and apply the matching transition
    pub fn refresh_status(&mut self) -> SessionResult<ConnectionState> {
        let reported = self.service.connection_status()?;
        let next = match (self.state, reported) {
            (ConnectionState::Connecting, ConnectionStatus::Connected) => ConnectionState::Connected,
            (ConnectionState::Connecting, ConnectionStatus::Stopped | ConnectionStatus::Failed) => {
                ConnectionState::Failed
            }
            (ConnectionState::Connected, ConnectionStatus::Connected) => ConnectionState::Connected,
            (ConnectionState::Connected, _) => ConnectionState::Idle,
            (state, _) => state,
        };
        debug!("Service reports {:?}, session {:?}", reported, next);
        self.set_state(next);
        Ok(next)
    }

    /// Tear down the link or pending attempt
    ///
    /// Idempotent from `Idle`. Waits up to `timeout_ms` for the service to
    /// confirm; the session is `Idle` afterwards either way.
    pub fn disconnect(&mut self, timeout_ms: u32) -> SessionResult<()> {
        let previous = match self.state {
            ConnectionState::Idle => return Ok(()),
            ConnectionState::Disconnecting => return Err(SessionError::Busy),
            state => state,
        };

        self.set_state(ConnectionState::Disconnecting);
        match self.service.disconnect() {
            Ok(()) => {}
            Err(ServiceError::Busy) => {
                self.set_state(previous);
                return Err(SessionError::Busy);
            }
            Err(e) => {
                self.set_state(ConnectionState::Idle);
                return Err(e.into());
            }
        }

        let outcome = self.service.wait(Notification::ConnectionStatus, timeout_ms);
        self.set_state(ConnectionState::Idle);
        match outcome? {
            WaitOutcome::Signaled => debug!("Disconnect confirmed"),
            WaitOutcome::TimedOut => debug!("Disconnect not confirmed within {} ms", timeout_ms),
        }
        Ok(())
    }

    /// Negotiated role; only defined once connected
    pub fn query_role(&mut self) -> SessionResult<ConnectionRole> {
        if self.state != ConnectionState::Connected {
            return Err(SessionError::NotConnected);
        }
        Ok(self.service.connection_role()?)
    }

    /// Decode the status header of the registered region
    pub fn status_snapshot(&self) -> SessionResult<DeviceStatusSnapshot> {
        let region = self.service.region().ok_or(SessionError::NotInitialized)?;
        Ok(DeviceStatusSnapshot::parse(region)?)
    }

    /// Decode the next receive slot
    pub fn decode_next(&mut self) -> Decoded {
        match self.service.region() {
            Some(region) => self.channel.decode_next(region),
            None => Decoded::Empty,
        }
    }

    /// Transmit a request to the connected device
    pub fn send(&mut self, data: &[u8]) -> SessionResult<()> {
        if self.state != ConnectionState::Connected {
            return Err(SessionError::NotConnected);
        }
        Ok(self.service.send(data)?)
    }

    pub fn channel_stats(&self) -> ChannelStats {
        self.channel.stats()
    }

    pub fn geometry(&self) -> &ChannelGeometry {
        self.channel.geometry()
    }

    pub fn now_ms(&self) -> u64 {
        self.service.now_ms()
    }

    pub fn service(&self) -> &S {
        &self.service
    }

    pub fn service_mut(&mut self) -> &mut S {
        &mut self.service
    }

    fn set_state(&mut self, next: ConnectionState) {
        if next != self.state {
            info!("Session: {:?} -> {:?}", self.state, next);
            self.state = next;
        }
    }
}
