//! Polling scheduler.
//!
//! Once the link is up the accessory stays silent until it is asked to
//! report. Arming sends a [`PollingRequest`] through the session; the
//! accessory then emits one telemetry packet every `period_ms`. The request
//! does not survive a disconnect, so the publisher re-arms after every
//! reconnect.

use log::{info, warn};

use crate::protocol::PollingRequest;
use crate::session::{ConnectionState, SessionError, SessionResult, TransportSession};
use crate::traits::IrService;

#[derive(Debug, Default, Clone)]
pub struct PollingScheduler {
    armed: bool,
    period_ms: u8,
    arm_count: u32,
}

impl PollingScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask the connected accessory to report every `period_ms`
    ///
    /// A failure is returned as-is; the link is left up and the caller
    /// decides whether to retry or disconnect.
    pub fn arm<S: IrService>(&mut self, session: &mut TransportSession<S>, period_ms: u8) -> SessionResult<()> {
        if period_ms == 0 {
            return Err(SessionError::InvalidArgument);
        }
        if session.query_status() != ConnectionState::Connected {
            return Err(SessionError::NotConnected);
        }

        if let Err(e) = session.send(&PollingRequest::new(period_ms).to_bytes()) {
            warn!("Polling request ({} ms) failed: {}", period_ms, e);
            return Err(e);
        }

        self.armed = true;
        self.period_ms = period_ms;
        self.arm_count = self.arm_count.wrapping_add(1);
        info!("Polling armed at {} ms", period_ms);
        Ok(())
    }

    /// Forget the arming after the link went away
    pub fn disarm(&mut self) {
        self.armed = false;
    }

    pub fn is_armed(&self) -> bool {
        self.armed
    }

    /// Period of the last successful arm
    pub fn period_ms(&self) -> u8 {
        self.period_ms
    }

    /// Successful arms since construction
    pub fn arm_count(&self) -> u32 {
        self.arm_count
    }
}
