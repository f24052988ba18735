//! # Simulated Privileged Service
//!
//! Stands in for the platform service on a host machine. It owns the
//! registered region the way the real service does: it writes the status
//! header, fills receive slots with telemetry from an emulated accessory and
//! raises the two notifications.
//!
//! ```text
//!   require_connection ──(accessory_delay_ms)──► Connected ──(drop_link_after_ms)──► Stopped
//!                                                   │
//!                                   polling request │ every period_ms
//!                                                   ▼
//!                                   rx slot[seq % slot_count] + PacketReceived
//! ```
//!
//! Time is the wall clock; waits sleep in one-millisecond slices.

use std::thread;
use std::time::{Duration, Instant};

use irpad_shared::buffer::PageBuffer;
use irpad_shared::protocol::{
    Buttons, ConnectionRole, ConnectionStatus, DeviceStatusSnapshot, PollingRequest, SlotHeader, TelemetryPacket,
    ACCESSORY_DEVICE_ID, PACKET_HEADER_SIZE,
};
use irpad_shared::traits::{IrService, Notification, ServiceError, ServiceResult, WaitOutcome};
use log::{debug, info, warn};

/// Result code for a send without a link
pub const ERR_NOT_CONNECTED: u32 = 0xC8A1_0C01;
/// Result code for a device class the service does not know
pub const ERR_UNKNOWN_DEVICE: u32 = 0xC8A1_0C02;

/// Behaviour of the emulated accessory
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimConfig {
    /// Time from an accepted connect request to the link coming up
    pub accessory_delay_ms: u64,
    /// Every link drops after this long; `None` keeps it up
    pub drop_link_after_ms: Option<u64>,
    /// Connect requests answered with busy before one is accepted
    pub busy_replies: u8,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            accessory_delay_ms: 40,
            drop_link_after_ms: None,
            busy_replies: 0,
        }
    }
}

/// Source of plausible reports: a stick sweeping back and forth, a slowly
/// draining battery and the R button pressed every few seconds
#[derive(Debug, Default)]
struct Accessory {
    reports: u32,
}

impl Accessory {
    const SWEEP: i32 = 64;
    const AMPLITUDE: i32 = 150;

    fn next_report(&mut self) -> TelemetryPacket {
        let phase = (self.reports % (2 * Self::SWEEP as u32)) as i32;
        let ramp = if phase < Self::SWEEP { phase } else { 2 * Self::SWEEP - phase };
        let dx = (ramp * 2 * Self::AMPLITUDE / Self::SWEEP - Self::AMPLITUDE) as i16;

        let released = Buttons::ZL_UP | Buttons::ZR_UP | Buttons::R_UP;
        let buttons = if (self.reports / 256) % 4 == 1 {
            released & !Buttons::R_UP
        } else {
            released
        };

        let report = TelemetryPacket {
            dx,
            dy: -dx / 2,
            battery_level: 80u16.saturating_sub((self.reports / 1024) as u16),
            status_raw: buttons << Buttons::SHIFT,
            unknown_field: 0,
        };
        self.reports = self.reports.wrapping_add(1);
        report
    }
}

#[derive(Debug, Clone, Copy)]
struct Polling {
    period_ms: u64,
    next_ms: u64,
}

pub struct SimulatedService {
    config: SimConfig,
    epoch: Instant,
    buffer: Option<PageBuffer>,
    status: ConnectionStatus,
    connect_at_ms: Option<u64>,
    drop_at_ms: Option<u64>,
    polling: Option<Polling>,
    status_signal: bool,
    packet_signal: bool,
    busy_left: u8,
    sequence: u32,
    receive_count: u32,
    send_count: u32,
    latest_send_error: u32,
    accessory: Accessory,
}

impl SimulatedService {
    pub fn new(config: SimConfig) -> Self {
        Self {
            config,
            epoch: Instant::now(),
            buffer: None,
            status: ConnectionStatus::Stopped,
            connect_at_ms: None,
            drop_at_ms: None,
            polling: None,
            status_signal: false,
            packet_signal: false,
            busy_left: config.busy_replies,
            sequence: 0,
            receive_count: 0,
            send_count: 0,
            latest_send_error: 0,
            accessory: Accessory::default(),
        }
    }

    /// Reports written into the region so far
    pub fn packets_written(&self) -> u32 {
        self.receive_count
    }

    /// Run every scheduled event that is due
    fn advance(&mut self) {
        let now = self.now_ms();

        if self.connect_at_ms.is_some_and(|at| at <= now) {
            self.connect_at_ms = None;
            self.drop_at_ms = self.config.drop_link_after_ms.map(|d| now + d);
            info!("Accessory answered, link up");
            self.set_status(ConnectionStatus::Connected);
        }

        if self.drop_at_ms.is_some_and(|at| at <= now) {
            info!("Accessory out of range, link down");
            self.drop_at_ms = None;
            self.polling = None;
            self.set_status(ConnectionStatus::Stopped);
        }

        let Some(mut polling) = self.polling else {
            return;
        };
        if self.status != ConnectionStatus::Connected || now < polling.next_ms {
            return;
        }

        let due = (now - polling.next_ms) / polling.period_ms + 1;
        polling.next_ms += due * polling.period_ms;
        self.polling = Some(polling);

        // After a long stall only the newest reports can still be in the slots
        let slot_count = self.buffer.as_ref().map_or(1, |b| b.geometry().slot_count) as u64;
        for _ in 0..due.min(slot_count) {
            let report = self.accessory.next_report();
            self.write_report(&report);
        }
    }

    fn write_report(&mut self, report: &TelemetryPacket) {
        let sequence = self.sequence;
        let Some(buffer) = self.buffer.as_mut() else {
            return;
        };

        let slot = buffer.receive_slot_mut(sequence as usize);
        let written = report
            .encode(&mut slot[PACKET_HEADER_SIZE..])
            .and_then(|len| {
                SlotHeader {
                    occupied: true,
                    payload_len: len as u16,
                    sequence,
                }
                .write(slot)
            });
        if let Err(e) = written {
            warn!("Report {} not written: {}", sequence, e);
            return;
        }

        self.sequence = self.sequence.wrapping_add(1);
        self.receive_count = self.receive_count.wrapping_add(1);
        self.packet_signal = true;
        self.sync_header();
    }

    fn set_status(&mut self, status: ConnectionStatus) {
        if status != self.status {
            debug!("Service status {:?} -> {:?}", self.status, status);
            self.status = status;
            self.status_signal = true;
        }
        self.sync_header();
    }

    fn sync_header(&mut self) {
        let connected = self.status == ConnectionStatus::Connected;
        let snapshot = DeviceStatusSnapshot {
            latest_send_error: self.latest_send_error,
            status: self.status,
            trying_to_connect: self.status.is_pending(),
            role: if connected { ConnectionRole::Host } else { ConnectionRole::None },
            local_id: if connected { 0x01 } else { 0 },
            target_id: if connected { 0x02 } else { 0 },
            network_id: if connected { 0x2A } else { 0 },
            receive_count: self.receive_count,
            send_count: self.send_count,
            ..DeviceStatusSnapshot::empty()
        };
        if let Some(buffer) = self.buffer.as_mut() {
            if let Err(e) = snapshot.write(buffer.header_mut()) {
                warn!("Status header not written: {}", e);
            }
        }
    }

    fn write_send_slot(&mut self, data: &[u8]) {
        let index = self.send_count as usize;
        let Some(buffer) = self.buffer.as_mut() else {
            return;
        };
        let slot = buffer.send_slot_mut(index);
        let len = data.len().min(slot.len() - PACKET_HEADER_SIZE);
        slot[PACKET_HEADER_SIZE..PACKET_HEADER_SIZE + len].copy_from_slice(&data[..len]);
        let header = SlotHeader {
            occupied: true,
            payload_len: len as u16,
            sequence: self.send_count,
        };
        if let Err(e) = header.write(slot) {
            warn!("Send slot not written: {}", e);
        }
    }
}

impl IrService for SimulatedService {
    fn register(&mut self, mut buffer: PageBuffer) -> ServiceResult<()> {
        if self.buffer.is_some() {
            return Err(ServiceError::Busy);
        }
        buffer.clear();
        self.buffer = Some(buffer);
        self.sync_header();
        Ok(())
    }

    fn unregister(&mut self) -> Option<PageBuffer> {
        self.polling = None;
        self.connect_at_ms = None;
        self.drop_at_ms = None;
        self.status = ConnectionStatus::Stopped;
        self.buffer.take()
    }

    fn region(&self) -> Option<&[u8]> {
        self.buffer.as_ref().map(|b| b.as_slice())
    }

    fn require_connection(&mut self, device_id: u8) -> ServiceResult<()> {
        if self.buffer.is_none() {
            return Err(ServiceError::NotInitialized);
        }
        if self.busy_left > 0 {
            self.busy_left -= 1;
            return Err(ServiceError::Busy);
        }
        if device_id != ACCESSORY_DEVICE_ID {
            return Err(ServiceError::Rejected(ERR_UNKNOWN_DEVICE));
        }
        if self.status != ConnectionStatus::Stopped {
            return Err(ServiceError::Busy);
        }

        self.connect_at_ms = Some(self.now_ms() + self.config.accessory_delay_ms);
        self.set_status(ConnectionStatus::TryingToConnect);
        // Entering the attempt is not a change the caller waits for
        self.status_signal = false;
        Ok(())
    }

    fn disconnect(&mut self) -> ServiceResult<()> {
        if self.buffer.is_none() {
            return Err(ServiceError::NotInitialized);
        }
        self.connect_at_ms = None;
        self.drop_at_ms = None;
        self.polling = None;
        self.set_status(ConnectionStatus::Stopped);
        self.status_signal = true;
        Ok(())
    }

    fn connection_status(&mut self) -> ServiceResult<ConnectionStatus> {
        self.advance();
        Ok(self.status)
    }

    fn connection_role(&mut self) -> ServiceResult<ConnectionRole> {
        Ok(if self.status == ConnectionStatus::Connected {
            ConnectionRole::Host
        } else {
            ConnectionRole::None
        })
    }

    fn send(&mut self, data: &[u8]) -> ServiceResult<()> {
        self.advance();
        if self.status != ConnectionStatus::Connected {
            self.latest_send_error = ERR_NOT_CONNECTED;
            self.sync_header();
            return Err(ServiceError::Rejected(ERR_NOT_CONNECTED));
        }

        if let Some(request) = PollingRequest::parse(data) {
            let period_ms = u64::from(request.period_ms.max(1));
            debug!("Accessory polling every {} ms", period_ms);
            self.polling = Some(Polling {
                period_ms,
                next_ms: self.now_ms() + period_ms,
            });
        }

        self.write_send_slot(data);
        self.send_count = self.send_count.wrapping_add(1);
        self.sync_header();
        Ok(())
    }

    fn wait(&mut self, notification: Notification, timeout_ms: u32) -> ServiceResult<WaitOutcome> {
        if self.buffer.is_none() {
            return Err(ServiceError::NotInitialized);
        }

        let deadline = self.now_ms() + u64::from(timeout_ms);
        loop {
            self.advance();
            let signal = match notification {
                Notification::ConnectionStatus => &mut self.status_signal,
                Notification::PacketReceived => &mut self.packet_signal,
            };
            if *signal {
                *signal = false;
                return Ok(WaitOutcome::Signaled);
            }

            let now = self.now_ms();
            if now >= deadline {
                return Ok(WaitOutcome::TimedOut);
            }
            thread::sleep(Duration::from_millis((deadline - now).min(1)));
        }
    }

    fn now_ms(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }
}
