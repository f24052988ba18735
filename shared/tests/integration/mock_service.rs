//! Scripted privileged service for integration tests.
//!
//! Keeps a simulated millisecond clock that only moves inside `wait`, so a
//! test controls time exactly. Every call is recorded for assertions on the
//! full request history.

use std::collections::VecDeque;

use irpad_shared::buffer::{ChannelGeometry, PageBuffer};
use irpad_shared::protocol::{
    ConnectionRole, ConnectionStatus, DeviceStatusSnapshot, SlotHeader, TelemetryPacket, PACKET_HEADER_SIZE,
    TELEMETRY_PAYLOAD_LEN,
};
use irpad_shared::traits::{IrService, Notification, ServiceError, ServiceResult, WaitOutcome};

// ── Call record ───────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum ServiceCall {
    Register,
    Unregister,
    RequireConnection(u8),
    Disconnect,
    ConnectionStatus,
    ConnectionRole,
    Send(Vec<u8>),
    Wait(Notification, u32),
}

// ── MockService ───────────────────────────────────────────────

pub struct MockService {
    pub calls: Vec<ServiceCall>,
    /// Delay between an accepted connect request and the link coming up;
    /// `None` never connects
    pub connect_delay_ms: Option<u64>,
    /// The attempt ends in `Failed` instead of `Connected`
    pub fail_connect: bool,
    /// Replies consumed by `require_connection` before it starts accepting
    pub connect_replies: VecDeque<ServiceError>,
    /// Replies consumed by `send` before it starts accepting
    pub send_replies: VecDeque<ServiceError>,
    /// Replies consumed by `disconnect` before it starts accepting
    pub disconnect_replies: VecDeque<ServiceError>,
    pub role: ConnectionRole,
    buffer: Option<PageBuffer>,
    clock_ms: u64,
    status: ConnectionStatus,
    connect_at_ms: Option<u64>,
    status_signal: bool,
    packet_signal: bool,
    next_sequence: u32,
    receive_count: u32,
    send_count: u32,
}

#[allow(dead_code)]
impl MockService {
    pub fn new() -> Self {
        Self {
            calls: Vec::new(),
            connect_delay_ms: Some(20),
            fail_connect: false,
            connect_replies: VecDeque::new(),
            send_replies: VecDeque::new(),
            disconnect_replies: VecDeque::new(),
            role: ConnectionRole::Accessory,
            buffer: None,
            clock_ms: 0,
            status: ConnectionStatus::Stopped,
            connect_at_ms: None,
            status_signal: false,
            packet_signal: false,
            next_sequence: 0,
            receive_count: 0,
            send_count: 0,
        }
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status
    }

    pub fn count(&self, wanted: &ServiceCall) -> usize {
        self.calls.iter().filter(|c| *c == wanted).count()
    }

    pub fn count_requests(&self) -> usize {
        self.calls
            .iter()
            .filter(|c| matches!(c, ServiceCall::RequireConnection(_)))
            .count()
    }

    /// Payloads passed to `send`, in order
    pub fn sent(&self) -> Vec<Vec<u8>> {
        self.calls
            .iter()
            .filter_map(|c| match c {
                ServiceCall::Send(data) => Some(data.clone()),
                _ => None,
            })
            .collect()
    }

    /// Drop the link and raise the status notification
    pub fn drop_link(&mut self) {
        self.set_status(ConnectionStatus::Stopped);
        self.status_signal = true;
    }

    /// Change the reported status without raising a notification
    pub fn set_status_silently(&mut self, status: ConnectionStatus) {
        self.set_status(status);
    }

    /// Write a well-formed telemetry packet into the next receive slot
    pub fn push_packet(&mut self, packet: &TelemetryPacket) {
        let mut payload = [0u8; TELEMETRY_PAYLOAD_LEN];
        packet.encode(&mut payload).unwrap();
        self.push_payload(TELEMETRY_PAYLOAD_LEN as u16, &payload);
    }

    /// Write a slot declaring `declared_len`, copying as much of `payload` as fits
    pub fn push_payload(&mut self, declared_len: u16, payload: &[u8]) {
        let sequence = self.next_sequence;
        self.next_sequence = self.next_sequence.wrapping_add(1);

        let buffer = self.buffer.as_mut().expect("region registered");
        let slot = buffer.receive_slot_mut(sequence as usize);
        SlotHeader {
            occupied: true,
            payload_len: declared_len,
            sequence,
        }
        .write(slot)
        .unwrap();
        let room = slot.len() - PACKET_HEADER_SIZE;
        let n = payload.len().min(room);
        slot[PACKET_HEADER_SIZE..PACKET_HEADER_SIZE + n].copy_from_slice(&payload[..n]);

        self.receive_count += 1;
        self.packet_signal = true;
        self.sync_header();
    }

    /// Raise the packet notification without writing anything
    pub fn spurious_packet_signal(&mut self) {
        self.packet_signal = true;
    }

    pub fn clock_ms(&self) -> u64 {
        self.clock_ms
    }

    fn set_status(&mut self, status: ConnectionStatus) {
        self.status = status;
        self.sync_header();
    }

    fn sync_header(&mut self) {
        let snapshot = DeviceStatusSnapshot {
            status: self.status,
            trying_to_connect: self.status.is_pending(),
            role: if self.status == ConnectionStatus::Connected {
                self.role
            } else {
                ConnectionRole::None
            },
            local_id: 0x10,
            target_id: 0x20,
            network_id: 0x30,
            receive_count: self.receive_count,
            send_count: self.send_count,
            ..DeviceStatusSnapshot::empty()
        };
        if let Some(buffer) = self.buffer.as_mut() {
            snapshot.write(buffer.header_mut()).unwrap();
        }
    }
}

impl Default for MockService {
    fn default() -> Self {
        Self::new()
    }
}

impl IrService for MockService {
    fn register(&mut self, buffer: PageBuffer) -> ServiceResult<()> {
        self.calls.push(ServiceCall::Register);
        self.buffer = Some(buffer);
        self.sync_header();
        Ok(())
    }

    fn unregister(&mut self) -> Option<PageBuffer> {
        self.calls.push(ServiceCall::Unregister);
        self.buffer.take()
    }

    fn region(&self) -> Option<&[u8]> {
        self.buffer.as_ref().map(|b| b.as_slice())
    }

    fn require_connection(&mut self, device_id: u8) -> ServiceResult<()> {
        self.calls.push(ServiceCall::RequireConnection(device_id));
        if let Some(reply) = self.connect_replies.pop_front() {
            return Err(reply);
        }
        self.connect_at_ms = self.connect_delay_ms.map(|d| self.clock_ms + d);
        self.set_status(ConnectionStatus::TryingToConnect);
        Ok(())
    }

    fn disconnect(&mut self) -> ServiceResult<()> {
        self.calls.push(ServiceCall::Disconnect);
        if let Some(reply) = self.disconnect_replies.pop_front() {
            return Err(reply);
        }
        self.connect_at_ms = None;
        self.set_status(ConnectionStatus::Stopped);
        self.status_signal = true;
        Ok(())
    }

    fn connection_status(&mut self) -> ServiceResult<ConnectionStatus> {
        self.calls.push(ServiceCall::ConnectionStatus);
        Ok(self.status)
    }

    fn connection_role(&mut self) -> ServiceResult<ConnectionRole> {
        self.calls.push(ServiceCall::ConnectionRole);
        Ok(self.role)
    }

    fn send(&mut self, data: &[u8]) -> ServiceResult<()> {
        self.calls.push(ServiceCall::Send(data.to_vec()));
        if let Some(reply) = self.send_replies.pop_front() {
            return Err(reply);
        }
        self.send_count += 1;
        self.sync_header();
        Ok(())
    }

    fn wait(&mut self, notification: Notification, timeout_ms: u32) -> ServiceResult<WaitOutcome> {
        self.calls.push(ServiceCall::Wait(notification, timeout_ms));
        if self.buffer.is_none() {
            return Err(ServiceError::NotInitialized);
        }

        match notification {
            Notification::ConnectionStatus => {
                if self.status_signal {
                    self.status_signal = false;
                    return Ok(WaitOutcome::Signaled);
                }
                if let Some(at) = self.connect_at_ms {
                    if at <= self.clock_ms + u64::from(timeout_ms) {
                        self.clock_ms = self.clock_ms.max(at);
                        self.connect_at_ms = None;
                        self.set_status(if self.fail_connect {
                            ConnectionStatus::Failed
                        } else {
                            ConnectionStatus::Connected
                        });
                        return Ok(WaitOutcome::Signaled);
                    }
                }
            }
            Notification::PacketReceived => {
                if self.packet_signal {
                    self.packet_signal = false;
                    return Ok(WaitOutcome::Signaled);
                }
            }
        }

        self.clock_ms += u64::from(timeout_ms);
        Ok(WaitOutcome::TimedOut)
    }

    fn now_ms(&self) -> u64 {
        self.clock_ms
    }
}

/// Page region with `slot_count` slots per direction
pub fn page(slot_count: usize) -> PageBuffer {
    PageBuffer::new(ChannelGeometry::new(slot_count)).unwrap()
}
