//! Console rendering of snapshots, events and the status report.

use serde::Serialize;

use irpad_shared::channel::ChannelStats;
use irpad_shared::protocol::{ConnectionStatus, TelemetryPacket};
use irpad_shared::publisher::{FailureReason, LinkStats, Phase, PublisherEvent, StatePublisher};
use irpad_shared::session::ConnectionState;
use irpad_shared::traits::IrService;

use crate::DemoError;

/// One telemetry line, fixed-width hex
pub fn render_snapshot(packet: &TelemetryPacket) -> String {
    format!(
        "dx:{:04x} dy:{:04x} bat:{:04x} btn:{:03x} unk:{:02x}",
        packet.dx as u16,
        packet.dy as u16,
        packet.battery_level,
        packet.buttons().bits(),
        packet.unknown_field
    )
}

pub fn render_event(event: &PublisherEvent) -> String {
    match event {
        PublisherEvent::AttemptStarted { attempt } => format!("Attempting to connect (attempt {attempt})..."),
        PublisherEvent::Busy { retry_in_ms } => format!("Service busy, retrying in {retry_in_ms} ms"),
        PublisherEvent::Connected => "Accessory connected.".to_string(),
        PublisherEvent::PollingArmed { period_ms } => format!("Polling every {period_ms} ms."),
        PublisherEvent::PollingFailed(e) => format!("Polling request failed: {e}"),
        PublisherEvent::AttemptFailed(reason) => format!(
            "Connection failed ({}). Enter 'retry' to try again or 'quit' to stop.",
            render_failure(reason)
        ),
        PublisherEvent::LinkLost => "Link lost.".to_string(),
        PublisherEvent::Status(status) => format!(
            "Connection status is {} ({:?}), trying:{} rx:{} tx:{}",
            status.status as u8, status.status, status.trying_to_connect, status.receive_count, status.send_count
        ),
        PublisherEvent::Role(role) => format!("Connection role is {} ({:?})", *role as u8, role),
        PublisherEvent::QueryFailed(e) => format!("Query failed: {e}"),
        PublisherEvent::Cancelled => "Stopped.".to_string(),
    }
}

fn render_failure(reason: &FailureReason) -> String {
    match reason {
        FailureReason::Timeout => "timed out".to_string(),
        FailureReason::NotConnected => "accessory did not answer".to_string(),
        FailureReason::Rejected(code) => format!("rejected: {code:#010x}"),
        FailureReason::BusyExhausted => "service stayed busy".to_string(),
        FailureReason::LinkLost => "link lost".to_string(),
        FailureReason::Session(e) => e.to_string(),
    }
}

/// Machine-readable summary of the link
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub version: &'static str,
    pub phase: Phase,
    pub connection: ConnectionState,
    pub service_status: Option<ConnectionStatus>,
    pub snapshot: Option<TelemetryPacket>,
    pub link: LinkStats,
    pub channel: ChannelStats,
    pub polling_arms: u32,
}

impl StatusReport {
    pub fn collect<S: IrService>(publisher: &StatePublisher<S>) -> Self {
        Self {
            version: irpad_shared::VERSION,
            phase: publisher.phase(),
            connection: publisher.connection_state(),
            service_status: publisher.session().status_snapshot().ok().map(|s| s.status),
            snapshot: publisher.snapshot().copied(),
            link: publisher.stats(),
            channel: publisher.channel_stats(),
            polling_arms: publisher.polling().arm_count(),
        }
    }

    pub fn to_json(&self) -> Result<String, DemoError> {
        Ok(serde_json::to_string(self)?)
    }
}
