//! Transport session lifecycle against the mock service.

use crate::mock_service::{page, MockService, ServiceCall};

use irpad_shared::polling::PollingScheduler;
use irpad_shared::protocol::{ConnectionRole, ConnectionStatus};
use irpad_shared::session::{ConnectionState, SessionError, TransportSession};
use irpad_shared::traits::{Notification, ServiceError, WaitOutcome};

fn open(service: MockService) -> TransportSession<MockService> {
    TransportSession::open(service, page(1)).unwrap()
}

/// Request and wait until the mock reports the link up
fn connected() -> TransportSession<MockService> {
    let mut session = open(MockService::new());
    session.request_connection(1).unwrap();
    assert_eq!(session.wait_for_status_change(100).unwrap(), WaitOutcome::Signaled);
    assert_eq!(session.refresh_status().unwrap(), ConnectionState::Connected);
    session
}

#[test]
fn open_registers_and_close_returns_region() {
    let session = open(MockService::new());
    assert_eq!(session.query_status(), ConnectionState::Idle);
    assert_eq!(session.service().calls, vec![ServiceCall::Register]);

    let (service, buffer) = session.close(100);
    assert!(buffer.is_some());
    assert_eq!(service.calls.last(), Some(&ServiceCall::Unregister));
    // Idle session does not disconnect on close
    assert_eq!(service.count(&ServiceCall::Disconnect), 0);
}

#[test]
fn close_while_connected_disconnects_first() {
    let session = connected();
    let (service, _) = session.close(100);

    let disconnect = service.calls.iter().position(|c| *c == ServiceCall::Disconnect);
    let unregister = service.calls.iter().position(|c| *c == ServiceCall::Unregister);
    assert!(disconnect.unwrap() < unregister.unwrap());
}

#[test]
fn request_from_idle_enters_connecting() {
    let mut session = open(MockService::new());
    session.request_connection(1).unwrap();

    assert_eq!(session.query_status(), ConnectionState::Connecting);
    assert_eq!(session.service().count(&ServiceCall::RequireConnection(1)), 1);
}

#[test]
fn second_request_is_busy_and_not_forwarded() {
    let mut session = open(MockService::new());
    session.request_connection(1).unwrap();

    assert_eq!(session.request_connection(1), Err(SessionError::Busy));
    assert_eq!(session.query_status(), ConnectionState::Connecting);
    assert_eq!(session.service().count_requests(), 1);
}

#[test]
fn synchronous_failure_leaves_session_idle() {
    let mut service = MockService::new();
    service.connect_replies.push_back(ServiceError::Rejected(0xE000_0001));
    service.connect_replies.push_back(ServiceError::Busy);
    let mut session = open(service);

    assert_eq!(
        session.request_connection(1),
        Err(SessionError::ServiceRejected(0xE000_0001))
    );
    assert_eq!(session.query_status(), ConnectionState::Idle);

    assert_eq!(session.request_connection(1), Err(SessionError::Busy));
    assert_eq!(session.query_status(), ConnectionState::Idle);

    // The third try goes through
    session.request_connection(1).unwrap();
    assert_eq!(session.query_status(), ConnectionState::Connecting);
}

#[test]
fn status_wait_times_out_within_budget_without_state_change() {
    let mut service = MockService::new();
    service.connect_delay_ms = None;
    let mut session = open(service);
    session.request_connection(1).unwrap();

    let before = session.now_ms();
    assert_eq!(session.wait_for_status_change(40).unwrap(), WaitOutcome::TimedOut);
    let elapsed = session.now_ms() - before;

    assert!(elapsed <= 40 + 1, "wait took {elapsed} ms");
    assert_eq!(session.query_status(), ConnectionState::Connecting);
}

#[test]
fn wait_alone_never_changes_state() {
    let mut session = open(MockService::new());
    session.request_connection(1).unwrap();

    assert_eq!(session.wait_for_status_change(100).unwrap(), WaitOutcome::Signaled);
    // Connected only after the caller reads the status
    assert_eq!(session.query_status(), ConnectionState::Connecting);
    assert_eq!(session.refresh_status().unwrap(), ConnectionState::Connected);
}

#[test]
fn refresh_while_trying_keeps_connecting() {
    let mut service = MockService::new();
    service.connect_delay_ms = None;
    let mut session = open(service);
    session.request_connection(1).unwrap();

    assert_eq!(session.refresh_status().unwrap(), ConnectionState::Connecting);
}

#[test]
fn failed_attempt_is_cleared_by_disconnect() {
    let mut service = MockService::new();
    service.fail_connect = true;
    let mut session = open(service);
    session.request_connection(1).unwrap();
    session.wait_for_status_change(100).unwrap();

    assert_eq!(session.refresh_status().unwrap(), ConnectionState::Failed);
    session.disconnect(100).unwrap();
    assert_eq!(session.query_status(), ConnectionState::Idle);
    assert_eq!(session.service().count(&ServiceCall::Disconnect), 1);
}

#[test]
fn link_drop_returns_to_idle() {
    let mut session = connected();
    session.service_mut().drop_link();

    assert_eq!(session.wait_for_status_change(10).unwrap(), WaitOutcome::Signaled);
    assert_eq!(session.refresh_status().unwrap(), ConnectionState::Idle);
}

#[test]
fn disconnect_from_idle_is_a_no_op() {
    let mut session = open(MockService::new());
    session.disconnect(100).unwrap();
    session.disconnect(100).unwrap();

    assert_eq!(session.service().count(&ServiceCall::Disconnect), 0);
}

#[test]
fn busy_disconnect_keeps_previous_state() {
    let mut session = connected();
    session.service_mut().disconnect_replies.push_back(ServiceError::Busy);

    assert_eq!(session.disconnect(100), Err(SessionError::Busy));
    assert_eq!(session.query_status(), ConnectionState::Connected);

    session.disconnect(100).unwrap();
    assert_eq!(session.query_status(), ConnectionState::Idle);
}

#[test]
fn rejected_disconnect_still_ends_idle() {
    let mut session = connected();
    session
        .service_mut()
        .disconnect_replies
        .push_back(ServiceError::Rejected(3));

    assert_eq!(session.disconnect(100), Err(SessionError::ServiceRejected(3)));
    assert_eq!(session.query_status(), ConnectionState::Idle);
}

#[test]
fn disconnect_waits_for_confirmation() {
    let mut session = connected();
    session.disconnect(75).unwrap();

    assert!(session
        .service()
        .calls
        .contains(&ServiceCall::Wait(Notification::ConnectionStatus, 75)));
}

#[test]
fn role_is_only_available_when_connected() {
    let mut session = open(MockService::new());
    assert_eq!(session.query_role(), Err(SessionError::NotConnected));

    let mut session = connected();
    assert_eq!(session.query_role(), Ok(ConnectionRole::Accessory));
}

#[test]
fn status_snapshot_reads_the_header() {
    let session = connected();
    let snapshot = session.status_snapshot().unwrap();

    assert_eq!(snapshot.status, ConnectionStatus::Connected);
    assert!(!snapshot.trying_to_connect);
    assert_eq!(snapshot.role, ConnectionRole::Accessory);
    assert_eq!(snapshot.local_id, 0x10);
    assert_eq!(snapshot.target_id, 0x20);
    assert_eq!(snapshot.network_id, 0x30);
}

#[test]
fn send_requires_connection() {
    let mut session = open(MockService::new());
    assert_eq!(session.send(&[1, 2, 3]), Err(SessionError::NotConnected));
    assert!(session.service().sent().is_empty());
}

#[test]
fn polling_arms_only_when_connected() {
    let mut polling = PollingScheduler::new();
    let mut session = open(MockService::new());
    assert_eq!(polling.arm(&mut session, 8), Err(SessionError::NotConnected));
    assert!(!polling.is_armed());

    let mut session = connected();
    assert_eq!(polling.arm(&mut session, 0), Err(SessionError::InvalidArgument));

    polling.arm(&mut session, 8).unwrap();
    assert!(polling.is_armed());
    assert_eq!(polling.period_ms(), 8);
    assert_eq!(session.service().sent(), vec![vec![0x01, 8, 0x87]]);
}

#[test]
fn polling_failure_leaves_link_up() {
    let mut polling = PollingScheduler::new();
    let mut session = connected();
    session
        .service_mut()
        .send_replies
        .push_back(ServiceError::Rejected(9));

    assert_eq!(polling.arm(&mut session, 8), Err(SessionError::ServiceRejected(9)));
    assert!(!polling.is_armed());
    assert_eq!(polling.arm_count(), 0);
    assert_eq!(session.query_status(), ConnectionState::Connected);
}
