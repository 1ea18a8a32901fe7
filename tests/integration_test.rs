//! Integration tests for the session flow over a scripted transport.

mod common;

use serial_test::serial;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use btle_remote::bluetooth::att;
use btle_remote::bluetooth::{
    AdapterGuard, AttResponse, ConnectionState, SessionError, SessionManager,
};
use btle_remote::protocol::{ArgumentShape, Command, CommandBuilder, Number};
use common::{fast_config, shared, ConnectBehavior, DiscoveryBehavior, MockTransport, VALUE_HANDLE};

const ADDRESS: &str = "00:11:22:33:44:55";
const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(1);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    condition()
}

#[test]
#[serial(adapter)]
fn test_connect_establishes_session() {
    let transport = shared(MockTransport::new());
    let session = SessionManager::new(transport.clone(), fast_config()).unwrap();

    assert_eq!(session.state(), ConnectionState::Idle);
    session.connect_to(ADDRESS, CONNECT_TIMEOUT).unwrap();

    assert!(session.is_connected());
    assert_eq!(session.state(), ConnectionState::Established);
    assert_eq!(MockTransport::count(&transport.connect_calls), 1);
    assert!(transport.subscribed.lock().is_some());
}

#[test]
#[serial(adapter)]
fn test_resource_busy_resets_adapter_and_retries() {
    let transport = shared(
        MockTransport::new()
            .script_connects(&[ConnectBehavior::FailAsync(16), ConnectBehavior::Succeed]),
    );
    let session = SessionManager::new(transport.clone(), fast_config()).unwrap();

    session.connect_to(ADDRESS, CONNECT_TIMEOUT).unwrap();

    assert!(session.is_connected());
    assert_eq!(MockTransport::count(&transport.connect_calls), 2);
    assert_eq!(MockTransport::count(&transport.reset_calls), 1);
}

#[test]
#[serial(adapter)]
fn test_operation_aborted_is_retried_without_reset() {
    let transport = shared(
        MockTransport::new()
            .script_connects(&[ConnectBehavior::FailSync(130), ConnectBehavior::Succeed]),
    );
    let session = SessionManager::new(transport.clone(), fast_config()).unwrap();

    session.connect_to(ADDRESS, CONNECT_TIMEOUT).unwrap();

    assert_eq!(MockTransport::count(&transport.connect_calls), 2);
    assert_eq!(MockTransport::count(&transport.reset_calls), 0);
}

#[test]
#[serial(adapter)]
fn test_unknown_error_is_retried() {
    let transport = shared(
        MockTransport::new()
            .script_connects(&[ConnectBehavior::FailAsync(111), ConnectBehavior::Succeed]),
    );
    let session = SessionManager::new(transport.clone(), fast_config()).unwrap();

    session.connect_to(ADDRESS, CONNECT_TIMEOUT).unwrap();
    assert_eq!(MockTransport::count(&transport.connect_calls), 2);
}

#[test]
#[serial(adapter)]
fn test_host_unreachable_is_fatal() {
    let transport = shared(MockTransport::new().script_connects(&[ConnectBehavior::FailAsync(148)]));
    let session = SessionManager::new(transport.clone(), fast_config()).unwrap();

    match session.connect_to(ADDRESS, CONNECT_TIMEOUT) {
        Err(SessionError::Fatal(e)) => assert!(e.is_host_unreachable()),
        other => panic!("unexpected result: {:?}", other),
    }
    assert_eq!(MockTransport::count(&transport.connect_calls), 1);
    assert_eq!(session.state(), ConnectionState::Idle);
    assert!(session.last_error().is_none());
}

#[test]
#[serial(adapter)]
fn test_discovery_failure_is_retried() {
    let transport = shared(
        MockTransport::new()
            .script_discoveries(&[DiscoveryBehavior::Fail(5), DiscoveryBehavior::Succeed]),
    );
    let session = SessionManager::new(transport.clone(), fast_config()).unwrap();

    session.connect_to(ADDRESS, CONNECT_TIMEOUT).unwrap();

    assert!(session.is_connected());
    assert_eq!(MockTransport::count(&transport.connect_calls), 1);
    // The first attribute client is replaced before the second discovery.
    assert_eq!(MockTransport::count(&transport.released_attributes), 1);
}

#[test]
#[serial(adapter)]
fn test_connect_times_out_when_transport_is_silent() {
    let transport = shared(MockTransport::new().script_connects(&[ConnectBehavior::Never]));
    let session = SessionManager::new(transport.clone(), fast_config()).unwrap();

    let timeout = Duration::from_millis(100);
    let start = Instant::now();
    let result = session.connect_to(ADDRESS, timeout);

    assert!(matches!(result, Err(SessionError::Timeout(_))));
    assert!(start.elapsed() >= timeout);
    assert_eq!(session.state(), ConnectionState::Idle);
    assert!(!session.is_connected());
    assert_eq!(MockTransport::count(&transport.released_channels), 1);
}

#[test]
#[serial(adapter)]
fn test_late_connect_completion_is_ignored() {
    let transport = shared(MockTransport::new().script_connects(&[ConnectBehavior::Never]));
    let session = SessionManager::new(transport.clone(), fast_config()).unwrap();

    assert!(session.connect_to(ADDRESS, Duration::from_millis(50)).is_err());

    let channel = transport.last_channel.lock().unwrap();
    transport.sink().connect_completed(channel, Ok(()));
    std::thread::sleep(Duration::from_millis(50));

    assert_eq!(session.state(), ConnectionState::Idle);
    assert!(!session.is_connected());
}

#[test]
#[serial(adapter)]
fn test_late_discovery_completion_is_ignored() {
    let transport = shared(MockTransport::new().script_discoveries(&[DiscoveryBehavior::Never]));
    let session = SessionManager::new(transport.clone(), fast_config()).unwrap();

    assert!(session.connect_to(ADDRESS, Duration::from_millis(100)).is_err());

    let token = transport.last_discovery.lock().unwrap();
    transport.sink().discovery_completed(token, Ok(VALUE_HANDLE));
    std::thread::sleep(Duration::from_millis(50));

    assert_eq!(session.state(), ConnectionState::Idle);
    assert!(!session.is_connected());

    // A fresh attempt is not disturbed by the stale handles.
    session.connect_to(ADDRESS, CONNECT_TIMEOUT).unwrap();
    assert!(session.is_connected());
}

#[test]
#[serial(adapter)]
fn test_connect_while_connected_is_rejected() {
    let transport = shared(MockTransport::new());
    let session = SessionManager::new(transport.clone(), fast_config()).unwrap();
    session.connect_to(ADDRESS, CONNECT_TIMEOUT).unwrap();

    assert!(matches!(
        session.connect_to(ADDRESS, CONNECT_TIMEOUT),
        Err(SessionError::AlreadyConnected)
    ));
    assert_eq!(MockTransport::count(&transport.connect_calls), 1);
}

#[test]
#[serial(adapter)]
fn test_send_and_read_line_over_split_notifications() {
    let transport = shared(MockTransport::echoing(3));
    let session = SessionManager::new(transport.clone(), fast_config()).unwrap();
    session.connect_to(ADDRESS, CONNECT_TIMEOUT).unwrap();

    session.send(b"MOV 10,-20\r", Duration::from_secs(1)).unwrap();
    let line = session.read_line(Duration::from_secs(1)).unwrap();

    assert_eq!(line, "MOV 10,-20");
    assert_eq!(transport.writes.lock().as_slice(), &[b"MOV 10,-20\r".to_vec()]);
}

#[test]
#[serial(adapter)]
fn test_command_round_trip_through_session() {
    let transport = shared(MockTransport::echoing(4));
    let session = SessionManager::new(transport.clone(), fast_config()).unwrap();
    session.connect_to(ADDRESS, CONNECT_TIMEOUT).unwrap();

    let mut builder = CommandBuilder::new("SET").unwrap();
    builder.add_string("speed").unwrap();
    builder.add_string("fast").unwrap();
    let wire = builder.build().unwrap();
    session.send(&wire, Duration::from_secs(1)).unwrap();

    let command = session.read_command(Duration::from_secs(1)).unwrap();
    assert!(command.is("SET"));
    assert_eq!(command.string(0), Some("speed"));
    assert_eq!(command.string(1), Some("fast"));

    let reply = Command::new(
        "POS",
        ArgumentShape::Numbers(vec![Number::from(1), Number::from(2.5)]),
    ).unwrap();
    session.send_command(&reply, Duration::from_secs(1)).unwrap();
    let echoed = session.read_command(Duration::from_secs(1)).unwrap();
    assert_eq!(echoed, reply);
}

#[test]
#[serial(adapter)]
fn test_malformed_line_is_reported() {
    let transport = shared(MockTransport::new());
    let session = SessionManager::new(transport.clone(), fast_config()).unwrap();
    session.connect_to(ADDRESS, CONNECT_TIMEOUT).unwrap();

    transport.push_pdu(att::encode_notification(VALUE_HANDLE, b"bad line\r"));

    match session.read_command(Duration::from_secs(1)) {
        Err(SessionError::MalformedLine(line)) => assert_eq!(line, "bad line"),
        other => panic!("unexpected result: {:?}", other),
    }
}

#[test]
#[serial(adapter)]
fn test_read_line_times_out() {
    let transport = shared(MockTransport::new());
    let session = SessionManager::new(transport.clone(), fast_config()).unwrap();
    session.connect_to(ADDRESS, CONNECT_TIMEOUT).unwrap();

    transport.push_pdu(att::encode_notification(VALUE_HANDLE, b"partial"));

    let timeout = Duration::from_millis(60);
    let start = Instant::now();
    assert!(matches!(
        session.read_line(timeout),
        Err(SessionError::Timeout(_))
    ));
    assert!(start.elapsed() >= timeout);

    // The partial line stays buffered until its terminator arrives.
    transport.push_pdu(att::encode_notification(VALUE_HANDLE, b" line\r"));
    assert_eq!(session.read_line(Duration::from_secs(1)).unwrap(), "partial line");
}

#[test]
#[serial(adapter)]
fn test_empty_line_is_returned() {
    let transport = shared(MockTransport::new());
    let session = SessionManager::new(transport.clone(), fast_config()).unwrap();
    session.connect_to(ADDRESS, CONNECT_TIMEOUT).unwrap();

    transport.push_pdu(att::encode_notification(VALUE_HANDLE, b"\rNEXT\r"));

    assert_eq!(session.read_line(Duration::from_secs(1)).unwrap(), "");
    assert_eq!(session.read_line(Duration::from_secs(1)).unwrap(), "NEXT");
}

#[test]
#[serial(adapter)]
fn test_operations_require_connection() {
    let transport = shared(MockTransport::new());
    let session = SessionManager::new(transport.clone(), fast_config()).unwrap();

    assert!(matches!(
        session.send(b"PNG\r", Duration::from_millis(50)),
        Err(SessionError::NotConnected)
    ));
    assert!(matches!(
        session.read_line(Duration::from_millis(50)),
        Err(SessionError::NotConnected)
    ));
    assert!(matches!(
        session.read_value(Duration::from_millis(50)),
        Err(SessionError::NotConnected)
    ));
    assert!(transport.writes.lock().is_empty());
}

#[test]
#[serial(adapter)]
fn test_send_rejects_empty_payload() {
    let transport = shared(MockTransport::new());
    let session = SessionManager::new(transport.clone(), fast_config()).unwrap();
    session.connect_to(ADDRESS, CONNECT_TIMEOUT).unwrap();

    assert!(matches!(
        session.send(b"", Duration::from_millis(50)),
        Err(SessionError::EmptyPayload)
    ));
}

#[test]
#[serial(adapter)]
fn test_send_reports_write_failure() {
    let mut mock = MockTransport::new();
    mock.write_status = 0x03;
    let transport = shared(mock);
    let session = SessionManager::new(transport.clone(), fast_config()).unwrap();
    session.connect_to(ADDRESS, CONNECT_TIMEOUT).unwrap();

    assert!(matches!(
        session.send(b"PNG\r", Duration::from_secs(1)),
        Err(SessionError::WriteRejected(0x03))
    ));
    // A failed write does not drop the link.
    assert!(session.is_connected());
}

#[test]
#[serial(adapter)]
fn test_read_value() {
    let mut mock = MockTransport::new();
    mock.read_value = b"VER 2\r".to_vec();
    let transport = shared(mock);
    let session = SessionManager::new(transport.clone(), fast_config()).unwrap();
    session.connect_to(ADDRESS, CONNECT_TIMEOUT).unwrap();

    let value = session.read_value(Duration::from_secs(1)).unwrap();
    assert_eq!(value, b"VER 2\r");
}

#[test]
#[serial(adapter)]
fn test_indication_is_confirmed_and_not_buffered() {
    let transport = shared(MockTransport::new());
    let session = SessionManager::new(transport.clone(), fast_config()).unwrap();
    session.connect_to(ADDRESS, CONNECT_TIMEOUT).unwrap();

    transport.push_pdu(att::encode_indication(VALUE_HANDLE, b"IND\r"));

    assert!(wait_until(|| transport.confirmations.lock().len() == 1));
    assert_eq!(transport.confirmations.lock()[0], vec![0x1E]);
    assert!(matches!(
        session.read_line(Duration::from_millis(30)),
        Err(SessionError::Timeout(_))
    ));
}

#[test]
#[serial(adapter)]
fn test_hangup_disconnects_and_allows_reconnect() {
    let transport = shared(MockTransport::new());
    let session = SessionManager::new(transport.clone(), fast_config()).unwrap();
    session.connect_to(ADDRESS, CONNECT_TIMEOUT).unwrap();

    let channel = transport.last_channel.lock().unwrap();
    transport.sink().channel_hangup(channel);

    assert!(wait_until(|| session.state() == ConnectionState::Idle));
    assert!(!session.is_connected());
    assert_eq!(MockTransport::count(&transport.released_channels), 1);

    session.connect_to(ADDRESS, CONNECT_TIMEOUT).unwrap();
    assert!(session.is_connected());
}

#[test]
#[serial(adapter)]
fn test_disconnect_is_idempotent() {
    let transport = shared(MockTransport::new());
    let session = SessionManager::new(transport.clone(), fast_config()).unwrap();
    session.connect_to(ADDRESS, CONNECT_TIMEOUT).unwrap();

    session.disconnect();
    session.disconnect();

    assert_eq!(session.state(), ConnectionState::Idle);
    assert_eq!(MockTransport::count(&transport.released_channels), 1);
    assert_eq!(MockTransport::count(&transport.released_attributes), 1);
}

#[test]
#[serial(adapter)]
fn test_adapter_held_for_session_lifetime() {
    let transport = shared(MockTransport::new());
    {
        let _session = SessionManager::new(transport.clone(), fast_config()).unwrap();
        assert!(AdapterGuard::is_locked());
    }
    assert!(!AdapterGuard::is_locked());

    // A second session can be created once the first is gone.
    let _session = SessionManager::new(transport, fast_config()).unwrap();
    assert!(AdapterGuard::is_locked());
}

#[test]
#[serial(adapter)]
fn test_concurrent_connect_is_rejected() {
    let transport = shared(MockTransport::new().script_connects(&[ConnectBehavior::Never]));
    let session = Arc::new(SessionManager::new(transport.clone(), fast_config()).unwrap());

    let first = {
        let session = session.clone();
        thread::spawn(move || session.connect_to(ADDRESS, Duration::from_millis(300)))
    };
    assert!(wait_until(|| MockTransport::count(&transport.connect_calls) == 1));

    assert!(matches!(
        session.connect_to(ADDRESS, CONNECT_TIMEOUT),
        Err(SessionError::AlreadyConnecting)
    ));
    assert!(matches!(
        first.join().unwrap(),
        Err(SessionError::Timeout(_))
    ));
    assert_eq!(MockTransport::count(&transport.connect_calls), 1);

    // The rejected call leaves no attempt behind.
    session.connect_to(ADDRESS, CONNECT_TIMEOUT).unwrap();
    assert!(session.is_connected());
}

#[test]
#[serial(adapter)]
fn test_late_write_completion_is_ignored() {
    let transport = shared(MockTransport::echoing(8));
    let session = SessionManager::new(transport.clone(), fast_config()).unwrap();
    session.connect_to(ADDRESS, CONNECT_TIMEOUT).unwrap();

    transport.hold_writes.store(true, Ordering::SeqCst);
    assert!(matches!(
        session.send(b"PNG\r", Duration::from_millis(50)),
        Err(SessionError::Timeout(_))
    ));
    let stale = transport.held_writes.lock().pop().unwrap();

    session.disconnect();
    session.connect_to(ADDRESS, CONNECT_TIMEOUT).unwrap();
    transport.hold_writes.store(false, Ordering::SeqCst);

    let sink = transport.sink();
    sink.write_completed(stale.clone(), AttResponse::failure(0x0E));
    sink.read_completed(stale, AttResponse::failure(0x0E));
    std::thread::sleep(Duration::from_millis(50));

    assert!(session.is_connected());
    session.send(b"PNG\r", Duration::from_secs(1)).unwrap();
    assert_eq!(session.read_line(Duration::from_secs(1)).unwrap(), "PNG");
}

#[test]
#[serial(adapter)]
fn test_connect_from_async_context() {
    let transport = shared(
        MockTransport::new()
            .script_connects(&[ConnectBehavior::FailAsync(16), ConnectBehavior::Succeed]),
    );
    let session = SessionManager::new(transport.clone(), fast_config()).unwrap();

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();
    runtime
        .block_on(async { session.connect_to(ADDRESS, CONNECT_TIMEOUT) })
        .unwrap();

    assert!(session.is_connected());
    assert_eq!(MockTransport::count(&transport.reset_calls), 1);
}
