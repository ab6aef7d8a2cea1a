use std::time::{Duration, Instant};

use kameo::prelude::Actor as _;
use pazar_realtime::testing::{MockTransport, NoToken, StaticToken};
use pazar_realtime::{
    Close, ConnectionState, EnsureConnected, EventBus, ExponentialBackoff, GetConnectionState,
    RealtimeConnection, RealtimeConnectionArgs, RealtimeError, WsFrame,
};

type TestConnection = RealtimeConnection<StaticToken, MockTransport>;
type TestConnectionRef = kameo::prelude::ActorRef<TestConnection>;

// Run with RUST_LOG=pazar_realtime=debug to trace state transitions.
fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn args(transport: MockTransport) -> RealtimeConnectionArgs<StaticToken, MockTransport> {
    RealtimeConnectionArgs {
        url: "ws://mock/ws".to_string(),
        token_provider: StaticToken("testtoken"),
        transport,
        backoff: ExponentialBackoff::new(Duration::from_millis(10), Duration::from_millis(40)),
        bus: EventBus::new(),
        ws_buffers: Default::default(),
        tls: Default::default(),
        outbound_capacity: 16,
    }
}

async fn wait_for_state(conn: &TestConnectionRef, want: ConnectionState, timeout: Duration) {
    let deadline = Instant::now() + timeout;
    loop {
        let state = conn.ask(GetConnectionState).await.expect("get state");
        if state == want {
            return;
        }
        if Instant::now() > deadline {
            panic!("timed out waiting for {want:?}, last state {state:?}");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn socket_drop_triggers_reconnect() {
    init_logging();
    let (transport, mut gateway) = MockTransport::gateway();
    let conn = TestConnection::spawn(args(transport.clone()));

    let _ = conn.tell(EnsureConnected).send().await;
    wait_for_state(&conn, ConnectionState::Open, Duration::from_secs(2)).await;
    let mut session = gateway.next_session().await.expect("first session");

    session.drop_socket();

    // Backoff base is 10ms, so a second session shows up almost immediately.
    let _second = tokio::time::timeout(Duration::from_secs(2), gateway.next_session())
        .await
        .expect("reconnect within deadline")
        .expect("second session");
    wait_for_state(&conn, ConnectionState::Open, Duration::from_secs(2)).await;
    assert!(transport.connect_count() >= 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn clean_close_does_not_reconnect() {
    init_logging();
    let (transport, mut gateway) = MockTransport::gateway();
    let conn = TestConnection::spawn(args(transport.clone()));

    let _ = conn.tell(EnsureConnected).send().await;
    wait_for_state(&conn, ConnectionState::Open, Duration::from_secs(2)).await;
    let session = gateway.next_session().await.expect("session");

    session.send_close(1000);
    wait_for_state(&conn, ConnectionState::ClosedFatal, Duration::from_secs(2)).await;

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(transport.connect_count(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn abnormal_close_code_reconnects() {
    init_logging();
    let (transport, mut gateway) = MockTransport::gateway();
    let conn = TestConnection::spawn(args(transport.clone()));

    let _ = conn.tell(EnsureConnected).send().await;
    wait_for_state(&conn, ConnectionState::Open, Duration::from_secs(2)).await;
    let session = gateway.next_session().await.expect("session");

    session.send_close(1006);
    let _second = tokio::time::timeout(Duration::from_secs(2), gateway.next_session())
        .await
        .expect("reconnect within deadline")
        .expect("second session");
    wait_for_state(&conn, ConnectionState::Open, Duration::from_secs(2)).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn transient_handshake_failures_are_retried_until_open() {
    init_logging();
    let (transport, mut gateway) = MockTransport::gateway();
    transport.fail_next_handshake(RealtimeError::TransportError {
        context: "connect",
        error: "connection refused".to_string(),
    });
    transport.fail_next_handshake(RealtimeError::TransportError {
        context: "connect",
        error: "connection refused".to_string(),
    });
    let conn = TestConnection::spawn(args(transport.clone()));

    let _ = conn.tell(EnsureConnected).send().await;
    wait_for_state(&conn, ConnectionState::Open, Duration::from_secs(2)).await;
    assert!(gateway.next_session().await.is_some());
    assert_eq!(transport.connect_count(), 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn auth_rejection_is_fatal() {
    init_logging();
    let (transport, _gateway) = MockTransport::gateway();
    transport.fail_next_handshake(RealtimeError::HandshakeRejected { status: 401 });
    let conn = TestConnection::spawn(args(transport.clone()));

    let _ = conn.tell(EnsureConnected).send().await;
    wait_for_state(&conn, ConnectionState::ClosedFatal, Duration::from_secs(2)).await;

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(transport.connect_count(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn missing_token_is_fatal_without_dialing() {
    init_logging();
    let (transport, _gateway) = MockTransport::gateway();
    let conn = RealtimeConnection::<NoToken, MockTransport>::spawn(RealtimeConnectionArgs {
        url: "ws://mock/ws".to_string(),
        token_provider: NoToken,
        transport: transport.clone(),
        backoff: ExponentialBackoff::new(Duration::from_millis(10), Duration::from_millis(40)),
        bus: EventBus::new(),
        ws_buffers: Default::default(),
        tls: Default::default(),
        outbound_capacity: 16,
    });

    let _ = conn.tell(EnsureConnected).send().await;

    let deadline = Instant::now() + Duration::from_secs(2);
    loop {
        let state = conn.ask(GetConnectionState).await.expect("get state");
        if state == ConnectionState::ClosedFatal {
            break;
        }
        if Instant::now() > deadline {
            panic!("timed out waiting for ClosedFatal, last state {state:?}");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    // The transport was never dialed; there was no credential to present.
    assert_eq!(transport.connect_count(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn intentional_close_sends_close_frame_and_suppresses_retry() {
    init_logging();
    let (transport, mut gateway) = MockTransport::gateway();
    let conn = TestConnection::spawn(args(transport.clone()));

    let _ = conn.tell(EnsureConnected).send().await;
    wait_for_state(&conn, ConnectionState::Open, Duration::from_secs(2)).await;
    let mut session = gateway.next_session().await.expect("session");

    let _ = conn.tell(Close { intentional: true }).send().await;
    wait_for_state(&conn, ConnectionState::ClosedFatal, Duration::from_secs(2)).await;

    match tokio::time::timeout(Duration::from_secs(1), session.recv_outbound()).await {
        Ok(Some(WsFrame::Close(Some(frame)))) => assert_eq!(frame.code, 1000),
        other => panic!("expected close frame, got {other:?}"),
    }

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(transport.connect_count(), 1);

    // Closing twice is harmless.
    let _ = conn.tell(Close { intentional: true }).send().await;
    wait_for_state(&conn, ConnectionState::ClosedFatal, Duration::from_secs(1)).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn intentional_close_cancels_pending_retry_timer() {
    init_logging();
    let (transport, mut gateway) = MockTransport::gateway();
    let mut cfg = args(transport.clone());
    // Long enough that the retry timer is still pending when we close.
    cfg.backoff = ExponentialBackoff::new(Duration::from_millis(500), Duration::from_secs(1));
    let conn = TestConnection::spawn(cfg);

    let _ = conn.tell(EnsureConnected).send().await;
    wait_for_state(&conn, ConnectionState::Open, Duration::from_secs(2)).await;
    let mut session = gateway.next_session().await.expect("session");

    session.drop_socket();
    wait_for_state(&conn, ConnectionState::ClosedRetryable, Duration::from_secs(2)).await;

    let _ = conn.tell(Close { intentional: true }).send().await;
    wait_for_state(&conn, ConnectionState::ClosedFatal, Duration::from_secs(2)).await;

    tokio::time::sleep(Duration::from_millis(700)).await;
    assert_eq!(transport.connect_count(), 1);
}
