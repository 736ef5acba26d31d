use std::time::{Duration, Instant};

use discord_gateway::testing::{
    MockConnection, MockGateway, MockTransport, frame_op, frame_value, wait_for_phase,
};
use discord_gateway::{
    ExponentialBackoff, GatewayEndpoint, GatewayPhase, GatewaySession, SessionOptions, TokenSource,
};
use sonic_rs::{JsonValueTrait, Value};

async fn start() -> (
    GatewaySession<MockTransport, ExponentialBackoff>,
    MockGateway,
) {
    let (transport, gateway) = MockTransport::channel_pair();
    let session = GatewaySession::connect_with_policy(
        transport,
        GatewayEndpoint::new("gateway.test.local"),
        TokenSource::Inline("T".to_string()),
        SessionOptions::default(),
        ExponentialBackoff::new(Duration::from_millis(10), Duration::from_millis(50), 2.0),
    )
    .await
    .expect("session start");
    (session, gateway)
}

/// Receive frames until one with the wanted opcode shows up (heartbeats
/// may interleave).
async fn recv_op(conn: &mut MockConnection, op: u64, timeout: Duration) -> Value {
    let deadline = Instant::now() + timeout;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        let frame = conn
            .recv_timeout(remaining)
            .await
            .unwrap_or_else(|| panic!("no op {op} frame within {timeout:?}"));
        if frame_op(&frame) == Some(op) {
            return frame_value(&frame).expect("frame json");
        }
    }
}

async fn establish_ready(
    session: &GatewaySession<MockTransport, ExponentialBackoff>,
    conn: &mut MockConnection,
    interval_ms: u64,
) {
    assert!(conn.hello(interval_ms));
    let _identify = recv_op(conn, 2, Duration::from_secs(2)).await;
    assert!(conn.dispatch(
        "READY",
        41,
        r#"{"session_id":"abc","resume_gateway_url":"wss://resume.test.local","guilds":[]}"#,
    ));
    wait_for_phase(session, GatewayPhase::Ready, Duration::from_secs(2)).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn server_requested_reconnect_resumes_with_retained_session() {
    let (session, mut gateway) = start().await;
    let mut conn = gateway.accept().await;
    establish_ready(&session, &mut conn, 60_000).await;

    conn.dispatch("MESSAGE_CREATE", 42, r#"{"id":"9","content":"hi"}"#);
    let deadline = Instant::now() + Duration::from_secs(1);
    while session.sequence() != Some(42) {
        assert!(Instant::now() < deadline, "sequence never reached 42");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    assert!(conn.request_reconnect());

    // The engine reopens against the resume URL READY handed back.
    let mut replacement = gateway
        .accept_timeout(Duration::from_secs(2))
        .await
        .expect("reconnect attempt");
    assert!(
        replacement.url().starts_with("wss://resume.test.local/?v=6"),
        "resume should use the resume gateway url, got {}",
        replacement.url()
    );

    assert!(replacement.hello(60_000));
    let resume = recv_op(&mut replacement, 6, Duration::from_secs(2)).await;
    assert_eq!(resume.get("d").get("token").as_str(), Some("T"));
    assert_eq!(resume.get("d").get("session_id").as_str(), Some("abc"));
    assert_eq!(resume.get("d").get("seq").as_u64(), Some(42));

    session.close().await.expect("close");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn transport_drop_resumes_and_applies_the_replay() {
    let (session, mut gateway) = start().await;
    let mut conn = gateway.accept().await;
    establish_ready(&session, &mut conn, 60_000).await;

    conn.dispatch("MESSAGE_CREATE", 42, r#"{}"#);
    let deadline = Instant::now() + Duration::from_secs(1);
    while session.sequence() != Some(42) {
        assert!(Instant::now() < deadline, "sequence never reached 42");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    // Socket dies without a close frame.
    conn.sever();

    let mut replacement = gateway
        .accept_timeout(Duration::from_secs(2))
        .await
        .expect("reconnect attempt");
    assert!(replacement.hello(60_000));
    let resume = recv_op(&mut replacement, 6, Duration::from_secs(2)).await;
    assert_eq!(resume.get("d").get("seq").as_u64(), Some(42));

    // Replay catches the session up; RESUMED closes the handshake.
    replacement.dispatch("MESSAGE_CREATE", 43, r#"{}"#);
    let deadline = Instant::now() + Duration::from_secs(1);
    while session.sequence() != Some(43) {
        assert!(Instant::now() < deadline, "replay never applied");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    replacement.send_json(r#"{"op":0,"t":"RESUMED","s":44,"d":null}"#);
    wait_for_phase(&session, GatewayPhase::Ready, Duration::from_secs(2)).await;

    session.close().await.expect("close");
}
