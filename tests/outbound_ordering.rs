use std::time::{Duration, Instant};

use discord_gateway::testing::{
    MockConnection, MockGateway, MockTransport, NoReconnect, frame_op, frame_value, wait_for_phase,
};
use discord_gateway::{GatewayEndpoint, GatewayPhase, GatewaySession, SessionOptions, TokenSource};
use sonic_rs::{JsonValueTrait, Value};

async fn start() -> (GatewaySession<MockTransport, NoReconnect>, MockGateway) {
    let (transport, gateway) = MockTransport::channel_pair();
    let session = GatewaySession::connect_with_policy(
        transport,
        GatewayEndpoint::new("gateway.test.local"),
        TokenSource::Inline("T".to_string()),
        SessionOptions::default(),
        NoReconnect,
    )
    .await
    .expect("session start");
    (session, gateway)
}

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

fn presence(tag: u64) -> Value {
    sonic_rs::from_str(&format!(r#"{{"status":"online","tag":{tag}}}"#)).expect("json")
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn user_frames_and_heartbeats_share_one_serialized_writer() {
    let (session, mut gateway) = start().await;
    let mut conn = gateway.accept().await;

    // Heartbeat due within 100 ms while the consumer floods presence
    // updates: the writer must emit all of them as whole frames, presence
    // order preserved, heartbeat by its deadline.
    assert!(conn.hello(100));
    let _identify = recv_op(&mut conn, 2, Duration::from_secs(2)).await;
    conn.dispatch("READY", 1, r#"{"session_id":"abc","guilds":[]}"#);
    wait_for_phase(&session, GatewayPhase::Ready, Duration::from_secs(2)).await;

    for tag in 1..=3u64 {
        session.update_presence(presence(tag)).await.expect("send");
    }

    let mut presence_tags = Vec::new();
    let mut heartbeats = 0;
    let deadline = Instant::now() + Duration::from_millis(500);
    while (presence_tags.len() < 3 || heartbeats == 0) && Instant::now() < deadline {
        let remaining = deadline.saturating_duration_since(Instant::now());
        let Some(frame) = conn.recv_timeout(remaining).await else {
            break;
        };
        // every frame parses standalone: no interleaved bytes on the wire
        let value = frame_value(&frame).expect("whole json frame");
        match frame_op(&frame) {
            Some(3) => presence_tags.push(value.get("d").get("tag").as_u64().expect("tag")),
            Some(1) => {
                heartbeats += 1;
                conn.heartbeat_ack();
            }
            other => panic!("unexpected opcode {other:?}"),
        }
    }

    assert_eq!(presence_tags, vec![1, 2, 3], "presence order must hold");
    assert!(heartbeats >= 1, "heartbeat missed its deadline");

    session.close().await.expect("close");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn close_drains_pending_frames_and_silences_the_wire() {
    let (session, mut gateway) = start().await;
    let mut conn = gateway.accept().await;

    assert!(conn.hello(600_000));
    let _identify = recv_op(&mut conn, 2, Duration::from_secs(2)).await;
    conn.dispatch("READY", 1, r#"{"session_id":"abc","guilds":[]}"#);
    wait_for_phase(&session, GatewayPhase::Ready, Duration::from_secs(2)).await;

    session.update_presence(presence(7)).await.expect("send");
    session.close().await.expect("close");

    // Everything accepted before close() was flushed...
    let mut saw_presence = false;
    while let Some(frame) = conn.recv_timeout(Duration::from_millis(200)).await {
        if frame_op(&frame) == Some(3) {
            saw_presence = true;
        }
    }
    assert!(saw_presence, "pending frame was dropped by close");

    // ...and the writer is gone: the wire stays silent forever after.
    assert!(
        conn.recv_timeout(Duration::from_millis(100)).await.is_none(),
        "frame written after close returned"
    );
}
