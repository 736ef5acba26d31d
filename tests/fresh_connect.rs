use std::time::{Duration, Instant};

use discord_gateway::GatewayEndpoint;
use discord_gateway::testing::{
    MockGateway, MockTransport, NoReconnect, frame_op, frame_value, wait_for_phase,
};
use discord_gateway::{GatewayPhase, GatewaySession, SessionOptions, TokenSource};
use sonic_rs::JsonValueTrait;

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

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn fresh_connect_identifies_heartbeats_and_reaches_ready() {
    let (mut session, mut gateway) = start().await;

    let mut conn = gateway.accept().await;
    assert!(
        conn.url()
            .starts_with("wss://gateway.test.local/?v=6&encoding=json"),
        "unexpected connect url {}",
        conn.url()
    );

    assert!(conn.hello(300));

    // IDENTIFY must be the first frame, carrying the supplied token.
    let identify = conn
        .recv_timeout(Duration::from_secs(2))
        .await
        .expect("identify frame");
    assert_eq!(frame_op(&identify), Some(2));
    let identify = frame_value(&identify).expect("identify json");
    assert_eq!(identify.get("d").get("token").as_str(), Some("T"));
    assert!(identify.get("d").get("properties").get("os").as_str().is_some());

    // First heartbeat lands within the interval and carries a null
    // sequence; the ack-pending flag is armed until the server answers.
    let heartbeat = conn
        .recv_timeout(Duration::from_secs(1))
        .await
        .expect("heartbeat frame");
    assert_eq!(frame_op(&heartbeat), Some(1));
    let heartbeat = frame_value(&heartbeat).expect("heartbeat json");
    assert!(heartbeat.get("d").as_u64().is_none(), "first beat sends null");
    assert!(session.heartbeat_ack_pending());

    assert!(conn.heartbeat_ack());
    let deadline = Instant::now() + Duration::from_secs(1);
    while session.heartbeat_ack_pending() {
        assert!(Instant::now() < deadline, "ack never cleared the flag");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    assert!(conn.dispatch(
        "READY",
        1,
        r#"{"session_id":"abc","guilds":[{"id":"1","unavailable":true}]}"#,
    ));
    wait_for_phase(&session, GatewayPhase::Ready, Duration::from_secs(2)).await;
    assert_eq!(session.sequence(), Some(1));

    let event = session.next_event().await.expect("event").expect("ok");
    assert_eq!(event.name, "READY");
    assert_eq!(event.payload.get("session_id").as_str(), Some("abc"));

    let guilds = session.guilds().await.expect("guilds");
    assert_eq!(guilds.len(), 1);
    assert_eq!(guilds[0].id, "1");
    assert!(guilds[0].unavailable);

    session.close().await.expect("close");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn guild_create_fills_the_roster() {
    let (mut session, mut gateway) = start().await;
    let mut conn = gateway.accept().await;

    conn.hello(60_000);
    let _identify = conn.recv_timeout(Duration::from_secs(2)).await;

    conn.dispatch(
        "READY",
        1,
        r#"{"session_id":"abc","guilds":[{"id":"1","unavailable":true}]}"#,
    );
    wait_for_phase(&session, GatewayPhase::Ready, Duration::from_secs(2)).await;

    conn.dispatch(
        "GUILD_CREATE",
        2,
        r#"{"id":"1","name":"testers","permissions":8,
            "channels":[{"id":"10","type":0,"name":"general"}]}"#,
    );

    // GUILD_CREATE is delivered to the consumer *and* observed internally.
    let _ready = session.next_event().await.expect("ready").expect("ok");
    let event = session.next_event().await.expect("guild create").expect("ok");
    assert_eq!(event.name, "GUILD_CREATE");

    let deadline = Instant::now() + Duration::from_secs(2);
    loop {
        let guilds = session.guilds().await.expect("guilds");
        if guilds.first().is_some_and(|g| g.name.as_deref() == Some("testers")) {
            assert_eq!(guilds[0].channels.len(), 1);
            assert!(!guilds[0].unavailable);
            break;
        }
        assert!(Instant::now() < deadline, "roster never updated");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    session.close().await.expect("close");
}
