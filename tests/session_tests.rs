// Transport session tests
// These tests run the session against the scripted broker from common/

mod common;
use common::{server_message_json, setup_logging, test_config, wait_until, FakeBroker, TEST_TOKEN};

use std::time::Duration;
use tokio::time::Instant;

use planit_chat::models::{CorrelationId, OutboundMessage};
use planit_chat::stomp::{publish_destination, subscription_destination, Command, SessionHandle, SUBSCRIPTION_ID};

const WAIT: Duration = Duration::from_secs(5);

#[tokio::test]
async fn test_session_connects_and_subscribes() {
    setup_logging();
    let mut broker = FakeBroker::start(TEST_TOKEN).await;
    let config = test_config(&broker.url);

    println!("\n=== Testing broker handshake ===");
    let session = SessionHandle::open(&config, 42, Some(TEST_TOKEN));
    assert!(!session.is_connected(), "session must start disconnected");

    let (_, connect) = broker.expect_frame(Command::Connect, WAIT).await;
    assert_eq!(connect.header("Authorization"), Some("Bearer test-token"));
    assert_eq!(connect.header("accept-version"), Some("1.2,1.1"));
    assert_eq!(connect.header("heart-beat"), Some("0,0"));

    let (_, subscribe) = broker.expect_frame(Command::Subscribe, WAIT).await;
    assert_eq!(subscribe.header("id"), Some(SUBSCRIPTION_ID));
    assert_eq!(subscribe.header("destination"), Some(subscription_destination(42).as_str()));
    assert_eq!(subscribe.header("ack"), Some("auto"));

    assert!(wait_until(|| session.is_connected(), WAIT).await, "session never reported connected");
    println!("✅ Connected and subscribed");

    session.close().await;
}

#[tokio::test]
async fn test_inbound_bodies_are_delivered_in_order() {
    setup_logging();
    let mut broker = FakeBroker::start(TEST_TOKEN).await;
    let mut session = SessionHandle::open(&test_config(&broker.url), 7, Some(TEST_TOKEN));
    broker.expect_frame(Command::Subscribe, WAIT).await;

    let first = server_message_json(1, "first", 3, None);
    let second = server_message_json(2, "second", 3, Some("c-2"));
    broker.deliver(&first);
    broker.deliver(&second);

    let got_first = tokio::time::timeout(WAIT, session.recv()).await.expect("first delivery");
    let got_second = tokio::time::timeout(WAIT, session.recv()).await.expect("second delivery");
    assert_eq!(got_first.as_deref(), Some(first.as_str()));
    assert_eq!(got_second.as_deref(), Some(second.as_str()));

    session.close().await;
}

#[tokio::test]
async fn test_publish_goes_to_conversation_destination() {
    setup_logging();
    let mut broker = FakeBroker::start(TEST_TOKEN).await;
    let session = SessionHandle::open(&test_config(&broker.url), 9, Some(TEST_TOKEN));
    broker.expect_frame(Command::Subscribe, WAIT).await;
    assert!(wait_until(|| session.is_connected(), WAIT).await);

    let correlation = CorrelationId::generate();
    assert!(session.send(OutboundMessage::new("hello", &correlation)));

    let (_, send) = broker.expect_frame(Command::Send, WAIT).await;
    assert_eq!(send.header("destination"), Some(publish_destination(9).as_str()));
    assert_eq!(send.header("content-type"), Some("application/json"));
    let payload: OutboundMessage = serde_json::from_str(&send.body).expect("json payload");
    assert_eq!(payload, OutboundMessage::new("hello", &correlation));

    session.close().await;
}

#[tokio::test]
async fn test_send_before_connect_is_dropped() {
    setup_logging();
    let mut broker = FakeBroker::start(TEST_TOKEN).await;
    let session = SessionHandle::open(&test_config(&broker.url), 9, Some(TEST_TOKEN));

    // Nothing has run yet on this single-threaded runtime
    assert!(!session.send(OutboundMessage::new("early", &CorrelationId::generate())));

    broker.expect_frame(Command::Subscribe, WAIT).await;
    assert!(wait_until(|| session.is_connected(), WAIT).await);
    session.close().await;

    // The only client frames after SUBSCRIBE are the goodbye frames
    while let Some(event) = broker.next_event(Duration::from_millis(300)).await {
        if let common::BrokerEvent::Frame(_, frame) = event {
            assert_ne!(frame.command, Command::Send, "dropped send must never reach the broker");
        }
    }
}

#[tokio::test]
async fn test_reconnects_after_fixed_delay() {
    setup_logging();
    let mut broker = FakeBroker::start(TEST_TOKEN).await;
    let config = test_config(&broker.url).with_reconnect_delay(Duration::from_millis(400));
    let session = SessionHandle::open(&config, 5, Some(TEST_TOKEN));

    let (first_conn, _) = broker.expect_frame(Command::Subscribe, WAIT).await;
    assert!(wait_until(|| session.is_connected(), WAIT).await);

    println!("\n=== Dropping broker connection ===");
    broker.drop_connection();
    broker.expect_closed(first_conn, WAIT).await;
    let dropped_at = Instant::now();

    assert!(wait_until(|| !session.is_connected(), WAIT).await, "flag must drop while disconnected");
    assert!(!session.send(OutboundMessage::new("lost", &CorrelationId::generate())));

    let (second_conn, _) = broker.expect_frame(Command::Connect, WAIT).await;
    assert_ne!(first_conn, second_conn);
    assert!(
        dropped_at.elapsed() >= Duration::from_millis(300),
        "reconnected after only {:?}",
        dropped_at.elapsed()
    );

    broker.expect_frame(Command::Subscribe, WAIT).await;
    assert!(wait_until(|| session.is_connected(), WAIT).await, "session did not come back");
    println!("✅ Reconnected on connection {}", second_conn);

    session.close().await;
}

#[tokio::test]
async fn test_rejected_credentials_keep_retrying() {
    setup_logging();
    let mut broker = FakeBroker::start(TEST_TOKEN).await;
    let session = SessionHandle::open(&test_config(&broker.url), 5, Some("wrong-token"));

    let (first, _) = broker.expect_frame(Command::Connect, WAIT).await;
    let (second, _) = broker.expect_frame(Command::Connect, WAIT).await;
    assert!(second > first);
    assert!(!session.is_connected());

    session.close().await;
}

#[tokio::test]
async fn test_close_disconnects_and_stops_reconnecting() {
    setup_logging();
    let mut broker = FakeBroker::start(TEST_TOKEN).await;
    let session = SessionHandle::open(&test_config(&broker.url), 5, Some(TEST_TOKEN));
    let (conn, _) = broker.expect_frame(Command::Subscribe, WAIT).await;
    assert!(wait_until(|| session.is_connected(), WAIT).await);

    session.close().await;

    let (_, unsubscribe) = broker.expect_frame(Command::Unsubscribe, WAIT).await;
    assert_eq!(unsubscribe.header("id"), Some(SUBSCRIPTION_ID));
    broker.expect_frame(Command::Disconnect, WAIT).await;
    broker.expect_closed(conn, WAIT).await;

    // Well past the reconnect delay: nobody comes back
    let late = broker.next_event(Duration::from_millis(800)).await;
    assert!(late.is_none(), "unexpected broker activity after close: {:?}", late);
}

#[tokio::test]
async fn test_close_with_full_inbound_buffer_still_disconnects() {
    setup_logging();
    let mut broker = FakeBroker::start(TEST_TOKEN).await;
    let mut config = test_config(&broker.url);
    config.inbound_buffer = 1;
    let session = SessionHandle::open(&config, 5, Some(TEST_TOKEN));
    let (conn, _) = broker.expect_frame(Command::Subscribe, WAIT).await;
    assert!(wait_until(|| session.is_connected(), WAIT).await);

    // Nobody reads: the first body fills the buffer, the next ones block delivery
    for id in 1..=4 {
        broker.deliver(&server_message_json(id, "unread", 3, None));
    }
    tokio::time::sleep(Duration::from_millis(300)).await;

    let started = Instant::now();
    session.close().await;
    assert!(
        started.elapsed() < Duration::from_secs(2),
        "close took {:?}",
        started.elapsed()
    );

    broker.expect_frame(Command::Unsubscribe, WAIT).await;
    broker.expect_frame(Command::Disconnect, WAIT).await;
    broker.expect_closed(conn, WAIT).await;
}

#[tokio::test]
async fn test_dropping_handle_shuts_session_down() {
    setup_logging();
    let mut broker = FakeBroker::start(TEST_TOKEN).await;
    let session = SessionHandle::open(&test_config(&broker.url), 5, Some(TEST_TOKEN));
    let (conn, _) = broker.expect_frame(Command::Subscribe, WAIT).await;

    drop(session);

    broker.expect_closed(conn, WAIT).await;
    assert!(broker.next_event(Duration::from_millis(800)).await.is_none());
}

#[tokio::test]
async fn test_no_token_never_connects() {
    setup_logging();
    let mut broker = FakeBroker::start(TEST_TOKEN).await;
    let mut session = SessionHandle::open(&test_config(&broker.url), 5, None);

    assert!(broker.next_event(Duration::from_millis(500)).await.is_none());
    assert!(!session.is_connected());
    assert!(!session.send(OutboundMessage::new("x", &CorrelationId::generate())));
    assert_eq!(session.recv().await, None);

    session.close().await;
}
