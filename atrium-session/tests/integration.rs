//! Integration tests for end-to-end WebSocket sessions.
//!
//! These tests start a real server and connect real clients,
//! verifying the full relay pipeline.

use std::sync::Arc;

use atrium_session::client::{ConnectionState, SessionClient, SessionEvent};
use atrium_session::document::{BlockKind, MarkupDocument, RichTextEngine, StyleKind, TextRange};
use atrium_session::protocol::{ArtifactKind, ClientEvent, ProtocolError, ServerEvent};
use atrium_session::registry::{RoomPolicy, SessionRegistry};
use atrium_session::server::{SessionConfig, SessionServer};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc::Receiver;
use tokio::time::{timeout, Duration};
use tokio_tungstenite::tungstenite::Message;

/// Find a free port for testing.
async fn free_port() -> u16 {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

/// Start a server on a free port, return the URL and its registry.
async fn start_test_server(policy: RoomPolicy) -> (String, Arc<SessionRegistry>) {
    let port = free_port().await;
    let config = SessionConfig {
        bind_addr: format!("127.0.0.1:{port}"),
        room_policy: policy,
        ..SessionConfig::default()
    };
    let server = SessionServer::new(config);
    let registry = server.registry().clone();
    tokio::spawn(async move {
        server.run().await.unwrap();
    });
    // Give server time to bind
    tokio::time::sleep(Duration::from_millis(50)).await;
    (format!("ws://127.0.0.1:{port}"), registry)
}

/// Connect a client, draining the initial Connected event.
async fn connect_client(url: &str, name: &str) -> (SessionClient, Receiver<SessionEvent>) {
    let (client, mut events) = SessionClient::connect(url, name).await.unwrap();
    let first = timeout(Duration::from_secs(1), events.recv()).await.unwrap();
    assert_eq!(first, Some(SessionEvent::Connected));
    (client, events)
}

/// Join a room and wait for the roster, which means the server has the
/// participant registered.
async fn join(client: &SessionClient, events: &mut Receiver<SessionEvent>, room: &str) -> usize {
    client.join_room(room).await.unwrap();
    match next_matching(events, |e| matches!(e, SessionEvent::Roster(_))).await {
        SessionEvent::Roster(roster) => roster.len(),
        _ => unreachable!(),
    }
}

/// Receive events until one matches, failing after two seconds.
async fn next_matching(
    events: &mut Receiver<SessionEvent>,
    pred: impl Fn(&SessionEvent) -> bool,
) -> SessionEvent {
    timeout(Duration::from_secs(2), async {
        loop {
            match events.recv().await {
                Some(event) if pred(&event) => return event,
                Some(_) => continue,
                None => panic!("event stream ended"),
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}

/// Assert that no artifact update arrives within a short window.
async fn assert_no_update(events: &mut Receiver<SessionEvent>) {
    let result = timeout(Duration::from_millis(200), async {
        loop {
            match events.recv().await {
                Some(SessionEvent::ArtifactUpdated { kind, payload }) => return (kind, payload),
                Some(_) => continue,
                None => std::future::pending::<()>().await,
            }
        }
    })
    .await;
    assert!(result.is_err(), "unexpected update: {result:?}");
}

#[tokio::test]
async fn test_server_accepts_connections() {
    let (url, _) = start_test_server(RoomPolicy::Evict).await;

    // Connect raw WebSocket
    let result = tokio_tungstenite::connect_async(&url).await;
    assert!(result.is_ok(), "Should connect to server");
}

#[tokio::test]
async fn test_client_connects() {
    let (url, _) = start_test_server(RoomPolicy::Evict).await;
    let (client, _events) = connect_client(&url, "Alice").await;

    assert_eq!(client.connection_state().await, ConnectionState::Connected);
    assert_eq!(client.name(), "Alice");
    assert_eq!(client.room().await, None);
}

#[tokio::test]
async fn test_code_change_reaches_peer_and_snapshot() {
    let (url, registry) = start_test_server(RoomPolicy::Evict).await;

    let (u1, mut u1_events) = connect_client(&url, "U1").await;
    let (u2, mut u2_events) = connect_client(&url, "U2").await;
    assert_eq!(join(&u1, &mut u1_events, "r1").await, 1);
    assert_eq!(join(&u2, &mut u2_events, "r1").await, 2);

    u1.send_code("x=1").await.unwrap();

    let event = next_matching(&mut u2_events, |e| {
        matches!(e, SessionEvent::ArtifactUpdated { .. })
    })
    .await;
    assert_eq!(
        event,
        SessionEvent::ArtifactUpdated {
            kind: ArtifactKind::Code,
            payload: "x=1".into()
        }
    );

    // The originator only gets the history refresh, never its own change.
    let history = next_matching(&mut u1_events, |e| {
        matches!(e, SessionEvent::History(h) if !h.code_edits.is_empty())
    })
    .await;
    match history {
        SessionEvent::History(h) => assert_eq!(h.code_edits.len(), 1),
        _ => unreachable!(),
    }
    assert_no_update(&mut u1_events).await;

    assert_eq!(registry.snapshot("r1", ArtifactKind::Code).await.as_deref(), Some("x=1"));
}

#[tokio::test]
async fn test_changes_stay_in_their_room() {
    let (url, _) = start_test_server(RoomPolicy::Evict).await;

    let (a, mut a_events) = connect_client(&url, "A").await;
    let (b, mut b_events) = connect_client(&url, "B").await;
    join(&a, &mut a_events, "r1").await;
    join(&b, &mut b_events, "r2").await;

    a.send_whiteboard("{\"lines\":[]}").await.unwrap();
    assert_no_update(&mut b_events).await;
}

#[tokio::test]
async fn test_late_joiner_receives_snapshots() {
    let (url, _) = start_test_server(RoomPolicy::Evict).await;

    let (a, mut a_events) = connect_client(&url, "A").await;
    join(&a, &mut a_events, "r1").await;
    a.send_code("fn main() {}").await.unwrap();
    a.send_document("<p>notes</p>").await.unwrap();
    // Wait until both changes were processed.
    next_matching(&mut a_events, |e| matches!(e, SessionEvent::History(h) if h.total() == 2)).await;

    let (b, mut b_events) = connect_client(&url, "B").await;
    join(&b, &mut b_events, "r1").await;

    let code = next_matching(&mut b_events, |e| matches!(e, SessionEvent::ArtifactUpdated { .. })).await;
    assert_eq!(
        code,
        SessionEvent::ArtifactUpdated {
            kind: ArtifactKind::Code,
            payload: "fn main() {}".into()
        }
    );
    let doc = next_matching(&mut b_events, |e| matches!(e, SessionEvent::ArtifactUpdated { .. })).await;
    assert_eq!(
        doc,
        SessionEvent::ArtifactUpdated {
            kind: ArtifactKind::Document,
            payload: "<p>notes</p>".into()
        }
    );
    match next_matching(&mut b_events, |e| matches!(e, SessionEvent::History(_))).await {
        SessionEvent::History(h) => {
            assert_eq!(h.code_edits.len(), 1);
            assert_eq!(h.doc_edits.len(), 1);
        }
        _ => unreachable!(),
    }
}

#[tokio::test]
async fn test_last_write_wins() {
    let (url, registry) = start_test_server(RoomPolicy::Evict).await;

    let (a, mut a_events) = connect_client(&url, "A").await;
    let (b, mut b_events) = connect_client(&url, "B").await;
    join(&a, &mut a_events, "r1").await;
    join(&b, &mut b_events, "r1").await;

    a.send_code("v1").await.unwrap();
    next_matching(&mut b_events, |e| matches!(e, SessionEvent::ArtifactUpdated { .. })).await;
    b.send_code("v2").await.unwrap();
    next_matching(&mut a_events, |e| matches!(e, SessionEvent::ArtifactUpdated { .. })).await;

    assert_eq!(registry.snapshot("r1", ArtifactKind::Code).await.as_deref(), Some("v2"));
}

#[tokio::test]
async fn test_chat_relay() {
    let (url, _) = start_test_server(RoomPolicy::Evict).await;

    let (a, mut a_events) = connect_client(&url, "A").await;
    let (b, mut b_events) = connect_client(&url, "B").await;
    join(&a, &mut a_events, "r1").await;
    join(&b, &mut b_events, "r1").await;

    b.send_chat("hello").await.unwrap();
    let chat = next_matching(&mut a_events, |e| matches!(e, SessionEvent::Chat(_))).await;
    assert_eq!(chat, SessionEvent::Chat("hello".into()));

    match next_matching(&mut a_events, |e| matches!(e, SessionEvent::History(_))).await {
        SessionEvent::History(h) => {
            assert_eq!(h.chat_messages.back().map(String::as_str), Some("B: hello"));
        }
        _ => unreachable!(),
    }
}

#[tokio::test]
async fn test_send_before_join_is_rejected_locally() {
    let (url, _) = start_test_server(RoomPolicy::Evict).await;
    let (client, _events) = connect_client(&url, "A").await;

    assert_eq!(client.send_code("x").await, Err(ProtocolError::NotJoined));
    assert_eq!(client.send_chat("hi").await, Err(ProtocolError::NotJoined));
}

#[tokio::test]
async fn test_rich_text_document_relay() {
    let (url, _) = start_test_server(RoomPolicy::Evict).await;

    let (a, mut a_events) = connect_client(&url, "A").await;
    let (b, mut b_events) = connect_client(&url, "B").await;
    join(&a, &mut a_events, "r1").await;
    join(&b, &mut b_events, "r1").await;

    let mut doc = MarkupDocument::new();
    doc.insert_block(BlockKind::Paragraph, "Agenda").unwrap();
    doc.apply_style(TextRange::new(0, 0, 6), StyleKind::Bold).unwrap();
    a.send_document_markup(&doc).await.unwrap();

    let event = next_matching(&mut b_events, |e| matches!(e, SessionEvent::ArtifactUpdated { .. })).await;
    assert_eq!(
        event,
        SessionEvent::ArtifactUpdated {
            kind: ArtifactKind::Document,
            payload: "<p><b>Agenda</b></p>".into()
        }
    );
}

#[tokio::test]
async fn test_room_evicted_after_last_leave() {
    let (url, registry) = start_test_server(RoomPolicy::Evict).await;

    let (a, mut a_events) = connect_client(&url, "A").await;
    join(&a, &mut a_events, "r1").await;
    a.send_code("x").await.unwrap();
    next_matching(&mut a_events, |e| matches!(e, SessionEvent::History(h) if h.total() > 0)).await;
    assert_eq!(registry.room_count().await, 1);

    a.close().await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(registry.room_count().await, 0);
    assert!(registry.snapshot("r1", ArtifactKind::Code).await.is_none());
}

#[tokio::test]
async fn test_room_retained_after_last_leave() {
    let (url, registry) = start_test_server(RoomPolicy::Retain).await;

    let (a, mut a_events) = connect_client(&url, "A").await;
    join(&a, &mut a_events, "r1").await;
    a.send_code("kept").await.unwrap();
    next_matching(&mut a_events, |e| matches!(e, SessionEvent::History(h) if h.total() > 0)).await;

    a.close().await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(registry.participant_count().await, 0);
    assert_eq!(registry.snapshot("r1", ArtifactKind::Code).await.as_deref(), Some("kept"));
}

#[tokio::test]
async fn test_undecodable_frame_keeps_connection() {
    let (url, _) = start_test_server(RoomPolicy::Evict).await;
    let (mut ws, _) = tokio_tungstenite::connect_async(&url).await.unwrap();

    ws.send(Message::Text("not json".into())).await.unwrap();
    let join_frame = ClientEvent::decode(r#"{"event":"join-room","data":"r1"}"#)
        .unwrap()
        .encode()
        .unwrap();
    ws.send(Message::Text(join_frame.into())).await.unwrap();

    let reply = timeout(Duration::from_secs(2), ws.next()).await.unwrap().unwrap().unwrap();
    let Message::Text(text) = reply else {
        panic!("expected text frame, got {reply:?}");
    };
    match ServerEvent::decode(text.as_str()).unwrap() {
        ServerEvent::RoomUsers(roster) => assert_eq!(roster.len(), 1),
        other => panic!("expected room-users, got {other:?}"),
    }
}

#[tokio::test]
async fn test_ping_pong() {
    let (url, _) = start_test_server(RoomPolicy::Evict).await;
    let (mut ws, _) = tokio_tungstenite::connect_async(&url).await.unwrap();

    ws.send(Message::Ping(vec![7u8, 7].into())).await.unwrap();
    let reply = timeout(Duration::from_secs(2), ws.next()).await.unwrap().unwrap().unwrap();
    assert!(matches!(reply, Message::Pong(_)));
}

#[tokio::test]
async fn test_zero_outbound_capacity_still_serves() {
    let port = free_port().await;
    let server = SessionServer::new(SessionConfig {
        bind_addr: format!("127.0.0.1:{port}"),
        outbound_capacity: 0,
        ..SessionConfig::default()
    });
    tokio::spawn(async move {
        server.run().await.unwrap();
    });
    tokio::time::sleep(Duration::from_millis(50)).await;
    let url = format!("ws://127.0.0.1:{port}");

    let (client, mut events) = connect_client(&url, "A").await;
    assert_eq!(join(&client, &mut events, "r1").await, 1);
    assert_eq!(client.connection_state().await, ConnectionState::Connected);
}
