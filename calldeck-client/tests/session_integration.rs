//! Integration tests for the duplex session client
//!
//! Each test stands up an in-process WebSocket server on an ephemeral port
//! and drives the client against it: handler dispatch, malformed-frame
//! tolerance, outbound control frames, reconnection, cancellation, and
//! give-up behavior.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::{accept_async, tungstenite::Message};

use calldeck_client::session::{ConnectionState, SessionClient, SessionConfig};
use calldeck_common::envelope::Envelope;

/// Poll a condition until it holds or the timeout elapses.
async fn wait_for(mut cond: impl FnMut() -> bool, timeout: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    cond()
}

fn fast_config(url: &str) -> SessionConfig {
    let mut config = SessionConfig::new(url);
    config.reconnect_base_delay = Duration::from_millis(25);
    config
}

/// Server accepting a single session, remotely scriptable: frames pushed
/// into the returned sender go to the client, text frames the client sends
/// come back out of the returned receiver.
async fn spawn_single_session_server() -> (
    String,
    mpsc::UnboundedSender<Message>,
    mpsc::UnboundedReceiver<String>,
) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}/session", listener.local_addr().unwrap());

    let (to_client_tx, mut to_client_rx) = mpsc::unbounded_channel::<Message>();
    let (from_client_tx, from_client_rx) = mpsc::unbounded_channel::<String>();

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = accept_async(stream).await.unwrap();
        loop {
            tokio::select! {
                scripted = to_client_rx.recv() => match scripted {
                    Some(msg) => {
                        if ws.send(msg).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                },
                inbound = ws.next() => match inbound {
                    Some(Ok(Message::Text(text))) => {
                        let _ = from_client_tx.send(text);
                    }
                    Some(Ok(_)) => {}
                    _ => break,
                },
            }
        }
    });

    (url, to_client_tx, from_client_rx)
}

fn envelope_frame(kind: &str, data: serde_json::Value) -> Message {
    Message::Text(serde_json::to_string(&Envelope::new(kind, data)).unwrap())
}

#[tokio::test]
async fn test_connect_opens_session_and_notifies_handlers() {
    let (url, _to_client, _from_client) = spawn_single_session_server().await;

    let client = SessionClient::new(fast_config(&url));
    let connects = Arc::new(AtomicU32::new(0));
    let connects_clone = Arc::clone(&connects);
    let _sub = client.on_connect(move || {
        connects_clone.fetch_add(1, Ordering::SeqCst);
    });

    client.connect();

    assert!(
        wait_for(|| client.is_connected(), Duration::from_secs(5)).await,
        "client never reached Connected"
    );
    assert_eq!(connects.load(Ordering::SeqCst), 1);
    assert!(client.last_error().is_none());

    client.disconnect();
    assert_eq!(client.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn test_malformed_frame_dropped_then_valid_frame_dispatched() {
    let (url, to_client, _from_client) = spawn_single_session_server().await;

    let client = SessionClient::new(fast_config(&url));
    let seen: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    for tag in ["first", "second"] {
        let seen = Arc::clone(&seen);
        // Dropping the token keeps the handler registered
        drop(client.on_message(move |envelope| {
            seen.lock().unwrap().push(format!("{}:{}", tag, envelope.kind));
        }));
    }

    client.connect();
    assert!(wait_for(|| client.is_connected(), Duration::from_secs(5)).await);

    to_client
        .send(Message::Text("this is not an envelope".into()))
        .unwrap();
    to_client
        .send(envelope_frame("room_update", serde_json::json!({"room_id": "r1"})))
        .unwrap();

    // Only the well-formed frame is dispatched, to both handlers in order
    assert!(
        wait_for(|| seen.lock().unwrap().len() == 2, Duration::from_secs(5)).await,
        "valid frame was not dispatched after the malformed one"
    );
    assert_eq!(
        *seen.lock().unwrap(),
        vec!["first:room_update", "second:room_update"]
    );
    assert!(client.is_connected(), "malformed frame must not drop the session");

    client.disconnect();
}

#[tokio::test]
async fn test_cancelled_handler_receives_no_further_frames() {
    let (url, to_client, _from_client) = spawn_single_session_server().await;

    let client = SessionClient::new(fast_config(&url));
    let cancelled_count = Arc::new(AtomicU32::new(0));
    let kept_count = Arc::new(AtomicU32::new(0));

    let cancelled_clone = Arc::clone(&cancelled_count);
    let sub_cancelled = client.on_message(move |_| {
        cancelled_clone.fetch_add(1, Ordering::SeqCst);
    });
    let kept_clone = Arc::clone(&kept_count);
    let _sub_kept = client.on_message(move |_| {
        kept_clone.fetch_add(1, Ordering::SeqCst);
    });

    client.connect();
    assert!(wait_for(|| client.is_connected(), Duration::from_secs(5)).await);

    to_client
        .send(envelope_frame("action_update", serde_json::json!({})))
        .unwrap();
    assert!(
        wait_for(
            || kept_count.load(Ordering::SeqCst) == 1,
            Duration::from_secs(5)
        )
        .await
    );

    sub_cancelled.cancel();
    to_client
        .send(envelope_frame("action_update", serde_json::json!({})))
        .unwrap();
    assert!(
        wait_for(
            || kept_count.load(Ordering::SeqCst) == 2,
            Duration::from_secs(5)
        )
        .await
    );

    assert_eq!(cancelled_count.load(Ordering::SeqCst), 1);
    client.disconnect();
}

#[tokio::test]
async fn test_topic_helpers_emit_control_frames() {
    let (url, _to_client, mut from_client) = spawn_single_session_server().await;

    let client = SessionClient::new(fast_config(&url));
    client.connect();
    assert!(wait_for(|| client.is_connected(), Duration::from_secs(5)).await);

    client.subscribe_to_conversation("conv-9");
    client.unsubscribe_from_room("room-3");
    client.subscribe_to_actions();

    let mut frames = Vec::new();
    for _ in 0..3 {
        let text = tokio::time::timeout(Duration::from_secs(5), from_client.recv())
            .await
            .expect("timed out waiting for outbound frame")
            .expect("server session closed early");
        frames.push(serde_json::from_str::<serde_json::Value>(&text).unwrap());
    }

    assert_eq!(frames[0]["type"], "subscribe");
    assert_eq!(frames[0]["topic"], "conversation");
    assert_eq!(frames[0]["conversation_id"], "conv-9");
    assert!(frames[0].get("room_id").is_none());

    assert_eq!(frames[1]["type"], "unsubscribe");
    assert_eq!(frames[1]["topic"], "room");
    assert_eq!(frames[1]["room_id"], "room-3");
    assert!(frames[1].get("conversation_id").is_none());

    assert_eq!(frames[2]["type"], "subscribe");
    assert_eq!(frames[2]["topic"], "actions");
    assert!(frames[2].get("conversation_id").is_none());
    assert!(frames[2].get("room_id").is_none());

    client.disconnect();
}

#[tokio::test]
async fn test_reconnects_after_server_drops_the_session() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}/session", listener.local_addr().unwrap());

    // First connection is closed immediately; later ones are held open
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = accept_async(stream).await.unwrap();
        let _ = ws.close(None).await;
        drop(ws);

        loop {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(stream).await.unwrap();
            tokio::spawn(async move {
                while let Some(Ok(_)) = ws.next().await {}
            });
        }
    });

    let client = SessionClient::new(fast_config(&url));
    let connects = Arc::new(AtomicU32::new(0));
    let disconnects = Arc::new(AtomicU32::new(0));

    let connects_clone = Arc::clone(&connects);
    let _sub_connect = client.on_connect(move || {
        connects_clone.fetch_add(1, Ordering::SeqCst);
    });
    let disconnects_clone = Arc::clone(&disconnects);
    let _sub_disconnect = client.on_disconnect(move || {
        disconnects_clone.fetch_add(1, Ordering::SeqCst);
    });

    client.connect();

    assert!(
        wait_for(
            || connects.load(Ordering::SeqCst) >= 2 && client.is_connected(),
            Duration::from_secs(10)
        )
        .await,
        "client did not reconnect after the server dropped it"
    );
    assert!(disconnects.load(Ordering::SeqCst) >= 1);

    client.disconnect();
}

#[tokio::test]
async fn test_disconnect_cancels_pending_reconnect() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}/session", listener.local_addr().unwrap());

    let accepts = Arc::new(AtomicU32::new(0));
    let accepts_server = Arc::clone(&accepts);
    // Every accepted connection is dropped immediately
    tokio::spawn(async move {
        loop {
            let (stream, _) = listener.accept().await.unwrap();
            accepts_server.fetch_add(1, Ordering::SeqCst);
            let mut ws = accept_async(stream).await.unwrap();
            let _ = ws.close(None).await;
        }
    });

    let mut config = fast_config(&url);
    // Long enough that disconnect() lands while the reconnect is pending
    config.reconnect_base_delay = Duration::from_millis(200);
    let client = SessionClient::new(config);

    client.connect();
    assert!(
        wait_for(
            || accepts.load(Ordering::SeqCst) >= 1 && !client.is_connected(),
            Duration::from_secs(5)
        )
        .await
    );

    // The first reconnect is now pending; cancel it
    client.disconnect();
    tokio::time::sleep(Duration::from_millis(600)).await;

    assert_eq!(
        accepts.load(Ordering::SeqCst),
        1,
        "a reconnect fired after disconnect()"
    );
    assert_eq!(client.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn test_gives_up_after_exhausting_reconnect_attempts() {
    // Bind and immediately drop to obtain a port that refuses connections
    let url = {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        format!("ws://{}/session", listener.local_addr().unwrap())
    };

    let mut config = fast_config(&url);
    config.reconnect_max_attempts = 2;
    let client = SessionClient::new(config);

    let errors: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let errors_clone = Arc::clone(&errors);
    let _sub = client.on_error(move |e| {
        errors_clone.lock().unwrap().push(e.to_string());
    });

    client.connect();

    assert!(
        wait_for(|| !errors.lock().unwrap().is_empty(), Duration::from_secs(10)).await,
        "give-up error was never surfaced"
    );

    // Surfaced exactly once, and the client stays down
    tokio::time::sleep(Duration::from_millis(300)).await;
    let surfaced = errors.lock().unwrap().clone();
    assert_eq!(surfaced.len(), 1);
    assert!(
        surfaced[0].contains("2 failed attempts"),
        "unexpected error text: {}",
        surfaced[0]
    );
    assert_eq!(client.state(), ConnectionState::Disconnected);
    assert!(client.last_error().is_some());
}

#[tokio::test]
async fn test_manual_connect_after_give_up_retries() {
    let url = {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        format!("ws://{}/session", listener.local_addr().unwrap())
    };

    let mut config = fast_config(&url);
    config.reconnect_max_attempts = 1;
    let client = SessionClient::new(config);

    let errors = Arc::new(AtomicU32::new(0));
    let errors_clone = Arc::clone(&errors);
    let _sub = client.on_error(move |_| {
        errors_clone.fetch_add(1, Ordering::SeqCst);
    });

    client.connect();
    assert!(wait_for(|| errors.load(Ordering::SeqCst) == 1, Duration::from_secs(10)).await);

    // connect() is honored again after give-up; the endpoint is still dead,
    // so the exhausted policy surfaces a second give-up
    client.connect();
    assert!(
        wait_for(|| errors.load(Ordering::SeqCst) == 2, Duration::from_secs(10)).await,
        "manual connect after give-up was not honored"
    );
}
