//! Connection manager integration tests
//!
//! Runs the client against a loopback WebSocket server to exercise frame
//! routing and the unconditional reconnect policy.

mod common;

use std::time::Duration;

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;

use fluentnow::{Connection, ConnectionEvent, ConnectionState};

async fn recv_event(rx: &mut mpsc::UnboundedReceiver<ConnectionEvent>) -> ConnectionEvent {
    tokio::time::timeout(Duration::from_secs(10), rx.recv())
        .await
        .expect("timed out waiting for connection event")
        .expect("event channel closed")
}

async fn wait_for_state(
    rx: &mut mpsc::UnboundedReceiver<ConnectionEvent>,
    want: ConnectionState,
) {
    loop {
        if let ConnectionEvent::State(state) = recv_event(rx).await {
            if state == want {
                return;
            }
        }
    }
}

async fn wait_for_transcript(rx: &mut mpsc::UnboundedReceiver<ConnectionEvent>) -> String {
    loop {
        if let ConnectionEvent::Transcript(line) = recv_event(rx).await {
            return line;
        }
    }
}

#[tokio::test]
async fn routes_frames_and_survives_junk() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();

        ws.send(Message::Text(
            r#"TXT:{"type":"transcript","data":"hola"}"#.into(),
        ))
        .await
        .unwrap();
        // Non-actionable and malformed frames must not disturb the session.
        ws.send(Message::Text(r#"TXT:{"type":"affect","data":"x"}"#.into()))
            .await
            .unwrap();
        ws.send(Message::Text("TXT:{this is not json".into()))
            .await
            .unwrap();
        ws.send(Message::Binary(Bytes::from(common::tone_wav(0.25, 400))))
            .await
            .unwrap();
        ws.send(Message::Text(
            r#"TXT:{"type":"transcript","data":"adios"}"#.into(),
        ))
        .await
        .unwrap();

        // Keep the link up until the client has drained everything.
        tokio::time::sleep(Duration::from_secs(5)).await;
    });

    let (log, _created, queue) = common::recording_queue(Duration::ZERO, None);
    let (handle, mut events) = Connection::spawn(format!("ws://{addr}"), queue.clone());

    wait_for_state(&mut events, ConnectionState::Open).await;

    // Only transcript-typed frames reach the log, in receipt order.
    assert_eq!(wait_for_transcript(&mut events).await, "hola");
    assert_eq!(wait_for_transcript(&mut events).await, "adios");

    common::wait_idle(&queue).await;
    {
        let log = log.lock().unwrap();
        assert_eq!(log.len(), 1, "the binary frame goes to playback");
        assert_eq!(log[0].samples, 400);
    }

    drop(handle);
    server.abort();
}

#[tokio::test]
async fn reconnects_after_close_and_resumes_sending() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let (chunk_tx, mut chunk_rx) = mpsc::unbounded_channel::<Bytes>();
    let server = tokio::spawn(async move {
        // First link: accept the handshake, then drop it on the floor.
        let (stream, _) = listener.accept().await.unwrap();
        let ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        drop(ws);

        // Second link: stay up and collect one outbound chunk.
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        while let Some(Ok(msg)) = ws.next().await {
            if let Message::Binary(chunk) = msg {
                chunk_tx.send(chunk).unwrap();
                break;
            }
        }
    });

    let (_log, _created, queue) = common::recording_queue(Duration::ZERO, None);
    let (handle, mut events) = Connection::spawn(format!("ws://{addr}"), queue);

    // Before the first open, chunks are refused outright.
    assert!(!handle.send_chunk(Bytes::from_static(b"too-early")));

    wait_for_state(&mut events, ConnectionState::Open).await;
    wait_for_state(&mut events, ConnectionState::Closed).await;
    // No manual intervention: the task comes back on its own.
    wait_for_state(&mut events, ConnectionState::Open).await;

    assert!(handle.is_open());
    assert!(handle.send_chunk(Bytes::from_static(b"chunk-1")));

    let got = tokio::time::timeout(Duration::from_secs(10), chunk_rx.recv())
        .await
        .expect("timed out waiting for the relayed chunk")
        .expect("server task dropped the channel");
    assert_eq!(&got[..], b"chunk-1");
    tokio_test::assert_ok!(server.await);

    drop(handle);
}

#[tokio::test]
async fn connection_task_ends_when_every_handle_is_dropped() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        // The client should close the socket once its session ends.
        while let Some(Ok(msg)) = ws.next().await {
            if matches!(msg, Message::Close(_)) {
                break;
            }
        }
    });

    let (_log, _created, queue) = common::recording_queue(Duration::ZERO, None);
    let (handle, mut events) = Connection::spawn(format!("ws://{addr}"), queue);
    wait_for_state(&mut events, ConnectionState::Open).await;

    drop(handle);

    tokio::time::timeout(Duration::from_secs(10), server)
        .await
        .expect("server never saw the close")
        .unwrap();
}
