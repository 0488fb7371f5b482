//! Loopback WebSocket tests for the realtime transport: connection-time
//! auth, event dispatch, and the reconnect-with-fresh-token contract.

use anyhow::Result;
use futures_util::{SinkExt, StreamExt};
use ghosttalk::realtime::{ConnectionState, RealtimeTransport};
use ghosttalk::storage::StorageScopes;
use ghosttalk::token::TokenStore;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;
use url::Url;

const WAIT: Duration = Duration::from_secs(10);

fn transport_with_token(addr: std::net::SocketAddr, token: &str) -> (RealtimeTransport, TokenStore) {
    let scopes = Arc::new(StorageScopes::ephemeral());
    let tokens = TokenStore::new(scopes);
    tokens.set(token, false);
    let url = Url::parse(&format!("ws://{addr}/ws")).unwrap();
    (RealtimeTransport::new(url, tokens.clone()), tokens)
}

fn frame_token(frame: &Value) -> String {
    frame["data"]["token"].as_str().unwrap_or_default().to_string()
}

#[tokio::test]
async fn connect_sends_auth_then_dispatches_events() -> Result<()> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;

    let (auth_tx, mut auth_rx) = mpsc::unbounded_channel::<Value>();
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = accept_async(stream).await.unwrap();
        if let Some(Ok(Message::Text(text))) = ws.next().await {
            let frame: Value = serde_json::from_str(&text).unwrap();
            let _ = auth_tx.send(frame);
        }
        let event = serde_json::json!({
            "event": "notification",
            "data": { "title": "hi" }
        });
        ws.send(Message::Text(event.to_string())).await.unwrap();
        // Hold the connection open until the client goes away.
        while ws.next().await.is_some() {}
    });

    let (transport, _tokens) = transport_with_token(addr, "T");
    let (seen_tx, mut seen_rx) = mpsc::unbounded_channel::<Value>();
    let _sub = transport.subscribe("notification", move |data| {
        let _ = seen_tx.send(data.clone());
    });

    assert!(transport.ensure_connected("T"));

    let auth = timeout(WAIT, auth_rx.recv()).await?.expect("auth frame");
    assert_eq!(auth["event"], "auth");
    assert_eq!(frame_token(&auth), "T");

    let data = timeout(WAIT, seen_rx.recv()).await?.expect("notification");
    assert_eq!(data["title"], "hi");

    assert_eq!(transport.state(), ConnectionState::Connected);
    // Second call while connected must not start another attempt.
    assert!(!transport.ensure_connected("T"));

    transport.disconnect();
    assert_eq!(transport.state(), ConnectionState::Disconnected);
    Ok(())
}

#[tokio::test]
async fn reconnect_reads_the_token_fresh_from_the_store() -> Result<()> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;

    let (auth_tx, mut auth_rx) = mpsc::unbounded_channel::<String>();
    tokio::spawn(async move {
        // First connection: read the auth frame, then drop the socket to
        // force a client-side reconnect.
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = accept_async(stream).await.unwrap();
        if let Some(Ok(Message::Text(text))) = ws.next().await {
            let frame: Value = serde_json::from_str(&text).unwrap();
            let _ = auth_tx.send(frame_token(&frame));
        }
        drop(ws);

        // Second connection: report which token the client came back with.
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = accept_async(stream).await.unwrap();
        if let Some(Ok(Message::Text(text))) = ws.next().await {
            let frame: Value = serde_json::from_str(&text).unwrap();
            let _ = auth_tx.send(frame_token(&frame));
        }
        while ws.next().await.is_some() {}
    });

    let (transport, tokens) = transport_with_token(addr, "T1");
    assert!(transport.ensure_connected("T1"));

    let first = timeout(WAIT, auth_rx.recv()).await?.expect("first auth");
    assert_eq!(first, "T1");

    // Rotate the credential while the transport is between connections;
    // the retry must pick up T2, not the captured T1.
    tokens.set("T2", false);

    let second = timeout(WAIT, auth_rx.recv()).await?.expect("second auth");
    assert_eq!(second, "T2");

    transport.disconnect();
    Ok(())
}

#[tokio::test]
async fn reconnect_stops_once_no_token_remains() -> Result<()> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;

    let (dropped_tx, mut dropped_rx) = mpsc::unbounded_channel::<()>();
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = accept_async(stream).await.unwrap();
        let _ = ws.next().await;
        drop(ws);
        let _ = dropped_tx.send(());
    });

    let (transport, tokens) = transport_with_token(addr, "T");
    assert!(transport.ensure_connected("T"));
    timeout(WAIT, dropped_rx.recv()).await?.expect("server dropped");

    // Expire the credential before the reconnect delay elapses.
    tokens.clear();

    timeout(WAIT, async {
        loop {
            if transport.state() == ConnectionState::Disconnected {
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    })
    .await?;
    Ok(())
}
