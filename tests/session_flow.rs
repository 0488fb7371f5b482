//! End-to-end session flows against canned loopback backends: the login
//! happy path (token persisted, identity set, realtime auth issued) and
//! the authoritative-rejection demotion during bootstrap.

use anyhow::Result;
use futures_util::StreamExt;
use ghosttalk::api::ApiClient;
use ghosttalk::platform::AlwaysOnline;
use ghosttalk::realtime::RealtimeTransport;
use ghosttalk::session::{AuthPhase, AuthSessionController};
use ghosttalk::storage::{keys, Scope, StorageScopes};
use ghosttalk::token::TokenStore;
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;
use url::Url;

const WAIT: Duration = Duration::from_secs(10);

/// Serve canned JSON responses routed by request path; the first route
/// whose path is a substring of the request line wins.
async fn routed_http(
    routes: &'static [(&'static str, &'static str, &'static str)],
) -> Result<SocketAddr> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    tokio::spawn(async move {
        while let Ok((mut stream, _)) = listener.accept().await {
            tokio::spawn(async move {
                let Ok(request_line) = read_request(&mut stream).await else {
                    return;
                };
                let (status_line, body) = routes
                    .iter()
                    .find(|(path, _, _)| request_line.contains(path))
                    .map_or(("404 Not Found", "{}"), |(_, status, body)| (status, body));
                let response = format!(
                    "HTTP/1.1 {status_line}\r\nContent-Type: application/json\r\n\
                     Content-Length: {}\r\nConnection: close\r\n\r\n{body}",
                    body.len()
                );
                let _ = stream.write_all(response.as_bytes()).await;
                let _ = stream.shutdown().await;
            });
        }
    });
    Ok(addr)
}

/// Serve the same canned JSON response to every request.
async fn canned_http(status_line: &'static str, body: &'static str) -> Result<SocketAddr> {
    routed_http(Box::leak(Box::new([("", status_line, body)]))).await
}

/// Read a full HTTP request (headers plus Content-Length body) so the
/// client never sees the connection close mid-write; returns the request
/// line for routing.
async fn read_request(stream: &mut tokio::net::TcpStream) -> Result<String> {
    let mut buf = Vec::with_capacity(4096);
    let mut chunk = [0u8; 1024];
    let header_end = loop {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            anyhow::bail!("client hung up");
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
        if buf.len() > 64 * 1024 {
            anyhow::bail!("headers too large");
        }
    };

    let headers = String::from_utf8_lossy(&buf[..header_end]).to_lowercase();
    let content_length = headers
        .lines()
        .find_map(|line| line.strip_prefix("content-length:"))
        .and_then(|raw| raw.trim().parse::<usize>().ok())
        .unwrap_or(0);

    let mut body_read = buf.len() - header_end;
    while body_read < content_length {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        body_read += n;
    }

    let request_line = String::from_utf8_lossy(&buf[..header_end])
        .lines()
        .next()
        .unwrap_or_default()
        .to_string();
    Ok(request_line)
}

/// Loopback WebSocket server that reports the auth token of every
/// connection it accepts.
async fn canned_ws() -> Result<(SocketAddr, mpsc::UnboundedReceiver<String>)> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let (auth_tx, auth_rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let auth_tx = auth_tx.clone();
            tokio::spawn(async move {
                let mut ws = accept_async(stream).await.unwrap();
                if let Some(Ok(Message::Text(text))) = ws.next().await {
                    let frame: Value = serde_json::from_str(&text).unwrap();
                    let token = frame["data"]["token"].as_str().unwrap_or_default();
                    let _ = auth_tx.send(token.to_string());
                }
                while ws.next().await.is_some() {}
            });
        }
    });
    Ok((addr, auth_rx))
}

struct Harness {
    controller: AuthSessionController,
    scopes: Arc<StorageScopes>,
    tokens: TokenStore,
}

fn harness(api_addr: SocketAddr, ws_addr: SocketAddr) -> Harness {
    let scopes = Arc::new(StorageScopes::ephemeral());
    let tokens = TokenStore::new(Arc::clone(&scopes));
    let api = ApiClient::new(&format!("http://{api_addr}/api")).unwrap();
    let ws_url = Url::parse(&format!("ws://{ws_addr}/ws")).unwrap();
    let transport = RealtimeTransport::new(ws_url, tokens.clone());
    let controller = AuthSessionController::new(
        api,
        tokens.clone(),
        Arc::clone(&scopes),
        Arc::new(AlwaysOnline),
        transport,
    );
    Harness {
        controller,
        scopes,
        tokens,
    }
}

#[tokio::test]
async fn login_happy_path_persists_token_and_connects_realtime() -> Result<()> {
    let api_addr = canned_http(
        "200 OK",
        r#"{"success":true,"token":"T","user":{"id":"u1","name":"Ghost"}}"#,
    )
    .await?;
    let (ws_addr, mut auth_rx) = canned_ws().await?;
    let harness = harness(api_addr, ws_addr);

    let result = harness
        .controller
        .login("a@b.com", "Pw1!", true)
        .await;
    assert!(result.success, "unexpected failure: {}", result.message);

    // Both scopes hold the token ("remember me" was set).
    assert_eq!(
        harness.scopes.get(Scope::Session, keys::AUTH_TOKEN).as_deref(),
        Some("T")
    );
    assert_eq!(
        harness.scopes.get(Scope::Durable, keys::AUTH_TOKEN).as_deref(),
        Some("T")
    );
    assert_eq!(harness.tokens.get().as_deref(), Some("T"));

    let snapshot = harness.controller.snapshot();
    assert_eq!(snapshot.phase, AuthPhase::Authenticated);
    assert_eq!(snapshot.user.as_ref().map(|u| u.id.as_str()), Some("u1"));

    // The realtime connection attempt went out with the fresh token.
    let auth_token = timeout(WAIT, auth_rx.recv()).await?.expect("ws auth");
    assert_eq!(auth_token, "T");
    Ok(())
}

#[tokio::test]
async fn login_needs_verification_sets_no_identity() -> Result<()> {
    let api_addr = canned_http(
        "200 OK",
        r#"{"success":false,"needsVerification":true,"message":"verify first"}"#,
    )
    .await?;
    let (ws_addr, _auth_rx) = canned_ws().await?;
    let harness = harness(api_addr, ws_addr);

    let result = harness.controller.login("a@b.com", "Pw1!", false).await;
    assert!(!result.success);
    assert!(result.needs_verification);
    assert_eq!(result.email.as_deref(), Some("a@b.com"));
    assert!(harness.controller.snapshot().user.is_none());
    assert_eq!(harness.tokens.get(), None);
    Ok(())
}

#[tokio::test]
async fn background_rejection_demotes_and_clears_the_token() -> Result<()> {
    let api_addr = canned_http("401 Unauthorized", r#"{"message":"expired"}"#).await?;
    let (ws_addr, _auth_rx) = canned_ws().await?;
    let harness = harness(api_addr, ws_addr);

    harness.tokens.set("stale", true);
    let user = serde_json::json!({ "id": "u1", "name": "Ghost" }).to_string();
    harness.scopes.set(Scope::Durable, keys::USER_DATA, &user);

    harness.controller.bootstrap().await;

    let snapshot = harness.controller.snapshot();
    assert_eq!(snapshot.phase, AuthPhase::Unauthenticated);
    assert!(snapshot.user.is_none());
    assert_eq!(harness.tokens.get(), None);
    Ok(())
}

#[tokio::test]
async fn foreground_rejection_clears_a_bare_token() -> Result<()> {
    let api_addr = canned_http("401 Unauthorized", r#"{"message":"expired"}"#).await?;
    let (ws_addr, _auth_rx) = canned_ws().await?;
    let harness = harness(api_addr, ws_addr);

    // A token without a cached identity takes the foreground path.
    harness.tokens.set("stale", false);
    harness.scopes.remove_both(keys::SESSION_VERIFIED);

    harness.controller.bootstrap().await;

    assert_eq!(harness.controller.snapshot().phase, AuthPhase::Unauthenticated);
    assert_eq!(harness.tokens.get(), None);
    Ok(())
}

#[tokio::test]
async fn stale_revalidation_cannot_overwrite_a_newer_login() -> Result<()> {
    // The silent check rejects the old token while login succeeds; if the
    // rejection commits after the login, the epoch guard must drop it.
    let api_addr = routed_http(&[
        ("/auth/validate", "401 Unauthorized", r#"{"message":"expired"}"#),
        (
            "/auth/login",
            "200 OK",
            r#"{"success":true,"token":"T2","user":{"id":"u2","name":"Newer"}}"#,
        ),
    ])
    .await?;
    let (ws_addr, _auth_rx) = canned_ws().await?;
    let harness = harness(api_addr, ws_addr);

    harness.tokens.set("T1", true);
    let user = serde_json::json!({ "id": "u1", "name": "Older" }).to_string();
    harness.scopes.set(Scope::Durable, keys::USER_DATA, &user);

    // A login completing while bootstrap's revalidation is pending bumps
    // the epoch; the revalidation's commit must then be a no-op.
    let bootstrap = {
        let controller = harness.controller.clone();
        tokio::spawn(async move { controller.bootstrap().await })
    };
    let login = harness.controller.login("a@b.com", "Pw1!", true).await;
    assert!(login.success);
    bootstrap.await?;

    let snapshot = harness.controller.snapshot();
    assert_eq!(snapshot.phase, AuthPhase::Authenticated);
    assert_eq!(snapshot.user.as_ref().map(|u| u.id.as_str()), Some("u2"));
    // The stale rejection must not have cleared the newer credential.
    assert_eq!(harness.tokens.get().as_deref(), Some("T2"));
    Ok(())
}
