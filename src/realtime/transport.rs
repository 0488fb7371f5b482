//! Persistent realtime connection with self-healing reconnects.
//!
//! One logical connection per authenticated session. Connection tasks
//! are tagged with a generation counter; `disconnect` (and any newer
//! `connect`) bumps the counter so a superseded task can never mutate
//! shared state or reconnect on its own. Reconnection always reads the
//! token fresh from the [`TokenStore`], never a captured copy.

use crate::realtime::events::{self, Frame};
use crate::token::TokenStore;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use rand::Rng;
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::sleep;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};
use ulid::Ulid;
use url::Url;

const RECONNECT_DELAY: Duration = Duration::from_secs(1);

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

type EventHandler = Arc<dyn Fn(&Value) + Send + Sync>;

#[derive(Clone)]
pub struct RealtimeTransport {
    inner: Arc<Inner>,
}

struct Inner {
    ws_url: Url,
    tokens: TokenStore,
    client_id: String,
    state: Mutex<ConnectionState>,
    generation: AtomicU64,
    next_handler: AtomicU64,
    handlers: Mutex<HashMap<String, Vec<(u64, EventHandler)>>>,
    outbound: Mutex<Option<mpsc::UnboundedSender<Message>>>,
    open_rooms: Mutex<HashSet<String>>,
}

/// Scoped event registration. Dropping (or calling [`dispose`]) removes
/// exactly the handler this subscription added, from any teardown path.
///
/// [`dispose`]: Subscription::dispose
pub struct Subscription {
    inner: Weak<Inner>,
    event: String,
    id: u64,
}

impl Subscription {
    pub fn dispose(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(inner) = self.inner.upgrade() {
            if let Some(list) = inner.handlers.lock().get_mut(&self.event) {
                list.retain(|(id, _)| *id != self.id);
            }
        }
    }
}

impl RealtimeTransport {
    #[must_use]
    pub fn new(ws_url: Url, tokens: TokenStore) -> Self {
        Self {
            inner: Arc::new(Inner {
                ws_url,
                tokens,
                client_id: Ulid::new().to_string(),
                state: Mutex::new(ConnectionState::Disconnected),
                generation: AtomicU64::new(0),
                next_handler: AtomicU64::new(0),
                handlers: Mutex::new(HashMap::new()),
                outbound: Mutex::new(None),
                open_rooms: Mutex::new(HashSet::new()),
            }),
        }
    }

    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.inner.state.lock()
    }

    #[must_use]
    pub fn client_id(&self) -> &str {
        &self.inner.client_id
    }

    /// Idempotent connect: a no-op while a connection exists or is being
    /// established.
    pub fn connect(&self, token: &str) {
        self.ensure_connected(token);
    }

    /// Returns whether a new connection attempt was initiated. Screens
    /// that depend on realtime events call this opportunistically;
    /// connection loss is expected and heals here.
    pub fn ensure_connected(&self, token: &str) -> bool {
        let generation = {
            let mut state = self.inner.state.lock();
            if *state != ConnectionState::Disconnected {
                debug!("realtime already {:?}", *state);
                return false;
            }
            *state = ConnectionState::Connecting;
            self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1
        };
        let inner = Arc::clone(&self.inner);
        let token = token.to_string();
        tokio::spawn(async move {
            run_connection(inner, generation, token).await;
        });
        true
    }

    /// Close the connection and stop any reconnect attempts. Idempotent.
    pub fn disconnect(&self) {
        self.inner.generation.fetch_add(1, Ordering::SeqCst);
        if let Some(tx) = self.inner.outbound.lock().take() {
            let _ = tx.send(Message::Close(None));
        }
        *self.inner.state.lock() = ConnectionState::Disconnected;
        info!("realtime disconnected");
    }

    /// Register a handler for a named event.
    pub fn subscribe<F>(&self, event: &str, handler: F) -> Subscription
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        let id = self.inner.next_handler.fetch_add(1, Ordering::SeqCst);
        self.inner
            .handlers
            .lock()
            .entry(event.to_string())
            .or_default()
            .push((id, Arc::new(handler)));
        Subscription {
            inner: Arc::downgrade(&self.inner),
            event: event.to_string(),
            id,
        }
    }

    /// Send a raw event frame; false when no connection is up.
    pub fn emit(&self, event: &str, data: Value) -> bool {
        send_frame(&self.inner, &Frame::new(event, data))
    }

    pub fn join_room(&self, room_id: &str) -> bool {
        self.inner.open_rooms.lock().insert(room_id.to_string());
        self.emit(events::outbound::JOIN_ROOM, json!({ "roomId": room_id }))
    }

    pub fn leave_room(&self, room_id: &str) -> bool {
        self.inner.open_rooms.lock().remove(room_id);
        self.emit(events::outbound::LEAVE_ROOM, json!({ "roomId": room_id }))
    }

    pub fn typing(&self, room_id: &str) -> bool {
        self.emit(events::outbound::TYPING, json!({ "roomId": room_id }))
    }

    pub fn stop_typing(&self, room_id: &str) -> bool {
        self.emit(events::outbound::STOP_TYPING, json!({ "roomId": room_id }))
    }

    pub fn ping(&self) -> bool {
        self.emit(events::outbound::PING, json!({ "clientId": self.inner.client_id }))
    }
}

fn send_frame(inner: &Inner, frame: &Frame) -> bool {
    let Some(tx) = inner.outbound.lock().clone() else {
        debug!("dropping {} frame: not connected", frame.event);
        return false;
    };
    match serde_json::to_string(frame) {
        Ok(text) => tx.send(Message::Text(text)).is_ok(),
        Err(err) => {
            warn!("failed to encode {} frame: {err}", frame.event);
            false
        }
    }
}

fn set_state(inner: &Inner, generation: u64, state: ConnectionState) {
    if inner.generation.load(Ordering::SeqCst) == generation {
        *inner.state.lock() = state;
    }
}

/// Fan an inbound frame out to its handlers. Handlers are cloned out of
/// the registry first so a handler may subscribe/unsubscribe reentrantly.
fn dispatch(inner: &Arc<Inner>, frame: &Frame) {
    let handlers: Vec<EventHandler> = inner
        .handlers
        .lock()
        .get(&frame.event)
        .map(|list| list.iter().map(|(_, handler)| Arc::clone(handler)).collect())
        .unwrap_or_default();
    for handler in handlers {
        handler(&frame.data);
    }

    // Messages for a room the user has open are acknowledged as read
    // immediately; the ack is fire-and-forget.
    if frame.event == events::inbound::CHAT_MESSAGE {
        let room_id = frame.data.get("roomId").and_then(Value::as_str);
        if let Some(room_id) = room_id {
            if inner.open_rooms.lock().contains(room_id) {
                let message_id = frame
                    .data
                    .get("messageId")
                    .or_else(|| frame.data.get("id"))
                    .cloned()
                    .unwrap_or(Value::Null);
                send_frame(
                    inner,
                    &Frame::new(
                        events::outbound::MESSAGE_READ,
                        json!({ "roomId": room_id, "messageId": message_id }),
                    ),
                );
            }
        }
    }
}

async fn run_connection(inner: Arc<Inner>, generation: u64, mut token: String) {
    let mut reconnecting = false;
    loop {
        if inner.generation.load(Ordering::SeqCst) != generation {
            return;
        }

        let request = match inner.ws_url.as_str().into_client_request() {
            Ok(request) => request,
            Err(err) => {
                warn!("invalid realtime URL {}: {err}", inner.ws_url);
                set_state(&inner, generation, ConnectionState::Disconnected);
                return;
            }
        };

        match connect_async(request).await {
            Ok((stream, _response)) => {
                if inner.generation.load(Ordering::SeqCst) != generation {
                    return;
                }
                set_state(&inner, generation, ConnectionState::Connected);
                info!("realtime connected to {}", inner.ws_url);

                let (mut write, mut read) = stream.split();
                let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
                *inner.outbound.lock() = Some(tx.clone());

                // Connection-time auth is the first frame on the wire.
                let auth = Frame::new(events::AUTH, json!({ "token": token }));
                if let Ok(text) = serde_json::to_string(&auth) {
                    let _ = tx.send(Message::Text(text));
                }

                let writer = tokio::spawn(async move {
                    while let Some(message) = rx.recv().await {
                        if write.send(message).await.is_err() {
                            break;
                        }
                    }
                });

                while let Some(message) = read.next().await {
                    if inner.generation.load(Ordering::SeqCst) != generation {
                        break;
                    }
                    match message {
                        Ok(Message::Text(text)) => match serde_json::from_str::<Frame>(&text) {
                            Ok(frame) => dispatch(&inner, &frame),
                            Err(err) => warn!("unparseable realtime frame: {err}"),
                        },
                        Ok(Message::Ping(payload)) => {
                            let _ = tx.send(Message::Pong(payload));
                        }
                        Ok(Message::Close(_)) => {
                            debug!("server closed realtime connection");
                            break;
                        }
                        Ok(_) => {}
                        Err(err) => {
                            warn!("realtime stream error: {err}");
                            break;
                        }
                    }
                }

                inner.outbound.lock().take();
                writer.abort();

                if inner.generation.load(Ordering::SeqCst) != generation {
                    // Explicitly disconnected (or superseded); leave state
                    // to the owner of the newer generation.
                    return;
                }
                set_state(&inner, generation, ConnectionState::Reconnecting);
                reconnecting = true;
            }
            Err(err) => {
                warn!("realtime connect failed: {err}");
                if !reconnecting {
                    // An initial connect failure does not retry; callers
                    // re-issue ensure_connected opportunistically.
                    set_state(&inner, generation, ConnectionState::Disconnected);
                    return;
                }
            }
        }

        sleep(jittered(RECONNECT_DELAY)).await;
        if inner.generation.load(Ordering::SeqCst) != generation {
            return;
        }
        // A fresh read every attempt: reconnecting with a token captured
        // before an expiry or rotation would wedge the session.
        match inner.tokens.get() {
            Some(fresh) => token = fresh,
            None => {
                debug!("no valid token for reconnect, giving up");
                set_state(&inner, generation, ConnectionState::Disconnected);
                return;
            }
        }
    }
}

fn jittered(base: Duration) -> Duration {
    let factor = rand::thread_rng().gen_range(0.9..1.1);
    Duration::from_millis((base.as_millis() as f64 * factor) as u64)
}
