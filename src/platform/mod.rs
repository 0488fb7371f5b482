//! Host capabilities injected into the session core.
//!
//! The session layer never talks to the host environment directly: the
//! connectivity probe and the ambient event hooks (back button, global
//! error handlers) arrive as injected capabilities so non-browser hosts
//! can supply their own.

use tokio::sync::broadcast;

/// Reports whether the device currently has network connectivity.
pub trait Connectivity: Send + Sync {
    fn is_online(&self) -> bool;
}

/// Default probe for hosts without a connectivity signal.
pub struct AlwaysOnline;

impl Connectivity for AlwaysOnline {
    fn is_online(&self) -> bool {
        true
    }
}

/// Ambient events the host forwards into the core.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum PlatformEvent {
    BackButton,
    GlobalError(String),
}

/// Broadcast-backed event source standing in for window/page listeners.
#[derive(Clone)]
pub struct HostEvents {
    tx: broadcast::Sender<PlatformEvent>,
}

impl HostEvents {
    #[must_use]
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(16);
        Self { tx }
    }

    pub fn emit(&self, event: PlatformEvent) {
        // No subscribers is fine; the event simply goes unobserved.
        let _ = self.tx.send(event);
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<PlatformEvent> {
        self.tx.subscribe()
    }
}

impl Default for HostEvents {
    fn default() -> Self {
        Self::new()
    }
}
