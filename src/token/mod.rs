//! Bearer credential lifecycle across the two storage scopes.
//!
//! At most one credential is authoritative at a time. The store keeps an
//! in-memory copy for fast reads, mirrors a valid durable copy back into
//! the session scope, and clears everything once no unexpired copy
//! remains. Storage failures are treated as "no token".

use crate::storage::{keys, Scope, StorageScopes};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::debug;

const SESSION_TTL: Duration = Duration::from_secs(24 * 60 * 60);
const REMEMBERED_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

#[derive(Clone)]
pub struct TokenStore {
    scopes: Arc<StorageScopes>,
    cached: Arc<Mutex<Option<String>>>,
}

impl TokenStore {
    #[must_use]
    pub fn new(scopes: Arc<StorageScopes>) -> Self {
        Self {
            scopes,
            cached: Arc::new(Mutex::new(None)),
        }
    }

    /// Store a freshly issued token.
    ///
    /// The session scope always receives a copy; the durable scope only
    /// when `remember` was requested. Both verification flags start out
    /// permissive so a fresh login does not bounce straight into the
    /// verification prompt.
    pub fn set(&self, token: &str, remember: bool) {
        let ttl = if remember { REMEMBERED_TTL } else { SESSION_TTL };
        let expires = now_unix() + ttl.as_secs() as i64;
        let expires = expires.to_string();

        self.scopes.set(Scope::Session, keys::AUTH_TOKEN, token);
        self.scopes.set(Scope::Session, keys::AUTH_TOKEN_EXPIRES, &expires);
        self.scopes.set(Scope::Session, keys::SESSION_VERIFIED, "true");
        self.scopes.set(Scope::Session, keys::SECURITY_TOKEN_VERIFIED, "true");

        if remember {
            self.scopes.set(Scope::Durable, keys::AUTH_TOKEN, token);
            self.scopes.set(Scope::Durable, keys::AUTH_TOKEN_EXPIRES, &expires);
            self.scopes.set(Scope::Durable, keys::REMEMBER_ME, "true");
            self.scopes.set(Scope::Durable, keys::SESSION_VERIFIED, "true");
            self.scopes.set(Scope::Durable, keys::SECURITY_TOKEN_VERIFIED, "true");
        } else {
            self.scopes.remove(Scope::Durable, keys::AUTH_TOKEN);
            self.scopes.remove(Scope::Durable, keys::AUTH_TOKEN_EXPIRES);
            self.scopes.remove(Scope::Durable, keys::REMEMBER_ME);
        }

        *self.cached.lock() = Some(token.to_string());
        debug!("token stored, remember={remember}");
    }

    /// The current token, or `None` once every copy is expired or absent.
    pub fn get(&self) -> Option<String> {
        if let Some(token) = self.cached.lock().clone() {
            return Some(token);
        }

        if let Some(token) = self.unexpired(Scope::Session) {
            *self.cached.lock() = Some(token.clone());
            return Some(token);
        }

        // The durable copy only counts when "remember me" was requested.
        if self.scopes.get(Scope::Durable, keys::REMEMBER_ME).as_deref() == Some("true") {
            if let Some(token) = self.unexpired(Scope::Durable) {
                let expires = self
                    .scopes
                    .get(Scope::Durable, keys::AUTH_TOKEN_EXPIRES)
                    .unwrap_or_default();
                self.scopes.set(Scope::Session, keys::AUTH_TOKEN, &token);
                self.scopes.set(Scope::Session, keys::AUTH_TOKEN_EXPIRES, &expires);
                *self.cached.lock() = Some(token.clone());
                return Some(token);
            }
        }

        self.clear();
        None
    }

    /// Wipe the cache and every token-related key in both scopes.
    pub fn clear(&self) {
        *self.cached.lock() = None;
        for key in [
            keys::AUTH_TOKEN,
            keys::AUTH_TOKEN_EXPIRES,
            keys::SESSION_VERIFIED,
            keys::SECURITY_TOKEN_VERIFIED,
            keys::SESSION_DETAILS,
            keys::REMEMBER_ME,
        ] {
            self.scopes.remove_both(key);
        }
        debug!("token and session flags cleared");
    }

    /// An unexpired token from one scope; expired copies are removed on
    /// the way out.
    fn unexpired(&self, scope: Scope) -> Option<String> {
        let token = self.scopes.get(scope, keys::AUTH_TOKEN)?;
        let expires = self
            .scopes
            .get(scope, keys::AUTH_TOKEN_EXPIRES)
            .and_then(|raw| raw.parse::<i64>().ok());
        match expires {
            Some(expires) if now_unix() < expires => Some(token),
            _ => {
                self.scopes.remove(scope, keys::AUTH_TOKEN);
                self.scopes.remove(scope, keys::AUTH_TOKEN_EXPIRES);
                None
            }
        }
    }
}

fn now_unix() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| elapsed.as_secs() as i64)
}
