//! Client-side persistence scopes.
//!
//! Two string-keyed stores back the session core: a session scope that
//! lives for the current run, and a durable scope persisted as a single
//! JSON object on disk so "remember me" logins survive restarts. Reads
//! and writes never fail from the caller's perspective; a missing or
//! unreadable durable file is an empty scope.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Storage keys shared between the token store, the session controller,
/// and the verification gate.
pub mod keys {
    pub const AUTH_TOKEN: &str = "authToken";
    pub const AUTH_TOKEN_EXPIRES: &str = "authTokenExpires";
    pub const REMEMBER_ME: &str = "rememberMe";
    pub const SESSION_VERIFIED: &str = "sessionVerified";
    pub const SECURITY_TOKEN_VERIFIED: &str = "securityTokenVerified";
    pub const SESSION_DETAILS: &str = "sessionDetails";
    pub const USER_DATA: &str = "userData";
    pub const HAS_SEEN_ONBOARDING: &str = "hasSeenOnboarding";
    pub const FORCE_ONBOARDING: &str = "forceOnboarding";
}

const DURABLE_FILE: &str = "durable.json";

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Scope {
    /// Lives for the current run only.
    Session,
    /// Survives restarts; only populated for "remember me" logins.
    Durable,
}

pub struct StorageScopes {
    session: Mutex<HashMap<String, String>>,
    durable: Mutex<HashMap<String, String>>,
    durable_path: Option<PathBuf>,
}

impl StorageScopes {
    /// Open the scopes backed by `<data_dir>/durable.json`.
    pub fn open(data_dir: impl Into<PathBuf>) -> Self {
        let path = data_dir.into().join(DURABLE_FILE);
        let durable = load_durable(&path);
        Self {
            session: Mutex::new(HashMap::new()),
            durable: Mutex::new(durable),
            durable_path: Some(path),
        }
    }

    /// Scopes with no backing file; the durable scope still works but is
    /// lost on exit.
    #[must_use]
    pub fn ephemeral() -> Self {
        Self {
            session: Mutex::new(HashMap::new()),
            durable: Mutex::new(HashMap::new()),
            durable_path: None,
        }
    }

    pub fn get(&self, scope: Scope, key: &str) -> Option<String> {
        match scope {
            Scope::Session => self.session.lock().get(key).cloned(),
            Scope::Durable => self.durable.lock().get(key).cloned(),
        }
    }

    pub fn set(&self, scope: Scope, key: &str, value: &str) {
        match scope {
            Scope::Session => {
                self.session.lock().insert(key.to_string(), value.to_string());
            }
            Scope::Durable => {
                let mut durable = self.durable.lock();
                durable.insert(key.to_string(), value.to_string());
                self.persist(&durable);
            }
        }
    }

    pub fn remove(&self, scope: Scope, key: &str) {
        match scope {
            Scope::Session => {
                self.session.lock().remove(key);
            }
            Scope::Durable => {
                let mut durable = self.durable.lock();
                if durable.remove(key).is_some() {
                    self.persist(&durable);
                }
            }
        }
    }

    /// Session scope first, then durable.
    pub fn get_either(&self, key: &str) -> Option<String> {
        self.get(Scope::Session, key)
            .or_else(|| self.get(Scope::Durable, key))
    }

    /// True when either scope holds the literal `"true"`.
    pub fn flag(&self, key: &str) -> bool {
        self.get_either(key).as_deref() == Some("true")
    }

    pub fn set_both(&self, key: &str, value: &str) {
        self.set(Scope::Session, key, value);
        self.set(Scope::Durable, key, value);
    }

    pub fn remove_both(&self, key: &str) {
        self.remove(Scope::Session, key);
        self.remove(Scope::Durable, key);
    }

    pub fn has_seen_onboarding(&self) -> bool {
        self.flag(keys::HAS_SEEN_ONBOARDING)
    }

    pub fn set_has_seen_onboarding(&self, seen: bool) {
        self.set(Scope::Durable, keys::HAS_SEEN_ONBOARDING, bool_str(seen));
    }

    pub fn force_onboarding(&self) -> bool {
        self.flag(keys::FORCE_ONBOARDING)
    }

    pub fn set_force_onboarding(&self, force: bool) {
        if force {
            self.set(Scope::Durable, keys::FORCE_ONBOARDING, "true");
        } else {
            self.remove(Scope::Durable, keys::FORCE_ONBOARDING);
        }
    }

    fn persist(&self, durable: &HashMap<String, String>) {
        let Some(path) = &self.durable_path else {
            return;
        };
        if let Some(parent) = path.parent() {
            if let Err(err) = fs::create_dir_all(parent) {
                warn!("failed to create data directory {}: {err}", parent.display());
                return;
            }
        }
        match serde_json::to_string_pretty(durable) {
            Ok(json) => {
                if let Err(err) = fs::write(path, json) {
                    warn!("failed to write {}: {err}", path.display());
                }
            }
            Err(err) => warn!("failed to encode durable storage: {err}"),
        }
    }
}

fn load_durable(path: &Path) -> HashMap<String, String> {
    let Ok(raw) = fs::read_to_string(path) else {
        debug!("no durable storage at {}", path.display());
        return HashMap::new();
    };
    match serde_json::from_str(&raw) {
        Ok(map) => map,
        Err(err) => {
            warn!("unreadable durable storage {}: {err}", path.display());
            HashMap::new()
        }
    }
}

fn bool_str(value: bool) -> &'static str {
    if value {
        "true"
    } else {
        "false"
    }
}
