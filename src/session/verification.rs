//! Blocking session-verification gate.
//!
//! After a login the backend emails a verification link; until a
//! confirmation is observed, protected content stays behind the
//! verification prompt. The prompt offers exactly two actions: confirm
//! ("I've clicked the link") and log out.

use crate::api::types::SessionVerifyOutcome;
use crate::api::ApiClient;
use crate::platform::PlatformEvent;
use crate::session::controller::AuthSessionController;
use crate::storage::{keys, StorageScopes};
use serde_json::Value;
use std::sync::Arc;
use tracing::warn;

pub struct SessionVerificationGate {
    controller: AuthSessionController,
    api: ApiClient,
    scopes: Arc<StorageScopes>,
}

impl SessionVerificationGate {
    #[must_use]
    pub fn new(
        controller: AuthSessionController,
        api: ApiClient,
        scopes: Arc<StorageScopes>,
    ) -> Self {
        Self {
            controller,
            api,
            scopes,
        }
    }

    #[must_use]
    pub fn is_verified(&self) -> bool {
        self.scopes.flag(keys::SESSION_VERIFIED)
    }

    #[must_use]
    pub fn security_token_verified(&self) -> bool {
        self.scopes.flag(keys::SECURITY_TOKEN_VERIFIED)
    }

    /// Details of the login being verified (device, location, time), if
    /// the backend supplied them.
    #[must_use]
    pub fn session_details(&self) -> Option<Value> {
        let raw = self.scopes.get_either(keys::SESSION_DETAILS)?;
        serde_json::from_str(&raw).ok()
    }

    /// "I've clicked the link": marks the session verified on the
    /// client's word alone, no server round trip. Every caller funnels
    /// through here so the trust boundary can be hardened in one place.
    pub fn confirm_link_clicked(&self) {
        let session_details = self.session_details();
        self.controller
            .handle_session_verification(&SessionVerifyOutcome::Verified { session_details });
    }

    /// Verify against the backend with the token from the email link.
    pub async fn verify_with_backend(&self, token: &str) -> SessionVerifyOutcome {
        match self.api.verify_session(token).await {
            Ok(outcome) => {
                self.controller.handle_session_verification(&outcome);
                outcome
            }
            Err(err) => {
                warn!("session verification request failed: {err}");
                SessionVerifyOutcome::Rejected {
                    message: "Error verifying session. Please check your inbox for a verification link."
                        .to_string(),
                }
            }
        }
    }

    /// The prompt's second action.
    pub async fn log_out(&self) {
        self.controller.logout().await;
    }

    /// Whether a host navigation event must stay blocked: back-button
    /// presses cannot escape the prompt while authenticated but
    /// unverified.
    #[must_use]
    pub fn guard_navigation(&self, event: &PlatformEvent) -> bool {
        matches!(event, PlatformEvent::BackButton)
            && self.controller.snapshot().is_authenticated()
            && !self.is_verified()
    }
}
