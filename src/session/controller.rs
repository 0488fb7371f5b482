//! Owner of the current user and every credential-issuing flow.
//!
//! State moves `Unknown -> Loading -> {Authenticated, Unauthenticated}`
//! and is published through a watch channel so gates and screens observe
//! changes without polling. Async completions only commit through an
//! epoch check: login and logout bump the epoch, which turns any
//! still-in-flight revalidation into a no-op instead of letting it
//! clobber newer state.

use crate::api::types::{
    Ack, LoginOutcome, RegisterProfile, SessionVerifyOutcome, UserIdentity, VerifyOutcome,
};
use crate::api::{normalize_email, valid_email, ApiClient, ApiError};
use crate::platform::Connectivity;
use crate::realtime::{events, RealtimeTransport, Subscription};
use crate::storage::{keys, Scope, StorageScopes};
use crate::token::TokenStore;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, instrument, warn};

/// Bound on the silent background check; a timeout is inconclusive, not
/// a rejection. The foreground cold-start check is deliberately
/// unbounded.
const REVALIDATE_TIMEOUT: Duration = Duration::from_secs(3);

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum AuthPhase {
    Unknown,
    Loading,
    Authenticated,
    Unauthenticated,
}

#[derive(Clone, Debug)]
pub struct SessionSnapshot {
    pub phase: AuthPhase,
    pub user: Option<UserIdentity>,
    pub session_verified: bool,
}

impl SessionSnapshot {
    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.phase == AuthPhase::Authenticated
    }

    #[must_use]
    pub fn is_loading(&self) -> bool {
        matches!(self.phase, AuthPhase::Unknown | AuthPhase::Loading)
    }
}

/// Result every credential flow resolves to; these flows never throw.
#[derive(Clone, Debug, PartialEq)]
pub struct LoginResult {
    pub success: bool,
    pub message: String,
    pub needs_verification: bool,
    pub email: Option<String>,
}

impl LoginResult {
    fn ok() -> Self {
        Self {
            success: true,
            message: "Login successful".to_string(),
            needs_verification: false,
            email: None,
        }
    }

    fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            needs_verification: false,
            email: None,
        }
    }

    fn verification_needed(email: String) -> Self {
        Self {
            success: false,
            message: "Please verify your email before logging in.".to_string(),
            needs_verification: true,
            email: Some(email),
        }
    }
}

#[derive(Clone)]
pub struct AuthSessionController {
    inner: Arc<ControllerInner>,
}

struct ControllerInner {
    api: ApiClient,
    tokens: TokenStore,
    scopes: Arc<StorageScopes>,
    connectivity: Arc<dyn Connectivity>,
    transport: RealtimeTransport,
    epoch: AtomicU64,
    flight: Mutex<()>,
    snapshot: watch::Sender<SessionSnapshot>,
}

impl AuthSessionController {
    #[must_use]
    pub fn new(
        api: ApiClient,
        tokens: TokenStore,
        scopes: Arc<StorageScopes>,
        connectivity: Arc<dyn Connectivity>,
        transport: RealtimeTransport,
    ) -> Self {
        let initial = SessionSnapshot {
            phase: AuthPhase::Unknown,
            user: None,
            session_verified: scopes.flag(keys::SESSION_VERIFIED),
        };
        let (snapshot, _rx) = watch::channel(initial);
        Self {
            inner: Arc::new(ControllerInner {
                api,
                tokens,
                scopes,
                connectivity,
                transport,
                epoch: AtomicU64::new(0),
                flight: Mutex::new(()),
                snapshot,
            }),
        }
    }

    #[must_use]
    pub fn snapshot(&self) -> SessionSnapshot {
        self.inner.snapshot.borrow().clone()
    }

    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.inner.snapshot.subscribe()
    }

    /// Resolve the initial session state.
    ///
    /// With a cached identity and a verified-session flag the state is
    /// committed from cache before any network traffic, then revalidated
    /// against the backend when the host reports connectivity. Without a
    /// usable cache, a lone token goes through a foreground check.
    #[instrument(skip(self))]
    pub async fn bootstrap(&self) {
        self.commit(|snapshot| snapshot.phase = AuthPhase::Loading);
        let epoch = self.inner.epoch.load(Ordering::SeqCst);
        let verified = self.inner.scopes.flag(keys::SESSION_VERIFIED);

        if let (Some(user), true) = (self.cached_identity(), verified) {
            self.commit(|snapshot| {
                snapshot.phase = AuthPhase::Authenticated;
                snapshot.user = Some(user);
                snapshot.session_verified = true;
            });
            if !self.inner.connectivity.is_online() {
                debug!("offline, skipping background revalidation");
                return;
            }
            let Some(token) = self.inner.tokens.get() else {
                debug!("cached identity without a token, skipping revalidation");
                return;
            };
            let _flight = self.inner.flight.lock().await;
            match self.inner.api.validate(&token, REVALIDATE_TIMEOUT).await {
                Ok(VerifyOutcome::Valid { .. }) => debug!("background revalidation confirmed"),
                Ok(VerifyOutcome::Rejected { status, .. }) => {
                    if self.commit_if(epoch, |snapshot| {
                        snapshot.phase = AuthPhase::Unauthenticated;
                        snapshot.user = None;
                        snapshot.session_verified = false;
                    }) {
                        self.inner.tokens.clear();
                        info!("cached session rejected by backend: {status:?}");
                    }
                }
                // Timeouts and transport failures are inconclusive; the
                // cached state stands.
                Err(err) => debug!("background revalidation inconclusive: {err}"),
            }
            return;
        }

        let Some(token) = self.inner.tokens.get() else {
            self.commit_if(epoch, |snapshot| {
                snapshot.phase = AuthPhase::Unauthenticated;
                snapshot.user = None;
            });
            return;
        };

        let _flight = self.inner.flight.lock().await;
        match self.inner.api.verify_token(&token).await {
            Ok(VerifyOutcome::Valid { user: Some(user) }) => {
                let remembered = self.inner.scopes.flag(keys::REMEMBER_ME);
                cache_identity(&self.inner, &user, remembered);
                let session_verified = self.inner.scopes.flag(keys::SESSION_VERIFIED);
                self.commit_if(epoch, |snapshot| {
                    snapshot.phase = AuthPhase::Authenticated;
                    snapshot.user = Some(user);
                    snapshot.session_verified = session_verified;
                });
            }
            Ok(VerifyOutcome::Valid { user: None } | VerifyOutcome::Rejected { .. }) => {
                if self.commit_if(epoch, |snapshot| {
                    snapshot.phase = AuthPhase::Unauthenticated;
                    snapshot.user = None;
                }) {
                    self.inner.tokens.clear();
                    info!("stored token rejected, cleared");
                }
            }
            Err(err) => {
                // The token survives a pure network failure; a later
                // bootstrap retries it.
                warn!("foreground verification unreachable: {err}");
                self.commit_if(epoch, |snapshot| {
                    snapshot.phase = AuthPhase::Unauthenticated;
                    snapshot.user = None;
                });
            }
        }
    }

    #[instrument(skip(self, password))]
    pub async fn login(&self, email: &str, password: &str, remember: bool) -> LoginResult {
        let email = normalize_email(email);
        if !valid_email(&email) {
            return LoginResult::failure("Enter a valid email address");
        }
        let _flight = self.inner.flight.lock().await;
        let outcome = self.inner.api.login(&email, password).await;
        self.adopt(outcome, remember)
    }

    /// Registration does not log the user in; they verify email first.
    #[instrument(skip(self, password, profile))]
    pub async fn register(&self, email: &str, password: &str, profile: RegisterProfile) -> Ack {
        let email = normalize_email(email);
        if !valid_email(&email) {
            return Ack::Rejected {
                message: "Enter a valid email address".to_string(),
            };
        }
        match self.inner.api.register(&email, password, &profile).await {
            Ok(ack) => ack,
            Err(err) => {
                warn!("register request failed: {err}");
                Ack::Rejected {
                    message: "Registration request failed".to_string(),
                }
            }
        }
    }

    /// Complete a magic-link login with the token from the email.
    pub async fn complete_magic_link(&self, token: &str) -> LoginResult {
        let _flight = self.inner.flight.lock().await;
        let outcome = self.inner.api.verify_magic_link(token).await;
        self.adopt(outcome, false)
    }

    /// Complete a 2FA challenge with the emailed code.
    pub async fn complete_two_factor(&self, user_id: &str, code: &str) -> LoginResult {
        let _flight = self.inner.flight.lock().await;
        let outcome = self.inner.api.verify_2fa(user_id, code).await;
        self.adopt(outcome, false)
    }

    /// Best-effort backend logout, then unconditional local teardown:
    /// token, cached identity, and the realtime connection are gone by
    /// the time this returns, whatever the network said.
    #[instrument(skip(self))]
    pub async fn logout(&self) {
        let _flight = self.inner.flight.lock().await;
        let token = self.inner.tokens.get();
        if let Err(err) = self.inner.api.logout(token.as_deref()).await {
            debug!("backend logout failed, ignored: {err}");
        }
        self.inner.epoch.fetch_add(1, Ordering::SeqCst);
        self.inner.tokens.clear();
        self.inner.scopes.remove_both(keys::USER_DATA);
        self.inner.transport.disconnect();
        self.commit(|snapshot| {
            snapshot.phase = AuthPhase::Unauthenticated;
            snapshot.user = None;
            snapshot.session_verified = false;
        });
        info!("logged out");
    }

    /// Record a successful session verification: both flags in both
    /// scopes plus any session details. Does not touch the auth phase.
    pub fn handle_session_verification(&self, outcome: &SessionVerifyOutcome) {
        let SessionVerifyOutcome::Verified { session_details } = outcome else {
            return;
        };
        self.inner.scopes.set_both(keys::SESSION_VERIFIED, "true");
        self.inner.scopes.set_both(keys::SECURITY_TOKEN_VERIFIED, "true");
        if let Some(details) = session_details {
            if let Ok(raw) = serde_json::to_string(details) {
                self.inner.scopes.set_both(keys::SESSION_DETAILS, &raw);
            }
        }
        self.commit(|snapshot| snapshot.session_verified = true);
    }

    /// Apply profile updates pushed over the realtime channel to the
    /// current identity and its cache.
    pub fn bind_realtime_updates(&self) -> Subscription {
        let weak = Arc::downgrade(&self.inner);
        self.inner
            .transport
            .subscribe(events::inbound::AUTH_UPDATE_USER, move |data| {
                let Some(inner) = weak.upgrade() else {
                    return;
                };
                match serde_json::from_value::<UserIdentity>(data.clone()) {
                    Ok(user) => {
                        let remembered = inner.scopes.flag(keys::REMEMBER_ME);
                        cache_identity(&inner, &user, remembered);
                        inner.snapshot.send_modify(|snapshot| {
                            if snapshot.phase == AuthPhase::Authenticated {
                                snapshot.user = Some(user.clone());
                            }
                        });
                    }
                    Err(err) => debug!("ignoring malformed auth:update-user payload: {err}"),
                }
            })
    }

    /// Shared tail of login, magic-link, and 2FA completion.
    fn adopt(&self, outcome: Result<LoginOutcome, ApiError>, remember: bool) -> LoginResult {
        match outcome {
            Ok(LoginOutcome::Success { token, user }) => {
                self.inner.epoch.fetch_add(1, Ordering::SeqCst);
                // The token is persisted before the connect so a reconnect
                // inside the transport never reads an absent token.
                self.inner.tokens.set(&token, remember);
                cache_identity(&self.inner, &user, remember);
                self.inner.transport.connect(&token);
                let session_verified = self.inner.scopes.flag(keys::SESSION_VERIFIED);
                self.commit(|snapshot| {
                    snapshot.phase = AuthPhase::Authenticated;
                    snapshot.user = Some(user);
                    snapshot.session_verified = session_verified;
                });
                LoginResult::ok()
            }
            Ok(LoginOutcome::NeedsVerification { email }) => {
                LoginResult::verification_needed(email)
            }
            Ok(LoginOutcome::Rejected { message, .. }) => LoginResult::failure(message),
            Err(err) => {
                warn!("credential request failed: {err}");
                LoginResult::failure("An error occurred during login")
            }
        }
    }

    fn cached_identity(&self) -> Option<UserIdentity> {
        let raw = self.inner.scopes.get_either(keys::USER_DATA)?;
        serde_json::from_str(&raw).ok()
    }

    fn commit(&self, mutate: impl FnOnce(&mut SessionSnapshot)) {
        self.inner.snapshot.send_modify(mutate);
    }

    /// Commit only when no login/logout completed since `epoch` was
    /// read; stale async completions become no-ops here.
    fn commit_if(&self, epoch: u64, mutate: impl FnOnce(&mut SessionSnapshot)) -> bool {
        if self.inner.epoch.load(Ordering::SeqCst) != epoch {
            debug!("stale completion dropped");
            return false;
        }
        self.inner.snapshot.send_modify(mutate);
        true
    }
}

fn cache_identity(inner: &ControllerInner, user: &UserIdentity, durable: bool) {
    if let Ok(raw) = serde_json::to_string(user) {
        inner.scopes.set(Scope::Session, keys::USER_DATA, &raw);
        if durable {
            inner.scopes.set(Scope::Durable, keys::USER_DATA, &raw);
        }
    }
}
