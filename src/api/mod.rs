//! REST client for the GhostTalk backend auth surface.
//!
//! One `reqwest::Client` serves every call: JSON bodies, bearer auth
//! when a token is on hand, and cookies included for CORS. Non-2xx
//! responses are normalized into the [`types::Envelope`] shape; only
//! transport-level failures surface as [`ApiError::Network`], which the
//! session layer treats as recoverable rather than authoritative.

pub mod types;

use crate::APP_USER_AGENT;
use regex::Regex;
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, instrument, warn};
use types::{Ack, Envelope, LoginOutcome, RegisterProfile, SessionVerifyOutcome, VerifyOutcome};
use url::Url;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("invalid endpoint URL: {0}")]
    Url(#[from] url::ParseError),
    #[error("request failed: {0}")]
    Network(#[from] reqwest::Error),
}

/// Lowercase and trim an address before validation or transmission.
#[must_use]
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Basic shape check on an already-normalized address.
#[must_use]
pub fn valid_email(email_normalized: &str) -> bool {
    Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").is_ok_and(|regex| regex.is_match(email_normalized))
}

#[derive(Clone)]
pub struct ApiClient {
    base: Url,
    client: Client,
}

impl ApiClient {
    pub fn new(base_url: &str) -> Result<Self, ApiError> {
        let base = Url::parse(base_url)?;
        let client = Client::builder()
            .user_agent(APP_USER_AGENT)
            .cookie_store(true)
            .build()?;
        Ok(Self { base, client })
    }

    #[must_use]
    pub fn base_url(&self) -> &Url {
        &self.base
    }

    /// Join an endpoint under the base URL, keeping any path prefix the
    /// base carries (e.g. `/api`).
    pub fn endpoint_url(&self, endpoint: &str) -> Result<Url, ApiError> {
        let mut url = self.base.clone();
        let path = format!("{}{endpoint}", self.base.path().trim_end_matches('/'));
        url.set_path(&path);
        debug!("endpoint URL: {endpoint}");
        Ok(url)
    }

    /// POST helper shared by every auth endpoint.
    #[instrument(skip(self, token, body))]
    async fn post(
        &self,
        endpoint: &str,
        token: Option<&str>,
        body: Option<Value>,
        timeout: Option<Duration>,
    ) -> Result<Envelope, ApiError> {
        let url = self.endpoint_url(endpoint)?;
        let mut request = self.client.post(url);
        if let Some(token) = token {
            request = request.bearer_auth(token);
        }
        if let Some(body) = body {
            request = request.json(&body);
        }
        if let Some(timeout) = timeout {
            request = request.timeout(timeout);
        }

        let response = request.send().await?;
        let status = response.status();

        if !status.is_success() {
            let message = response
                .json::<Value>()
                .await
                .ok()
                .and_then(|value| {
                    value
                        .get("message")
                        .and_then(Value::as_str)
                        .map(str::to_string)
                })
                .unwrap_or_else(|| format!("HTTP {status}"));
            return Ok(Envelope {
                success: false,
                status: Some(status.as_u16()),
                message: Some(message),
                ..Envelope::default()
            });
        }

        match response.json::<Envelope>().await {
            Ok(mut envelope) => {
                envelope.status.get_or_insert(status.as_u16());
                Ok(envelope)
            }
            Err(err) => {
                // A 2xx with an unreadable body is a malformed reply, not
                // a transport failure.
                warn!("unreadable response body from {endpoint}: {err}");
                Ok(Envelope {
                    success: false,
                    status: Some(status.as_u16()),
                    message: Some("Unreadable response from server".to_string()),
                    ..Envelope::default()
                })
            }
        }
    }

    pub async fn login(&self, email: &str, password: &str) -> Result<LoginOutcome, ApiError> {
        let envelope = self
            .post(
                "/auth/login",
                None,
                Some(json!({ "email": email, "password": password })),
                None,
            )
            .await?;
        Ok(credential_outcome(envelope, email))
    }

    pub async fn register(
        &self,
        email: &str,
        password: &str,
        profile: &RegisterProfile,
    ) -> Result<Ack, ApiError> {
        let envelope = self
            .post(
                "/auth/register",
                None,
                Some(json!({
                    "email": email,
                    "password": password,
                    "name": profile.name,
                    "gender": profile.gender,
                    "bio": profile.bio,
                })),
                None,
            )
            .await?;
        Ok(ack(envelope, "Registration failed"))
    }

    pub async fn logout(&self, token: Option<&str>) -> Result<Ack, ApiError> {
        let envelope = self.post("/auth/logout", token, None, None).await?;
        Ok(ack(envelope, "Logout failed"))
    }

    /// Foreground token verification; returns the refreshed identity.
    pub async fn verify_token(&self, token: &str) -> Result<VerifyOutcome, ApiError> {
        let envelope = self.post("/auth/verify-token", Some(token), None, None).await?;
        if envelope.success {
            Ok(VerifyOutcome::Valid {
                user: envelope.user,
            })
        } else {
            Ok(VerifyOutcome::Rejected {
                status: envelope.status,
                message: envelope.message_or("Token rejected"),
            })
        }
    }

    /// Silent background check: status-only, bounded by `timeout`.
    #[instrument(skip(self, token))]
    pub async fn validate(&self, token: &str, timeout: Duration) -> Result<VerifyOutcome, ApiError> {
        let url = self.endpoint_url("/auth/validate")?;
        let response = self
            .client
            .post(url)
            .bearer_auth(token)
            .timeout(timeout)
            .send()
            .await?;
        let status = response.status();
        if status.is_success() {
            Ok(VerifyOutcome::Valid { user: None })
        } else {
            Ok(VerifyOutcome::Rejected {
                status: Some(status.as_u16()),
                message: format!("HTTP {status}"),
            })
        }
    }

    pub async fn verify_session(&self, token: &str) -> Result<SessionVerifyOutcome, ApiError> {
        let envelope = self
            .post("/auth/verify-session", None, Some(json!({ "token": token })), None)
            .await?;
        if envelope.success {
            Ok(SessionVerifyOutcome::Verified {
                session_details: envelope.session_details,
            })
        } else {
            Ok(SessionVerifyOutcome::Rejected {
                message: envelope.message_or("Invalid or expired token"),
            })
        }
    }

    pub async fn verify_magic_link(&self, token: &str) -> Result<LoginOutcome, ApiError> {
        let envelope = self
            .post("/auth/verify-magic-link", None, Some(json!({ "token": token })), None)
            .await?;
        Ok(credential_outcome(envelope, ""))
    }

    pub async fn verify_2fa(&self, user_id: &str, code: &str) -> Result<LoginOutcome, ApiError> {
        let envelope = self
            .post(
                "/auth/verify-2fa",
                None,
                Some(json!({ "userId": user_id, "code": code })),
                None,
            )
            .await?;
        Ok(credential_outcome(envelope, ""))
    }

    pub async fn send_magic_link(&self, email: &str) -> Result<Ack, ApiError> {
        let envelope = self
            .post("/auth/magic-link", None, Some(json!({ "email": email })), None)
            .await?;
        if envelope.needs_verification {
            return Ok(Ack::Rejected {
                message: envelope.message_or("Please verify your email first"),
            });
        }
        Ok(ack(envelope, "Failed to send magic link"))
    }

    pub async fn resend_verification(&self, email: &str) -> Result<Ack, ApiError> {
        let envelope = self
            .post("/auth/resend-verification", None, Some(json!({ "email": email })), None)
            .await?;
        Ok(ack(envelope, "Failed to resend verification"))
    }

    pub async fn forgot_password(&self, email: &str) -> Result<Ack, ApiError> {
        let envelope = self
            .post("/auth/forgot-password", None, Some(json!({ "email": email })), None)
            .await?;
        Ok(ack(envelope, "Failed to request password reset"))
    }

    pub async fn reset_password(&self, token: &str, new_password: &str) -> Result<Ack, ApiError> {
        let envelope = self
            .post(
                "/auth/reset-password",
                None,
                Some(json!({ "token": token, "password": new_password })),
                None,
            )
            .await?;
        Ok(ack(envelope, "Failed to reset password"))
    }

    pub async fn resend_2fa(&self, user_id: &str) -> Result<Ack, ApiError> {
        let envelope = self
            .post("/auth/resend-2fa", None, Some(json!({ "userId": user_id })), None)
            .await?;
        Ok(ack(envelope, "Failed to resend code"))
    }
}

/// Fold a credential-issuing envelope into its three-way outcome. A
/// success without both token and user counts as a rejection.
fn credential_outcome(envelope: Envelope, email: &str) -> LoginOutcome {
    if envelope.needs_verification {
        return LoginOutcome::NeedsVerification {
            email: email.to_string(),
        };
    }
    if envelope.success {
        if let (Some(token), Some(user)) = (envelope.token.clone(), envelope.user.clone()) {
            return LoginOutcome::Success { token, user };
        }
        return LoginOutcome::Rejected {
            status: envelope.status,
            message: "Malformed credential response".to_string(),
        };
    }
    let message = envelope.message_or("Authentication failed");
    LoginOutcome::Rejected {
        status: envelope.status,
        message,
    }
}

fn ack(envelope: Envelope, fallback: &str) -> Ack {
    if envelope.success {
        Ack::Ok
    } else {
        Ack::Rejected {
            message: envelope.message_or(fallback),
        }
    }
}
