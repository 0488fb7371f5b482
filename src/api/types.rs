//! Wire types and tagged outcomes for the auth REST surface.
//!
//! Every endpoint resolves to a discriminated union instead of a loose
//! JSON object, so callers are forced to handle both branches.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The current user as the backend reports it, cached locally for the
/// optimistic paint on boot.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct UserIdentity {
    pub id: String,
    #[serde(rename = "name")]
    pub display_name: String,
    #[serde(default)]
    pub email: String,
    #[serde(rename = "proTier", default)]
    pub pro_tier: ProTier,
    #[serde(rename = "verificationFlags", default)]
    pub verification_flags: VerificationFlags,
}

#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum ProTier {
    #[default]
    Free,
    Monthly,
    Yearly,
}

#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, Eq, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VerificationFlags {
    #[serde(default)]
    pub email_verified: bool,
    #[serde(default)]
    pub two_factor_enabled: bool,
}

/// Profile fields sent along with registration.
#[derive(Clone, Debug, Serialize)]
pub struct RegisterProfile {
    pub name: String,
    pub gender: String,
    pub bio: String,
}

impl Default for RegisterProfile {
    fn default() -> Self {
        Self {
            name: String::new(),
            gender: "prefer_not_to_say".to_string(),
            bio: String::new(),
        }
    }
}

/// Normalized response envelope. Non-2xx responses are folded into this
/// shape (`success: false` plus status and message) rather than raised.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub status: Option<u16>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub user: Option<UserIdentity>,
    #[serde(default)]
    pub needs_verification: bool,
    #[serde(default)]
    pub session_details: Option<Value>,
}

impl Envelope {
    pub(crate) fn message_or(&self, fallback: &str) -> String {
        self.message
            .clone()
            .unwrap_or_else(|| fallback.to_string())
    }
}

/// Outcome of credential-issuing flows (login, magic link, 2FA).
#[derive(Clone, Debug, PartialEq)]
pub enum LoginOutcome {
    Success { token: String, user: UserIdentity },
    NeedsVerification { email: String },
    Rejected { status: Option<u16>, message: String },
}

/// Outcome of token-bearing verification calls.
#[derive(Clone, Debug, PartialEq)]
pub enum VerifyOutcome {
    Valid { user: Option<UserIdentity> },
    Rejected { status: Option<u16>, message: String },
}

/// Outcome of the email-link session verification round trip.
#[derive(Clone, Debug, PartialEq)]
pub enum SessionVerifyOutcome {
    Verified { session_details: Option<Value> },
    Rejected { message: String },
}

/// Outcome of fire-and-acknowledge endpoints (register, logout, resend,
/// password reset).
#[derive(Clone, Debug, PartialEq)]
pub enum Ack {
    Ok,
    Rejected { message: String },
}
