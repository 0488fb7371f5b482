//! GhostTalk client session core.
//!
//! The pieces a GhostTalk shell (web, mobile, headless) composes:
//! credential storage across two persistence scopes, the auth session
//! controller with its cache-first bootstrap, routing/verification
//! gates, and the self-healing realtime transport.

pub mod api;
pub mod cli;
pub mod platform;
pub mod realtime;
pub mod session;
pub mod storage;
pub mod token;

pub static APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);
