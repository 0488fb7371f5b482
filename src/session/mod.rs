//! Session state: the auth controller, the routing gate, and the
//! verification gate.

pub mod controller;
pub mod gate;
pub mod verification;

pub use controller::{AuthPhase, AuthSessionController, LoginResult, SessionSnapshot};
pub use gate::{route_decision, GateDecision};
pub use verification::SessionVerificationGate;
