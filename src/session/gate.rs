//! Pure routing decision for protected content.
//!
//! The gate is a function of three inputs only; it owns no state, so
//! every host shell (web, mobile, headless) renders the same outcome.

/// What the shell should render for a protected route.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum GateDecision {
    /// Initial resolution still in flight: show a loading indicator,
    /// no route content.
    Loading,
    /// Not signed in: go to login, keeping the destination for the
    /// post-login redirect.
    RedirectToLogin { intended: Option<String> },
    /// Signed in but the session is unverified: blocking verification
    /// prompt, protected routes stay inaccessible.
    VerificationRequired,
    /// Render the requested route.
    Allow,
}

#[must_use]
pub fn route_decision(
    is_loading: bool,
    is_authenticated: bool,
    session_verified: bool,
    requested: &str,
) -> GateDecision {
    if is_loading {
        return GateDecision::Loading;
    }
    if !is_authenticated {
        let intended = (!requested.is_empty()).then(|| requested.to_string());
        return GateDecision::RedirectToLogin { intended };
    }
    if !session_verified {
        return GateDecision::VerificationRequired;
    }
    GateDecision::Allow
}
