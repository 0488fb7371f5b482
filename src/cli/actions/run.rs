//! The headless client shell: boots the session core, optionally logs
//! in, then tails realtime events until interrupted.

use crate::api::ApiClient;
use crate::cli::actions::Action;
use crate::cli::{globals, globals::GlobalArgs, telemetry};
use crate::platform::AlwaysOnline;
use crate::realtime::{events, RealtimeTransport, Subscription};
use crate::session::{
    route_decision, AuthSessionController, GateDecision, SessionVerificationGate,
};
use crate::storage::StorageScopes;
use crate::token::TokenStore;
use anyhow::{anyhow, Result};
use secrecy::ExposeSecret;
use std::sync::Arc;
use tracing::{info, warn};
use url::Url;

/// Handle the run action
pub async fn handle(action: Action) -> Result<()> {
    let Action::Run {
        api_url,
        ws_url,
        data_dir,
        email,
        password,
        remember,
        logout,
        confirm_verified,
    } = action;

    let ws_url = match ws_url {
        Some(raw) => Url::parse(&raw)?,
        None => globals::derive_ws_url(&api_url)?,
    };
    let mut globals = GlobalArgs::new(api_url, ws_url, data_dir);
    globals.remember = remember;
    if let (Some(email), Some(password)) = (email, password) {
        globals.set_credentials(email, password);
    }

    let scopes = Arc::new(StorageScopes::open(&globals.data_dir));
    let tokens = TokenStore::new(Arc::clone(&scopes));
    let api = ApiClient::new(&globals.api_url)?;
    let transport = RealtimeTransport::new(globals.ws_url.clone(), tokens.clone());
    let controller = AuthSessionController::new(
        api.clone(),
        tokens.clone(),
        Arc::clone(&scopes),
        Arc::new(AlwaysOnline),
        transport.clone(),
    );

    if logout {
        controller.logout().await;
        telemetry::shutdown_tracer();
        return Ok(());
    }

    controller.bootstrap().await;

    if !controller.snapshot().is_authenticated() {
        if let Some(email) = globals.email.clone() {
            let result = controller
                .login(&email, globals.password.expose_secret(), globals.remember)
                .await;
            if result.needs_verification {
                return Err(anyhow!(
                    "account not verified; check your inbox, then retry"
                ));
            }
            if !result.success {
                return Err(anyhow!("login failed: {}", result.message));
            }
            info!("logged in as {email}");
        }
    }

    let verification =
        SessionVerificationGate::new(controller.clone(), api, Arc::clone(&scopes));
    if confirm_verified {
        verification.confirm_link_clicked();
    }

    let snapshot = controller.snapshot();
    match route_decision(
        snapshot.is_loading(),
        snapshot.is_authenticated(),
        verification.is_verified(),
        "/chats",
    ) {
        GateDecision::Allow => {
            if let Some(token) = tokens.get() {
                transport.ensure_connected(&token);
            }
        }
        GateDecision::VerificationRequired => {
            warn!(
                "session requires verification; re-run with --confirm-verified \
                 after clicking the emailed link"
            );
        }
        GateDecision::RedirectToLogin { .. } => {
            info!("not signed in; pass --email/--password to log in");
        }
        GateDecision::Loading => {}
    }

    let _user_updates = controller.bind_realtime_updates();
    let _tail: Vec<Subscription> = [
        events::inbound::NOTIFICATION,
        events::inbound::FRIEND_REQUEST,
        events::inbound::SESSION_LOGIN,
        events::inbound::CHAT_MESSAGE,
    ]
    .into_iter()
    .map(|event| {
        let name = event.to_string();
        transport.subscribe(event, move |data| {
            info!("{name}: {data}");
        })
    })
    .collect();

    tokio::signal::ctrl_c().await?;

    transport.disconnect();
    telemetry::shutdown_tracer();

    Ok(())
}
