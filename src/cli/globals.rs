use anyhow::{anyhow, Result};
use secrecy::SecretString;
use std::path::PathBuf;
use url::Url;

#[derive(Debug, Clone)]
pub struct GlobalArgs {
    pub api_url: String,
    pub ws_url: Url,
    pub data_dir: PathBuf,
    pub email: Option<String>,
    pub password: SecretString,
    pub remember: bool,
}

impl GlobalArgs {
    #[must_use]
    pub fn new(api_url: String, ws_url: Url, data_dir: PathBuf) -> Self {
        Self {
            api_url,
            ws_url,
            data_dir,
            email: None,
            password: SecretString::default(),
            remember: false,
        }
    }

    pub fn set_credentials(&mut self, email: String, password: SecretString) {
        self.email = Some(email);
        self.password = password;
    }
}

/// Realtime endpoint derived from the API URL when none is configured:
/// the scheme flips to ws/wss and any path prefix (`/api`) becomes `/ws`.
pub fn derive_ws_url(api_url: &str) -> Result<Url> {
    let url = Url::parse(api_url)?;

    let scheme = match url.scheme() {
        "https" => "wss",
        "http" => "ws",
        other => return Err(anyhow!("unsupported API scheme {other}")),
    };

    let host = url
        .host_str()
        .ok_or_else(|| anyhow!("no host in API URL"))?;

    let endpoint = match url.port() {
        Some(port) => format!("{scheme}://{host}:{port}/ws"),
        None => format!("{scheme}://{host}/ws"),
    };

    Ok(Url::parse(&endpoint)?)
}
