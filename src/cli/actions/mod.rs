pub mod run;

use secrecy::SecretString;
use std::path::PathBuf;

/// Actions the CLI dispatches to.
#[derive(Debug)]
pub enum Action {
    Run {
        api_url: String,
        ws_url: Option<String>,
        data_dir: PathBuf,
        email: Option<String>,
        password: Option<SecretString>,
        remember: bool,
        logout: bool,
        confirm_verified: bool,
    },
}
