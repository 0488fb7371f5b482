use crate::cli::actions::Action;
use anyhow::Result;
use secrecy::SecretString;
use std::path::PathBuf;

pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    Ok(Action::Run {
        api_url: matches
            .get_one::<String>("api-url")
            .map(|s: &String| s.to_string())
            .ok_or_else(|| anyhow::anyhow!("missing required argument: --api-url"))?,
        ws_url: matches
            .get_one::<String>("ws-url")
            .map(|s: &String| s.to_string()),
        data_dir: matches
            .get_one::<String>("data-dir")
            .map(PathBuf::from)
            .ok_or_else(|| anyhow::anyhow!("missing required argument: --data-dir"))?,
        email: matches
            .get_one::<String>("email")
            .map(|s: &String| s.to_string()),
        password: matches
            .get_one::<String>("password")
            .map(|s: &String| SecretString::from(s.to_string())),
        remember: matches.get_flag("remember"),
        logout: matches.get_flag("logout"),
        confirm_verified: matches.get_flag("confirm-verified"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::commands;

    #[test]
    fn handler_builds_run_action() {
        let matches = commands::new().get_matches_from(vec![
            "ghosttalk",
            "--api-url",
            "http://localhost:5000/api",
            "--email",
            "a@b.com",
            "--remember",
        ]);
        let Action::Run {
            api_url,
            ws_url,
            data_dir,
            email,
            remember,
            logout,
            ..
        } = handler(&matches).unwrap();
        assert_eq!(api_url, "http://localhost:5000/api");
        assert_eq!(ws_url, None);
        assert_eq!(data_dir, PathBuf::from(".ghosttalk"));
        assert_eq!(email.as_deref(), Some("a@b.com"));
        assert!(remember);
        assert!(!logout);
    }
}
