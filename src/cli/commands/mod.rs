use clap::{
    builder::{
        styling::{AnsiColor, Effects, Styles},
        ValueParser,
    },
    Arg, ArgAction, ColorChoice, Command,
};

pub fn validator_log_level() -> ValueParser {
    ValueParser::from(move |level: &str| -> std::result::Result<u8, String> {
        if let Ok(parsed) = level.parse::<u8>() {
            // Successfully parsed as a number
            if parsed <= 5 {
                return Ok(parsed);
            }
        }

        match level.to_lowercase().as_str() {
            "error" => Ok(0),
            "warn" => Ok(1),
            "info" => Ok(2),
            "debug" => Ok(3),
            "trace" => Ok(4),
            _ => Err("invalid log level".to_string()),
        }
    })
}

pub fn new() -> Command {
    let styles = Styles::styled()
        .header(AnsiColor::Yellow.on_default() | Effects::BOLD)
        .usage(AnsiColor::Green.on_default() | Effects::BOLD)
        .literal(AnsiColor::Blue.on_default() | Effects::BOLD)
        .placeholder(AnsiColor::Green.on_default());

    Command::new("ghosttalk")
        .about("GhostTalk client shell")
        .version(env!("CARGO_PKG_VERSION"))
        .color(ColorChoice::Auto)
        .styles(styles)
        .arg(
            Arg::new("api-url")
                .short('a')
                .long("api-url")
                .help("Base URL of the GhostTalk REST API")
                .default_value("http://localhost:5000/api")
                .env("GHOSTTALK_API_URL"),
        )
        .arg(
            Arg::new("ws-url")
                .long("ws-url")
                .help("Realtime endpoint; derived from the API URL when omitted")
                .env("GHOSTTALK_WS_URL"),
        )
        .arg(
            Arg::new("data-dir")
                .short('d')
                .long("data-dir")
                .help("Directory for durable client state")
                .default_value(".ghosttalk")
                .env("GHOSTTALK_DATA_DIR"),
        )
        .arg(
            Arg::new("email")
                .short('e')
                .long("email")
                .help("Account email for a fresh login")
                .env("GHOSTTALK_EMAIL"),
        )
        .arg(
            Arg::new("password")
                .short('p')
                .long("password")
                .help("Account password for a fresh login")
                .env("GHOSTTALK_PASSWORD")
                .hide_env_values(true),
        )
        .arg(
            Arg::new("remember")
                .short('r')
                .long("remember")
                .help("Keep the session across restarts (7 days instead of 1)")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("logout")
                .long("logout")
                .help("Log out, clear local state, and exit")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("confirm-verified")
                .long("confirm-verified")
                .help("Mark the session verified after clicking the emailed link")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("verbosity")
                .short('v')
                .long("verbose")
                .help("Verbosity level: ERROR, WARN, INFO, DEBUG, TRACE (default: ERROR)")
                .env("GHOSTTALK_LOG_LEVEL")
                .global(true)
                .action(ArgAction::Count)
                .value_parser(validator_log_level()),
        )
}
