use std::path::PathBuf;

use clap::Parser;
use karmabot_karma::DEFAULT_KARMA_FILE;
use karmabot_slack_runtime::DEFAULT_SLACK_API_BASE;

pub(crate) const DEFAULT_CONFIG_FILE: &str = "configuration.yaml";

fn parse_positive_usize(value: &str) -> Result<usize, String> {
    let parsed = value
        .parse::<usize>()
        .map_err(|error| format!("failed to parse integer: {error}"))?;
    if parsed == 0 {
        return Err("value must be greater than 0".to_string());
    }
    Ok(parsed)
}

fn parse_positive_u64(value: &str) -> Result<u64, String> {
    let parsed = value
        .parse::<u64>()
        .map_err(|error| format!("failed to parse integer: {error}"))?;
    if parsed == 0 {
        return Err("value must be greater than 0".to_string());
    }
    Ok(parsed)
}

#[derive(Debug, Parser)]
#[command(
    name = "karmabot",
    about = "Slack bot that tracks karma given with name++ and name--",
    version
)]
pub(crate) struct Cli {
    #[arg(
        value_name = "KARMA_FILE",
        default_value = DEFAULT_KARMA_FILE,
        help = "Append-only karma log replayed at startup"
    )]
    pub(crate) karma_file: PathBuf,

    #[arg(
        value_name = "CONFIG_FILE",
        default_value = DEFAULT_CONFIG_FILE,
        help = "YAML file holding apiToken, read only when no token is given otherwise"
    )]
    pub(crate) config_file: PathBuf,

    #[arg(
        long = "api-token",
        env = "KARMABOT_API",
        hide_env_values = true,
        help = "Slack bot token (xoxb-...)"
    )]
    pub(crate) api_token: Option<String>,

    #[arg(
        long = "api-base",
        env = "KARMABOT_API_BASE",
        default_value = DEFAULT_SLACK_API_BASE,
        help = "Slack Web API base URL"
    )]
    pub(crate) api_base: String,

    #[arg(
        long = "request-timeout-ms",
        env = "KARMABOT_REQUEST_TIMEOUT_MS",
        default_value_t = 10_000,
        value_parser = parse_positive_u64,
        help = "Timeout for one Slack Web API request"
    )]
    pub(crate) request_timeout_ms: u64,

    #[arg(
        long = "retry-max-attempts",
        env = "KARMABOT_RETRY_MAX_ATTEMPTS",
        default_value_t = 4,
        value_parser = parse_positive_usize,
        help = "Maximum attempts for retryable slack api failures (429/5xx/transport)"
    )]
    pub(crate) retry_max_attempts: usize,

    #[arg(
        long = "retry-base-delay-ms",
        env = "KARMABOT_RETRY_BASE_DELAY_MS",
        default_value_t = 500,
        value_parser = parse_positive_u64,
        help = "Base backoff delay in milliseconds for slack api retries"
    )]
    pub(crate) retry_base_delay_ms: u64,

    #[arg(
        long = "read-timeout-ms",
        env = "KARMABOT_READ_TIMEOUT_MS",
        default_value_t = 90_000,
        help = "Longest silence tolerated on the RTM socket (0 disables)"
    )]
    pub(crate) read_timeout_ms: u64,

    #[arg(
        long = "ping-interval-ms",
        env = "KARMABOT_PING_INTERVAL_MS",
        default_value_t = 30_000,
        help = "Keepalive ping cadence on the RTM socket (0 disables)"
    )]
    pub(crate) ping_interval_ms: u64,

    #[arg(
        long = "reconnect",
        env = "KARMABOT_RECONNECT",
        default_value_t = false,
        help = "Reconnect with backoff after the RTM connection fails"
    )]
    pub(crate) reconnect: bool,

    #[arg(
        long = "reconnect-max-attempts",
        env = "KARMABOT_RECONNECT_MAX_ATTEMPTS",
        default_value_t = 5,
        value_parser = parse_positive_usize,
        requires = "reconnect",
        help = "Consecutive reconnect attempts before giving up"
    )]
    pub(crate) reconnect_max_attempts: usize,

    #[arg(
        long = "reconnect-base-delay-ms",
        env = "KARMABOT_RECONNECT_BASE_DELAY_MS",
        default_value_t = 1_000,
        value_parser = parse_positive_u64,
        requires = "reconnect",
        help = "Base backoff delay in milliseconds between reconnect attempts"
    )]
    pub(crate) reconnect_base_delay_ms: u64,

    #[arg(
        long = "log-level",
        env = "KARMABOT_LOG_LEVEL",
        help = "Tracing filter directives; overrides RUST_LOG"
    )]
    pub(crate) log_level: Option<String>,
}
