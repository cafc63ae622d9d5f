use std::path::{Path, PathBuf};
use std::time::Duration;

use karmabot_slack_runtime::{ReconnectPolicy, SlackApiClientConfig, SlackRtmRuntimeConfig};
use serde::Deserialize;
use thiserror::Error;

use crate::cli_args::Cli;

#[derive(Debug, Error)]
pub(crate) enum StartupConfigError {
    #[error("no api token: pass --api-token, set KARMABOT_API, or add apiToken to {path}")]
    MissingToken { path: PathBuf },
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {message}")]
    Parse { path: PathBuf, message: String },
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
/// On-disk YAML configuration.
pub(crate) struct FileConfig {
    #[serde(default)]
    pub(crate) api_token: Option<String>,
}

pub(crate) fn load_file_config(path: &Path) -> Result<FileConfig, StartupConfigError> {
    let raw = std::fs::read_to_string(path).map_err(|source| StartupConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    if raw.trim().is_empty() {
        return Ok(FileConfig::default());
    }
    serde_saphyr::from_str::<FileConfig>(&raw).map_err(|error| StartupConfigError::Parse {
        path: path.to_path_buf(),
        message: error.to_string(),
    })
}

fn resolve_non_empty_value(raw: Option<&str>) -> Option<String> {
    raw.map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

/// The flag or environment value wins; the config file is only opened when
/// neither supplies a non-empty token.
pub(crate) fn resolve_api_token(
    explicit: Option<&str>,
    config_path: &Path,
) -> Result<String, StartupConfigError> {
    if let Some(token) = resolve_non_empty_value(explicit) {
        return Ok(token);
    }
    let missing = || StartupConfigError::MissingToken {
        path: config_path.to_path_buf(),
    };
    if !config_path.exists() {
        return Err(missing());
    }
    let file_config = load_file_config(config_path)?;
    resolve_non_empty_value(file_config.api_token.as_deref()).ok_or_else(missing)
}

pub(crate) fn build_api_client_config(cli: &Cli, token: String) -> SlackApiClientConfig {
    SlackApiClientConfig {
        api_base: cli.api_base.clone(),
        token,
        request_timeout_ms: cli.request_timeout_ms,
        retry_max_attempts: cli.retry_max_attempts,
        retry_base_delay_ms: cli.retry_base_delay_ms,
    }
}

pub(crate) fn build_runtime_config(cli: &Cli) -> SlackRtmRuntimeConfig {
    let reconnect_policy = if cli.reconnect {
        ReconnectPolicy::Backoff {
            max_attempts: cli.reconnect_max_attempts,
            base_delay_ms: cli.reconnect_base_delay_ms,
        }
    } else {
        ReconnectPolicy::Disabled
    };
    SlackRtmRuntimeConfig {
        read_timeout: Duration::from_millis(cli.read_timeout_ms),
        ping_interval: Duration::from_millis(cli.ping_interval_ms),
        reconnect_policy,
    }
}
