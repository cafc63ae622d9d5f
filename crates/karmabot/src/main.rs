mod bootstrap_helpers;
mod cli_args;
mod startup_config;

use std::{process::ExitCode, sync::Arc};

use anyhow::{Context, Result};
use clap::Parser;
use karmabot_karma::{register_karma_handlers, KarmaLedger, KarmaLedgerError};
use karmabot_slack_runtime::{
    run_slack_rtm, SessionReport, SlackApiClient, SlackEventDispatcher, SlackRuntimeError,
    SlackWebApi,
};
use tokio::sync::watch;

use crate::bootstrap_helpers::init_tracing;
use crate::cli_args::Cli;
use crate::startup_config::{build_api_client_config, build_runtime_config, resolve_api_token};

const EXIT_CONFIG_ERROR: u8 = 1;
const EXIT_SESSION_ERROR: u8 = 2;

/// Session failures exit with 2; anything that stops startup exits with 1.
fn exit_code_for(error: &anyhow::Error) -> u8 {
    if error.downcast_ref::<SlackRuntimeError>().is_some() {
        EXIT_SESSION_ERROR
    } else {
        EXIT_CONFIG_ERROR
    }
}

async fn run_karmabot(cli: Cli) -> Result<SessionReport> {
    // The log must be replayed before any event can be dispatched.
    let ledger = KarmaLedger::load(&cli.karma_file).map_err(|error| match error {
        KarmaLedgerError::Malformed { .. } => {
            anyhow::Error::new(error).context("karma log is corrupt; refusing to start")
        }
        other => anyhow::Error::new(other).context("failed to load karma log"),
    })?;
    tracing::info!(path = %ledger.path().display(), "karma log replayed");

    let token = resolve_api_token(cli.api_token.as_deref(), &cli.config_file)?;
    let client = SlackApiClient::new(build_api_client_config(&cli, token))
        .context("failed to build slack api client")?;
    let api: Arc<dyn SlackWebApi> = Arc::new(client);

    let mut dispatcher = SlackEventDispatcher::new();
    register_karma_handlers(&mut dispatcher, Arc::new(ledger));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let session = run_slack_rtm(build_runtime_config(&cli), api, dispatcher, shutdown_rx);
    tokio::pin!(session);

    let result = tokio::select! {
        result = &mut session => result,
        signal = tokio::signal::ctrl_c() => {
            match signal {
                Ok(()) => {
                    tracing::info!("interrupt received; draining in-flight handlers");
                    let _ = shutdown_tx.send(true);
                }
                Err(error) => tracing::warn!(%error, "interrupt handling unavailable"),
            }
            session.await
        }
    };
    result.context("slack rtm session ended")
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.log_level.as_deref());

    match run_karmabot(cli).await {
        Ok(report) => {
            tracing::info!(
                sessions = report.sessions_started,
                frames = report.frames_received,
                handler_tasks = report.handler_tasks_spawned,
                "karmabot stopped"
            );
            ExitCode::SUCCESS
        }
        Err(error) => {
            tracing::error!(error = %format!("{error:#}"), "karmabot failed");
            eprintln!("karmabot: {error:#}");
            ExitCode::from(exit_code_for(&error))
        }
    }
}

#[cfg(test)]
mod tests {
    use anyhow::Context;
    use karmabot_slack_runtime::SlackRuntimeError;

    use super::{exit_code_for, EXIT_CONFIG_ERROR, EXIT_SESSION_ERROR};
    use crate::startup_config::StartupConfigError;

    #[test]
    fn unit_session_errors_map_to_exit_code_two() {
        let error = Err::<(), _>(SlackRuntimeError::ConnectionClosed)
            .context("slack rtm session ended")
            .expect_err("error");
        assert_eq!(exit_code_for(&error), EXIT_SESSION_ERROR);
    }

    #[test]
    fn unit_startup_errors_map_to_exit_code_one() {
        let error = anyhow::Error::new(StartupConfigError::MissingToken {
            path: "configuration.yaml".into(),
        });
        assert_eq!(exit_code_for(&error), EXIT_CONFIG_ERROR);
    }
}
