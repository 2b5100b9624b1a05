//! Binary entrypoint.
//!
//! Parses and validates the configuration, wires interrupt signals to a
//! cancellation token and hands control to the rebuild controller. The
//! process exits 0 on a clean cancellation and 1 when the controller
//! surfaces a crash.

use std::process::ExitCode;

use clap::Parser;
use env_logger::Env;
use tokio_util::sync::CancellationToken;

use dnsward::config::Cli;
use dnsward::controller::Controller;

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::init_from_env(Env::default().default_filter_or("info"));

    let settings = match Cli::parse().into_settings() {
        Ok(settings) => settings,
        Err(err) => {
            log::error!("invalid configuration: {}", err);
            return ExitCode::FAILURE;
        }
    };
    log::info!("settings summary:");
    for line in settings.lines() {
        log::info!("{}", line);
    }

    let shutdown = CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                log::warn!("caught interrupt signal, shutting down");
                shutdown.cancel();
            }
        });
    }

    let controller = match Controller::new(settings) {
        Ok(controller) => controller,
        Err(err) => {
            log::error!("{}", err);
            return ExitCode::FAILURE;
        }
    };
    match controller.run(shutdown).await {
        Ok(()) => {
            log::info!("shutdown successful");
            ExitCode::SUCCESS
        }
        Err(err) => {
            log::error!("{}", err);
            ExitCode::FAILURE
        }
    }
}
