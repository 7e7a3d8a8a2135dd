use crate::client::HTTP_CLIENT;
use crate::config::Cli;
use crate::logging::logger_setup;
use crate::service::Pipeline;
use clap::Parser;
use std::process::ExitCode;
use tracing::{error, info};

mod client;
mod config;
mod domain;
mod logging;
mod repository;
mod service;

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    logger_setup(cli.log_format)?;
    let _ = rustls::crypto::ring::default_provider().install_default();

    let settings = match cli.into_settings() {
        Ok(settings) => settings,
        Err(err) => {
            error!(kind = err.kind(), "{err}");
            return Ok(ExitCode::FAILURE);
        }
    };

    info!("Collecting invaders of {}", settings.uid);
    let pipeline = Pipeline::new(HTTP_CLIENT.clone(), settings);
    match pipeline.run().await {
        Ok(report) if report.is_success() => Ok(ExitCode::SUCCESS),
        _ => Ok(ExitCode::FAILURE),
    }
}
