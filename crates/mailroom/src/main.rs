//! # mailroom
//!
//! Store service binary: loads settings, starts the writer and keeps
//! sessions swept until interrupted.

#![deny(unsafe_code)]

use anyhow::{Context, Result};
use clap::Parser;
use mailroom::{App, Cli, Command};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = cli.resolve_settings()?;
    mailroom_core::logging::init_subscriber(&settings.logging.level, settings.logging.json);

    match cli.command() {
        Command::Serve => {
            let mut app = App::start(settings).await?;
            app.spawn_sweeper();
            tracing::info!("mailroom ready, press Ctrl+C to stop");

            tokio::signal::ctrl_c()
                .await
                .context("Failed to listen for shutdown signal")?;

            tracing::info!("Shutting down...");
            app.shutdown().await?;
            tracing::info!("Shutdown complete");
        }
        Command::Sweep => {
            // startup already sweeps once
            let app = App::start(settings).await?;
            app.shutdown().await?;
        }
    }
    Ok(())
}
