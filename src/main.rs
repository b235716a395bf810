use std::io::Stdout;
use std::process::ExitCode;

use anyhow::{Context, Result};
use pongterm::config::ClientConfig;
use pongterm::core::input::TerminalEvents;
use pongterm::core::log::{install_panic_hook, LogSink};
use pongterm::core::render::DisplaySurface;
use pongterm::core::session::{ClientTeardown, Session, SessionOutcome, EXIT_STARTUP};
use pongterm::core::shutdown::Teardown;
use pongterm::core::transport::Connection;
use ratatui::backend::CrosstermBackend;
use tokio::net::TcpStream;
use tracing::error;

type Resources = ClientTeardown<CrosstermBackend<Stdout>, LogSink, TcpStream>;

/// Acquire log, connection and terminal in that order. Anything acquired before
/// a failure is released when the partly filled teardown drops.
async fn start(config: &ClientConfig) -> Result<Resources> {
    let mut teardown = Teardown::new();

    let log = LogSink::open(&config.log_path)
        .with_context(|| format!("failed to open log file {}", config.log_path.display()))?;
    log.install(config.log_level)?;
    install_panic_hook();
    teardown.set_log(log);

    let connection = Connection::connect(&config.server_addr)
        .await
        .inspect_err(|err| error!(error = %err, "startup failed"))
        .context("could not reach the game server")?;
    teardown.set_connection(connection);

    let surface = DisplaySurface::init().context("failed to prepare the terminal")?;
    teardown.set_surface(surface);

    Ok(teardown)
}

#[tokio::main]
async fn main() -> ExitCode {
    let config = ClientConfig::default();

    let teardown = match start(&config).await {
        Ok(teardown) => teardown,
        Err(err) => {
            eprintln!("pongterm: {err:#}");
            return ExitCode::from(EXIT_STARTUP);
        }
    };

    // The surface is finalized by the time run returns, so stderr is safe again
    match Session::new(config, TerminalEvents, teardown).run().await {
        Ok(outcome) => {
            if outcome == SessionOutcome::PeerDisconnected {
                eprintln!("pongterm: opponent disconnected");
            }
            ExitCode::from(outcome.exit_code())
        }
        Err(err) => {
            eprintln!("pongterm: {err}");
            ExitCode::from(err.exit_code())
        }
    }
}
