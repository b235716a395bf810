use anyhow::Result;
use pongterm::config::ServerConfig;
use pongterm::core::signal::{CancellationSignal, ShutdownReason};
use pongterm::server::EchoServer;
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> Result<()> {
    let config = ServerConfig::default();
    let subscriber = FmtSubscriber::builder()
        .with_max_level(config.log_level)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let server = EchoServer::bind(&config).await?;
    let signal = CancellationSignal::new();

    let stop = signal.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupted, shutting down");
            stop.cancel(ShutdownReason::UserQuit);
        }
    });

    server.run(signal).await;
    Ok(())
}
