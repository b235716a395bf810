/// Echo peer: accepts clients and writes every frame straight back
use std::io;
use std::net::SocketAddr;
use std::num::NonZeroUsize;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::config::ServerConfig;
use crate::core::signal::CancellationSignal;

pub struct EchoServer {
    listener: TcpListener,
    read_buffer: NonZeroUsize,
}

impl EchoServer {
    pub async fn bind(config: &ServerConfig) -> Result<Self> {
        let listener = TcpListener::bind(&config.bind_addr)
            .await
            .with_context(|| format!("failed to bind {}", config.bind_addr))?;
        Ok(Self {
            listener,
            read_buffer: config.read_buffer,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept until `signal` fires. A failed accept is logged and skipped.
    pub async fn run(self, signal: CancellationSignal) {
        if let Ok(addr) = self.local_addr() {
            info!(%addr, "listening for connections");
        }
        loop {
            let accepted = tokio::select! {
                _ = signal.cancelled() => break,
                accepted = self.listener.accept() => accepted,
            };
            let (stream, peer) = match accepted {
                Ok(pair) => pair,
                Err(err) => {
                    warn!(error = %err, "failed to accept connection");
                    continue;
                }
            };
            info!(%peer, "new connection");
            let capacity = self.read_buffer;
            tokio::spawn(async move {
                match handle_connection(stream, capacity).await {
                    Ok(frames) => info!(%peer, frames, "connection closed by client"),
                    Err(err) => warn!(%peer, error = %err, "connection dropped"),
                }
            });
        }
        info!("server stopped");
    }
}

/// Echo whole lines until the client closes its side; returns how many were echoed
pub async fn handle_connection<S>(stream: S, capacity: NonZeroUsize) -> io::Result<u64>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (reader, mut writer) = tokio::io::split(stream);
    let mut reader = BufReader::with_capacity(capacity.get(), reader);
    let mut line = Vec::with_capacity(capacity.get());
    let mut frames = 0;

    loop {
        line.clear();
        if reader.read_until(b'\n', &mut line).await? == 0 {
            return Ok(frames);
        }
        info!(frame = %String::from_utf8_lossy(&line).trim_end(), "client sent");
        writer.write_all(&line).await?;
        writer.flush().await?;
        frames += 1;
    }
}
