/// TCP connection to the peer and the two loops that drive it
use std::io;
use std::num::NonZeroUsize;
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::core::protocol::{CommandEvent, Packet, ProtocolError, DELIMITER, MAX_FRAME_LEN};
use crate::core::shutdown::Release;
use crate::core::signal::{CancellationSignal, ShutdownReason};

/// Consumer of decoded inbound packets (game-state updates, once there is a game)
pub type PacketSink = mpsc::UnboundedSender<Packet>;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to write frame: {0}")]
    Write(#[source] io::Error),

    #[error("frame write timed out after {0:?}")]
    WriteTimeout(Duration),

    #[error("failed to read frame: {0}")]
    Read(#[source] io::Error),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

/// The single duplex stream to the peer, owned by the session root
pub struct Connection<T> {
    peer: String,
    stream: T,
}

impl Connection<TcpStream> {
    pub async fn connect(addr: &str) -> Result<Self, TransportError> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|source| TransportError::Connect {
                addr: addr.to_string(),
                source,
            })?;
        // Frames are tiny and latency-bound
        if let Err(err) = stream.set_nodelay(true) {
            warn!(error = %err, "failed to disable Nagle's algorithm");
        }
        let peer = stream
            .peer_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| addr.to_string());
        info!(%peer, "connected to server");
        Ok(Self { peer, stream })
    }
}

impl<T> Connection<T> {
    pub fn new(peer: impl Into<String>, stream: T) -> Self {
        Self {
            peer: peer.into(),
            stream,
        }
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    pub fn stream_mut(&mut self) -> &mut T {
        &mut self.stream
    }
}

impl<T> Release for Connection<T> {
    const NAME: &'static str = "connection";

    fn release(self) -> io::Result<()> {
        // Dropping the stream closes both directions
        drop(self.stream);
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SendReport {
    pub frames_sent: u64,
}

/// Drain commands onto the stream, one flushed frame each.
///
/// On a user quit, commands queued before the signal are still written. A
/// failed or stalled write cancels the session and is returned as an error.
pub async fn run_send_loop<W>(
    mut writer: W,
    mut commands: mpsc::Receiver<CommandEvent>,
    signal: CancellationSignal,
    write_timeout: Duration,
) -> Result<SendReport, TransportError>
where
    W: AsyncWrite + Unpin,
{
    let mut report = SendReport::default();
    loop {
        let command = tokio::select! {
            _ = signal.cancelled() => break,
            command = commands.recv() => match command {
                Some(command) => command,
                None => break,
            },
        };
        send_command(&mut writer, command, write_timeout, &signal).await?;
        report.frames_sent += 1;
    }

    // Refuse new commands so a blocked producer wakes up
    commands.close();
    if signal.reason() == Some(ShutdownReason::UserQuit) {
        while let Ok(command) = commands.try_recv() {
            send_command(&mut writer, command, write_timeout, &signal).await?;
            report.frames_sent += 1;
        }
    } else {
        let mut dropped = 0usize;
        while commands.try_recv().is_ok() {
            dropped += 1;
        }
        if dropped > 0 {
            debug!(dropped, "discarding queued commands after disconnect");
        }
    }

    info!(frames = report.frames_sent, "send loop stopped");
    Ok(report)
}

async fn send_command<W>(
    writer: &mut W,
    command: CommandEvent,
    write_timeout: Duration,
    signal: &CancellationSignal,
) -> Result<(), TransportError>
where
    W: AsyncWrite + Unpin,
{
    let result = match Packet::from(command).encode() {
        Ok(frame) => write_frame(writer, &frame, write_timeout).await,
        Err(err) => Err(err.into()),
    };
    match result {
        Ok(()) => {
            debug!(?command, "sent command");
            Ok(())
        }
        Err(err) => {
            error!(error = %err, ?command, "error writing to server");
            signal.cancel(ShutdownReason::SendFailed);
            Err(err)
        }
    }
}

/// Write the whole frame and flush, or fail
pub async fn write_frame<W>(writer: &mut W, frame: &str, write_timeout: Duration) -> Result<(), TransportError>
where
    W: AsyncWrite + Unpin,
{
    let write = async {
        writer.write_all(frame.as_bytes()).await?;
        writer.flush().await
    };
    match tokio::time::timeout(write_timeout, write).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(err)) => Err(TransportError::Write(err)),
        Err(_) => Err(TransportError::WriteTimeout(write_timeout)),
    }
}

/// How the receive loop ended without a fault
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiveEnd {
    /// Another loop cancelled the session
    Cancelled,
    /// End of stream
    PeerClosed,
    /// The peer announced it is leaving
    PeerQuit,
}

/// Read newline-delimited frames until the peer goes away or the session is cancelled.
///
/// `capacity` sizes the read buffer and can never be zero, so every read can
/// make progress and a zero-byte read always means the stream really closed.
pub async fn run_receive_loop<R>(
    reader: R,
    capacity: NonZeroUsize,
    signal: CancellationSignal,
    sink: Option<PacketSink>,
) -> Result<ReceiveEnd, TransportError>
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::with_capacity(capacity.get(), reader);
    let mut buf = Vec::with_capacity(capacity.get().min(MAX_FRAME_LEN));
    let mut received = 0u64;

    let end = loop {
        buf.clear();
        let read = tokio::select! {
            _ = signal.cancelled() => break ReceiveEnd::Cancelled,
            read = read_frame(&mut reader, &mut buf) => read,
        };

        match read {
            Ok(0) => {
                warn!("connection closed by server");
                signal.cancel(ShutdownReason::PeerDisconnected);
                break ReceiveEnd::PeerClosed;
            }
            Ok(_) if buf.last() != Some(&(DELIMITER as u8)) => {
                // Limit reached without a delimiter: the frame cannot fit
                if buf.len() >= MAX_FRAME_LEN {
                    error!(len = buf.len(), "inbound frame too long");
                    signal.cancel(ShutdownReason::ReceiveFailed);
                    return Err(ProtocolError::TooLong { max: MAX_FRAME_LEN }.into());
                }
                // Unterminated tail; the next read reports end of stream
                warn!(len = buf.len(), "discarding partial frame at end of stream");
            }
            Ok(_) => {
                let packet = match std::str::from_utf8(&buf).map(Packet::decode) {
                    Ok(Ok(packet)) => packet,
                    Ok(Err(err)) => {
                        warn!(error = %err, "dropping malformed frame");
                        continue;
                    }
                    Err(err) => {
                        warn!(error = %err, "dropping non-utf8 frame");
                        continue;
                    }
                };
                received += 1;
                info!(?packet, "received");

                if packet == Packet::Quit {
                    info!("peer quit");
                    signal.cancel(ShutdownReason::PeerDisconnected);
                    break ReceiveEnd::PeerQuit;
                }
                if let Some(sink) = &sink {
                    // Consumer gone just means nobody is watching state updates
                    let _ = sink.send(packet);
                }
            }
            Err(err) => {
                error!(error = %err, "connection to server failed");
                signal.cancel(ShutdownReason::ReceiveFailed);
                return Err(TransportError::Read(err));
            }
        }
    };

    info!(packets = received, ?end, "receive loop stopped");
    Ok(end)
}

async fn read_frame<R>(reader: &mut R, buf: &mut Vec<u8>) -> io::Result<usize>
where
    R: AsyncBufRead + Unpin,
{
    reader
        .take(MAX_FRAME_LEN as u64)
        .read_until(DELIMITER as u8, buf)
        .await
}
