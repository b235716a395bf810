/// Root coordinator: starts the four loops, waits for all of them, then tears down
use std::io::{self, Write};
use std::sync::mpsc as std_mpsc;

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio::task::JoinError;
use tracing::{debug, error, info, warn};

use crate::config::ClientConfig;
use crate::core::input::{EventSource, InputCapture, InputError, InputExit};
use crate::core::render::{DisplaySurface, RenderError, RenderLoop, RenderStats, ResyncFlag, SurfaceBackend};
use crate::core::shutdown::{Release, ReleaseFailure, Teardown};
use crate::core::signal::{CancellationSignal, ShutdownReason};
use crate::core::transport::{
    run_receive_loop, run_send_loop, Connection, PacketSink, ReceiveEnd, SendReport, TransportError,
};

pub const EXIT_OK: u8 = 0;
pub const EXIT_STARTUP: u8 = 1;
pub const EXIT_PEER_DISCONNECTED: u8 = 2;
pub const EXIT_TRANSPORT: u8 = 3;
pub const EXIT_INPUT: u8 = 4;
pub const EXIT_RENDER: u8 = 5;
pub const EXIT_PANIC: u8 = 6;

/// How a session ended when nothing went wrong
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionOutcome {
    /// The user pressed Esc or Ctrl-C
    Quit,
    /// The peer closed the connection or said it was leaving
    PeerDisconnected,
}

impl SessionOutcome {
    pub fn exit_code(self) -> u8 {
        match self {
            SessionOutcome::Quit => EXIT_OK,
            SessionOutcome::PeerDisconnected => EXIT_PEER_DISCONNECTED,
        }
    }
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session started without a {0}")]
    Missing(&'static str),

    #[error(transparent)]
    Input(#[from] InputError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Render(#[from] RenderError),

    #[error("{task} loop panicked")]
    TaskPanicked { task: &'static str },
}

impl SessionError {
    pub fn exit_code(&self) -> u8 {
        match self {
            SessionError::Missing(_) => EXIT_STARTUP,
            SessionError::Transport(_) => EXIT_TRANSPORT,
            SessionError::Input(_) => EXIT_INPUT,
            SessionError::Render(_) => EXIT_RENDER,
            SessionError::TaskPanicked { .. } => EXIT_PANIC,
        }
    }
}

pub type ClientTeardown<B, L, T> = Teardown<DisplaySurface<B>, L, Connection<T>>;

pub struct Session<E, B, L, T>
where
    E: EventSource,
    B: SurfaceBackend,
    L: Release,
{
    config: ClientConfig,
    events: E,
    teardown: ClientTeardown<B, L, T>,
    packets: Option<PacketSink>,
}

impl<E, B, L, T> Session<E, B, L, T>
where
    E: EventSource,
    B: SurfaceBackend,
    L: Release,
    T: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub fn new(config: ClientConfig, events: E, teardown: ClientTeardown<B, L, T>) -> Self {
        Self {
            config,
            events,
            teardown,
            packets: None,
        }
    }

    /// Forward decoded inbound packets here in addition to logging them
    pub fn with_packet_sink(mut self, sink: PacketSink) -> Self {
        self.packets = Some(sink);
        self
    }

    /// Run until any loop ends the session, then release everything in order.
    ///
    /// Returns only after input capture, rendering and both network loops have
    /// exited. Dropping the returned future part way through stops the loops
    /// and still releases in order.
    pub async fn run(mut self) -> Result<SessionOutcome, SessionError> {
        let signal = CancellationSignal::new();
        let resync = ResyncFlag::new();
        let mut root = Root {
            teardown: self.teardown,
            signal: signal.clone(),
            lent: None,
        };

        let Some(surface) = root.teardown.take_surface() else {
            return Err(SessionError::Missing("display surface"));
        };
        let Some(connection) = root.teardown.connection_mut() else {
            // `surface` drops first, keeping the release order
            return Err(SessionError::Missing("connection"));
        };
        info!(peer = connection.peer(), "session starting");

        let (command_tx, command_rx) = mpsc::channel(self.config.command_capacity.max(1));

        let input = InputCapture::new(
            self.events,
            command_tx,
            signal.clone(),
            resync.clone(),
            self.config.poll_timeout,
        );
        let input_handle = tokio::task::spawn_blocking(move || input.run());

        let (surface_tx, surface_rx) = std_mpsc::sync_channel(1);
        let render = RenderLoop::new(surface, signal.clone(), resync);
        let render_handle = tokio::task::spawn_blocking(move || {
            // Nobody is waiting if the root already went away
            let _ = surface_tx.send(render.run());
        });
        root.lent = Some(surface_rx);

        // A panicking blocking loop never sets the signal itself
        let input_done = async {
            let joined = input_handle.await;
            if joined.is_err() {
                signal.cancel(ShutdownReason::InputFailed);
            }
            joined
        };
        let render_done = async {
            if let Err(err) = render_handle.await {
                // The surface was dropped, and so finalized, while unwinding
                error!(error = %err, "render thread panicked");
                signal.cancel(ShutdownReason::RenderFailed);
            }
        };

        let stream = connection.stream_mut();
        let (reader, writer) = tokio::io::split(stream);
        let send = run_send_loop(writer, command_rx, signal.clone(), self.config.write_timeout);
        let receive = run_receive_loop(reader, self.config.recv_buffer, signal.clone(), self.packets.take());

        let (sent, received, input, ()) = tokio::join!(send, receive, input_done, render_done);
        debug!(reason = ?signal.reason(), "all loops stopped");

        let mut failures = Vec::new();
        collect_network(sent, received, &mut failures);
        collect_input(input, &mut failures);
        let rendered = root.lent.take().and_then(|lent| lent.try_recv().ok());
        if let Some(surface) = collect_render(rendered, &mut failures) {
            root.teardown.restore_surface(surface);
        }

        let reason = signal.reason();
        let result = match pick_failure(failures, reason) {
            Some(err) => {
                error!(error = %err, "session failed");
                Err(err)
            }
            None if reason == Some(ShutdownReason::PeerDisconnected) => Ok(SessionOutcome::PeerDisconnected),
            None => Ok(SessionOutcome::Quit),
        };
        info!(?result, "session finished");

        let released = root.teardown.run();
        report_release_failures(&released, &mut io::stderr());
        result
    }
}

type Rendered<B> = (DisplaySurface<B>, Result<RenderStats, RenderError>);

/// Owns the teardown while `Session::run` is in flight.
///
/// If the run future is dropped or unwinds while the surface is lent to the
/// render thread, the loops are cancelled and the surface is waited for before
/// the teardown releases anything.
struct Root<B: SurfaceBackend, L: Release, T> {
    teardown: ClientTeardown<B, L, T>,
    signal: CancellationSignal,
    lent: Option<std_mpsc::Receiver<Rendered<B>>>,
}

impl<B: SurfaceBackend, L: Release, T> Drop for Root<B, L, T> {
    fn drop(&mut self) {
        self.signal.cancel(ShutdownReason::Aborted);
        if let Some(lent) = self.lent.take() {
            warn!("session abandoned mid-run, stopping loops");
            // Blocks only until the render loop next checks the signal
            if let Ok((surface, _)) = lent.recv() {
                self.teardown.restore_surface(surface);
            }
        }
    }
}

/// The log sink is closed by now, so release problems go to stderr
fn report_release_failures(failures: &[ReleaseFailure], out: &mut impl Write) {
    for failure in failures {
        let _ = writeln!(out, "pongterm: failed to release {}: {}", failure.resource, failure.error);
    }
}

fn collect_network(
    sent: Result<SendReport, TransportError>,
    received: Result<ReceiveEnd, TransportError>,
    failures: &mut Vec<(ShutdownReason, SessionError)>,
) {
    if let Err(err) = sent {
        failures.push((ShutdownReason::SendFailed, err.into()));
    }
    if let Err(err) = received {
        failures.push((ShutdownReason::ReceiveFailed, err.into()));
    }
}

fn collect_input(
    input: Result<Result<InputExit, InputError>, JoinError>,
    failures: &mut Vec<(ShutdownReason, SessionError)>,
) {
    match input {
        Ok(Ok(exit)) => debug!(?exit, "input capture finished"),
        Ok(Err(err)) => failures.push((ShutdownReason::InputFailed, err.into())),
        Err(err) => {
            error!(error = %err, "input thread panicked");
            failures.push((ShutdownReason::InputFailed, SessionError::TaskPanicked { task: "input" }));
        }
    }
}

/// `None` means the render thread died without handing the surface back
fn collect_render<B: SurfaceBackend>(
    rendered: Option<Rendered<B>>,
    failures: &mut Vec<(ShutdownReason, SessionError)>,
) -> Option<DisplaySurface<B>> {
    match rendered {
        Some((surface, Ok(stats))) => {
            debug!(?stats, "render loop finished");
            Some(surface)
        }
        Some((surface, Err(err))) => {
            failures.push((ShutdownReason::RenderFailed, err.into()));
            Some(surface)
        }
        None => {
            failures.push((ShutdownReason::RenderFailed, SessionError::TaskPanicked { task: "render" }));
            None
        }
    }
}

/// Prefer the failure of the loop that started the shutdown
fn pick_failure(
    mut failures: Vec<(ShutdownReason, SessionError)>,
    reason: Option<ShutdownReason>,
) -> Option<SessionError> {
    if reason == Some(ShutdownReason::PeerDisconnected) {
        // Writes racing a closed peer fail too; the disconnect is what happened
        failures.retain(|(origin, err)| {
            let late_write = *origin == ShutdownReason::SendFailed;
            if late_write {
                debug!(error = %err, "ignoring send failure after disconnect");
            }
            !late_write
        });
    }
    let cause = failures.iter().position(|(origin, _)| Some(*origin) == reason);
    match cause {
        Some(index) => Some(failures.swap_remove(index).1),
        None => failures.into_iter().next().map(|(_, err)| err),
    }
}
