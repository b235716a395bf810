/// Keyboard capture: raw terminal events in, command events out
use std::io;
use std::time::Duration;

use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use crate::core::protocol::CommandEvent;
use crate::core::render::ResyncFlag;
use crate::core::signal::{CancellationSignal, ShutdownReason};

#[derive(Debug, Error)]
pub enum InputError {
    #[error("failed to poll terminal events: {0}")]
    Poll(#[source] io::Error),
}

/// Where raw terminal events come from
pub trait EventSource: Send + 'static {
    /// Wait at most `timeout` for the next event
    fn next_event(&mut self, timeout: Duration) -> io::Result<Option<Event>>;
}

/// The real terminal, through crossterm
pub struct TerminalEvents;

impl EventSource for TerminalEvents {
    fn next_event(&mut self, timeout: Duration) -> io::Result<Option<Event>> {
        if event::poll(timeout)? {
            Ok(Some(event::read()?))
        } else {
            Ok(None)
        }
    }
}

/// Map a key press to a command. Everything else is ignored.
pub fn command_for(key: &KeyEvent) -> Option<CommandEvent> {
    if key.kind != KeyEventKind::Press {
        return None;
    }
    match key.code {
        KeyCode::Esc => Some(CommandEvent::Quit),
        KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => {
            Some(CommandEvent::Quit)
        }
        KeyCode::Up => Some(CommandEvent::MoveUp),
        KeyCode::Down => Some(CommandEvent::MoveDown),
        _ => None,
    }
}

/// How the capture loop ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputExit {
    /// The user asked to quit; this loop set the signal
    Quit,
    /// Another loop set the signal first
    Cancelled,
    /// The send loop went away
    ChannelClosed,
}

pub struct InputCapture<E: EventSource> {
    events: E,
    commands: mpsc::Sender<CommandEvent>,
    signal: CancellationSignal,
    resync: ResyncFlag,
    poll_timeout: Duration,
}

impl<E: EventSource> InputCapture<E> {
    pub fn new(
        events: E,
        commands: mpsc::Sender<CommandEvent>,
        signal: CancellationSignal,
        resync: ResyncFlag,
        poll_timeout: Duration,
    ) -> Self {
        Self {
            events,
            commands,
            signal,
            resync,
            poll_timeout,
        }
    }

    /// Blocking loop; run it on its own thread.
    ///
    /// Handing a command to a full channel blocks until the send loop takes it.
    pub fn run(mut self) -> Result<InputExit, InputError> {
        loop {
            if self.signal.is_cancelled() {
                debug!("input capture observed cancellation");
                return Ok(InputExit::Cancelled);
            }

            let event = match self.events.next_event(self.poll_timeout) {
                Ok(Some(event)) => event,
                Ok(None) => continue,
                Err(err) => {
                    error!(error = %err, "terminal polling failed");
                    self.signal.cancel(ShutdownReason::InputFailed);
                    return Err(InputError::Poll(err));
                }
            };

            match event {
                Event::Resize(width, height) => {
                    debug!(width, height, "terminal resized");
                    self.resync.request();
                }
                Event::Key(key) => match command_for(&key) {
                    Some(CommandEvent::Quit) => {
                        info!("got quit command");
                        self.signal.cancel(ShutdownReason::UserQuit);
                        return Ok(InputExit::Quit);
                    }
                    Some(command) => {
                        debug!(?command, "got arrow key");
                        if self.commands.blocking_send(command).is_err() {
                            info!("command channel closed, stopping input capture");
                            return Ok(InputExit::ChannelClosed);
                        }
                    }
                    None => {}
                },
                _ => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{key, ScriptedEvents};

    fn capture(
        events: ScriptedEvents,
        capacity: usize,
    ) -> (
        InputCapture<ScriptedEvents>,
        mpsc::Receiver<CommandEvent>,
        CancellationSignal,
        ResyncFlag,
    ) {
        let (tx, rx) = mpsc::channel(capacity);
        let signal = CancellationSignal::new();
        let resync = ResyncFlag::new();
        let input = InputCapture::new(
            events,
            tx,
            signal.clone(),
            resync.clone(),
            Duration::from_millis(5),
        );
        (input, rx, signal, resync)
    }

    #[test]
    fn maps_keys_to_commands() {
        assert_eq!(command_for(&key(KeyCode::Esc)), Some(CommandEvent::Quit));
        assert_eq!(
            command_for(&KeyEvent::new(KeyCode::Char('c'), KeyModifiers::CONTROL)),
            Some(CommandEvent::Quit)
        );
        assert_eq!(command_for(&key(KeyCode::Up)), Some(CommandEvent::MoveUp));
        assert_eq!(command_for(&key(KeyCode::Down)), Some(CommandEvent::MoveDown));
        assert_eq!(command_for(&key(KeyCode::Char('c'))), None);
        assert_eq!(command_for(&key(KeyCode::Left)), None);
        assert_eq!(command_for(&key(KeyCode::Enter)), None);
    }

    #[test]
    fn ignores_key_releases() {
        let mut release = key(KeyCode::Esc);
        release.kind = KeyEventKind::Release;
        assert_eq!(command_for(&release), None);
    }

    #[test]
    fn arrows_then_escape() {
        let events = ScriptedEvents::keys([KeyCode::Up, KeyCode::Char('x'), KeyCode::Down, KeyCode::Esc]);
        let (input, mut rx, signal, _resync) = capture(events, 8);

        assert_eq!(input.run().unwrap(), InputExit::Quit);
        assert_eq!(signal.reason(), Some(ShutdownReason::UserQuit));
        assert_eq!(rx.try_recv().unwrap(), CommandEvent::MoveUp);
        assert_eq!(rx.try_recv().unwrap(), CommandEvent::MoveDown);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn stops_polling_after_quit() {
        let events = ScriptedEvents::keys([KeyCode::Esc, KeyCode::Up]);
        let remaining = events.remaining();
        let (input, mut rx, _signal, _resync) = capture(events, 8);

        assert_eq!(input.run().unwrap(), InputExit::Quit);
        assert!(rx.try_recv().is_err());
        assert_eq!(remaining.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[test]
    fn resize_requests_resync() {
        let events = ScriptedEvents::new([Event::Resize(120, 40), Event::Key(key(KeyCode::Esc))]);
        let (input, _rx, _signal, resync) = capture(events, 1);
        input.run().unwrap();
        assert!(resync.take());
    }

    #[test]
    fn exits_when_another_loop_cancels() {
        let (input, _rx, signal, _resync) = capture(ScriptedEvents::idle(), 1);
        let handle = std::thread::spawn(move || input.run());
        std::thread::sleep(Duration::from_millis(20));
        signal.cancel(ShutdownReason::PeerDisconnected);
        assert_eq!(handle.join().unwrap().unwrap(), InputExit::Cancelled);
    }

    #[test]
    fn backpressure_blocks_without_dropping() {
        let mut codes = Vec::new();
        for i in 0..20 {
            codes.push(if i % 3 == 0 { KeyCode::Down } else { KeyCode::Up });
        }
        let expected: Vec<_> = codes
            .iter()
            .map(|c| if *c == KeyCode::Up { CommandEvent::MoveUp } else { CommandEvent::MoveDown })
            .collect();
        codes.push(KeyCode::Esc);

        let (input, mut rx, _signal, _resync) = capture(ScriptedEvents::keys(codes), 1);
        let handle = std::thread::spawn(move || input.run());

        let mut received = Vec::new();
        while let Some(command) = rx.blocking_recv() {
            // Slow consumer
            std::thread::sleep(Duration::from_millis(2));
            received.push(command);
        }
        assert_eq!(handle.join().unwrap().unwrap(), InputExit::Quit);
        assert_eq!(received, expected);
    }

    #[test]
    fn closed_channel_stops_capture() {
        let (input, rx, _signal, _resync) = capture(ScriptedEvents::keys([KeyCode::Up]), 1);
        drop(rx);
        assert_eq!(input.run().unwrap(), InputExit::ChannelClosed);
    }

    #[test]
    fn poll_error_is_fatal_and_cancels() {
        let (input, _rx, signal, _resync) = capture(ScriptedEvents::failing(), 1);
        assert!(matches!(input.run(), Err(InputError::Poll(_))));
        assert_eq!(signal.reason(), Some(ShutdownReason::InputFailed));
    }
}
