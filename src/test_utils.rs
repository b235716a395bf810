#[cfg(test)]
use std::collections::VecDeque;
#[cfg(test)]
use std::io;
#[cfg(test)]
use std::sync::atomic::{AtomicUsize, Ordering};
#[cfg(test)]
use std::sync::Arc;
#[cfg(test)]
use std::time::Duration;

#[cfg(test)]
use crossterm::event::{Event, KeyCode, KeyEvent, KeyModifiers};

#[cfg(test)]
use crate::core::input::EventSource;

#[cfg(test)]
pub fn key(code: KeyCode) -> KeyEvent {
    KeyEvent::new(code, KeyModifiers::NONE)
}

/// Terminal stand-in that replays a fixed list of events, then idles
#[cfg(test)]
pub struct ScriptedEvents {
    events: VecDeque<Event>,
    remaining: Arc<AtomicUsize>,
    fail: bool,
}

#[cfg(test)]
impl ScriptedEvents {
    pub fn new(events: impl IntoIterator<Item = Event>) -> Self {
        let events: VecDeque<Event> = events.into_iter().collect();
        let remaining = Arc::new(AtomicUsize::new(events.len()));
        Self {
            events,
            remaining,
            fail: false,
        }
    }

    pub fn keys(codes: impl IntoIterator<Item = KeyCode>) -> Self {
        Self::new(codes.into_iter().map(|code| Event::Key(key(code))))
    }

    pub fn idle() -> Self {
        Self::new([])
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::idle()
        }
    }

    /// Count of scripted events not yet handed out
    pub fn remaining(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.remaining)
    }
}

#[cfg(test)]
impl EventSource for ScriptedEvents {
    fn next_event(&mut self, timeout: Duration) -> io::Result<Option<Event>> {
        if self.fail {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "tty gone"));
        }
        match self.events.pop_front() {
            Some(event) => {
                self.remaining.fetch_sub(1, Ordering::SeqCst);
                Ok(Some(event))
            }
            None => {
                std::thread::sleep(timeout);
                Ok(None)
            }
        }
    }
}
