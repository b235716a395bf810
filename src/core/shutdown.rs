/// Ordered, exactly-once release of the resources a session owns
use std::io;

use tracing::{info, warn};

/// A resource the session acquires at startup and gives back at the end
pub trait Release {
    const NAME: &'static str;

    fn release(self) -> io::Result<()>;
}

#[derive(Debug)]
pub struct ReleaseFailure {
    pub resource: &'static str,
    pub error: io::Error,
}

/// Holds the display surface, log sink and connection as they are acquired.
///
/// Release order is always surface, then log sink, then connection, whatever
/// triggered it: an explicit `run`, an early return, or a panic unwinding
/// through the owner. Slots never filled are skipped.
pub struct Teardown<S: Release, L: Release, C: Release> {
    surface: Option<S>,
    log: Option<L>,
    connection: Option<C>,
    released: bool,
}

impl<S: Release, L: Release, C: Release> Teardown<S, L, C> {
    pub fn new() -> Self {
        Self {
            surface: None,
            log: None,
            connection: None,
            released: false,
        }
    }

    pub fn set_surface(&mut self, surface: S) {
        self.surface = Some(surface);
    }

    pub fn set_log(&mut self, log: L) {
        self.log = Some(log);
    }

    pub fn set_connection(&mut self, connection: C) {
        self.connection = Some(connection);
    }

    /// Lend the surface out; pair with [`Teardown::restore_surface`]
    pub fn take_surface(&mut self) -> Option<S> {
        self.surface.take()
    }

    pub fn restore_surface(&mut self, surface: S) {
        self.surface = Some(surface);
    }

    pub fn connection_mut(&mut self) -> Option<&mut C> {
        self.connection.as_mut()
    }

    /// Release everything still held. Calls after the first do nothing.
    pub fn run(&mut self) -> Vec<ReleaseFailure> {
        let mut failures = Vec::new();
        if self.released {
            return failures;
        }
        self.released = true;

        match self.surface.take() {
            Some(surface) => release_one(surface, &mut failures),
            None => info!("{} already gone, skipping", S::NAME),
        }
        // Nothing may be logged once the sink is closed
        if let Some(log) = self.log.take() {
            info!("closing {}", L::NAME);
            release_one(log, &mut failures);
        }
        if let Some(connection) = self.connection.take() {
            release_one(connection, &mut failures);
        }
        failures
    }
}

fn release_one<R: Release>(resource: R, failures: &mut Vec<ReleaseFailure>) {
    if let Err(error) = resource.release() {
        warn!(resource = R::NAME, %error, "release failed");
        failures.push(ReleaseFailure { resource: R::NAME, error });
    }
}

impl<S: Release, L: Release, C: Release> Default for Teardown<S, L, C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: Release, L: Release, C: Release> Drop for Teardown<S, L, C> {
    fn drop(&mut self) {
        let _ = self.run();
    }
}
