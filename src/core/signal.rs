/// Broadcast cancellation flag observed by every loop of a session
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use tokio::sync::Notify;

/// Why the session started shutting down
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    UserQuit,
    PeerDisconnected,
    SendFailed,
    ReceiveFailed,
    InputFailed,
    RenderFailed,
    /// The session root was dropped or unwound while loops were still running
    Aborted,
}

struct Shared {
    cancelled: AtomicBool,
    reason: OnceLock<ShutdownReason>,
    notify: Notify,
}

/// Set-once, many-reader kill switch.
///
/// Cloning hands out another reader/writer of the same flag. Once set it is
/// never unset; setting it again is a no-op.
#[derive(Clone)]
pub struct CancellationSignal {
    shared: Arc<Shared>,
}

impl CancellationSignal {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                cancelled: AtomicBool::new(false),
                reason: OnceLock::new(),
                notify: Notify::new(),
            }),
        }
    }

    /// Returns `true` only for the call that actually flipped the flag
    pub fn cancel(&self, reason: ShutdownReason) -> bool {
        // Reason goes in first so a reader that sees the flag also sees why
        let first = self.shared.reason.set(reason).is_ok();
        self.shared.cancelled.store(true, Ordering::Release);
        self.shared.notify.notify_waiters();
        first
    }

    pub fn is_cancelled(&self) -> bool {
        self.shared.cancelled.load(Ordering::Acquire)
    }

    /// The reason recorded by the first `cancel` call
    pub fn reason(&self) -> Option<ShutdownReason> {
        self.shared.reason.get().copied()
    }

    /// Resolves once the signal is set. Cancel-safe, meant for `tokio::select!`.
    pub async fn cancelled(&self) {
        loop {
            // Register before checking so a concurrent cancel cannot slip between
            let notified = self.shared.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

impl Default for CancellationSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CancellationSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancellationSignal")
            .field("cancelled", &self.is_cancelled())
            .field("reason", &self.reason())
            .finish()
    }
}
