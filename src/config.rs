/// Fixed runtime settings for the client and the echo server.
///
/// The client takes no flags: it always dials the well-known address below and
/// logs to `app.log` in the working directory.
use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::time::Duration;

use tracing::Level;

pub const DEFAULT_SERVER_ADDR: &str = "127.0.0.1:8000";
pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8000";
pub const DEFAULT_LOG_PATH: &str = "app.log";

const DEFAULT_BUFFER: NonZeroUsize = match NonZeroUsize::new(1024) {
    Some(n) => n,
    None => unreachable!(),
};

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Peer to connect to at startup
    pub server_addr: String,
    /// Append-only diagnostic log
    pub log_path: PathBuf,
    pub log_level: Level,
    /// Upper bound on how long input capture waits before re-checking cancellation
    pub poll_timeout: Duration,
    /// Queue depth between input capture and the send loop
    pub command_capacity: usize,
    pub recv_buffer: NonZeroUsize,
    /// A single frame write that takes longer than this fails the send loop
    pub write_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_addr: DEFAULT_SERVER_ADDR.to_string(),
            log_path: PathBuf::from(DEFAULT_LOG_PATH),
            log_level: Level::INFO,
            poll_timeout: Duration::from_millis(50),
            command_capacity: 1,
            recv_buffer: DEFAULT_BUFFER,
            write_timeout: Duration::from_secs(2),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: String,
    pub read_buffer: NonZeroUsize,
    pub log_level: Level,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: DEFAULT_BIND_ADDR.to_string(),
            read_buffer: DEFAULT_BUFFER,
            log_level: Level::INFO,
        }
    }
}
