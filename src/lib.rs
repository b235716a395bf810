pub mod core {
	pub mod input;
	pub mod log;
	pub mod protocol;
	pub mod render;
	pub mod session;
	pub mod shutdown;
	pub mod signal;
	pub mod transport;
}

pub mod config;
pub mod server;

#[cfg(test)]
mod test_utils;

// Re-export for convenience
pub use crate::core::protocol::{CommandEvent, Packet};
pub use crate::core::session::{Session, SessionError, SessionOutcome};
