//! Single-threaded echo server multiplexed over a `slotmux` registry.

pub mod error;
pub mod server;

pub use error::ServerError;
pub use server::EchoServer;

/// Default listening port, shared with the companion binaries.
pub const DEFAULT_PORT: u16 = 43211;
