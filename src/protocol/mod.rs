//! Protocol module - the contract between drivers and node servers
//!
//! Application framing is one JSON object per line, newline-terminated, in
//! both directions; each connection carries exactly one request/response
//! pair before the server closes it.

mod codec;
mod message;

pub use codec::*;
pub use message::*;

/// First node's TCP port; node `i` listens on `BASE_PORT + i`.
pub const BASE_PORT: u16 = 12000;

/// Node count started by the default supervisor.
pub const DEFAULT_NUM_NODES: u16 = 10;

/// Upper bound on a single request or response line.
pub const MAX_LINE_BYTES: usize = 64 * 1024;
