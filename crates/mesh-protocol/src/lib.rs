//! Mesh Protocol - envelope and peer definitions
//!
//! Implements the agent-to-agent exchange format: a flat JSON envelope
//! carrying a message kind, the sender, a task correlation id and a free-form
//! payload, plus the bookkeeping kept for every configured neighbour.

pub mod constants;
pub mod error;
pub mod message;
pub mod peer;

pub use constants::*;
pub use error::*;
pub use message::*;
pub use peer::*;

/// Current wall-clock time as fractional seconds since the Unix epoch.
///
/// This is the unit used on the wire for `timestamp`.
pub fn current_timestamp() -> f64 {
    let now = chrono::Utc::now();
    now.timestamp_micros() as f64 / 1_000_000.0
}
