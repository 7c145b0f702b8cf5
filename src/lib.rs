#![forbid(unsafe_code)]

//! Pull-based relay for 3-byte MIDI events over a name-addressed
//! request/response transport.
//!
//! The consumer keeps a sliding window of pull requests open against each
//! producer; the producer answers a request only once it has messages to
//! put in it. Heartbeats and an inactivity sweep detect dead peers.

pub mod config;
pub mod device;
pub mod errors;
pub mod models;
pub mod node;
pub mod session;
pub mod transport;

pub use config::GlobalConfig;
pub use errors::{AppError, Result};
