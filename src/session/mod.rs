//! Session core: the shared table and the three components that drive it.
//!
//! - [`table::SessionTable`]: remote id to session state.
//! - [`puller::WindowedPuller`]: consumer-side windowed pulls.
//! - [`responder::ResponderQueue`]: producer-side request/message matching.
//! - [`liveness::LivenessMonitor`]: heartbeats and inactivity sweeps.

pub mod liveness;
pub mod puller;
pub mod responder;
pub mod table;
