//! [HEALTH] Peer health monitor: adaptive heartbeat, RTT, state transitions.

pub mod monitor;

pub use monitor::{HealthEvent, HealthMonitor};
