//! [QUEUE] Priority queue & bandwidth scheduler.

pub mod bandwidth;
pub mod priority_queue;

pub use bandwidth::BandwidthScheduler;
pub use priority_queue::{PriorityQueue, ESCALATION_THRESHOLD};
