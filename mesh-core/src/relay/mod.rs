//! [RELAY] Flood relay + store-and-forward (spec §4.8/§9).

pub mod engine;
pub mod store_forward;

pub use engine::{RelayDecision, RelayEngine};
pub use store_forward::StoreForward;
