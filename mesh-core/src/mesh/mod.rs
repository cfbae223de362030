//! The mesh façade: the single-writer network engine, its command/event
//! vocabulary, and the handle applications hold (spec §5).

mod command;
mod events;
mod network;

pub use command::{Command, MeshStats, SendOptions};
pub use events::MeshEvent;
pub use network::MeshNetworkHandle;
