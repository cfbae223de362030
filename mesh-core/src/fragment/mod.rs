//! [FRAGMENT] Fragmentation & reassembly.

pub mod fragmenter;
pub mod reassembly;

pub use fragmenter::{crc32_of, fragment, FragmentPayload, MESSAGE_ID_LEN};
pub use reassembly::Reassembler;
