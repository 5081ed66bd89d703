pub mod message;
pub mod types;
pub mod varint;

pub use message::{FrameCodec, Message, VersionPayload};
pub use types::{InventoryType, InventoryVector, NetworkAddress, PeerServices, TimestampedAddress};
