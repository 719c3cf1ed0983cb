//! Miscellaneous common structs used throughout the library.

mod host;
mod key;
pub mod messages;

pub use host::*;
pub use key::*;
pub use messages::{
    DataPacket, Member, Message, MessageType, Packet, MAX_HOPS,
    MAX_PAYLOAD_SIZE,
};
