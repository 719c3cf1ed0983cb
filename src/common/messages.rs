//! Message types, application messages and the overlay wire packets.

mod internal;

use std::fmt::{self, Display, Formatter};
use std::net::SocketAddr;

use bytes::Bytes;

use crate::common::Key;
use crate::{Error, Result};

/// Maximum number of relays a data packet goes through before it is dropped.
pub const MAX_HOPS: u8 = 8;
/// Largest application payload, leaving room for the packet framing in a single UDP datagram.
pub const MAX_PAYLOAD_SIZE: usize = 64_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
/// The fixed registry of message types, registered with handle-once semantics at startup.
pub enum MessageType {
    /// Announce a new distributable task.
    TaskNew,
    /// An operation targeting an existing task.
    TaskOp,
    /// Subscribe to a channel.
    ChSubscribe,
    /// Unsubscribe from a channel.
    ChUnsubscribe,
    /// Publish to a channel.
    ChPublish,
    /// Announce a new channel.
    ChNew,
    /// Broadcast to all channel subscribers.
    ChBroadcast,
    /// Delivery acknowledgment.
    ChDelivered,
}

impl MessageType {
    pub const ALL: [MessageType; 8] = [
        MessageType::TaskNew,
        MessageType::TaskOp,
        MessageType::ChSubscribe,
        MessageType::ChUnsubscribe,
        MessageType::ChPublish,
        MessageType::ChNew,
        MessageType::ChBroadcast,
        MessageType::ChDelivered,
    ];

    pub const fn code(self) -> u32 {
        match self {
            MessageType::TaskNew => 15,
            MessageType::TaskOp => 16,
            MessageType::ChSubscribe => 17,
            MessageType::ChUnsubscribe => 18,
            MessageType::ChPublish => 19,
            MessageType::ChNew => 20,
            MessageType::ChBroadcast => 21,
            MessageType::ChDelivered => 22,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            MessageType::TaskNew => "TASK_NEW",
            MessageType::TaskOp => "TASK_OP",
            MessageType::ChSubscribe => "CH_SUBSCRIBE",
            MessageType::ChUnsubscribe => "CH_UNSUBSCRIBE",
            MessageType::ChPublish => "CH_PUBLISH",
            MessageType::ChNew => "CH_NEW",
            MessageType::ChBroadcast => "CH_BROADCAST",
            MessageType::ChDelivered => "CH_DELIVERED",
        }
    }
}

impl TryFrom<u32> for MessageType {
    type Error = u32;

    fn try_from(code: u32) -> Result<Self, u32> {
        MessageType::ALL
            .iter()
            .copied()
            .find(|message_type| message_type.code() == code)
            .ok_or(code)
    }
}

impl From<MessageType> for u32 {
    fn from(message_type: MessageType) -> u32 {
        message_type.code()
    }
}

impl Display for MessageType {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

#[derive(Debug, Clone, PartialEq)]
/// An application message addressed to whichever node owns `key`.
pub struct Message {
    pub key: Key,
    pub type_code: u32,
    pub payload: Bytes,
}

impl Message {
    pub fn new(key: Key, type_code: u32, payload: impl Into<Bytes>) -> Self {
        Self {
            key,
            type_code,
            payload: payload.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// A member of the overlay as known to the engine.
pub struct Member {
    pub key: Key,
    pub address: SocketAddr,
}

#[derive(Debug, Clone, PartialEq)]
/// Overlay engine packets exchanged between nodes.
pub enum Packet {
    /// Ask the receiver to let the sender join the overlay.
    Join { key: Key },
    /// Answer to a [Packet::Join] with the responder's key and every other member it knows.
    Welcome { key: Key, members: Vec<Member> },
    /// A new member joined the overlay.
    Announce { member: Member },
    /// The sender is leaving the overlay.
    Leave { key: Key },
    /// An application message in transit.
    Data(DataPacket),
}

#[derive(Debug, Clone, PartialEq)]
pub struct DataPacket {
    /// Random id used for duplicate suppression.
    pub id: u64,
    pub message: Message,
    /// Number of relays so far.
    pub hops: u8,
}

impl Packet {
    pub fn from_bytes<T: AsRef<[u8]>>(bytes: T) -> Result<Packet> {
        let packet = internal::WirePacket::from_bytes(bytes)?;

        Packet::try_from(packet)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(internal::WirePacket::from(self.clone()).to_bytes()?)
    }
}

impl From<Packet> for internal::WirePacket {
    fn from(packet: Packet) -> Self {
        match packet {
            Packet::Join { key } => internal::WirePacket::Join { k: key },
            Packet::Welcome { key, members } => internal::WirePacket::Welcome {
                k: key,
                members: members.into_iter().map(Into::into).collect(),
            },
            Packet::Announce { member } => internal::WirePacket::Announce {
                member: member.into(),
            },
            Packet::Leave { key } => internal::WirePacket::Leave { k: key },
            Packet::Data(DataPacket { id, message, hops }) => internal::WirePacket::Data {
                id,
                k: message.key,
                t: message.type_code,
                p: message.payload.to_vec(),
                hops,
            },
        }
    }
}

impl TryFrom<internal::WirePacket> for Packet {
    type Error = Error;

    fn try_from(packet: internal::WirePacket) -> Result<Self> {
        Ok(match packet {
            internal::WirePacket::Join { k } => Packet::Join { key: k },
            internal::WirePacket::Welcome { k, members } => Packet::Welcome {
                key: k,
                members: members
                    .into_iter()
                    .map(Member::try_from)
                    .collect::<Result<Vec<_>>>()?,
            },
            internal::WirePacket::Announce { member } => Packet::Announce {
                member: member.try_into()?,
            },
            internal::WirePacket::Leave { k } => Packet::Leave { key: k },
            internal::WirePacket::Data { id, k, t, p, hops } => Packet::Data(DataPacket {
                id,
                message: Message::new(k, t, p),
                hops,
            }),
        })
    }
}

impl From<Member> for internal::WireMember {
    fn from(member: Member) -> Self {
        internal::WireMember {
            k: member.key,
            address: member.address.to_string(),
        }
    }
}

impl TryFrom<internal::WireMember> for Member {
    type Error = Error;

    fn try_from(member: internal::WireMember) -> Result<Self> {
        let address = member.address.parse().map_err(|_| {
            Error::InvalidArguments(format!("invalid member address {:?}", member.address))
        })?;

        Ok(Member {
            key: member.k,
            address,
        })
    }
}
