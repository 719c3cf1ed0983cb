use serde::{Deserialize, Serialize};

use crate::common::Key;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "y")]
pub enum WirePacket {
    #[serde(rename = "j")]
    Join { k: Key },

    #[serde(rename = "w")]
    Welcome { k: Key, members: Vec<WireMember> },

    #[serde(rename = "a")]
    Announce { member: WireMember },

    #[serde(rename = "l")]
    Leave { k: Key },

    #[serde(rename = "d")]
    Data {
        id: u64,
        k: Key,
        t: u32,
        #[serde(with = "serde_bytes")]
        p: Vec<u8>,
        hops: u8,
    },
}

impl WirePacket {
    pub fn from_bytes<T: AsRef<[u8]>>(bytes: T) -> Result<WirePacket, serde_bencode::Error> {
        let obj = serde_bencode::from_bytes(bytes.as_ref())?;
        Ok(obj)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_bencode::Error> {
        serde_bencode::to_bytes(self)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct WireMember {
    pub k: Key,
    pub address: String,
}
