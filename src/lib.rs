#![doc = include_str!("../README.md")]

// Public modules
mod common;

pub mod dispatcher;
pub mod engine;
mod error;
pub mod global;
mod info;
pub mod keyspace;
mod node;
pub mod registry;

pub use crate::common::{Host, Key, Member, Message, MessageType, MAX_PAYLOAD_SIZE};
pub use bytes::Bytes;
pub use dispatcher::{DispatchState, EventCategory};
pub use error::{Error, Result};
pub use global::{
    get_local_node_key, initialize, send, set_deliver_handler, set_forward_handler,
    set_update_handler,
};
pub use info::Info;
pub use keyspace::{make_key, make_key_unseeded, make_key_with};
pub use node::{Node, NodeBuilder};
pub use registry::{Handler, HandlerError, HandlerResult};
