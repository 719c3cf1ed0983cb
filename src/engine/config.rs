use std::collections::HashMap;
use std::time::Duration;

use crate::common::{Key, MessageType};

/// Default capacity of the queue between the engine thread and the dispatch loop.
pub const DEFAULT_DISPATCH_CAPACITY: usize = 1024;
/// Default number of recently seen message ids remembered for duplicate suppression.
pub const DEFAULT_SEEN_MESSAGES: usize = 4096;
/// The maximum duration the engine thread blocks waiting for a datagram.
///
/// Lower values reduce the latency of commands like `send`, at the cost of more wakeups.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_millis(10);

#[derive(Debug, Clone)]
/// Overlay engine configurations
pub struct Config {
    /// UDP port to listen on, `0` for an ephemeral port.
    ///
    /// Defaults to `0`
    pub port: u16,
    /// An existing member to join through, as `name:port`.
    ///
    /// Defaults to None, starting a new overlay.
    pub bootstrap: Option<String>,
    /// Explicit key for this node.
    ///
    /// Defaults to None, where a random key is used.
    pub key: Option<Key>,
    /// Use the in-memory simulated network instead of real UDP sockets.
    ///
    /// Defaults to false
    pub simulated: bool,
    /// Capacity of the event queue to the dispatch loop, once full the engine
    /// thread blocks until the dispatch loop catches up.
    ///
    /// Defaults to [DEFAULT_DISPATCH_CAPACITY]
    pub dispatch_capacity: usize,
    /// Number of message ids remembered to drop duplicates of handle-once types.
    ///
    /// Defaults to [DEFAULT_SEEN_MESSAGES]
    pub seen_messages: usize,
    /// Socket read timeout, see [DEFAULT_READ_TIMEOUT].
    pub read_timeout: Duration,
    /// Message types accepted from the first packet on, and whether each is handled once.
    ///
    /// Defaults to every [MessageType], handled once.
    pub registered: HashMap<u32, bool>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 0,
            bootstrap: None,
            key: None,
            simulated: false,
            dispatch_capacity: DEFAULT_DISPATCH_CAPACITY,
            seen_messages: DEFAULT_SEEN_MESSAGES,
            read_timeout: DEFAULT_READ_TIMEOUT,
            registered: MessageType::ALL
                .iter()
                .map(|message_type| (message_type.code(), true))
                .collect(),
        }
    }
}
