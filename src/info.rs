use std::net::SocketAddr;

use crate::common::Key;
use crate::dispatcher::Dispatcher;
use crate::engine::EngineInfo;

/// Information and statistics about this overlay node.
#[derive(Debug, Clone)]
pub struct Info {
    key: Key,
    local_addr: SocketAddr,
    members: usize,
    dispatched: u64,
    handler_failures: u64,
}

impl Info {
    pub(crate) fn new(engine: EngineInfo, dispatcher: &Dispatcher) -> Self {
        Self {
            key: engine.key,
            local_addr: engine.local_addr,
            members: engine.members,
            dispatched: dispatcher.dispatched(),
            handler_failures: dispatcher.failures(),
        }
    }

    /// This node's [Key]
    pub fn key(&self) -> &Key {
        &self.key
    }
    /// Local UDP socket address that this node is listening on.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
    /// Number of other members this node currently knows of.
    pub fn members(&self) -> usize {
        self.members
    }
    /// Number of update and deliver handler invocations so far.
    pub fn dispatched(&self) -> u64 {
        self.dispatched
    }
    /// Number of handler invocations that returned an error or panicked.
    ///
    /// Failed handlers never stop the dispatch loop, see [crate::Node::set_deliver_handler].
    pub fn handler_failures(&self) -> u64 {
        self.handler_failures
    }
}
