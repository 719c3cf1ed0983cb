//! Overlay node handle.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::debug;

use crate::common::{Host, Key, Message, MAX_PAYLOAD_SIZE};
use crate::dispatcher::{DispatchState, Dispatcher, EventCategory};
use crate::engine::{Config, Engine};
use crate::info::Info;
use crate::keyspace;
use crate::registry::{CallbackRegistry, Handler, HandlerResult};
use crate::{Error, Result};

#[derive(Debug, Clone)]
/// A node participating in the overlay.
///
/// Cloning is cheap, every clone drives the same engine and handlers. The
/// engine stops once [Node::shutdown] is called, or every clone is dropped.
pub struct Node {
    engine: Engine,
    registry: Arc<CallbackRegistry>,
    dispatcher: Dispatcher,
}

impl Node {
    /// Start a node listening on `port` (`0` for an ephemeral port) and join the
    /// overlay through `bootstrap` (`"name:port"`), or start a new overlay if it is None.
    ///
    /// Returns after local setup, joining completes in the background and is
    /// reported to the update handler.
    pub fn initialize(port: u16, bootstrap: Option<&str>) -> Result<Node> {
        let mut builder = Node::builder().port(port);

        if let Some(bootstrap) = bootstrap {
            builder = builder.bootstrap(bootstrap);
        }

        builder.build()
    }

    /// Returns a builder to configure the node before starting it.
    pub fn builder() -> NodeBuilder {
        NodeBuilder::default()
    }

    // === Getters ===

    /// This node's key.
    pub fn key(&self) -> &Key {
        self.engine.key()
    }

    /// This node's key as a 40 characters lowercase hex string.
    pub fn get_local_node_key(&self) -> String {
        self.engine.key().to_string()
    }

    /// Address of the UDP socket this node is listening on.
    pub fn local_addr(&self) -> SocketAddr {
        self.engine.local_addr()
    }

    /// Whether a handler of `category` is executing right now.
    pub fn dispatch_state(&self, category: EventCategory) -> DispatchState {
        self.dispatcher.state(category)
    }

    /// Information and statistics about this node.
    pub fn info(&self) -> Result<Info> {
        let engine = self.engine.info()?;

        Ok(Info::new(engine, &self.dispatcher))
    }

    // === Public Methods ===

    /// Send `payload` to the node owning `key`.
    ///
    /// Fire and forget: there is no acknowledgment, and messages of a type the
    /// receiver didn't register are dropped by the receiver.
    ///
    /// Fails with [crate::Error::InvalidKey] if `key` isn't 40 hex digits, and with
    /// [crate::Error::InvalidArguments] if `payload` is larger than [MAX_PAYLOAD_SIZE].
    pub fn send(&self, key: &str, type_code: u32, payload: &[u8]) -> Result<()> {
        let key: Key = key.parse()?;

        if payload.len() > MAX_PAYLOAD_SIZE {
            return Err(Error::InvalidArguments(format!(
                "payload of {} bytes exceeds the {MAX_PAYLOAD_SIZE} bytes limit",
                payload.len()
            )));
        }

        self.engine
            .send(Message::new(key, type_code, payload.to_vec()))
    }

    /// Derive a key from `value`, see [keyspace::make_key_with].
    pub fn make_key<T: Serialize + ?Sized>(&self, value: &T, seed: bool) -> Result<String> {
        keyspace::make_key_with(value, seed)
    }

    /// Replace the handler called with `(peer_key, peer_host_name, joined)`
    /// whenever a member joins or leaves the overlay.
    pub fn set_update_handler<F>(&self, handler: F) -> Result<()>
    where
        F: Fn(&str, &str, bool) -> HandlerResult + Send + Sync + 'static,
    {
        self.registry
            .set(EventCategory::Update, Handler::update(handler))
    }

    /// Replace the handler called with `(key, type_code, payload)` for every
    /// message this node owns the key of.
    ///
    /// Errors returned, or panics raised, by the handler are logged and counted
    /// in [Info::handler_failures], they never stop later deliveries.
    pub fn set_deliver_handler<F>(&self, handler: F) -> Result<()>
    where
        F: Fn(&str, u32, &[u8]) -> HandlerResult + Send + Sync + 'static,
    {
        self.registry
            .set(EventCategory::Deliver, Handler::deliver(handler))
    }

    /// Always fails with [crate::Error::NotImplemented], relayed messages can't be intercepted.
    pub fn set_forward_handler<F>(&self, handler: F) -> Result<()>
    where
        F: Fn(&str, u32, &[u8], &str) -> HandlerResult + Send + Sync + 'static,
    {
        self.registry
            .set(EventCategory::Forward, Handler::forward(handler))
    }

    /// Replace the handler of `category`, see [CallbackRegistry::set].
    pub fn set_handler(&self, category: EventCategory, handler: Handler) -> Result<()> {
        self.registry.set(category, handler)
    }

    /// Tell known members this node is leaving, and stop the engine and the dispatch loop.
    ///
    /// Any later [Node::send] or [Node::info] fails with [crate::Error::Shutdown].
    /// Called from a handler, it returns before the engine thread is gone.
    pub fn shutdown(&self) {
        self.engine.shutdown();

        debug!(key = %self.engine.key(), "dstack node was shutdown");
    }
}

#[derive(Debug, Default, Clone)]
/// Configures and starts a [Node].
pub struct NodeBuilder {
    config: Config,
    registry: Option<Arc<CallbackRegistry>>,
}

impl NodeBuilder {
    /// UDP port to listen on, defaults to `0` for an ephemeral port.
    pub fn port(mut self, port: u16) -> Self {
        self.config.port = port;

        self
    }

    /// Join the overlay through an existing member, as `"name:port"`.
    pub fn bootstrap(mut self, bootstrap: &str) -> Self {
        self.config.bootstrap = Some(bootstrap.to_string());

        self
    }

    /// Use an explicit key instead of a random one.
    pub fn key(mut self, key: Key) -> Self {
        self.config.key = Some(key);

        self
    }

    /// Use the in-memory network instead of real UDP sockets.
    ///
    /// Only nodes within this process can be reached, useful for testing.
    pub fn simulated(mut self) -> Self {
        self.config.simulated = true;

        self
    }

    /// Capacity of the queue between the engine thread and the dispatch loop.
    pub fn dispatch_capacity(mut self, capacity: usize) -> Self {
        self.config.dispatch_capacity = capacity;

        self
    }

    /// Number of message ids remembered to drop duplicates.
    pub fn seen_messages(mut self, seen_messages: usize) -> Self {
        self.config.seen_messages = seen_messages;

        self
    }

    pub fn read_timeout(mut self, read_timeout: Duration) -> Self {
        self.config.read_timeout = read_timeout;

        self
    }

    /// Dispatch to handlers registered before the node was built.
    pub(crate) fn registry(mut self, registry: Arc<CallbackRegistry>) -> Self {
        self.registry = Some(registry);

        self
    }

    /// Bind the socket, start the engine and the dispatch loop, and join the overlay.
    pub fn build(self) -> Result<Node> {
        let bootstrap = self
            .config
            .bootstrap
            .as_deref()
            .map(Host::decode)
            .transpose()?;

        let registry = self.registry.unwrap_or_default();

        let (dispatcher, events) =
            Dispatcher::spawn(registry.clone(), self.config.dispatch_capacity)?;

        // Every message type is registered with the engine before it receives anything.
        let engine = Engine::start(&self.config, events)?;

        engine.join(bootstrap.as_ref())?;
        drop(bootstrap);

        Ok(Node {
            engine,
            registry,
            dispatcher,
        })
    }
}
