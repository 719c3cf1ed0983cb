//! Process-wide node.
//!
//! Functions here drive a single [Node] shared by the whole process, started by
//! [initialize]. Handlers can be set before or after it is started.

use std::sync::{Arc, Mutex, OnceLock, PoisonError};

use tracing::info;

use crate::dispatcher::EventCategory;
use crate::node::Node;
use crate::registry::{CallbackRegistry, Handler, HandlerResult};
use crate::{Error, Result};

static NODE: OnceLock<Node> = OnceLock::new();
static REGISTRY: OnceLock<Arc<CallbackRegistry>> = OnceLock::new();
/// Held while the process-wide node is being started.
static STARTING: Mutex<()> = Mutex::new(());

fn registry() -> &'static Arc<CallbackRegistry> {
    REGISTRY.get_or_init(Default::default)
}

/// Start the process-wide node listening on `port`, joining the overlay through
/// `bootstrap` (`"name:port"`) if any.
///
/// Fails with [Error::AlreadyInitialized] if it was already started.
pub fn initialize(port: u16, bootstrap: Option<&str>) -> Result<()> {
    let _starting = STARTING.lock().unwrap_or_else(PoisonError::into_inner);

    if NODE.get().is_some() {
        return Err(Error::AlreadyInitialized);
    }

    let mut builder = Node::builder().port(port).registry(registry().clone());

    if let Some(bootstrap) = bootstrap {
        builder = builder.bootstrap(bootstrap);
    }

    let node = builder.build()?;

    info!(key = %node.key(), address = %node.local_addr(), "Process-wide node started");

    NODE.set(node).map_err(|_| Error::AlreadyInitialized)
}

/// The process-wide node, or [Error::NotInitialized] before [initialize].
pub fn node() -> Result<&'static Node> {
    NODE.get().ok_or(Error::NotInitialized)
}

/// Send `payload` to the node owning `key`, see [Node::send].
pub fn send(key: &str, type_code: u32, payload: &[u8]) -> Result<()> {
    node()?.send(key, type_code, payload)
}

/// The process-wide node's key string.
pub fn get_local_node_key() -> Result<String> {
    Ok(node()?.get_local_node_key())
}

/// See [Node::set_update_handler].
pub fn set_update_handler<F>(handler: F) -> Result<()>
where
    F: Fn(&str, &str, bool) -> HandlerResult + Send + Sync + 'static,
{
    registry().set(EventCategory::Update, Handler::update(handler))
}

/// See [Node::set_deliver_handler].
pub fn set_deliver_handler<F>(handler: F) -> Result<()>
where
    F: Fn(&str, u32, &[u8]) -> HandlerResult + Send + Sync + 'static,
{
    registry().set(EventCategory::Deliver, Handler::deliver(handler))
}

/// Always fails with [Error::NotImplemented].
pub fn set_forward_handler<F>(handler: F) -> Result<()>
where
    F: Fn(&str, u32, &[u8], &str) -> HandlerResult + Send + Sync + 'static,
{
    registry().set(EventCategory::Forward, Handler::forward(handler))
}

/// See [Node::set_handler].
pub fn set_handler(category: EventCategory, handler: Handler) -> Result<()> {
    registry().set(category, handler)
}
