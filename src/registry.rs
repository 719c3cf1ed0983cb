//! Zero or one application handler per event category.

use std::fmt::{self, Debug, Formatter};
use std::sync::{Arc, PoisonError, RwLock};

use crate::dispatcher::EventCategory;
use crate::{Error, Result};

/// Error returned by an application handler, reported by the dispatch loop.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;
/// Return type of every application handler.
pub type HandlerResult = Result<(), HandlerError>;

/// Called with `(peer_key, peer_host_name, joined)`.
pub type UpdateFn = dyn Fn(&str, &str, bool) -> HandlerResult + Send + Sync;
/// Called with `(destination_key, type_code, payload)`.
pub type DeliverFn = dyn Fn(&str, u32, &[u8]) -> HandlerResult + Send + Sync;
/// Called with `(destination_key, type_code, payload, next_hop_host_name)`.
pub type ForwardFn = dyn Fn(&str, u32, &[u8], &str) -> HandlerResult + Send + Sync;

#[derive(Clone)]
/// An application handler, tagged with the calling convention it implements.
pub enum Handler {
    Update(Arc<UpdateFn>),
    Deliver(Arc<DeliverFn>),
    Forward(Arc<ForwardFn>),
}

impl Handler {
    pub fn update<F>(f: F) -> Self
    where
        F: Fn(&str, &str, bool) -> HandlerResult + Send + Sync + 'static,
    {
        Handler::Update(Arc::new(f))
    }

    pub fn deliver<F>(f: F) -> Self
    where
        F: Fn(&str, u32, &[u8]) -> HandlerResult + Send + Sync + 'static,
    {
        Handler::Deliver(Arc::new(f))
    }

    pub fn forward<F>(f: F) -> Self
    where
        F: Fn(&str, u32, &[u8], &str) -> HandlerResult + Send + Sync + 'static,
    {
        Handler::Forward(Arc::new(f))
    }

    /// The event category this handler can be called for.
    pub fn category(&self) -> EventCategory {
        match self {
            Handler::Update(_) => EventCategory::Update,
            Handler::Deliver(_) => EventCategory::Deliver,
            Handler::Forward(_) => EventCategory::Forward,
        }
    }
}

impl Debug for Handler {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "Handler::{:?}", self.category())
    }
}

/// A replaceable handler reference.
///
/// Readers clone the [Arc] and call it after the lock is released, so an
/// in-flight call keeps the handler it started with alive even if it is
/// replaced meanwhile.
struct Slot<F: ?Sized> {
    handler: RwLock<Option<Arc<F>>>,
}

impl<F: ?Sized> Slot<F> {
    fn new() -> Self {
        Self {
            handler: RwLock::new(None),
        }
    }

    fn get(&self) -> Option<Arc<F>> {
        self.handler
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Returns the previous handler, to be dropped after the write lock is released.
    fn replace(&self, handler: Arc<F>) -> Option<Arc<F>> {
        self.handler
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(handler)
    }

    fn is_set(&self) -> bool {
        self.handler
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }
}

/// Handlers for membership updates, deliveries and forwards.
pub struct CallbackRegistry {
    update: Slot<UpdateFn>,
    deliver: Slot<DeliverFn>,
    /// Never set, forward interception is not supported.
    forward: Slot<ForwardFn>,
}

impl CallbackRegistry {
    pub fn new() -> Self {
        Self {
            update: Slot::new(),
            deliver: Slot::new(),
            forward: Slot::new(),
        }
    }

    /// Replace the handler of `category`.
    ///
    /// Fails with [Error::NotCallable] if `handler` doesn't implement the calling
    /// convention of `category`, and always fails with [Error::NotImplemented] for
    /// [EventCategory::Forward].
    pub fn set(&self, category: EventCategory, handler: Handler) -> Result<()> {
        match (category, handler) {
            (EventCategory::Forward, _) => Err(Error::NotImplemented(EventCategory::Forward)),
            (EventCategory::Update, Handler::Update(handler)) => {
                let previous = self.update.replace(handler);
                drop(previous);
                Ok(())
            }
            (EventCategory::Deliver, Handler::Deliver(handler)) => {
                let previous = self.deliver.replace(handler);
                drop(previous);
                Ok(())
            }
            (category, _) => Err(Error::NotCallable(category)),
        }
    }

    pub fn update(&self) -> Option<Arc<UpdateFn>> {
        self.update.get()
    }

    pub fn deliver(&self) -> Option<Arc<DeliverFn>> {
        self.deliver.get()
    }

    pub fn forward(&self) -> Option<Arc<ForwardFn>> {
        self.forward.get()
    }

    /// Returns true if a handler is registered for `category`.
    pub fn is_set(&self, category: EventCategory) -> bool {
        match category {
            EventCategory::Update => self.update.is_set(),
            EventCategory::Deliver => self.deliver.is_set(),
            EventCategory::Forward => self.forward.is_set(),
        }
    }
}

impl Default for CallbackRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl Debug for CallbackRegistry {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackRegistry")
            .field("update", &self.update.is_set())
            .field("deliver", &self.deliver.is_set())
            .field("forward", &self.forward.is_set())
            .finish()
    }
}
