//! Cross-domain dispatch of engine events to application handlers.
//!
//! The engine thread pushes [Event]s onto a bounded channel, and a single
//! dispatch thread drains it, invoking the handler currently registered for
//! each event's category. Handler errors and panics are contained here and
//! never reach the engine thread.

use std::any::Any;
use std::fmt::{self, Display, Formatter};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;

use flume::{Receiver, Sender};
use tracing::{debug, error, trace};

use crate::engine::Event;
use crate::registry::{CallbackRegistry, HandlerResult};
use crate::{Error, Result};

/// Name of the thread running application handlers.
pub(crate) const DISPATCH_THREAD: &str = "dstack-dispatch";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
/// Categories of events fired by the overlay engine.
pub enum EventCategory {
    /// A member joined or left the overlay.
    Update,
    /// A message arrived at the node owning its key.
    Deliver,
    /// A message is being relayed through this node. Handlers can't be registered for it.
    Forward,
}

impl Display for EventCategory {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let name = match self {
            EventCategory::Update => "update",
            EventCategory::Deliver => "deliver",
            EventCategory::Forward => "forward",
        };

        write!(f, "{name}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchState {
    /// No handler is executing for this category.
    Idle,
    /// A handler invocation is in progress.
    Dispatching,
}

#[derive(Debug, Default)]
struct Shared {
    updating: AtomicBool,
    delivering: AtomicBool,
    dispatched: AtomicU64,
    failures: AtomicU64,
}

impl Shared {
    fn flag(&self, category: EventCategory) -> Option<&AtomicBool> {
        match category {
            EventCategory::Update => Some(&self.updating),
            EventCategory::Deliver => Some(&self.delivering),
            EventCategory::Forward => None,
        }
    }
}

#[derive(Debug, Clone)]
/// Handle to the dispatch loop.
///
/// The loop stops once every [Sender] returned by [Dispatcher::spawn] is dropped.
pub struct Dispatcher {
    shared: Arc<Shared>,
}

impl Dispatcher {
    /// Start the dispatch thread, returning its handle and the sender the engine reports to.
    pub fn spawn(
        registry: Arc<CallbackRegistry>,
        capacity: usize,
    ) -> Result<(Dispatcher, Sender<Event>)> {
        if capacity == 0 {
            return Err(Error::InvalidArguments(
                "dispatch capacity must be greater than zero".to_string(),
            ));
        }

        let (sender, receiver) = flume::bounded(capacity);
        let shared = Arc::new(Shared::default());

        let dispatch_loop = DispatchLoop {
            registry,
            shared: shared.clone(),
        };

        thread::Builder::new()
            .name(DISPATCH_THREAD.to_string())
            .spawn(move || dispatch_loop.run(receiver))
            .map_err(Error::NetworkInit)?;

        Ok((Dispatcher { shared }, sender))
    }

    // === Getters ===

    /// Whether a handler of `category` is executing right now.
    pub fn state(&self, category: EventCategory) -> DispatchState {
        match self.shared.flag(category) {
            Some(flag) if flag.load(Ordering::Acquire) => DispatchState::Dispatching,
            _ => DispatchState::Idle,
        }
    }

    /// Number of handler invocations so far.
    pub fn dispatched(&self) -> u64 {
        self.shared.dispatched.load(Ordering::Relaxed)
    }

    /// Number of handler invocations that returned an error or panicked.
    pub fn failures(&self) -> u64 {
        self.shared.failures.load(Ordering::Relaxed)
    }
}

struct DispatchLoop {
    registry: Arc<CallbackRegistry>,
    shared: Arc<Shared>,
}

impl DispatchLoop {
    fn run(self, receiver: Receiver<Event>) {
        while let Ok(event) = receiver.recv() {
            self.dispatch(event);
        }

        debug!("dstack dispatch loop was shutdown");
    }

    fn dispatch(&self, event: Event) {
        match event {
            Event::Update { key, host, joined } => {
                let Some(handler) = self.registry.update() else {
                    trace!(peer = %key, joined, "No update handler, dropping event");
                    return;
                };

                let keystr = key.to_string();
                self.invoke(EventCategory::Update, || {
                    handler(&keystr, &host.name, joined)
                });
            }
            Event::Deliver(message) => {
                let Some(handler) = self.registry.deliver() else {
                    trace!(key = %message.key, "No deliver handler, dropping event");
                    return;
                };

                let keystr = message.key.to_string();
                self.invoke(EventCategory::Deliver, || {
                    handler(&keystr, message.type_code, &message.payload)
                });
            }
            Event::Forward { message, next_hop } => {
                trace!(
                    key = %message.key,
                    type_code = message.type_code,
                    next_hop = %next_hop.address,
                    "Forwarding without interception"
                );
            }
        }
    }

    fn invoke(&self, category: EventCategory, call: impl FnOnce() -> HandlerResult) {
        let flag = self.shared.flag(category);

        if let Some(flag) = flag {
            flag.store(true, Ordering::Release);
        }

        let outcome = panic::catch_unwind(AssertUnwindSafe(call));

        if let Some(flag) = flag {
            flag.store(false, Ordering::Release);
        }

        self.shared.dispatched.fetch_add(1, Ordering::Relaxed);

        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(error)) => {
                self.shared.failures.fetch_add(1, Ordering::Relaxed);
                error!(%category, %error, "Handler failed");
            }
            Err(panic) => {
                self.shared.failures.fetch_add(1, Ordering::Relaxed);
                error!(%category, panic = panic_message(&*panic), "Handler panicked");
            }
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&str>() {
        *message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.as_str()
    } else {
        "unknown panic"
    }
}
