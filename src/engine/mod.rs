//! Default overlay engine: a one-hop overlay where every node knows every member.
//!
//! The engine runs in its own thread, owns the UDP socket, joins the overlay
//! through a bootstrap member, routes messages to the member whose key is the
//! closest to the destination by xor distance, and reports membership changes,
//! deliveries and relays as [Event]s on a channel.

mod actor;
pub mod config;
pub mod socket;

use std::net::SocketAddr;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

use flume::Sender;
use tracing::info;

use crate::common::{Host, Key, Message};
use crate::dispatcher::DISPATCH_THREAD;
use crate::{Error, Result};

use actor::{Actor, ActorMessage};
pub use config::Config;
use socket::{real, sim, OverlaySocket, Udp};

/// Events reported by the engine thread.
#[derive(Debug, Clone)]
pub enum Event {
    /// A member joined, or left, the overlay.
    Update { key: Key, host: Host, joined: bool },
    /// A message this node owns the key of.
    Deliver(Message),
    /// A message relayed through this node toward `next_hop`.
    Forward { message: Message, next_hop: Host },
}

/// Snapshot of the engine state.
#[derive(Debug, Clone)]
pub struct EngineInfo {
    pub key: Key,
    pub local_addr: SocketAddr,
    /// Number of other members this node knows of.
    pub members: usize,
}

#[derive(Debug, Clone)]
/// Handle to the engine thread. The thread stops once every handle is dropped.
pub struct Engine {
    sender: Sender<ActorMessage>,
    key: Key,
    local_addr: SocketAddr,
    member_count: Arc<AtomicUsize>,
}

impl Engine {
    /// Bind the socket and start the engine thread, reporting to `events`.
    pub fn start(config: &Config, events: Sender<Event>) -> Result<Self> {
        let udp: Box<dyn Udp> = if config.simulated {
            sim::UdpSocket::bind(config.port).map_err(Error::NetworkInit)?
        } else {
            real::UdpSocket::bind(config.port).map_err(Error::NetworkInit)?
        };

        let socket = OverlaySocket::new(udp, config.read_timeout).map_err(Error::NetworkInit)?;
        let local_addr = socket.local_addr();

        let key = config.key.unwrap_or_else(Key::random);

        let seen_messages = NonZeroUsize::new(config.seen_messages).ok_or_else(|| {
            Error::InvalidArguments("seen_messages must be greater than zero".to_string())
        })?;

        let (sender, receiver) = flume::unbounded();
        let member_count = Arc::new(AtomicUsize::new(0));

        let actor = Actor::new(
            key,
            socket,
            receiver,
            events,
            config.registered.clone(),
            seen_messages,
            member_count.clone(),
        );

        thread::Builder::new()
            .name("dstack-engine".to_string())
            .spawn(move || actor.run())
            .map_err(Error::NetworkInit)?;

        info!(%key, %local_addr, "dstack engine listening");

        Ok(Engine {
            sender,
            key,
            local_addr,
            member_count,
        })
    }

    // === Getters ===

    /// This node's key.
    pub fn key(&self) -> &Key {
        &self.key
    }

    /// Address the engine socket is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    // === Public Methods ===

    /// Join the overlay through `bootstrap`, or start a new overlay.
    ///
    /// Returns as soon as the join request is queued.
    pub fn join(&self, bootstrap: Option<&Host>) -> Result<()> {
        self.command(ActorMessage::Join(bootstrap.map(|host| host.address)))
    }

    /// Register a message type on top of [Config::registered], messages of
    /// unregistered types are dropped on receipt.
    pub fn register(&self, type_code: u32, handle_once: bool) -> Result<()> {
        self.command(ActorMessage::Register(type_code, handle_once))
    }

    /// Fire and forget `message` toward the owner of its key.
    pub fn send(&self, message: Message) -> Result<()> {
        self.command(ActorMessage::Send(message))
    }

    /// Snapshot of the engine state, read without waiting on the engine thread.
    pub fn info(&self) -> Result<EngineInfo> {
        if self.sender.is_disconnected() {
            return Err(Error::Shutdown);
        }

        Ok(EngineInfo {
            key: self.key,
            local_addr: self.local_addr,
            members: self.member_count.load(Ordering::Acquire),
        })
    }

    /// Tell known members this node is leaving and stop the engine thread.
    ///
    /// Blocks until the engine thread is gone, except when called from a handler:
    /// the engine thread may itself be waiting on the dispatch loop, so it only
    /// asks the engine to stop.
    pub fn shutdown(&self) {
        let (sender, receiver) = flume::bounded::<()>(1);

        if self.sender.send(ActorMessage::Shutdown(sender)).is_err() {
            return;
        }

        if thread::current().name() != Some(DISPATCH_THREAD) {
            let _ = receiver.recv();
        }
    }

    fn command(&self, actor_message: ActorMessage) -> Result<()> {
        self.sender
            .send(actor_message)
            .map_err(|_| Error::Shutdown)
    }
}
