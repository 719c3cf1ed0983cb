use std::collections::{BTreeMap, HashMap};
use std::net::SocketAddr;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use flume::{Receiver, Sender, TryRecvError};
use lru::LruCache;
use rand::Rng;
use tracing::{debug, info, trace, warn};

use crate::common::{DataPacket, Host, Key, Member, Message, Packet, MAX_HOPS};

use super::socket::OverlaySocket;
use super::Event;

/// How long to wait for a welcome before asking the bootstrap node again.
const JOIN_RETRY_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug)]
pub(crate) enum ActorMessage {
    Join(Option<SocketAddr>),
    Register(u32, bool),
    Send(Message),
    Shutdown(Sender<()>),
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Origin {
    Local,
    Remote,
}

/// Runs in the engine thread, owning the socket and the membership table.
#[derive(Debug)]
pub(crate) struct Actor {
    key: Key,
    socket: OverlaySocket,
    receiver: Receiver<ActorMessage>,
    events: Sender<Event>,

    /// Every other member, by key.
    members: BTreeMap<Key, SocketAddr>,
    /// Size of `members`, readable from any thread.
    member_count: Arc<AtomicUsize>,
    /// Registered message types and whether they are handled once.
    registered: HashMap<u32, bool>,
    seen: LruCache<u64, ()>,

    /// Bootstrap node that didn't welcome us yet, and when we last asked.
    pending_join: Option<(SocketAddr, Instant)>,
    /// Acknowledged once the actor, and its receiver, are dropped.
    shutdown: Option<Sender<()>>,
}

impl Actor {
    pub fn new(
        key: Key,
        socket: OverlaySocket,
        receiver: Receiver<ActorMessage>,
        events: Sender<Event>,
        registered: HashMap<u32, bool>,
        seen_messages: NonZeroUsize,
        member_count: Arc<AtomicUsize>,
    ) -> Self {
        Self {
            key,
            socket,
            receiver,
            events,
            members: BTreeMap::new(),
            member_count,
            registered,
            seen: LruCache::new(seen_messages),
            pending_join: None,
            shutdown: None,
        }
    }

    pub fn run(mut self) {
        while self.tick() {}

        debug!(key = %self.key, "dstack engine thread was shutdown");

        let shutdown = self.shutdown.take();
        drop(self);

        if let Some(sender) = shutdown {
            let _ = sender.send(());
        }
    }

    /// Handle pending commands and at most one packet.
    ///
    /// Returns false once the engine should stop.
    fn tick(&mut self) -> bool {
        loop {
            match self.receiver.try_recv() {
                Ok(ActorMessage::Shutdown(sender)) => {
                    self.leave();
                    self.shutdown = Some(sender);
                    return false;
                }
                Ok(actor_message) => self.handle_command(actor_message),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    // Every handle was dropped.
                    self.leave();
                    return false;
                }
            }
        }

        self.retry_join();

        if let Some((packet, from)) = self.socket.recv_from() {
            self.handle_packet(packet, from);
        }

        true
    }

    fn handle_command(&mut self, actor_message: ActorMessage) {
        match actor_message {
            ActorMessage::Join(Some(bootstrap)) => {
                info!(key = %self.key, %bootstrap, "Joining overlay");
                self.socket.send(bootstrap, &Packet::Join { key: self.key });
                self.pending_join = Some((bootstrap, Instant::now()));
            }
            ActorMessage::Join(None) => {
                info!(key = %self.key, address = %self.socket.local_addr(), "Started a new overlay");
            }
            ActorMessage::Register(type_code, handle_once) => {
                self.registered.insert(type_code, handle_once);
            }
            ActorMessage::Send(message) => {
                let id = rand::thread_rng().gen_range(0..i64::MAX as u64);

                self.handle_data(
                    DataPacket {
                        id,
                        message,
                        hops: 0,
                    },
                    Origin::Local,
                );
            }
            ActorMessage::Shutdown(_) => {}
        }
    }

    fn handle_packet(&mut self, packet: Packet, from: SocketAddr) {
        match packet {
            Packet::Join { key } => {
                if key == self.key {
                    warn!(%from, "Ignoring join from a node using our own key");
                    return;
                }

                let members = self
                    .members
                    .iter()
                    .filter(|(member_key, _)| **member_key != key)
                    .map(|(key, address)| Member {
                        key: *key,
                        address: *address,
                    })
                    .collect();

                self.socket.send(
                    from,
                    &Packet::Welcome {
                        key: self.key,
                        members,
                    },
                );

                let announce = Packet::Announce {
                    member: Member { key, address: from },
                };
                for (_, address) in self.members.iter().filter(|(k, _)| **k != key) {
                    self.socket.send(*address, &announce);
                }

                self.add_member(key, from);
            }
            Packet::Welcome { key, members } => {
                if self.pending_join.take().is_some() {
                    debug!(bootstrap = %from, members = members.len(), "Joined overlay");
                }

                self.add_member(key, from);

                for member in members {
                    self.add_member(member.key, member.address);
                }
            }
            Packet::Announce { member } => self.add_member(member.key, member.address),
            Packet::Leave { key } => self.remove_member(&key),
            Packet::Data(packet) => self.handle_data(packet, Origin::Remote),
        }
    }

    fn handle_data(&mut self, packet: DataPacket, origin: Origin) {
        let type_code = packet.message.type_code;

        let Some(handle_once) = self.registered.get(&type_code).copied() else {
            warn!(type_code, key = %packet.message.key, "Dropping message of unregistered type");
            return;
        };

        if handle_once && self.seen.put(packet.id, ()).is_some() {
            debug!(id = packet.id, type_code, "Dropping duplicate message");
            return;
        }

        let Some(owner) = self.owner(&packet.message.key) else {
            self.emit(Event::Deliver(packet.message));
            return;
        };

        if origin == Origin::Remote {
            if packet.hops >= MAX_HOPS {
                warn!(id = packet.id, key = %packet.message.key, "Dropping message after too many hops");
                return;
            }

            self.emit(Event::Forward {
                message: packet.message.clone(),
                next_hop: owner.into(),
            });
        }

        self.socket.send(
            owner.address,
            &Packet::Data(DataPacket {
                hops: packet.hops + 1,
                ..packet
            }),
        );
    }

    /// Closest member to `key` by xor distance, or None if this node owns it.
    fn owner(&self, key: &Key) -> Option<Member> {
        self.members
            .iter()
            .min_by(|(a, _), (b, _)| key.closer(a, b))
            .filter(|(closest, _)| key.closer(closest, &self.key).is_lt())
            .map(|(key, address)| Member {
                key: *key,
                address: *address,
            })
    }

    fn add_member(&mut self, key: Key, address: SocketAddr) {
        if key == self.key {
            return;
        }

        if self.members.insert(key, address) == Some(address) {
            return;
        }
        self.member_count
            .store(self.members.len(), Ordering::Release);

        debug!(peer = %key, %address, "Member joined");

        self.emit(Event::Update {
            key,
            host: Member { key, address }.into(),
            joined: true,
        });
    }

    fn remove_member(&mut self, key: &Key) {
        if let Some(address) = self.members.remove(key) {
            self.member_count
                .store(self.members.len(), Ordering::Release);

            debug!(peer = %key, %address, "Member left");

            self.emit(Event::Update {
                key: *key,
                host: Host::from(Member { key: *key, address }),
                joined: false,
            });
        }
    }

    fn retry_join(&mut self) {
        if let Some((bootstrap, asked_at)) = self.pending_join {
            if asked_at.elapsed() >= JOIN_RETRY_INTERVAL {
                trace!(%bootstrap, "No welcome yet, asking again");
                self.socket.send(bootstrap, &Packet::Join { key: self.key });
                self.pending_join = Some((bootstrap, Instant::now()));
            }
        }
    }

    fn leave(&mut self) {
        let leave = Packet::Leave { key: self.key };

        for address in self.members.values() {
            self.socket.send(*address, &leave);
        }
    }

    fn emit(&self, event: Event) {
        if self.events.send(event).is_err() {
            trace!("Dispatch loop is gone, dropping event");
        }
    }
}

#[cfg(test)]
mod test {
    use std::time::Duration;

    use crate::engine::socket::{sim, OverlaySocket};

    use super::*;

    fn actor(key: Key) -> (Actor, Sender<ActorMessage>, Receiver<Event>) {
        let socket =
            OverlaySocket::new(sim::UdpSocket::bind(0).unwrap(), Duration::from_millis(5)).unwrap();
        let (sender, receiver) = flume::unbounded();
        let (events_sender, events) = flume::unbounded();

        let actor = Actor::new(
            key,
            socket,
            receiver,
            events_sender,
            HashMap::from([(16, true)]),
            NonZeroUsize::new(16).unwrap(),
            Arc::new(AtomicUsize::new(0)),
        );

        (actor, sender, events)
    }

    fn member(byte: u8) -> (Key, SocketAddr) {
        let mut bytes = [0; 20];
        bytes[0] = byte;

        (Key(bytes), SocketAddr::from(([127, 0, 0, 1], 1000 + byte as u16)))
    }

    #[test]
    fn owner_is_closest_by_xor() {
        let (mut actor, _sender, _events) = actor(member(0b1000_0000).0);

        let (near, near_address) = member(0b0000_0001);
        let (far, far_address) = member(0b0100_0000);
        actor.add_member(near, near_address);
        actor.add_member(far, far_address);

        assert_eq!(actor.owner(&member(0b0000_0011).0).unwrap().key, near);
        assert_eq!(actor.owner(&member(0b0110_0000).0).unwrap().key, far);
        // Closer to this node than any member.
        assert!(actor.owner(&member(0b1100_0000).0).is_none());
        assert!(actor.owner(&actor.key.clone()).is_none());
    }

    #[test]
    fn membership_events() {
        let (mut actor, _sender, events) = actor(Key::random());
        let (key, address) = member(7);

        actor.add_member(key, address);
        // Known already
        actor.add_member(key, address);
        assert_eq!(actor.member_count.load(Ordering::Acquire), 1);

        actor.remove_member(&key);
        actor.remove_member(&key);
        assert_eq!(actor.member_count.load(Ordering::Acquire), 0);

        let events: Vec<Event> = events.drain().collect();
        assert_eq!(events.len(), 2);

        assert!(matches!(
            &events[0],
            Event::Update { key: k, joined: true, host } if *k == key && host.name == "127.0.0.1"
        ));
        assert!(matches!(&events[1], Event::Update { joined: false, .. }));
    }

    #[test]
    fn unregistered_and_duplicate_messages() {
        let (mut actor, _sender, events) = actor(Key::random());
        actor.registered.insert(99, false);

        // No other members, so every message is delivered locally.
        let packet = |id: u64, type_code: u32| DataPacket {
            id,
            message: Message::new(Key([0; 20]), type_code, &b"payload"[..]),
            hops: 0,
        };

        actor.handle_data(packet(1, 16), Origin::Remote);
        actor.handle_data(packet(1, 16), Origin::Remote);
        actor.handle_data(packet(2, 15), Origin::Remote);
        // Not handled once, so duplicates go through.
        actor.handle_data(packet(3, 99), Origin::Remote);
        actor.handle_data(packet(3, 99), Origin::Remote);

        let delivered: Vec<u32> = events
            .drain()
            .filter_map(|event| match event {
                Event::Deliver(message) => Some(message.type_code),
                _ => None,
            })
            .collect();

        assert_eq!(delivered, vec![16, 99, 99]);
    }

    #[test]
    fn types_registered_before_the_first_packet() {
        let (mut actor, _sender, events) = actor(Key::random());
        let (from, _) = member(9);
        let peer = OverlaySocket::new(sim::UdpSocket::bind(0).unwrap(), Duration::from_millis(5))
            .unwrap();

        peer.send(
            actor.socket.local_addr(),
            &Packet::Data(DataPacket {
                id: 11,
                message: Message::new(from, 16, &b"early"[..]),
                hops: 0,
            }),
        );

        // First tick, no command was handled before the packet.
        assert!(actor.tick());

        assert!(matches!(
            events.try_recv().unwrap(),
            Event::Deliver(message) if &message.payload[..] == b"early"
        ));
    }

    #[test]
    fn relay_fires_forward() {
        let (mut actor, _sender, events) = actor(member(0b1000_0000).0);
        actor.registered.insert(17, true);

        let (owner, owner_address) = member(0b0000_0001);
        actor.add_member(owner, owner_address);
        let _ = events.drain().count();

        let message = Message::new(owner, 17, &b"subscribe"[..]);

        actor.handle_data(
            DataPacket {
                id: 5,
                message: message.clone(),
                hops: 0,
            },
            Origin::Local,
        );
        assert!(events.is_empty());

        actor.handle_data(
            DataPacket {
                id: 6,
                message: message.clone(),
                hops: 1,
            },
            Origin::Remote,
        );
        assert!(matches!(
            events.try_recv().unwrap(),
            Event::Forward { message: m, next_hop } if m == message && next_hop.key == Some(owner)
        ));

        actor.handle_data(
            DataPacket {
                id: 7,
                message,
                hops: MAX_HOPS,
            },
            Origin::Remote,
        );
        assert!(events.is_empty());
    }

    #[test]
    fn shutdown_command_stops_the_loop() {
        let (mut actor, sender, _events) = actor(Key::random());
        let (ack, acked) = flume::bounded(1);

        sender.send(ActorMessage::Shutdown(ack)).unwrap();

        assert!(!actor.tick());
        assert!(actor.shutdown.is_some());
        assert!(acked.is_empty());
    }

    #[test]
    fn shutdown_is_acknowledged_once_stopped() {
        let (actor, sender, _events) = actor(Key::random());
        let (ack, acked) = flume::bounded(1);

        sender.send(ActorMessage::Shutdown(ack)).unwrap();
        actor.run();

        assert!(acked.try_recv().is_ok());
        assert!(sender.send(ActorMessage::Register(16, true)).is_err());
    }

    #[test]
    fn dropped_handles_stop_the_loop() {
        let (mut actor, sender, _events) = actor(Key::random());

        assert!(actor.tick());
        drop(sender);
        assert!(!actor.tick());
    }
}
