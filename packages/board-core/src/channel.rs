//! Transport seam between a board session and its peers.
//!
//! [`BoardChannel`] is the only thing the synchronizer knows about the
//! network. The production transport is the socket.io server; tests and
//! the simulator run on [`SessionHub`] plus [`MemoryChannel`], an
//! in-process authority with per-client inboxes where delivery happens
//! only on an explicit [`SessionHub::pump`], so message interleavings are
//! fully scripted.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use board_types::{
    color_for, BoardState, ClientMessage, CollaborationUser, ServerMessage, Session,
};
use tracing::{debug, warn};

use crate::catalog::FormationCatalog;
use crate::error::{ApplyError, ChannelError};
use crate::store::BoardStore;

/// A session's wire. Implementations never block: `send` queues or fails
/// fast, `poll` returns only what has already arrived.
pub trait BoardChannel {
    fn connect(&mut self) -> Result<(), ChannelError>;
    fn disconnect(&mut self);
    fn is_open(&self) -> bool;
    fn send(&mut self, msg: ClientMessage) -> Result<(), ChannelError>;
    fn poll(&mut self) -> Option<ServerMessage>;
}

/// In-process session authority. Owns the authoritative board, stamps the
/// receipt sequence, and fans results out to per-client inboxes.
pub struct SessionHub {
    inner: Arc<Mutex<HubInner>>,
}

struct HubInner {
    session_id: String,
    catalog: FormationCatalog,
    store: BoardStore,
    /// Receipt sequence of the last accepted operation.
    seq: u64,
    /// Join order; colors are handed out by position.
    users: Vec<CollaborationUser>,
    clients: HashMap<String, ClientSlot>,
    /// Undelivered client messages in receipt order.
    queue: VecDeque<(String, ClientMessage)>,
}

#[derive(Default)]
struct ClientSlot {
    inbox: VecDeque<ServerMessage>,
    open: bool,
}

impl SessionHub {
    pub fn new(
        session_id: &str,
        formation_id: &str,
        catalog: FormationCatalog,
    ) -> Result<Self, ApplyError> {
        let formation = catalog
            .get(formation_id)
            .cloned()
            .ok_or_else(|| ApplyError::UnknownFormation(formation_id.to_owned()))?;
        Ok(Self {
            inner: Arc::new(Mutex::new(HubInner {
                session_id: session_id.to_owned(),
                catalog,
                store: BoardStore::new(formation),
                seq: 0,
                users: Vec::new(),
                clients: HashMap::new(),
                queue: VecDeque::new(),
            })),
        })
    }

    /// Hands out a channel endpoint for one client. The slot starts
    /// closed; the synchronizer opens it via `connect`.
    pub fn channel(&self, user_id: &str) -> MemoryChannel {
        let mut inner = lock(&self.inner);
        inner.clients.entry(user_id.to_owned()).or_default();
        MemoryChannel {
            inner: Arc::clone(&self.inner),
            user_id: user_id.to_owned(),
        }
    }

    /// Processes every queued client message in receipt order. Returns how
    /// many were handled.
    pub fn pump(&self, now_ms: i64) -> usize {
        let mut inner = lock(&self.inner);
        let mut handled = 0;
        while let Some((user_id, msg)) = inner.queue.pop_front() {
            inner.process(&user_id, msg, now_ms);
            handled += 1;
        }
        handled
    }

    pub fn board(&self) -> BoardState {
        lock(&self.inner).store.state().clone()
    }

    pub fn seq(&self) -> u64 {
        lock(&self.inner).seq
    }

    pub fn users(&self) -> Vec<CollaborationUser> {
        lock(&self.inner).users.clone()
    }

    /// Discards everything queued for one client without delivering it.
    /// Simulates a lossy link for desync tests.
    pub fn drop_inbox(&self, user_id: &str) -> usize {
        let mut inner = lock(&self.inner);
        match inner.clients.get_mut(user_id) {
            Some(slot) => {
                let lost = slot.inbox.len();
                slot.inbox.clear();
                lost
            }
            None => 0,
        }
    }
}

impl HubInner {
    fn process(&mut self, user_id: &str, msg: ClientMessage, now_ms: i64) {
        match msg {
            ClientMessage::Join { name, .. } => self.handle_join(user_id, &name, now_ms),
            ClientMessage::Leave => self.handle_leave(user_id),
            ClientMessage::CursorMove { at } => {
                if let Some(user) = self.users.iter_mut().find(|u| u.id == user_id) {
                    user.cursor = Some(at);
                    user.last_seen_ms = now_ms;
                }
                self.broadcast(
                    user_id,
                    ServerMessage::CursorMove {
                        user_id: user_id.to_owned(),
                        at,
                    },
                );
            }
            ClientMessage::Operation { op } => {
                match self.store.apply_operation(&op, &self.catalog) {
                    Ok(_) => {
                        self.seq += 1;
                        let seq = self.seq;
                        // Everyone gets the stamped op, the author
                        // included; the echo doubles as the ack that moves
                        // the op from pending to confirmed client-side.
                        self.broadcast_all(ServerMessage::Operation { seq, op });
                    }
                    Err(err) => {
                        warn!(user = user_id, %err, "rejected operation, correcting sender");
                        let correction = self.sync_state();
                        self.send_to(user_id, correction);
                    }
                }
                if let Some(user) = self.users.iter_mut().find(|u| u.id == user_id) {
                    user.last_seen_ms = now_ms;
                }
            }
            ClientMessage::Ping { sent_at_ms } => {
                if let Some(user) = self.users.iter_mut().find(|u| u.id == user_id) {
                    user.last_seen_ms = now_ms;
                }
                self.send_to(user_id, ServerMessage::Pong { sent_at_ms });
            }
            ClientMessage::SyncRequest => {
                let state = self.sync_state();
                self.send_to(user_id, state);
            }
        }
    }

    fn handle_join(&mut self, user_id: &str, name: &str, now_ms: i64) {
        let user = match self.users.iter_mut().find(|u| u.id == user_id) {
            Some(user) => {
                user.online = true;
                user.last_seen_ms = now_ms;
                user.clone()
            }
            None => {
                let user = CollaborationUser {
                    id: user_id.to_owned(),
                    name: name.to_owned(),
                    color: color_for(self.users.len()).to_owned(),
                    cursor: None,
                    online: true,
                    last_seen_ms: now_ms,
                };
                self.users.push(user.clone());
                user
            }
        };
        debug!(session = %self.session_id, user = user_id, "join");

        let welcome = ServerMessage::Welcome {
            session: Session {
                id: self.session_id.clone(),
                users: self.users.clone(),
                can_edit: true,
                can_invite: true,
                can_kick: false,
            },
            board: self.store.state().clone(),
            seq: self.seq,
        };
        self.send_to(user_id, welcome);
        self.broadcast(user_id, ServerMessage::UserJoined { user });
    }

    fn handle_leave(&mut self, user_id: &str) {
        if let Some(user) = self.users.iter_mut().find(|u| u.id == user_id) {
            user.online = false;
            user.cursor = None;
        }
        if let Some(slot) = self.clients.get_mut(user_id) {
            slot.open = false;
            slot.inbox.clear();
        }
        self.broadcast(
            user_id,
            ServerMessage::UserLeft {
                user_id: user_id.to_owned(),
            },
        );
    }

    fn sync_state(&self) -> ServerMessage {
        ServerMessage::SyncState {
            board: self.store.state().clone(),
            seq: self.seq,
            users: self.users.clone(),
        }
    }

    /// Messages to closed slots are dropped; a returning client resyncs
    /// anyway.
    fn broadcast(&mut self, sender: &str, msg: ServerMessage) {
        for (user_id, slot) in &mut self.clients {
            if user_id != sender && slot.open {
                slot.inbox.push_back(msg.clone());
            }
        }
    }

    fn broadcast_all(&mut self, msg: ServerMessage) {
        for slot in self.clients.values_mut() {
            if slot.open {
                slot.inbox.push_back(msg.clone());
            }
        }
    }

    fn send_to(&mut self, user_id: &str, msg: ServerMessage) {
        if let Some(slot) = self.clients.get_mut(user_id) {
            if slot.open {
                slot.inbox.push_back(msg);
            }
        }
    }
}

/// One client endpoint onto a [`SessionHub`].
pub struct MemoryChannel {
    inner: Arc<Mutex<HubInner>>,
    user_id: String,
}

impl BoardChannel for MemoryChannel {
    fn connect(&mut self) -> Result<(), ChannelError> {
        let mut inner = lock(&self.inner);
        inner
            .clients
            .entry(self.user_id.clone())
            .or_default()
            .open = true;
        Ok(())
    }

    fn disconnect(&mut self) {
        let mut inner = lock(&self.inner);
        if let Some(slot) = inner.clients.get_mut(&self.user_id) {
            slot.open = false;
            slot.inbox.clear();
        }
    }

    fn is_open(&self) -> bool {
        lock(&self.inner)
            .clients
            .get(&self.user_id)
            .is_some_and(|slot| slot.open)
    }

    fn send(&mut self, msg: ClientMessage) -> Result<(), ChannelError> {
        let mut inner = lock(&self.inner);
        let open = inner
            .clients
            .get(&self.user_id)
            .is_some_and(|slot| slot.open);
        if !open {
            return Err(ChannelError::NotConnected);
        }
        inner.queue.push_back((self.user_id.clone(), msg));
        Ok(())
    }

    fn poll(&mut self) -> Option<ServerMessage> {
        lock(&self.inner)
            .clients
            .get_mut(&self.user_id)
            .and_then(|slot| slot.inbox.pop_front())
    }
}

fn lock(inner: &Arc<Mutex<HubInner>>) -> MutexGuard<'_, HubInner> {
    inner.lock().unwrap_or_else(|e| e.into_inner())
}
