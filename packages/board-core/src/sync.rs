//! Connection health, presence, and ordered application of remote
//! operations.
//!
//! The synchronizer sits between the session facade and a
//! [`BoardChannel`]. Outbound it throttles cursor traffic, stamps logical
//! timestamps, and queues commits while the link is down. Inbound it
//! follows the authority's receipt stream: every accepted operation comes
//! back stamped with a dense sequence number, own operations included.
//!
//! Convergence works on a shadow board. `confirmed` replays exactly the
//! receipt stream; the visible board is always `confirmed` plus the local
//! operations still awaiting their echo, replayed on top. When an echo
//! arrives the operation moves from the pending queue into the confirmed
//! prefix and the view is unchanged; when a peer's operation arrives first,
//! the rebuild reorders the pending tail after it, which is what makes
//! every client settle on the authority's order. Any gap in the sequence,
//! a rejected apply, or heartbeat silence abandons the stream and asks for
//! the full state instead.

use std::collections::{BTreeMap, VecDeque};

use board_types::{
    BoardState, ClientMessage, CollaborationUser, FieldPoint, Operation, ServerMessage,
};
use tracing::{debug, info, warn};

use crate::catalog::FormationCatalog;
use crate::channel::BoardChannel;
use crate::error::ChannelError;
use crate::history::HistoryEngine;
use crate::store::BoardStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
    /// Desync or dead link detected; a resync is in flight.
    Reconnecting,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DesyncReason {
    HeartbeatTimeout,
    SequenceGap,
    RemoteApplyRejected,
    ChannelLost,
}

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub ping_interval_ms: i64,
    /// Silence past this declares the link dead.
    pub pong_timeout_ms: i64,
    /// Floor between two cursor sends; roughly sixty a second.
    pub cursor_min_interval_ms: i64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            ping_interval_ms: 2_000,
            pong_timeout_ms: 6_000,
            cursor_min_interval_ms: 16,
        }
    }
}

/// What a pump surfaced, for the embedding UI.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    StatusChanged(ConnectionStatus),
    UserJoined(CollaborationUser),
    UserLeft { user_id: String },
    PeerCursor { user_id: String, at: FieldPoint },
    RemoteApplied { seq: u64, op: Operation },
    LatencyMeasured { rtt_ms: i64 },
    ResyncStarted { reason: DesyncReason },
    /// Authoritative state adopted; `version` is the board version now
    /// shown.
    Resynced { version: u64 },
}

pub struct Synchronizer<C: BoardChannel> {
    channel: C,
    cfg: SyncConfig,
    session_id: String,
    user_id: String,
    user_name: String,
    formation_id: String,
    status: ConnectionStatus,
    peers: BTreeMap<String, CollaborationUser>,
    /// Own presence color, assigned by the authority on welcome.
    color: Option<String>,
    /// The receipt stream replayed verbatim. Absent until the first
    /// welcome.
    confirmed: Option<BoardStore>,
    /// Sequence number of the last message folded into `confirmed`.
    last_seq: u64,
    /// Sent, not yet echoed back. Replayed on top of `confirmed` to form
    /// the visible board.
    pending: VecDeque<Operation>,
    /// Committed while the link was down; shipped at the next chance.
    outbox: VecDeque<Operation>,
    next_logical_ts: u64,
    pending_cursor: Option<FieldPoint>,
    last_cursor_sent_ms: i64,
    last_ping_sent_ms: i64,
    last_pong_ms: i64,
    latency_ms: Option<i64>,
}

impl<C: BoardChannel> Synchronizer<C> {
    pub fn new(
        channel: C,
        cfg: SyncConfig,
        session_id: &str,
        user_id: &str,
        user_name: &str,
        formation_id: &str,
    ) -> Self {
        Self {
            channel,
            cfg,
            session_id: session_id.to_owned(),
            user_id: user_id.to_owned(),
            user_name: user_name.to_owned(),
            formation_id: formation_id.to_owned(),
            status: ConnectionStatus::Disconnected,
            peers: BTreeMap::new(),
            color: None,
            confirmed: None,
            last_seq: 0,
            pending: VecDeque::new(),
            outbox: VecDeque::new(),
            next_logical_ts: 0,
            pending_cursor: None,
            last_cursor_sent_ms: i64::MIN / 2,
            last_ping_sent_ms: i64::MIN / 2,
            last_pong_ms: 0,
            latency_ms: None,
        }
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status
    }

    pub fn peers(&self) -> impl Iterator<Item = &CollaborationUser> {
        self.peers.values()
    }

    pub fn color(&self) -> Option<&str> {
        self.color.as_deref()
    }

    pub fn latency_ms(&self) -> Option<i64> {
        self.latency_ms
    }

    pub fn last_seq(&self) -> u64 {
        self.last_seq
    }

    /// Next logical timestamp for a locally authored operation.
    pub fn stamp(&mut self) -> u64 {
        self.next_logical_ts += 1;
        self.next_logical_ts
    }

    /// Opens the channel and announces the user. Status goes to
    /// `Connecting` until the welcome lands.
    pub fn connect(&mut self, now_ms: i64, events: &mut Vec<SyncEvent>) -> Result<(), ChannelError> {
        self.channel.connect()?;
        self.set_status(ConnectionStatus::Connecting, events);
        self.last_pong_ms = now_ms;
        self.channel.send(ClientMessage::Join {
            session_id: self.session_id.clone(),
            user_id: self.user_id.clone(),
            name: self.user_name.clone(),
            formation_id: self.formation_id.clone(),
        })
    }

    pub fn disconnect(&mut self, events: &mut Vec<SyncEvent>) {
        let _ = self.channel.send(ClientMessage::Leave);
        self.channel.disconnect();
        self.set_status(ConnectionStatus::Disconnected, events);
    }

    /// Ships a locally applied operation. While the link is anything but
    /// `Connected` the op waits in the outbox; flushing happens before the
    /// next sync request so the authority folds it into the snapshot it
    /// answers with.
    pub fn commit_local(&mut self, op: Operation) {
        if self.status == ConnectionStatus::Connected {
            match self.channel.send(ClientMessage::Operation { op: op.clone() }) {
                Ok(()) => {
                    self.pending.push_back(op);
                    return;
                }
                Err(err) => {
                    warn!(%err, "send failed, queueing commit");
                }
            }
        }
        self.outbox.push_back(op);
    }

    /// Queues a cursor update, subject to the send-rate floor. The latest
    /// position always wins a throttle window.
    pub fn cursor_moved(&mut self, at: FieldPoint, now_ms: i64) {
        if self.status != ConnectionStatus::Connected {
            return;
        }
        if now_ms - self.last_cursor_sent_ms >= self.cfg.cursor_min_interval_ms {
            if self.channel.send(ClientMessage::CursorMove { at }).is_ok() {
                self.last_cursor_sent_ms = now_ms;
                self.pending_cursor = None;
            }
        } else {
            self.pending_cursor = Some(at);
        }
    }

    /// One pump: drains the channel, runs the heartbeat, flushes any
    /// throttled cursor. Call it on the host's frame or timer tick.
    pub fn tick(
        &mut self,
        store: &mut BoardStore,
        history: &mut HistoryEngine,
        catalog: &FormationCatalog,
        now_ms: i64,
    ) -> Vec<SyncEvent> {
        let mut events = Vec::new();

        while let Some(msg) = self.channel.poll() {
            self.handle(msg, store, history, catalog, now_ms, &mut events);
        }

        if self.channel.is_open() {
            if now_ms - self.last_ping_sent_ms >= self.cfg.ping_interval_ms {
                if self.channel.send(ClientMessage::Ping { sent_at_ms: now_ms }).is_ok() {
                    self.last_ping_sent_ms = now_ms;
                }
            }
            // Covers both the first detection and a retry after a resync
            // attempt that itself went unanswered.
            if matches!(
                self.status,
                ConnectionStatus::Connected | ConnectionStatus::Reconnecting
            ) && now_ms - self.last_pong_ms > self.cfg.pong_timeout_ms
            {
                self.begin_resync(DesyncReason::HeartbeatTimeout, now_ms, &mut events);
            }
        } else if self.status == ConnectionStatus::Connected
            || self.status == ConnectionStatus::Reconnecting
        {
            self.begin_resync(DesyncReason::ChannelLost, now_ms, &mut events);
        }

        if let Some(at) = self.pending_cursor {
            if self.status == ConnectionStatus::Connected
                && now_ms - self.last_cursor_sent_ms >= self.cfg.cursor_min_interval_ms
                && self.channel.send(ClientMessage::CursorMove { at }).is_ok()
            {
                self.last_cursor_sent_ms = now_ms;
                self.pending_cursor = None;
            }
        }

        events
    }

    fn handle(
        &mut self,
        msg: ServerMessage,
        store: &mut BoardStore,
        history: &mut HistoryEngine,
        catalog: &FormationCatalog,
        now_ms: i64,
        events: &mut Vec<SyncEvent>,
    ) {
        match msg {
            ServerMessage::Welcome { session, board, seq } => {
                info!(session = %session.id, seq, "welcome");
                self.set_presence(session.users);
                self.adopt(board, seq, store, history, catalog, now_ms, events);
            }
            ServerMessage::SyncState { board, seq, users } => {
                debug!(seq, "sync state");
                self.set_presence(users);
                self.adopt(board, seq, store, history, catalog, now_ms, events);
            }
            ServerMessage::Operation { seq, op } => {
                self.handle_operation(seq, op, store, history, catalog, now_ms, events);
            }
            ServerMessage::UserJoined { user } => {
                if user.id != self.user_id {
                    debug!(user = %user.id, "peer joined");
                    self.peers.insert(user.id.clone(), user.clone());
                    events.push(SyncEvent::UserJoined(user));
                }
            }
            ServerMessage::UserLeft { user_id } => {
                if let Some(peer) = self.peers.get_mut(&user_id) {
                    peer.online = false;
                    peer.cursor = None;
                }
                events.push(SyncEvent::UserLeft { user_id });
            }
            ServerMessage::CursorMove { user_id, at } => {
                if let Some(peer) = self.peers.get_mut(&user_id) {
                    peer.cursor = Some(at);
                    peer.last_seen_ms = now_ms;
                }
                events.push(SyncEvent::PeerCursor { user_id, at });
            }
            ServerMessage::Pong { sent_at_ms } => {
                self.last_pong_ms = now_ms;
                let rtt_ms = now_ms - sent_at_ms;
                self.latency_ms = Some(rtt_ms);
                events.push(SyncEvent::LatencyMeasured { rtt_ms });
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn handle_operation(
        &mut self,
        seq: u64,
        op: Operation,
        store: &mut BoardStore,
        history: &mut HistoryEngine,
        catalog: &FormationCatalog,
        now_ms: i64,
        events: &mut Vec<SyncEvent>,
    ) {
        if seq != self.last_seq + 1 {
            warn!(got = seq, expected = self.last_seq + 1, "sequence gap");
            self.begin_resync(DesyncReason::SequenceGap, now_ms, events);
            return;
        }
        let Some(confirmed) = self.confirmed.as_mut() else {
            // Receipt stream without a prior welcome; start over.
            self.begin_resync(DesyncReason::SequenceGap, now_ms, events);
            return;
        };

        if confirmed.apply_operation(&op, catalog).is_err() {
            warn!(seq, origin = %op.origin_id, "operation does not apply to the confirmed board");
            self.begin_resync(DesyncReason::RemoteApplyRejected, now_ms, events);
            return;
        }
        self.last_seq = seq;
        self.next_logical_ts = self.next_logical_ts.max(op.logical_ts);

        if op.origin_id == self.user_id {
            // Echo of an own commit: it leaves the pending tail and joins
            // the confirmed prefix. The visible board does not change.
            match self
                .pending
                .iter()
                .position(|p| p.logical_ts == op.logical_ts)
            {
                Some(i) => {
                    self.pending.remove(i);
                }
                None => warn!(seq, "echo for an operation not in the pending queue"),
            }
            self.rebuild_view(store, catalog);
        } else {
            self.rebuild_view(store, catalog);
            history.push(store.state().clone(), op.clone(), now_ms);
            events.push(SyncEvent::RemoteApplied { seq, op });
        }
    }

    /// Recomputes the visible board: the confirmed prefix plus every local
    /// operation still in flight, oldest first. In-flight operations that
    /// no longer apply are skipped; the authority's echo or correction
    /// settles them.
    fn rebuild_view(&mut self, store: &mut BoardStore, catalog: &FormationCatalog) {
        let Some(confirmed) = self.confirmed.as_ref() else {
            return;
        };
        let mut scratch = confirmed.clone();
        for op in self.pending.iter().chain(self.outbox.iter()) {
            if let Err(err) = scratch.apply_operation(op, catalog) {
                debug!(%err, "in-flight operation skipped in view");
            }
        }
        // The scratch formation came out of the catalog, so this holds.
        if let Err(err) = store.resync(scratch.state().clone(), catalog) {
            warn!(%err, "view rebuild failed");
        }
    }

    fn set_presence(&mut self, users: Vec<CollaborationUser>) {
        self.peers.clear();
        for user in users {
            if user.id == self.user_id {
                self.color = Some(user.color.clone());
            } else {
                self.peers.insert(user.id.clone(), user);
            }
        }
    }

    /// Adopts an authoritative snapshot as the new confirmed prefix. The
    /// pending queue is discarded: everything in it went out before the
    /// sync request, so the snapshot already settled it one way or the
    /// other, and replaying it would double-apply. Local history restarts
    /// from the visible board; queued offline commits are shipped and
    /// replayed on top.
    #[allow(clippy::too_many_arguments)]
    fn adopt(
        &mut self,
        board: BoardState,
        seq: u64,
        store: &mut BoardStore,
        history: &mut HistoryEngine,
        catalog: &FormationCatalog,
        now_ms: i64,
        events: &mut Vec<SyncEvent>,
    ) {
        let confirmed = match BoardStore::from_state(board, catalog) {
            Ok(confirmed) => confirmed,
            Err(err) => {
                warn!(%err, "snapshot refers to an unknown formation, keeping local state");
                return;
            }
        };
        self.confirmed = Some(confirmed);
        self.last_seq = seq;
        self.pending.clear();

        while let Some(op) = self.outbox.pop_front() {
            match self.channel.send(ClientMessage::Operation { op: op.clone() }) {
                Ok(()) => self.pending.push_back(op),
                Err(_) => {
                    self.outbox.push_front(op);
                    break;
                }
            }
        }

        self.rebuild_view(store, catalog);
        history.reset(store.state().clone(), now_ms);
        self.set_status(ConnectionStatus::Connected, events);
        events.push(SyncEvent::Resynced {
            version: store.state().version,
        });
    }

    /// Starts the fallback path: reopen the channel if needed, flush
    /// queued commits so the authority folds them in, then ask for the
    /// full state.
    fn begin_resync(&mut self, reason: DesyncReason, now_ms: i64, events: &mut Vec<SyncEvent>) {
        info!(?reason, "resync");
        self.set_status(ConnectionStatus::Reconnecting, events);
        events.push(SyncEvent::ResyncStarted { reason });
        // Timeout clock restarts so a dead authority is retried, not
        // hammered.
        self.last_pong_ms = now_ms;

        if !self.channel.is_open() {
            // The old socket is gone and so is anything it still owed us;
            // in-flight commits go back to the outbox for the flush below.
            while let Some(op) = self.pending.pop_back() {
                self.outbox.push_front(op);
            }
            if self.channel.connect().is_err() {
                return;
            }
            let _ = self.channel.send(ClientMessage::Join {
                session_id: self.session_id.clone(),
                user_id: self.user_id.clone(),
                name: self.user_name.clone(),
                formation_id: self.formation_id.clone(),
            });
        }
        while let Some(op) = self.outbox.pop_front() {
            match self.channel.send(ClientMessage::Operation { op: op.clone() }) {
                Ok(()) => self.pending.push_back(op),
                Err(_) => {
                    self.outbox.push_front(op);
                    break;
                }
            }
        }
        let _ = self.channel.send(ClientMessage::SyncRequest);
    }

    fn set_status(&mut self, status: ConnectionStatus, events: &mut Vec<SyncEvent>) {
        if self.status != status {
            self.status = status;
            events.push(SyncEvent::StatusChanged(status));
        }
    }
}
