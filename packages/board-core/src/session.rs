//! The embedding surface: one struct that wires pointer input, matching,
//! history and synchronization into a single commit pipeline.
//!
//! Data flows one way. A gesture (or an undo, or auto-assignment) yields an
//! operation; the operation goes through the store exactly once; the result
//! is snapshotted into history and handed to the synchronizer to ship.
//! Remote operations enter through [`BoardSession::tick`] and take the same
//! store path.

use board_types::{
    BoardState, CollaborationUser, FieldPoint, Formation, Operation, OperationKind, Player,
};
use tracing::warn;

use crate::assignment::{assign, SlotAssignment};
use crate::catalog::FormationCatalog;
use crate::channel::BoardChannel;
use crate::drag::{DragConfig, DragEngine, DragNotice, DragOutcome};
use crate::error::{ApplyError, ChannelError};
use crate::geometry::SnapCandidate;
use crate::history::{HistoryEngine, HistoryEntry};
use crate::store::{ApplyOutcome, BoardStore};
use crate::sync::{ConnectionStatus, SyncConfig, SyncEvent, Synchronizer};

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub session_id: String,
    pub user_id: String,
    pub user_name: String,
    pub formation_id: String,
    pub drag: DragConfig,
    pub sync: SyncConfig,
}

pub struct BoardSession<C: BoardChannel> {
    user_id: String,
    catalog: FormationCatalog,
    roster: Vec<Player>,
    store: BoardStore,
    history: HistoryEngine,
    drag: DragEngine,
    sync: Synchronizer<C>,
}

impl<C: BoardChannel> BoardSession<C> {
    /// Builds a session on an empty board. The channel stays closed until
    /// [`BoardSession::connect`].
    pub fn new(
        channel: C,
        cfg: SessionConfig,
        roster: Vec<Player>,
        catalog: FormationCatalog,
        now_ms: i64,
    ) -> Result<Self, ApplyError> {
        let formation = catalog
            .get(&cfg.formation_id)
            .cloned()
            .ok_or_else(|| ApplyError::UnknownFormation(cfg.formation_id.clone()))?;
        let store = BoardStore::new(formation);
        let history = HistoryEngine::new(store.state().clone(), now_ms);
        let sync = Synchronizer::new(
            channel,
            cfg.sync,
            &cfg.session_id,
            &cfg.user_id,
            &cfg.user_name,
            &cfg.formation_id,
        );
        Ok(Self {
            user_id: cfg.user_id,
            catalog,
            roster,
            store,
            history,
            drag: DragEngine::new(cfg.drag),
            sync,
        })
    }

    // ─── Connection ─────────────────────────────────────────────────────

    pub fn connect(&mut self, now_ms: i64) -> Result<Vec<SyncEvent>, ChannelError> {
        let mut events = Vec::new();
        self.sync.connect(now_ms, &mut events)?;
        Ok(events)
    }

    pub fn disconnect(&mut self) -> Vec<SyncEvent> {
        let mut events = Vec::new();
        self.sync.disconnect(&mut events);
        events
    }

    /// Drains the channel and runs the heartbeat. Remote operations are
    /// applied and recorded in history before this returns.
    pub fn tick(&mut self, now_ms: i64) -> Vec<SyncEvent> {
        self.sync
            .tick(&mut self.store, &mut self.history, &self.catalog, now_ms)
    }

    // ─── Pointer input ──────────────────────────────────────────────────

    pub fn pointer_down(&mut self, at: FieldPoint) -> Option<String> {
        self.drag
            .pointer_down(self.store.state(), self.store.formation(), at)
    }

    pub fn pointer_move(&mut self, at: FieldPoint) -> Option<SnapCandidate> {
        self.drag
            .pointer_move(self.store.state(), self.store.formation(), at)
    }

    /// Resolves the gesture. A committed outcome has already gone through
    /// the store, history and the wire when this returns; a commit the
    /// store refuses is downgraded to a cancel with a notice.
    pub fn pointer_up(&mut self, now_ms: i64) -> DragOutcome {
        let outcome = self
            .drag
            .pointer_up(self.store.state(), self.store.formation());
        match outcome {
            DragOutcome::Committed(kind) => match self.commit(kind.clone(), now_ms) {
                Ok(_) => DragOutcome::Committed(kind),
                Err(err) => {
                    warn!(%err, "drop target rejected at commit");
                    DragOutcome::Cancelled {
                        notice: Some(DragNotice::PositionUnavailable),
                    }
                }
            },
            other => other,
        }
    }

    pub fn cancel_drag(&mut self) -> bool {
        self.drag.cancel()
    }

    pub fn cursor_moved(&mut self, at: FieldPoint, now_ms: i64) {
        self.sync.cursor_moved(at, now_ms);
    }

    // ─── Board commands ─────────────────────────────────────────────────

    /// Fills the active formation from the roster and commits the result
    /// as one operation. Shortfalls come back in the returned assignment.
    pub fn auto_assign(&mut self, now_ms: i64) -> Result<SlotAssignment, ApplyError> {
        let assignment = assign(self.store.formation(), &self.roster);
        self.commit(
            OperationKind::FormationChange {
                formation_id: self.store.formation().id.clone(),
                slot_map: assignment.slot_map.clone(),
                free_positions: Default::default(),
            },
            now_ms,
        )?;
        Ok(assignment)
    }

    /// Switches formation, re-matching the players currently on the board
    /// onto the new slot layout.
    pub fn change_formation(
        &mut self,
        formation_id: &str,
        now_ms: i64,
    ) -> Result<SlotAssignment, ApplyError> {
        let formation = self
            .catalog
            .get(formation_id)
            .cloned()
            .ok_or_else(|| ApplyError::UnknownFormation(formation_id.to_owned()))?;
        let placed: Vec<Player> = self
            .roster
            .iter()
            .filter(|p| self.store.state().is_placed(&p.id))
            .cloned()
            .collect();
        let assignment = assign(&formation, &placed);
        self.commit(
            OperationKind::FormationChange {
                formation_id: formation_id.to_owned(),
                slot_map: assignment.slot_map.clone(),
                free_positions: Default::default(),
            },
            now_ms,
        )?;
        Ok(assignment)
    }

    /// Replaces the drawing layer.
    pub fn edit_drawings(
        &mut self,
        drawings: Vec<serde_json::Value>,
        now_ms: i64,
    ) -> Result<ApplyOutcome, ApplyError> {
        self.commit(OperationKind::DrawingEdit { drawings }, now_ms)
    }

    // ─── History ────────────────────────────────────────────────────────

    /// Steps the local view back one entry and re-broadcasts the restored
    /// state as a fresh operation, so peers converge without rewinding
    /// their own timelines. False when there is nothing to undo.
    pub fn undo(&mut self) -> bool {
        let Some(snapshot) = self.history.undo().cloned() else {
            return false;
        };
        self.adopt_snapshot(snapshot)
    }

    /// Inverse of [`BoardSession::undo`].
    pub fn redo(&mut self) -> bool {
        let Some(snapshot) = self.history.redo().cloned() else {
            return false;
        };
        self.adopt_snapshot(snapshot)
    }

    pub fn can_undo(&self) -> bool {
        self.history.can_undo()
    }

    pub fn can_redo(&self) -> bool {
        self.history.can_redo()
    }

    pub fn history_entries(&self) -> impl Iterator<Item = &HistoryEntry> {
        self.history.entries()
    }

    // ─── Views ──────────────────────────────────────────────────────────

    pub fn board(&self) -> &BoardState {
        self.store.state()
    }

    pub fn formation(&self) -> &Formation {
        self.store.formation()
    }

    pub fn roster(&self) -> &[Player] {
        &self.roster
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn status(&self) -> ConnectionStatus {
        self.sync.status()
    }

    pub fn peers(&self) -> impl Iterator<Item = &CollaborationUser> {
        self.sync.peers()
    }

    pub fn color(&self) -> Option<&str> {
        self.sync.color()
    }

    pub fn latency_ms(&self) -> Option<i64> {
        self.sync.latency_ms()
    }

    pub fn is_dragging(&self) -> bool {
        self.drag.is_dragging()
    }

    pub fn ghost(&self) -> Option<FieldPoint> {
        self.drag.ghost()
    }

    pub fn snap_candidate(&self) -> Option<&SnapCandidate> {
        self.drag.candidate()
    }

    // ─── Pipeline ───────────────────────────────────────────────────────

    /// The one path every local mutation takes: stamp, apply, snapshot,
    /// ship.
    fn commit(&mut self, kind: OperationKind, now_ms: i64) -> Result<ApplyOutcome, ApplyError> {
        let op = Operation {
            origin_id: self.user_id.clone(),
            logical_ts: self.sync.stamp(),
            kind,
        };
        let outcome = self.store.apply_operation(&op, &self.catalog)?;
        self.history.push(self.store.state().clone(), op.clone(), now_ms);
        self.sync.commit_local(op);
        Ok(outcome)
    }

    /// Applies a historical snapshot as new operations: a formation change
    /// carrying the full placement, plus a drawing edit when the layer
    /// differs. History is deliberately not pushed; the cursor already
    /// points at the snapshot.
    fn adopt_snapshot(&mut self, snapshot: BoardState) -> bool {
        let placement = Operation {
            origin_id: self.user_id.clone(),
            logical_ts: self.sync.stamp(),
            kind: OperationKind::FormationChange {
                formation_id: snapshot.active_formation_id.clone(),
                slot_map: snapshot.slot_assignments.clone(),
                free_positions: snapshot.free_positions.clone(),
            },
        };
        if let Err(err) = self.store.apply_operation(&placement, &self.catalog) {
            warn!(%err, "historical state no longer applies");
            return false;
        }
        self.sync.commit_local(placement);

        if self.store.state().drawings != snapshot.drawings {
            let drawings = Operation {
                origin_id: self.user_id.clone(),
                logical_ts: self.sync.stamp(),
                kind: OperationKind::DrawingEdit {
                    drawings: snapshot.drawings.clone(),
                },
            };
            if self.store.apply_operation(&drawings, &self.catalog).is_ok() {
                self.sync.commit_local(drawings);
            }
        }
        true
    }
}
