//! The pointer-gesture state machine.
//!
//! One gesture at a time: pointer-down captures a placed token, every
//! pointer-move re-resolves the snap candidate against the live board, and
//! pointer-up either hands back exactly one operation kind to commit or
//! cancels. The machine never mutates the board itself; the session facade
//! owns the commit pipeline, so a remote operation landing mid-drag is
//! visible here only as a changed board at the next pointer event.

use board_types::{BoardState, FieldPoint, Formation, OperationKind};
use tracing::debug;

use crate::geometry::{self, SnapCandidate};

#[derive(Debug, Clone)]
pub struct DragConfig {
    /// When unset, a drop with no snap candidate cancels instead of
    /// placing the token freely. Grid snapping only exists when set.
    pub allow_free_placement: bool,
}

impl Default for DragConfig {
    fn default() -> Self {
        Self {
            allow_free_placement: false,
        }
    }
}

/// Where the dragged token was picked up. Kept for the revert render and
/// for the `from_slot` metadata on a committed move.
#[derive(Debug, Clone, PartialEq)]
pub enum DragOrigin {
    Slot(String),
    Free(FieldPoint),
}

#[derive(Debug, Clone, PartialEq)]
enum GestureState {
    Idle,
    Dragging {
        player_id: String,
        origin: DragOrigin,
        ghost: FieldPoint,
        candidate: Option<SnapCandidate>,
    },
}

/// Terminal resolution of a gesture.
#[derive(Debug, Clone, PartialEq)]
pub enum DragOutcome {
    /// Commit this. The facade stamps origin and logical timestamp and
    /// runs it through the store.
    Committed(OperationKind),
    /// No operation. `notice` is set when a target that looked valid
    /// vanished before release.
    Cancelled { notice: Option<DragNotice> },
    /// Pointer-up without an active gesture.
    Ignored,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DragNotice {
    /// The dragged token or its target was removed mid-drag, typically by
    /// a remote operation.
    PositionUnavailable,
}

#[derive(Debug, Clone)]
pub struct DragEngine {
    cfg: DragConfig,
    state: GestureState,
}

impl DragEngine {
    pub fn new(cfg: DragConfig) -> Self {
        Self {
            cfg,
            state: GestureState::Idle,
        }
    }

    pub fn is_dragging(&self) -> bool {
        matches!(self.state, GestureState::Dragging { .. })
    }

    /// Interim render position of the dragged token.
    pub fn ghost(&self) -> Option<FieldPoint> {
        match &self.state {
            GestureState::Dragging { ghost, .. } => Some(*ghost),
            GestureState::Idle => None,
        }
    }

    /// The currently highlighted drop target, if any.
    pub fn candidate(&self) -> Option<&SnapCandidate> {
        match &self.state {
            GestureState::Dragging { candidate, .. } => candidate.as_ref(),
            GestureState::Idle => None,
        }
    }

    /// Starts a gesture if a placed token sits under the pointer. A second
    /// pointer-down while a gesture is live is ignored; this is a
    /// single-pointer surface.
    pub fn pointer_down(
        &mut self,
        board: &BoardState,
        formation: &Formation,
        at: FieldPoint,
    ) -> Option<String> {
        if self.is_dragging() {
            return None;
        }
        let tokens = geometry::token_positions(board, formation);
        let token = geometry::token_at(&tokens, at)?;
        let origin = match &token.slot_id {
            Some(slot_id) => DragOrigin::Slot(slot_id.clone()),
            None => DragOrigin::Free(token.at),
        };
        debug!(player = %token.player_id, "drag start");
        let player_id = token.player_id.clone();
        self.state = GestureState::Dragging {
            player_id: player_id.clone(),
            origin,
            ghost: at.clamped(),
            candidate: None,
        };
        Some(player_id)
    }

    /// Moves the ghost and re-resolves the snap candidate. Returns the
    /// candidate for highlight rendering.
    pub fn pointer_move(
        &mut self,
        board: &BoardState,
        formation: &Formation,
        at: FieldPoint,
    ) -> Option<SnapCandidate> {
        let GestureState::Dragging {
            player_id,
            ghost,
            candidate,
            ..
        } = &mut self.state
        else {
            return None;
        };
        let tokens = geometry::token_positions(board, formation);
        *ghost = at.clamped();
        *candidate = geometry::find_snap_target(
            *ghost,
            player_id,
            &tokens,
            formation,
            self.cfg.allow_free_placement,
        );
        candidate.clone()
    }

    /// Ends the gesture. The candidate is re-validated against the board
    /// as it is *now*; anything that no longer holds turns the drop into a
    /// cancel with a notice rather than a broken commit.
    pub fn pointer_up(&mut self, board: &BoardState, formation: &Formation) -> DragOutcome {
        let state = std::mem::replace(&mut self.state, GestureState::Idle);
        let GestureState::Dragging {
            player_id,
            origin,
            ghost,
            candidate,
        } = state
        else {
            return DragOutcome::Ignored;
        };

        if !board.is_placed(&player_id) {
            debug!(player = %player_id, "drag source vanished before release");
            return DragOutcome::Cancelled {
                notice: Some(DragNotice::PositionUnavailable),
            };
        }

        let from_slot = match &origin {
            DragOrigin::Slot(slot_id) => Some(slot_id.clone()),
            DragOrigin::Free(_) => None,
        };

        match candidate {
            Some(SnapCandidate::Swap { player_id: partner }) => {
                if partner == player_id || !board.is_placed(&partner) {
                    return DragOutcome::Cancelled {
                        notice: Some(DragNotice::PositionUnavailable),
                    };
                }
                DragOutcome::Committed(OperationKind::Swap {
                    player_a: player_id,
                    player_b: partner,
                })
            }
            Some(SnapCandidate::Slot { slot_id, .. }) => {
                if formation.slot(&slot_id).is_none() {
                    return DragOutcome::Cancelled {
                        notice: Some(DragNotice::PositionUnavailable),
                    };
                }
                if from_slot.as_deref() == Some(slot_id.as_str()) {
                    // Released back home.
                    return DragOutcome::Cancelled { notice: None };
                }
                DragOutcome::Committed(OperationKind::Move {
                    player_id,
                    from_slot,
                    to_slot: Some(slot_id),
                    to_free: None,
                })
            }
            Some(SnapCandidate::Grid { at, .. }) => DragOutcome::Committed(OperationKind::Move {
                player_id,
                from_slot,
                to_slot: None,
                to_free: Some(at),
            }),
            None => {
                if self.cfg.allow_free_placement {
                    DragOutcome::Committed(OperationKind::Move {
                        player_id,
                        from_slot,
                        to_slot: None,
                        to_free: Some(ghost),
                    })
                } else {
                    DragOutcome::Cancelled { notice: None }
                }
            }
        }
    }

    /// Aborts the gesture (escape key, pointer capture lost). True if one
    /// was active.
    pub fn cancel(&mut self) -> bool {
        matches!(
            std::mem::replace(&mut self.state, GestureState::Idle),
            GestureState::Dragging { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::FormationCatalog;
    use crate::store::BoardStore;
    use board_types::Operation;

    fn setup() -> (FormationCatalog, BoardStore) {
        let catalog = FormationCatalog::builtin();
        let store = BoardStore::new(catalog.get("4-4-2").unwrap().clone());
        (catalog, store)
    }

    fn place(store: &mut BoardStore, catalog: &FormationCatalog, player: &str, slot: &str) {
        let op = Operation {
            origin_id: "test".into(),
            logical_ts: 0,
            kind: OperationKind::Move {
                player_id: player.into(),
                from_slot: None,
                to_slot: Some(slot.into()),
                to_free: None,
            },
        };
        store.apply_operation(&op, catalog).unwrap();
    }

    fn anchor(store: &BoardStore, slot: &str) -> FieldPoint {
        store.formation().slot(slot).unwrap().anchor
    }

    #[test]
    fn drag_between_occupied_slots_commits_a_swap() {
        let (catalog, mut store) = setup();
        place(&mut store, &catalog, "p1", "lcm");
        place(&mut store, &catalog, "p2", "rcm");

        let mut drag = DragEngine::new(DragConfig::default());
        let grabbed = drag.pointer_down(store.state(), store.formation(), anchor(&store, "lcm"));
        assert_eq!(grabbed.as_deref(), Some("p1"));

        let candidate = drag.pointer_move(store.state(), store.formation(), anchor(&store, "rcm"));
        assert_eq!(
            candidate,
            Some(SnapCandidate::Swap {
                player_id: "p2".into()
            })
        );

        let outcome = drag.pointer_up(store.state(), store.formation());
        let DragOutcome::Committed(kind) = outcome else {
            panic!("expected a commit, got {outcome:?}");
        };
        let op = Operation {
            origin_id: "test".into(),
            logical_ts: 1,
            kind,
        };
        store.apply_operation(&op, &catalog).unwrap();
        assert_eq!(store.state().occupant("lcm"), Some("p2"));
        assert_eq!(store.state().occupant("rcm"), Some("p1"));
    }

    #[test]
    fn drag_to_an_empty_slot_commits_a_move() {
        let (catalog, mut store) = setup();
        place(&mut store, &catalog, "p1", "lcm");

        let mut drag = DragEngine::new(DragConfig::default());
        drag.pointer_down(store.state(), store.formation(), anchor(&store, "lcm"));
        drag.pointer_move(store.state(), store.formation(), anchor(&store, "rm"));
        let outcome = drag.pointer_up(store.state(), store.formation());
        assert_eq!(
            outcome,
            DragOutcome::Committed(OperationKind::Move {
                player_id: "p1".into(),
                from_slot: Some("lcm".into()),
                to_slot: Some("rm".into()),
                to_free: None,
            })
        );
    }

    #[test]
    fn release_in_open_field_cancels_without_free_placement() {
        let (catalog, mut store) = setup();
        place(&mut store, &catalog, "p1", "lcm");
        let version_before = store.state().version;

        let mut drag = DragEngine::new(DragConfig::default());
        drag.pointer_down(store.state(), store.formation(), anchor(&store, "lcm"));
        // Nowhere near a token, a slot, or (irrelevant here) a grid centre.
        drag.pointer_move(store.state(), store.formation(), FieldPoint::new(50.0, 62.0));
        let outcome = drag.pointer_up(store.state(), store.formation());
        assert_eq!(outcome, DragOutcome::Cancelled { notice: None });
        assert_eq!(store.state().version, version_before, "nothing was committed");
        assert!(!drag.is_dragging());
    }

    #[test]
    fn release_in_open_field_places_freely_when_allowed() {
        let (catalog, mut store) = setup();
        place(&mut store, &catalog, "p1", "lcm");

        let mut drag = DragEngine::new(DragConfig {
            allow_free_placement: true,
        });
        drag.pointer_down(store.state(), store.formation(), anchor(&store, "lcm"));

        // Near a cell centre the grid family quantizes the drop.
        drag.pointer_move(store.state(), store.formation(), FieldPoint::new(54.0, 64.0));
        let outcome = drag.pointer_up(store.state(), store.formation());
        assert_eq!(
            outcome,
            DragOutcome::Committed(OperationKind::Move {
                player_id: "p1".into(),
                from_slot: Some("lcm".into()),
                to_slot: None,
                to_free: Some(FieldPoint::new(55.0, 65.0)),
            })
        );

        // Away from any centre the raw pointer position stands.
        let mut drag = DragEngine::new(DragConfig {
            allow_free_placement: true,
        });
        drag.pointer_down(store.state(), store.formation(), anchor(&store, "lcm"));
        drag.pointer_move(store.state(), store.formation(), FieldPoint::new(50.0, 61.0));
        let outcome = drag.pointer_up(store.state(), store.formation());
        assert_eq!(
            outcome,
            DragOutcome::Committed(OperationKind::Move {
                player_id: "p1".into(),
                from_slot: Some("lcm".into()),
                to_slot: None,
                to_free: Some(FieldPoint::new(50.0, 61.0)),
            })
        );
    }

    #[test]
    fn release_back_on_the_origin_slot_is_a_cancel() {
        let (catalog, mut store) = setup();
        place(&mut store, &catalog, "p1", "lcm");

        let mut drag = DragEngine::new(DragConfig::default());
        let origin = anchor(&store, "lcm");
        drag.pointer_down(store.state(), store.formation(), origin);
        drag.pointer_move(store.state(), store.formation(), FieldPoint::new(origin.x + 3.0, origin.y));
        let outcome = drag.pointer_up(store.state(), store.formation());
        assert_eq!(outcome, DragOutcome::Cancelled { notice: None });
    }

    #[test]
    fn source_removed_mid_drag_cancels_with_a_notice() {
        let (catalog, mut store) = setup();
        place(&mut store, &catalog, "p1", "lcm");

        let mut drag = DragEngine::new(DragConfig::default());
        drag.pointer_down(store.state(), store.formation(), anchor(&store, "lcm"));
        drag.pointer_move(store.state(), store.formation(), anchor(&store, "rm"));

        // A remote formation change empties the board under the gesture.
        let wipe = Operation {
            origin_id: "remote".into(),
            logical_ts: 9,
            kind: OperationKind::FormationChange {
                formation_id: "4-4-2".into(),
                slot_map: Default::default(),
                free_positions: Default::default(),
            },
        };
        store.apply_operation(&wipe, &catalog).unwrap();

        let outcome = drag.pointer_up(store.state(), store.formation());
        assert_eq!(
            outcome,
            DragOutcome::Cancelled {
                notice: Some(DragNotice::PositionUnavailable)
            }
        );
    }

    #[test]
    fn swap_partner_removed_mid_drag_cancels_with_a_notice() {
        let (catalog, mut store) = setup();
        place(&mut store, &catalog, "p1", "lcm");
        place(&mut store, &catalog, "p2", "rcm");

        let mut drag = DragEngine::new(DragConfig::default());
        drag.pointer_down(store.state(), store.formation(), anchor(&store, "lcm"));
        drag.pointer_move(store.state(), store.formation(), anchor(&store, "rcm"));
        assert!(matches!(drag.candidate(), Some(SnapCandidate::Swap { .. })));

        // p2 leaves the board between the last move and the release.
        let mut slot_map = std::collections::BTreeMap::new();
        slot_map.insert("lcm".to_owned(), "p1".to_owned());
        let remove_p2 = Operation {
            origin_id: "remote".into(),
            logical_ts: 9,
            kind: OperationKind::FormationChange {
                formation_id: "4-4-2".into(),
                slot_map,
                free_positions: Default::default(),
            },
        };
        store.apply_operation(&remove_p2, &catalog).unwrap();

        let outcome = drag.pointer_up(store.state(), store.formation());
        assert_eq!(
            outcome,
            DragOutcome::Cancelled {
                notice: Some(DragNotice::PositionUnavailable)
            }
        );
    }

    #[test]
    fn pointer_down_needs_a_token_under_the_pointer() {
        let (_catalog, store) = setup();
        let mut drag = DragEngine::new(DragConfig::default());
        assert_eq!(
            drag.pointer_down(store.state(), store.formation(), FieldPoint::new(50.0, 50.0)),
            None
        );
        assert!(!drag.is_dragging());
        assert_eq!(drag.pointer_up(store.state(), store.formation()), DragOutcome::Ignored);
    }

    #[test]
    fn second_pointer_down_is_ignored_while_dragging() {
        let (catalog, mut store) = setup();
        place(&mut store, &catalog, "p1", "lcm");
        place(&mut store, &catalog, "p2", "rcm");

        let mut drag = DragEngine::new(DragConfig::default());
        drag.pointer_down(store.state(), store.formation(), anchor(&store, "lcm"));
        assert_eq!(
            drag.pointer_down(store.state(), store.formation(), anchor(&store, "rcm")),
            None
        );
        assert!(drag.is_dragging());
    }

    #[test]
    fn cancel_drops_the_gesture() {
        let (catalog, mut store) = setup();
        place(&mut store, &catalog, "p1", "lcm");

        let mut drag = DragEngine::new(DragConfig::default());
        drag.pointer_down(store.state(), store.formation(), anchor(&store, "lcm"));
        assert!(drag.cancel());
        assert!(!drag.is_dragging());
        assert_eq!(drag.ghost(), None);
        assert!(!drag.cancel(), "cancel is idempotent");
    }
}
