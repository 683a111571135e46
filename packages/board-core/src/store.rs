//! The single mutation entry point for board state.
//!
//! Everything that changes a board funnels through
//! [`BoardStore::apply_operation`]: local drag commits, auto-assignment,
//! undo re-broadcasts and remote operations alike. An operation either
//! applies fully and bumps the version, or is rejected and the state is
//! untouched. The only sanctioned bypass is [`BoardStore::resync`], which
//! adopts an authoritative snapshot wholesale.

use std::collections::BTreeSet;

use board_types::{BoardState, FieldPoint, Formation, Operation, OperationKind};
use tracing::debug;

use crate::catalog::FormationCatalog;
use crate::error::ApplyError;

/// What a successful apply did, for UI notices and sync bookkeeping.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ApplyOutcome {
    /// Occupant a move pushed back into the unassigned pool.
    pub displaced: Option<String>,
    /// Version after the bump.
    pub version: u64,
}

#[derive(Debug, Clone)]
pub struct BoardStore {
    formation: Formation,
    state: BoardState,
}

impl BoardStore {
    /// Fresh, empty board on the given formation.
    pub fn new(formation: Formation) -> Self {
        let state = BoardState::new(&formation.id);
        Self { formation, state }
    }

    /// Rehydrates a persisted or received snapshot. The snapshot's active
    /// formation must exist in the catalog.
    pub fn from_state(state: BoardState, catalog: &FormationCatalog) -> Result<Self, ApplyError> {
        let formation = catalog
            .get(&state.active_formation_id)
            .cloned()
            .ok_or_else(|| ApplyError::UnknownFormation(state.active_formation_id.clone()))?;
        Ok(Self { formation, state })
    }

    pub fn state(&self) -> &BoardState {
        &self.state
    }

    pub fn formation(&self) -> &Formation {
        &self.formation
    }

    /// Applies one operation. Validation happens up front so a rejection
    /// leaves no partial writes behind. `from_slot` on a move is display
    /// metadata: application only cares about the end placement, which is
    /// what makes concurrent writes converge on last-write-wins.
    pub fn apply_operation(
        &mut self,
        op: &Operation,
        catalog: &FormationCatalog,
    ) -> Result<ApplyOutcome, ApplyError> {
        let mut outcome = match &op.kind {
            OperationKind::Move {
                player_id,
                to_slot,
                to_free,
                ..
            } => self.apply_move(player_id, to_slot.as_deref(), *to_free)?,
            OperationKind::Swap { player_a, player_b } => self.apply_swap(player_a, player_b)?,
            OperationKind::FormationChange {
                formation_id,
                slot_map,
                free_positions,
            } => self.apply_formation_change(formation_id, slot_map, free_positions, catalog)?,
            OperationKind::DrawingEdit { drawings } => {
                self.state.drawings = drawings.clone();
                ApplyOutcome::default()
            }
        };
        self.state.version += 1;
        outcome.version = self.state.version;
        debug!(
            version = self.state.version,
            origin = %op.origin_id,
            "applied operation"
        );
        Ok(outcome)
    }

    fn apply_move(
        &mut self,
        player_id: &str,
        to_slot: Option<&str>,
        to_free: Option<FieldPoint>,
    ) -> Result<ApplyOutcome, ApplyError> {
        match (to_slot, to_free) {
            (Some(_), Some(_)) => return Err(ApplyError::AmbiguousMoveTarget),
            (None, None) => return Err(ApplyError::MissingMoveTarget),
            (Some(slot_id), None) => {
                if self.formation.slot(slot_id).is_none() {
                    return Err(ApplyError::UnknownSlot(slot_id.to_owned()));
                }
            }
            (None, Some(_)) => {}
        }

        self.remove_placement(player_id);
        let displaced = match (to_slot, to_free) {
            (Some(slot_id), None) => {
                let prior = self
                    .state
                    .slot_assignments
                    .insert(slot_id.to_owned(), player_id.to_owned());
                prior.filter(|p| p != player_id)
            }
            (None, Some(at)) => {
                self.state
                    .free_positions
                    .insert(player_id.to_owned(), at.clamped());
                None
            }
            _ => unreachable!("validated above"),
        };
        Ok(ApplyOutcome {
            displaced,
            version: 0,
        })
    }

    fn apply_swap(&mut self, player_a: &str, player_b: &str) -> Result<ApplyOutcome, ApplyError> {
        if player_a == player_b {
            return Err(ApplyError::SwapWithSelf);
        }
        let place_a = self
            .placement_of(player_a)
            .ok_or_else(|| ApplyError::PlayerNotPlaced(player_a.to_owned()))?;
        let place_b = self
            .placement_of(player_b)
            .ok_or_else(|| ApplyError::PlayerNotPlaced(player_b.to_owned()))?;

        self.remove_placement(player_a);
        self.remove_placement(player_b);
        self.put_placement(player_a, place_b);
        self.put_placement(player_b, place_a);
        Ok(ApplyOutcome::default())
    }

    fn apply_formation_change(
        &mut self,
        formation_id: &str,
        slot_map: &std::collections::BTreeMap<String, String>,
        free_positions: &std::collections::BTreeMap<String, FieldPoint>,
        catalog: &FormationCatalog,
    ) -> Result<ApplyOutcome, ApplyError> {
        let formation = catalog
            .get(formation_id)
            .ok_or_else(|| ApplyError::UnknownFormation(formation_id.to_owned()))?
            .clone();

        let mut seen = BTreeSet::new();
        for (slot_id, player_id) in slot_map {
            if formation.slot(slot_id).is_none() {
                return Err(ApplyError::UnknownSlot(slot_id.clone()));
            }
            if !seen.insert(player_id.as_str()) {
                return Err(ApplyError::DuplicatePlacement(player_id.clone()));
            }
        }
        for player_id in free_positions.keys() {
            if !seen.insert(player_id.as_str()) {
                return Err(ApplyError::DuplicatePlacement(player_id.clone()));
            }
        }

        self.state.active_formation_id = formation.id.clone();
        self.state.slot_assignments = slot_map.clone();
        self.state.free_positions = free_positions
            .iter()
            .map(|(p, at)| (p.clone(), at.clamped()))
            .collect();
        self.formation = formation;
        Ok(ApplyOutcome::default())
    }

    /// Adopts an authoritative snapshot, replacing local state wholesale.
    /// Skips the version bump and the operation pipeline on purpose; the
    /// snapshot's own version stands.
    pub fn resync(&mut self, state: BoardState, catalog: &FormationCatalog) -> Result<(), ApplyError> {
        let formation = catalog
            .get(&state.active_formation_id)
            .cloned()
            .ok_or_else(|| ApplyError::UnknownFormation(state.active_formation_id.clone()))?;
        debug!(version = state.version, "adopting snapshot");
        self.formation = formation;
        self.state = state;
        Ok(())
    }

    fn placement_of(&self, player_id: &str) -> Option<Placement> {
        if let Some(slot_id) = self.state.slot_of(player_id) {
            return Some(Placement::Slot(slot_id.to_owned()));
        }
        self.state
            .free_positions
            .get(player_id)
            .map(|at| Placement::Free(*at))
    }

    fn remove_placement(&mut self, player_id: &str) {
        self.state
            .slot_assignments
            .retain(|_, occupant| occupant != player_id);
        self.state.free_positions.remove(player_id);
    }

    fn put_placement(&mut self, player_id: &str, placement: Placement) {
        match placement {
            Placement::Slot(slot_id) => {
                self.state
                    .slot_assignments
                    .insert(slot_id, player_id.to_owned());
            }
            Placement::Free(at) => {
                self.state.free_positions.insert(player_id.to_owned(), at);
            }
        }
    }
}

#[derive(Debug, Clone)]
enum Placement {
    Slot(String),
    Free(FieldPoint),
}
