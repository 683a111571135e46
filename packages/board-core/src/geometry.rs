//! Pure snap-target search over the normalized field frame.
//!
//! Nothing in here holds state. Callers hand in the current token layout
//! and get back at most one candidate, resolved by strict family priority
//! (player token, then formation slot, then grid cell) with nearest-wins
//! inside a family. Distance ties inside a family break toward the lowest
//! id so resolution is deterministic.

use board_types::{BoardState, FieldPoint, Formation, FIELD_MAX};

/// Pointer distance at which another token becomes a swap target.
pub const SWAP_RADIUS: f32 = 6.0;
/// Pointer distance at which a slot anchor attracts the drop.
pub const SLOT_SNAP_RADIUS: f32 = 8.0;
/// Pointer distance at which a grid cell centre attracts a free drop.
/// Kept below half the cell diagonal so open field stays reachable.
pub const GRID_SNAP_RADIUS: f32 = 4.0;
/// Hit-test radius for picking a token up.
pub const TOKEN_HIT_RADIUS: f32 = 4.0;
/// Grid pitch. Cells are square with centres at the midpoints.
pub const GRID_STEP: f32 = 10.0;

/// Where a placed token currently sits: slot occupants at their slot
/// anchor, free players at their stored position.
#[derive(Debug, Clone, PartialEq)]
pub struct TokenPos {
    pub player_id: String,
    /// `None` for free placements.
    pub slot_id: Option<String>,
    pub at: FieldPoint,
}

/// The one target a drop would act on.
#[derive(Debug, Clone, PartialEq)]
pub enum SnapCandidate {
    /// Another player's token in swap range. Committing exchanges the two
    /// placements.
    Swap { player_id: String },
    /// A formation slot in snap range. Committing moves the dragged player
    /// there, displacing any occupant.
    Slot { slot_id: String, at: FieldPoint },
    /// A grid cell centre in snap range. Committing is a free move onto
    /// the centre.
    Grid { cell: (u32, u32), at: FieldPoint },
}

/// Materializes every placed token with its render position.
pub fn token_positions(board: &BoardState, formation: &Formation) -> Vec<TokenPos> {
    let mut tokens = Vec::with_capacity(board.placed_count());
    for (slot_id, player_id) in &board.slot_assignments {
        if let Some(slot) = formation.slot(slot_id) {
            tokens.push(TokenPos {
                player_id: player_id.clone(),
                slot_id: Some(slot_id.clone()),
                at: slot.anchor,
            });
        }
    }
    for (player_id, at) in &board.free_positions {
        tokens.push(TokenPos {
            player_id: player_id.clone(),
            slot_id: None,
            at: *at,
        });
    }
    tokens
}

/// Hit-test for pointer-down: the nearest token within [`TOKEN_HIT_RADIUS`].
pub fn token_at(tokens: &[TokenPos], at: FieldPoint) -> Option<&TokenPos> {
    let mut best: Option<(f32, &TokenPos)> = None;
    for token in tokens {
        let d = at.dist(token.at);
        if d > TOKEN_HIT_RADIUS {
            continue;
        }
        let closer = match best {
            Some((bd, bt)) => {
                d < bd || (d == bd && token.player_id < bt.player_id)
            }
            None => true,
        };
        if closer {
            best = Some((d, token));
        }
    }
    best.map(|(_, t)| t)
}

/// The grid cell containing `at`. Points on the far edge fold into the
/// last cell so every field point maps somewhere.
pub fn grid_cell_of(at: FieldPoint) -> (u32, u32) {
    let cells = (FIELD_MAX / GRID_STEP) as u32;
    let fold = |v: f32| ((v / GRID_STEP) as u32).min(cells - 1);
    (fold(at.x.max(0.0)), fold(at.y.max(0.0)))
}

pub fn cell_center(cell: (u32, u32)) -> FieldPoint {
    FieldPoint::new(
        cell.0 as f32 * GRID_STEP + GRID_STEP / 2.0,
        cell.1 as f32 * GRID_STEP + GRID_STEP / 2.0,
    )
}

/// Resolves the drop target for a pointer at `at` while `dragged_id` is in
/// flight. Family priority is absolute: any token in swap range beats any
/// slot, any slot in snap range beats the grid. The dragged token itself is
/// never a candidate; its origin slot is, which is how a release back home
/// resolves (the drag engine turns that into a cancel). The grid family is
/// only consulted when `allow_free` is set.
pub fn find_snap_target(
    at: FieldPoint,
    dragged_id: &str,
    tokens: &[TokenPos],
    formation: &Formation,
    allow_free: bool,
) -> Option<SnapCandidate> {
    let mut best_token: Option<(f32, &TokenPos)> = None;
    for token in tokens {
        if token.player_id == dragged_id {
            continue;
        }
        let d = at.dist(token.at);
        if d > SWAP_RADIUS {
            continue;
        }
        let closer = match best_token {
            Some((bd, bt)) => d < bd || (d == bd && token.player_id < bt.player_id),
            None => true,
        };
        if closer {
            best_token = Some((d, token));
        }
    }
    if let Some((_, token)) = best_token {
        return Some(SnapCandidate::Swap {
            player_id: token.player_id.clone(),
        });
    }

    let mut best_slot: Option<(f32, usize)> = None;
    for (i, slot) in formation.slots.iter().enumerate() {
        let d = at.dist(slot.anchor);
        if d > SLOT_SNAP_RADIUS {
            continue;
        }
        let closer = match best_slot {
            Some((bd, bi)) => d < bd || (d == bd && slot.id < formation.slots[bi].id),
            None => true,
        };
        if closer {
            best_slot = Some((d, i));
        }
    }
    if let Some((_, i)) = best_slot {
        let slot = &formation.slots[i];
        return Some(SnapCandidate::Slot {
            slot_id: slot.id.clone(),
            at: slot.anchor,
        });
    }

    if allow_free {
        let cell = grid_cell_of(at);
        let center = cell_center(cell);
        if at.dist(center) <= GRID_SNAP_RADIUS {
            return Some(SnapCandidate::Grid { cell, at: center });
        }
    }

    None
}
