//! # board-types
//!
//! Shared board and wire structures for the Pitchside tactical-board suite.
//!
//! These types are used by:
//! - `board-core`: assignment, drag, history and synchronization engines
//! - `board-server`: the socket.io session relay (event payloads)
//! - `board-simulator`: the scripted multi-client validation harness
//!
//! ## Coordinate Conventions
//!
//! - Field coordinates are normalized to **x, y ∈ [0, 100]**
//! - Origin at the defending team's left corner; x runs along the goal
//!   line, y toward the opposite goal
//! - Formation anchors, cursors, free placements and drawings all share
//!   this one frame — no pixel space exists below the rendering layer
//!
//! ## Invariants
//!
//! - A player id appears in at most one slot of `BoardState::slot_assignments`
//! - A placed player is in `slot_assignments` or `free_positions`, never both
//! - `BoardState::version` increments on every committed Operation
//! - A formation has unique slot ids and at most one goalkeeper slot
//! - Conflict order is the session's receipt order, never `logical_ts`

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

// ── Field Geometry ────────────────────────────────────────────────────────────

/// Upper bound of the normalized field frame on both axes.
pub const FIELD_MAX: f32 = 100.0;

/// Normalized 2D field coordinate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct FieldPoint {
    pub x: f32,
    pub y: f32,
}

impl FieldPoint {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    /// Euclidean distance to another point, in field units.
    pub fn dist(&self, other: FieldPoint) -> f32 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        (dx * dx + dy * dy).sqrt()
    }

    /// Copy of this point clamped into the field frame.
    pub fn clamped(&self) -> FieldPoint {
        FieldPoint {
            x: self.x.clamp(0.0, FIELD_MAX),
            y: self.y.clamp(0.0, FIELD_MAX),
        }
    }
}

// ── Roles ─────────────────────────────────────────────────────────────────────

/// Pitch role vocabulary shared by players (role tags) and slots (labels).
/// Wire form is the conventional short name ("GK", "CDM", "LWB", …).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    Gk,
    Lb,
    Cb,
    Rb,
    Lwb,
    Rwb,
    Cdm,
    Cm,
    Cam,
    Lm,
    Rm,
    Lw,
    Rw,
    Cf,
    St,
}

/// Broad line a role belongs to; adjacent lines score partial affinity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RoleCategory {
    Goalkeeper,
    Defense,
    Midfield,
    Attack,
}

impl Role {
    pub fn category(&self) -> RoleCategory {
        match self {
            Role::Gk => RoleCategory::Goalkeeper,
            Role::Lb | Role::Cb | Role::Rb | Role::Lwb | Role::Rwb => RoleCategory::Defense,
            Role::Cdm | Role::Cm | Role::Cam | Role::Lm | Role::Rm => RoleCategory::Midfield,
            Role::Lw | Role::Rw | Role::Cf | Role::St => RoleCategory::Attack,
        }
    }

    pub fn is_goalkeeper(&self) -> bool {
        matches!(self, Role::Gk)
    }
}

// ── Roster ────────────────────────────────────────────────────────────────────

/// Roster entry. Owned by the roster collaborator — the board core reads
/// these and never writes them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Player {
    pub id: String,
    pub name: String,
    /// Overall rating 0–100; assignment tie-break, higher first.
    pub rating: u8,
    /// Role tags in preference order; affinity takes the best match.
    pub roles: Vec<Role>,
    #[serde(default)]
    pub injured: bool,
    #[serde(default)]
    pub suspended: bool,
}

impl Player {
    /// Eligibility gate for auto-assignment and drag sources.
    pub fn is_available(&self) -> bool {
        !self.injured && !self.suspended
    }
}

// ── Formations ────────────────────────────────────────────────────────────────

/// A named position within a formation. Occupancy lives in `BoardState`,
/// keeping templates immutable and shareable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FormationSlot {
    pub id: String,
    pub role: Role,
    /// Default normalized position of the slot on the field.
    pub anchor: FieldPoint,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Formation {
    pub id: String,
    pub name: String,
    /// Ordered goalkeeper-first; order is the assignment tie-break.
    pub slots: Vec<FormationSlot>,
}

impl Formation {
    pub fn slot(&self, slot_id: &str) -> Option<&FormationSlot> {
        self.slots.iter().find(|s| s.id == slot_id)
    }

    pub fn goalkeeper_slot(&self) -> Option<&FormationSlot> {
        self.slots.iter().find(|s| s.role.is_goalkeeper())
    }
}

// ── Board State ───────────────────────────────────────────────────────────────

/// The authoritative board: placement maps + drawings + version counter.
///
/// Mutated exclusively through `Operation`s (one entry point in the store);
/// `BTreeMap`s keep serialization canonical so two clients holding the same
/// state produce byte-identical blobs and digests.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BoardState {
    pub active_formation_id: String,
    /// slot id → player id. A player appears in at most one slot.
    pub slot_assignments: BTreeMap<String, String>,
    /// player id → off-slot position, for boards that allow free placement.
    #[serde(default)]
    pub free_positions: BTreeMap<String, FieldPoint>,
    /// Free-form drawing primitives; opaque beyond being snapshot payload.
    #[serde(default)]
    pub drawings: Vec<serde_json::Value>,
    /// Monotonic commit counter.
    pub version: u64,
}

impl BoardState {
    pub fn new(formation_id: &str) -> Self {
        Self {
            active_formation_id: formation_id.to_string(),
            slot_assignments: BTreeMap::new(),
            free_positions: BTreeMap::new(),
            drawings: Vec::new(),
            version: 0,
        }
    }

    /// Slot currently holding `player_id`, if any.
    pub fn slot_of(&self, player_id: &str) -> Option<&str> {
        self.slot_assignments
            .iter()
            .find(|(_, p)| p.as_str() == player_id)
            .map(|(s, _)| s.as_str())
    }

    /// Player currently occupying `slot_id`, if any.
    pub fn occupant(&self, slot_id: &str) -> Option<&str> {
        self.slot_assignments.get(slot_id).map(|p| p.as_str())
    }

    /// Whether the player is anywhere on the board (slot or free position).
    pub fn is_placed(&self, player_id: &str) -> bool {
        self.slot_of(player_id).is_some() || self.free_positions.contains_key(player_id)
    }

    pub fn placed_count(&self) -> usize {
        self.slot_assignments.len() + self.free_positions.len()
    }
}

// ── Operations ────────────────────────────────────────────────────────────────

/// The closed mutation vocabulary. Every consumer matches exhaustively —
/// adding a kind fails to compile until each consumer handles it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum OperationKind {
    /// Place `player_id` into a slot or at a free position. Exactly one of
    /// `to_slot` / `to_free` is set; a displaced occupant returns to the
    /// unassigned pool.
    Move {
        player_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        from_slot: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        to_slot: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        to_free: Option<FieldPoint>,
    },
    /// Exchange the placements of two players atomically.
    Swap { player_a: String, player_b: String },
    /// Switch the template and adopt the carried placement wholesale.
    /// Also the vehicle for undo re-broadcast and auto-assignment commits.
    FormationChange {
        formation_id: String,
        slot_map: BTreeMap<String, String>,
        #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
        free_positions: BTreeMap<String, FieldPoint>,
    },
    /// Replace the drawing list; payload is opaque to the core.
    DrawingEdit { drawings: Vec<serde_json::Value> },
}

/// An atomic, serializable board mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Operation {
    /// User that committed the operation (local or remote).
    pub origin_id: String,
    /// Lamport-style counter for display/labeling; conflict ordering uses
    /// the session's receipt order instead.
    pub logical_ts: u64,
    #[serde(flatten)]
    pub kind: OperationKind,
}

// ── Collaboration ─────────────────────────────────────────────────────────────

/// Presence colors assigned round-robin by the session authority.
pub const USER_COLORS: [&str; 8] = [
    "#e63946", "#2a9d8f", "#457b9d", "#f4a261", "#8338ec", "#06d6a0", "#ef476f", "#118ab2",
];

pub fn color_for(index: usize) -> &'static str {
    USER_COLORS[index % USER_COLORS.len()]
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollaborationUser {
    pub id: String,
    pub name: String,
    pub color: String,
    /// Last known cursor position; None until the first cursor-move.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cursor: Option<FieldPoint>,
    pub online: bool,
    /// Unix ms of the last message seen from this user.
    pub last_seen_ms: i64,
}

/// A collaboration group editing one board concurrently.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: String,
    /// Join order; the first user's color index is 0.
    pub users: Vec<CollaborationUser>,
    pub can_edit: bool,
    pub can_invite: bool,
    pub can_kick: bool,
}

// ── Wire Protocol ─────────────────────────────────────────────────────────────

/// Client → session authority. On socket.io transports the variant name is
/// the event name (kebab-cased); on the in-memory channel the enum travels
/// as-is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ClientMessage {
    /// Enter a session. Answered with `Welcome`; everyone else sees
    /// `UserJoined`.
    Join {
        session_id: String,
        user_id: String,
        name: String,
        formation_id: String,
    },
    /// Clean exit; dropping the transport has the same effect eventually.
    Leave,
    /// Throttled cursor stream — at most 60/sec leave a client.
    CursorMove { at: FieldPoint },
    /// A committed mutation, sent immediately and unthrottled.
    Operation { op: Operation },
    /// Heartbeat; `sent_at_ms` round-trips in the pong for RTT math.
    Ping { sent_at_ms: i64 },
    /// Request a full authoritative snapshot (reconnect/desync path).
    SyncRequest,
}

/// Session authority → client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ServerMessage {
    /// Join acknowledgment: full session roster, authoritative board, and
    /// the receipt sequence the board is at.
    Welcome {
        session: Session,
        board: BoardState,
        seq: u64,
    },
    UserJoined { user: CollaborationUser },
    UserLeft { user_id: String },
    CursorMove { user_id: String, at: FieldPoint },
    /// A remote operation in receipt order. `seq` gaps mean missed
    /// messages and trigger a full resync on the client.
    Operation { seq: u64, op: Operation },
    Pong { sent_at_ms: i64 },
    /// Full resync payload; replaces local state wholesale.
    SyncState {
        board: BoardState,
        seq: u64,
        users: Vec<CollaborationUser>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operation_wire_shape_is_tagged_camel_case() {
        let op = Operation {
            origin_id: "u1".into(),
            logical_ts: 7,
            kind: OperationKind::Move {
                player_id: "p9".into(),
                from_slot: Some("lcm".into()),
                to_slot: Some("rcm".into()),
                to_free: None,
            },
        };
        let v = serde_json::to_value(&op).unwrap();
        assert_eq!(v["kind"], "move");
        assert_eq!(v["originId"], "u1");
        assert_eq!(v["playerId"], "p9");
        assert_eq!(v["fromSlot"], "lcm");
        assert!(v.get("toFree").is_none());

        let back: Operation = serde_json::from_value(v).unwrap();
        assert_eq!(back, op);
    }

    #[test]
    fn role_short_names() {
        assert_eq!(serde_json::to_value(Role::Gk).unwrap(), "GK");
        assert_eq!(serde_json::to_value(Role::Lwb).unwrap(), "LWB");
        assert_eq!(serde_json::to_value(Role::Cam).unwrap(), "CAM");
    }

    #[test]
    fn board_state_lookups() {
        let mut b = BoardState::new("f-442");
        b.slot_assignments.insert("gk".into(), "p1".into());
        b.free_positions.insert("p2".into(), FieldPoint::new(40.0, 60.0));

        assert_eq!(b.slot_of("p1"), Some("gk"));
        assert_eq!(b.occupant("gk"), Some("p1"));
        assert!(b.is_placed("p2"));
        assert!(!b.is_placed("p3"));
        assert_eq!(b.placed_count(), 2);
    }
}
