//! # board-core
//!
//! The tactical-board engine: pointer gestures, auto-assignment, bounded
//! undo/redo and multi-client synchronization over an injectable channel.
//! Everything in here is synchronous and clock-free; callers feed wall time
//! in as `now_ms` so behavior is reproducible under test.
//!
//! Module map, leaf first:
//!
//! - [`geometry`] — pure snap-target search over the normalized field
//! - [`catalog`] — builtin formation templates
//! - [`assignment`] — greedy weighted player/slot matching
//! - [`store`] — the single mutation entry point for board state
//! - [`history`] — bounded undo/redo snapshot deque
//! - [`drag`] — the pointer-gesture state machine
//! - [`channel`] — transport trait, in-memory channel and session hub
//! - [`sync`] — presence, heartbeat, ordered remote application
//! - [`session`] — the facade that wires the pieces together

pub mod assignment;
pub mod catalog;
pub mod channel;
pub mod drag;
pub mod error;
pub mod geometry;
pub mod history;
pub mod session;
pub mod store;
pub mod sync;

pub use assignment::{assign, SlotAssignment};
pub use catalog::FormationCatalog;
pub use channel::{BoardChannel, MemoryChannel, SessionHub};
pub use drag::{DragConfig, DragEngine, DragNotice, DragOutcome, DragOrigin};
pub use error::{ApplyError, ChannelError};
pub use geometry::{SnapCandidate, TokenPos};
pub use history::{HistoryEngine, HistoryEntry};
pub use session::{BoardSession, SessionConfig};
pub use store::{ApplyOutcome, BoardStore};
pub use sync::{ConnectionStatus, DesyncReason, SyncConfig, SyncEvent, Synchronizer};
