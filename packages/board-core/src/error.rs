//! Error taxonomy. Rejections are recoverable by design: a failed apply
//! leaves the store untouched and callers fall back to a no-op or a resync
//! instead of propagating upward.

use thiserror::Error;

/// Why `BoardStore::apply_operation` refused an operation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApplyError {
    #[error("slot `{0}` does not exist in the active formation")]
    UnknownSlot(String),

    #[error("formation `{0}` is not in the catalog")]
    UnknownFormation(String),

    #[error("player `{0}` is not placed on the board")]
    PlayerNotPlaced(String),

    #[error("swap needs two distinct placed players")]
    SwapWithSelf,

    #[error("player `{0}` appears in more than one placement")]
    DuplicatePlacement(String),

    #[error("move carries neither a slot nor a free position")]
    MissingMoveTarget,

    #[error("move carries both a slot and a free position")]
    AmbiguousMoveTarget,

    #[error("slot id `{0}` appears twice in the template")]
    DuplicateSlotId(String),

    #[error("template `{0}` has more than one goalkeeper slot")]
    ExtraGoalkeeper(String),
}

/// Transport-level failures surfaced by [`crate::channel::BoardChannel`]
/// implementations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChannelError {
    #[error("channel is not connected")]
    NotConnected,

    #[error("session is no longer reachable")]
    SessionClosed,
}
