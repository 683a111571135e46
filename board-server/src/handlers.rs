use std::collections::HashMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use serde_json::{json, Value};
use socketioxide::extract::{Data, SocketRef};
use tokio::sync::RwLock;
use tracing::{info, warn};

use board_core::FormationCatalog;
use board_types::{FieldPoint, Operation, OperationKind};

use crate::persistence::load_session;
use crate::sessions::{
    ActivityEntry, JoinSessionPayload, Membership, SessionRoom, DEFAULT_FORMATION,
};
use crate::ServerConfig;

// ─── Shared State Types ───────────────────────────────────────────────────────

/// session id → the authoritative room.
pub type SharedRooms = Arc<RwLock<HashMap<String, SessionRoom>>>;
/// socket id → which session/user it speaks for.
pub type SocketIndex = Arc<RwLock<HashMap<String, Membership>>>;

// ─── Helper: get unix ms ─────────────────────────────────────────────────────

pub fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

/// One-line activity label for the session log.
fn describe_op(op: &Operation) -> String {
    match &op.kind {
        OperationKind::Move {
            player_id,
            to_slot,
            to_free,
            ..
        } => match (to_slot, to_free) {
            (Some(slot), _) => format!("moved {player_id} to {slot}"),
            (None, Some(at)) => format!("moved {player_id} to ({:.0}, {:.0})", at.x, at.y),
            (None, None) => format!("moved {player_id}"),
        },
        OperationKind::Swap { player_a, player_b } => format!("swapped {player_a} and {player_b}"),
        OperationKind::FormationChange { formation_id, .. } => {
            format!("applied formation {formation_id}")
        }
        OperationKind::DrawingEdit { drawings } => {
            format!("updated drawings ({} shapes)", drawings.len())
        }
    }
}

pub async fn emit_log(
    rooms: &SharedRooms,
    socket: &SocketRef,
    session_id: &str,
    user_id: &str,
    message: String,
    data: Option<Value>,
) {
    let entry = ActivityEntry {
        id: uuid::Uuid::new_v4().to_string(),
        timestamp: now_ms(),
        user_id: user_id.to_owned(),
        message,
        data,
    };

    {
        let mut rooms = rooms.write().await;
        if let Some(room) = rooms.get_mut(session_id) {
            room.push_log(entry.clone());
        }
    }

    let _ = socket.to(session_id.to_owned()).emit("session-log", &entry);
    let _ = socket.emit("session-log", &entry);
}

// ─── Main Connection Handler ──────────────────────────────────────────────────

pub async fn on_connect(
    socket: SocketRef,
    rooms: SharedRooms,
    sockets: SocketIndex,
    config: Arc<ServerConfig>,
) {
    let socket_id = socket.id.to_string();
    info!("client connected: {socket_id}");

    // A dropped transport is not a clean leave; the user stays in the
    // roster and the presence sweep announces the departure once the
    // last-seen timeout passes.
    socket.on_disconnect({
        let sockets = sockets.clone();
        let sid = socket_id.clone();
        move |_: SocketRef| async move {
            if let Some(membership) = sockets.write().await.remove(&sid) {
                info!(
                    session = membership.session_id,
                    user = membership.user_id,
                    "client disconnected"
                );
            }
        }
    });

    // ── join-session ──────────────────────────────────────────────────────────
    {
        let socket = socket.clone();
        let rooms = rooms.clone();
        let sockets = sockets.clone();
        let config = config.clone();
        socket.on(
            "join-session",
            move |s: SocketRef, Data::<JoinSessionPayload>(payload)| {
                let rooms = rooms.clone();
                let sockets = sockets.clone();
                let config = config.clone();
                async move {
                    let now = now_ms();
                    let formation_id = payload
                        .formation_id
                        .as_deref()
                        .unwrap_or(DEFAULT_FORMATION)
                        .to_owned();
                    let catalog = FormationCatalog::builtin();
                    let Some(formation) = catalog.get(&formation_id).cloned() else {
                        warn!(user = payload.user_id, formation_id, "join with unknown formation");
                        let _ = s.emit("join-rejected", &json!({ "reason": "unknownFormation" }));
                        return;
                    };

                    let persisted = load_session(&config.data_dir, &payload.session_id).await;
                    let (user, welcome) = {
                        let mut rooms = rooms.write().await;
                        let room = rooms.entry(payload.session_id.clone()).or_insert_with(|| {
                            SessionRoom::new(&payload.session_id, formation, catalog, persisted)
                        });
                        let user = room.join(&payload.user_id, &payload.name, now);
                        let mut welcome = room.welcome_payload();
                        welcome["you"] = json!(user);
                        (user, welcome)
                    };

                    sockets.write().await.insert(
                        s.id.to_string(),
                        Membership {
                            session_id: payload.session_id.clone(),
                            user_id: payload.user_id.clone(),
                        },
                    );
                    let _ = s.join(payload.session_id.clone());

                    let _ = s.emit("session-state", &welcome);
                    let _ = s
                        .to(payload.session_id.clone())
                        .emit("user-joined", &user);

                    emit_log(
                        &rooms,
                        &s,
                        &payload.session_id,
                        &payload.user_id,
                        format!("{} joined the session", payload.name),
                        None,
                    )
                    .await;
                }
            },
        );
    }

    // ── cursor-move ───────────────────────────────────────────────────────────
    {
        let socket = socket.clone();
        let rooms = rooms.clone();
        let sockets = sockets.clone();
        socket.on("cursor-move", move |s: SocketRef, Data::<Value>(data)| {
            let rooms = rooms.clone();
            let sockets = sockets.clone();
            async move {
                let Some(membership) = sockets.read().await.get(&s.id.to_string()).cloned() else {
                    return;
                };
                let at = FieldPoint::new(
                    data["x"].as_f64().unwrap_or(0.0) as f32,
                    data["y"].as_f64().unwrap_or(0.0) as f32,
                )
                .clamped();

                {
                    let mut rooms = rooms.write().await;
                    if let Some(room) = rooms.get_mut(&membership.session_id) {
                        room.set_cursor(&membership.user_id, at, now_ms());
                    }
                }

                // Relay only; cursors never touch the board.
                let _ = s.to(membership.session_id).emit(
                    "cursor-move",
                    &json!({ "userId": membership.user_id, "x": at.x, "y": at.y }),
                );
            }
        });
    }

    // ── operation ─────────────────────────────────────────────────────────────
    {
        let socket = socket.clone();
        let rooms = rooms.clone();
        let sockets = sockets.clone();
        socket.on("operation", move |s: SocketRef, Data::<Value>(data)| {
            let rooms = rooms.clone();
            let sockets = sockets.clone();
            async move {
                let Some(membership) = sockets.read().await.get(&s.id.to_string()).cloned() else {
                    return;
                };
                // Accept both the bare operation and an { op: … } envelope.
                let raw = if data.get("op").is_some() {
                    data["op"].clone()
                } else {
                    data
                };
                let op = match serde_json::from_value::<Operation>(raw) {
                    Ok(op) => op,
                    Err(e) => {
                        warn!(user = membership.user_id, "unparseable operation: {e}");
                        return;
                    }
                };

                let applied = {
                    let mut rooms = rooms.write().await;
                    let Some(room) = rooms.get_mut(&membership.session_id) else {
                        return;
                    };
                    room.touch(&membership.user_id, now_ms());
                    match room.apply(&op) {
                        Ok(seq) => Ok(seq),
                        Err(err) => Err((err, room.sync_payload())),
                    }
                };

                match applied {
                    Ok(seq) => {
                        // The whole room gets the stamped operation, the
                        // author included; the echo is the author's ack.
                        let payload = json!({ "seq": seq, "op": op });
                        let _ = s
                            .to(membership.session_id.clone())
                            .emit("operation", &payload);
                        let _ = s.emit("operation", &payload);

                        emit_log(
                            &rooms,
                            &s,
                            &membership.session_id,
                            &membership.user_id,
                            describe_op(&op),
                            None,
                        )
                        .await;
                    }
                    Err((err, correction)) => {
                        warn!(
                            user = membership.user_id,
                            %err,
                            "rejected operation, correcting sender"
                        );
                        let _ = s.emit("sync-state", &correction);
                    }
                }
            }
        });
    }

    // ── latency-ping ──────────────────────────────────────────────────────────
    {
        let socket = socket.clone();
        let rooms = rooms.clone();
        let sockets = sockets.clone();
        socket.on("latency-ping", move |s: SocketRef, Data::<Value>(data)| {
            let rooms = rooms.clone();
            let sockets = sockets.clone();
            async move {
                if let Some(membership) = sockets.read().await.get(&s.id.to_string()).cloned() {
                    let mut rooms = rooms.write().await;
                    if let Some(room) = rooms.get_mut(&membership.session_id) {
                        room.touch(&membership.user_id, now_ms());
                    }
                }
                let _ = s.emit("latency-pong", &data);
            }
        });
    }

    // ── sync-request ──────────────────────────────────────────────────────────
    {
        let socket = socket.clone();
        let rooms = rooms.clone();
        let sockets = sockets.clone();
        socket.on("sync-request", move |s: SocketRef, Data::<Value>(_data)| {
            let rooms = rooms.clone();
            let sockets = sockets.clone();
            async move {
                let Some(membership) = sockets.read().await.get(&s.id.to_string()).cloned() else {
                    return;
                };
                let payload = {
                    let rooms = rooms.read().await;
                    rooms.get(&membership.session_id).map(|r| r.sync_payload())
                };
                if let Some(payload) = payload {
                    let _ = s.emit("sync-state", &payload);
                }
            }
        });
    }

    // ── leave-session ─────────────────────────────────────────────────────────
    {
        let socket = socket.clone();
        let rooms = rooms.clone();
        let sockets = sockets.clone();
        socket.on("leave-session", move |s: SocketRef, Data::<Value>(_data)| {
            let rooms = rooms.clone();
            let sockets = sockets.clone();
            async move {
                let Some(membership) = sockets.write().await.remove(&s.id.to_string()) else {
                    return;
                };
                let left = {
                    let mut rooms = rooms.write().await;
                    rooms
                        .get_mut(&membership.session_id)
                        .is_some_and(|room| room.leave(&membership.user_id))
                };
                if left {
                    let _ = s.to(membership.session_id.clone()).emit(
                        "user-left",
                        &json!({ "userId": membership.user_id }),
                    );
                }
                let _ = s.leave(membership.session_id.clone());
                info!(
                    session = membership.session_id,
                    user = membership.user_id,
                    "left session"
                );
            }
        });
    }

    info!("all handlers registered for socket {socket_id}");
}
