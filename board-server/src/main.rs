mod handlers;
mod persistence;
mod sessions;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use axum::routing::get;
use axum::Router;
use serde_json::json;
use socketioxide::SocketIo;
use tokio::sync::RwLock;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

use handlers::{now_ms, on_connect, SharedRooms, SocketIndex};
use persistence::save_session;

// ─── Configuration ────────────────────────────────────────────────────────────

pub struct ServerConfig {
    /// HTTP + socket.io port (default 3001)
    pub port: u16,
    /// Where session blobs live (default data/sessions)
    pub data_dir: PathBuf,
    /// Seconds between autosave passes for dirty boards (default 10)
    pub autosave_secs: u64,
    /// Silence past this marks a user offline (default 30000)
    pub presence_timeout_ms: i64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: std::env::var("BOARD_PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(3001),
            data_dir: std::env::var("BOARD_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("data/sessions")),
            autosave_secs: std::env::var("BOARD_AUTOSAVE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(10),
            presence_timeout_ms: std::env::var("BOARD_PRESENCE_TIMEOUT_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(30_000),
        }
    }
}

// ─── Time Sync Endpoint ───────────────────────────────────────────────────────

async fn time_sync() -> axum::Json<serde_json::Value> {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis();
    axum::Json(json!({ "serverTime": now }))
}

// ─── Presence Sweep + Autosave Task ───────────────────────────────────────────

/// Marks silent users offline (announcing the departure to their room) and
/// flushes dirty boards to disk on a slower cadence.
async fn run_session_sweep(rooms: SharedRooms, io: SocketIo, config: Arc<ServerConfig>) {
    const SWEEP_SECS: u64 = 2;
    let mut interval = tokio::time::interval(Duration::from_secs(SWEEP_SECS));
    let autosave_every = (config.autosave_secs / SWEEP_SECS).max(1);
    let mut pass: u64 = 0;

    loop {
        interval.tick().await;
        pass += 1;
        let autosave = pass % autosave_every == 0;
        let now = now_ms();

        let mut departures: Vec<(String, String)> = Vec::new();
        let mut to_save = Vec::new();
        {
            let mut rooms = rooms.write().await;
            for (session_id, room) in rooms.iter_mut() {
                for user_id in room.sweep_presence(config.presence_timeout_ms, now) {
                    departures.push((session_id.clone(), user_id));
                }
                if autosave && room.dirty {
                    room.dirty = false;
                    to_save.push(room.to_persisted());
                }
            }
        }

        for (session_id, user_id) in departures {
            info!(session = session_id, user = user_id, "presence timeout");
            let _ = io
                .to(session_id)
                .emit("user-left", &json!({ "userId": user_id }));
        }
        for persisted in to_save {
            if let Err(e) = save_session(&config.data_dir, &persisted).await {
                warn!(session = persisted.session_id, "autosave failed: {e}");
            }
        }
    }
}

// ─── Main ─────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() {
    // Logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "board_server=info,socketioxide=warn".into()),
        )
        .init();

    let config = Arc::new(ServerConfig::default());
    info!(
        "board-server starting (data dir: {})",
        config.data_dir.display()
    );

    let rooms: SharedRooms = Arc::new(RwLock::new(HashMap::new()));
    let sockets: SocketIndex = Arc::new(RwLock::new(HashMap::new()));

    // Build Socket.IO layer
    let (socket_layer, io) = SocketIo::builder().build_layer();

    let rooms_sock = rooms.clone();
    let sockets_sock = sockets.clone();
    let config_sock = config.clone();
    io.ns("/", move |socket: socketioxide::extract::SocketRef| {
        let rooms = rooms_sock.clone();
        let sockets = sockets_sock.clone();
        let config = config_sock.clone();
        async move {
            on_connect(socket, rooms, sockets, config).await;
        }
    });

    tokio::spawn(run_session_sweep(rooms.clone(), io.clone(), config.clone()));

    // CORS — allow all origins (the board UI is served elsewhere)
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let rooms_http = rooms.clone();
    let app = Router::new()
        .route("/sync", get(time_sync))
        .route("/health", get(|| async { "board-server ok" }))
        .route(
            "/sessions",
            get(move || {
                let rooms = rooms_http.clone();
                async move {
                    let rooms = rooms.read().await;
                    let listing: Vec<_> = rooms
                        .values()
                        .map(|room| {
                            json!({
                                "id": room.session_id,
                                "formation": room.board().active_formation_id,
                                "version": room.board().version,
                                "seq": room.seq,
                                "online": room.users.iter().filter(|u| u.online).count(),
                                "createdAt": room.created_at,
                            })
                        })
                        .collect();
                    axum::Json(json!({ "sessions": listing }))
                }
            }),
        )
        .layer(socket_layer)
        .layer(cors);

    let addr = format!("0.0.0.0:{}", config.port);
    info!("listening on {addr}");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("failed to bind");
    axum::serve(listener, app).await.expect("server error");
}
