//! main.rs — scripted multi-client board simulator
//!
//! Runs two concurrent loops:
//!   1. Sim loop: advances N scripted clients against an in-process
//!      session authority on a simulated clock, and verifies board
//!      convergence at the end of every quiesce window
//!   2. WebSocket server: control panel on ctrl_port (pause/resume,
//!      speed, scenario presets, live telemetry)
//!
//! A divergence is a hard failure: the run logs both digests and exits
//! non-zero so CI catches it.

mod client_sim;
mod digest;
mod scenarios;

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::Response,
    routing::get,
    Router,
};
use clap::Parser;
use tokio::sync::{broadcast, RwLock};
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info, warn};

use board_core::{FormationCatalog, SessionHub};

use client_sim::{ClientSim, GestureTuning};
use digest::{board_digest, check_convergence};
use scenarios::ScenarioConfig;

// ── CLI ───────────────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "board-sim", about = "Scripted multi-client board session simulator")]
struct Args {
    /// Config file path
    #[arg(short, long, default_value = "config.toml")]
    config: String,
    /// Scenario preset to load on startup (default, contention, churn, cursor_storm)
    #[arg(long)]
    preset: Option<String>,
    /// Override the number of clients
    #[arg(long)]
    clients: Option<usize>,
    /// Override the run seed
    #[arg(long)]
    seed: Option<u64>,
    /// Simulation speed multiplier (1.0 = real-time)
    #[arg(long, default_value = "1.0")]
    speed: f64,
    /// Control panel WebSocket port (overrides config)
    #[arg(long)]
    ctrl_port: Option<u16>,
}

// ── Shared state ──────────────────────────────────────────────────────────────

struct SimState {
    hub: SessionHub,
    clients: Vec<ClientSim>,
    scenario: ScenarioConfig,
    paused: bool,
    tick: u64,
    speed: f64,
    windows_checked: u64,
    /// Telemetry snapshot, broadcast to the control panel each pass
    last_telemetry: Option<serde_json::Value>,
}

type SharedState = Arc<RwLock<SimState>>;

// ── Main ──────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "board_simulator=info".into()),
        )
        .init();

    let args = Args::parse();

    // Load config
    let config_str = std::fs::read_to_string(&args.config)
        .unwrap_or_else(|_| include_str!("../config.toml").to_string());
    let mut cfg: FullConfig = toml::from_str(&config_str).expect("Invalid config.toml");
    if let Some(n) = args.clients {
        cfg.session.n_clients = n;
    }
    if let Some(seed) = args.seed {
        cfg.simulation.seed = seed;
    }

    let scenario = match args.preset.as_deref() {
        Some(name) => scenario_by_name(name, cfg.session.n_clients)
            .unwrap_or_else(|| panic!("unknown preset: {name}")),
        None => ScenarioConfig::default(),
    };

    info!(
        "🎯 Board simulator starting — {} clients on '{}' ({}), seed {}",
        cfg.session.n_clients, cfg.session.id, cfg.session.formation, cfg.simulation.seed
    );

    let (hub, clients) = build_swarm(&cfg);

    let shared: SharedState = Arc::new(RwLock::new(SimState {
        hub,
        clients,
        scenario,
        paused: false,
        tick: 0,
        speed: args.speed,
        windows_checked: 0,
        last_telemetry: None,
    }));

    // Broadcast channel for telemetry (control panel)
    let (telem_tx, _) = broadcast::channel::<String>(64);
    let telem_tx = Arc::new(telem_tx);

    // Spawn sim loop
    let shared_loop = shared.clone();
    let telem_tx_loop = telem_tx.clone();
    let cfg = Arc::new(cfg);
    let cfg_loop = cfg.clone();
    tokio::spawn(async move {
        sim_loop(shared_loop, telem_tx_loop, cfg_loop).await;
    });

    // Control WebSocket server
    let ctrl_port = args.ctrl_port.unwrap_or(cfg.simulation.ctrl_port);
    let ctrl_addr = format!("0.0.0.0:{ctrl_port}");
    info!("🖥  Control panel WebSocket at ws://{ctrl_addr}/ws");

    let app = Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(|| async { "board-sim ok" }))
        .with_state((shared.clone(), telem_tx.clone(), cfg.clone()))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        );

    let listener = tokio::net::TcpListener::bind(&ctrl_addr)
        .await
        .expect("failed to bind control port");
    axum::serve(listener, app).await.expect("control server error");
}

fn build_swarm(cfg: &FullConfig) -> (SessionHub, Vec<ClientSim>) {
    let hub = SessionHub::new(
        &cfg.session.id,
        &cfg.session.formation,
        FormationCatalog::builtin(),
    )
    .expect("formation must exist in the builtin catalog");
    let mut clients: Vec<ClientSim> = (0..cfg.session.n_clients)
        .map(|i| {
            ClientSim::new(
                &hub,
                i,
                cfg.simulation.seed,
                &cfg.session.id,
                &cfg.session.formation,
                &cfg.gestures,
            )
        })
        .collect();
    for client in &mut clients {
        client
            .session
            .connect(0)
            .expect("in-process channel never refuses a connect");
    }
    hub.pump(0);
    for client in &mut clients {
        client.session.tick(0);
    }
    (hub, clients)
}

// ── Simulation loop ───────────────────────────────────────────────────────────

async fn sim_loop(
    state: SharedState,
    telem: Arc<broadcast::Sender<String>>,
    cfg: Arc<FullConfig>,
) {
    let tick_ms = (1000.0 / cfg.simulation.tick_rate_hz).round() as u64;
    let quiesce = cfg.simulation.quiesce_ticks.max(2);
    let drain = cfg.simulation.drain_ticks.min(quiesce / 2);

    info!(
        "⏱ Sim loop at {} Hz, quiesce window {} ticks ({} drain)",
        cfg.simulation.tick_rate_hz, quiesce, drain
    );

    loop {
        let speed = {
            let s = state.read().await;
            if s.paused {
                tokio::time::sleep(Duration::from_millis(tick_ms)).await;
                continue;
            }
            s.speed
        };
        // Wall pacing only; the sim clock below is tick-derived, so a run
        // is identical at any speed.
        tokio::time::sleep(Duration::from_millis(
            ((tick_ms as f64) / speed).max(1.0) as u64,
        ))
        .await;

        let telemetry = {
            let mut s = state.write().await;
            s.tick += 1;
            let tick = s.tick;
            let now_ms = (tick * tick_ms) as i64;
            let quiet = tick % quiesce >= quiesce - drain;

            let scenario = s.scenario.clone();
            for client in &mut s.clients {
                client.step(tick, now_ms, &scenario, &cfg.gestures, quiet);
            }
            s.hub.pump(now_ms);
            for client in &mut s.clients {
                client.session.tick(now_ms);
            }

            // Window boundary: every connected client must hold the
            // authority's exact board.
            if tick % quiesce == quiesce - 1 {
                let authority = s.hub.board();
                let boards: Vec<_> = s
                    .clients
                    .iter()
                    .filter(|c| c.status() == board_core::ConnectionStatus::Connected)
                    .map(|c| (c.user_id.clone(), c.board().clone()))
                    .collect();
                let report = check_convergence(&authority, &boards);
                if !report.converged {
                    error!("💥 divergence at tick {tick}");
                    error!("authority {}", report.authority);
                    for (id, d) in &report.clients {
                        error!("{id} {d}");
                    }
                    std::process::exit(1);
                }
                s.windows_checked += 1;
                info!(
                    "✅ window {} converged ({} clients, seq at v{})",
                    s.windows_checked,
                    report.clients.len(),
                    authority.version
                );
            }

            let telemetry = telemetry_json(&s, tick_ms);
            s.last_telemetry = Some(telemetry.clone());
            if tick % 15 == 0 {
                Some(telemetry.to_string())
            } else {
                None
            }
        };

        if let Some(json) = telemetry {
            let _ = telem.send(json);
        }
    }
}

fn telemetry_json(s: &SimState, tick_ms: u64) -> serde_json::Value {
    let clients_json: Vec<_> = s
        .clients
        .iter()
        .map(|c| {
            serde_json::json!({
                "id": c.user_id,
                "status": format!("{:?}", c.status()),
                "boardVersion": c.board().version,
                "digest": board_digest(c.board()),
                "stats": c.stats.clone(),
            })
        })
        .collect();
    let authority = s.hub.board();
    serde_json::json!({
        "type": "telemetry",
        "tick": s.tick,
        "simTimeMs": s.tick * tick_ms,
        "paused": s.paused,
        "speed": s.speed,
        "windowsChecked": s.windows_checked,
        "scenario": s.scenario.clone(),
        "authority": {
            "formation": authority.active_formation_id.clone(),
            "version": authority.version,
            "digest": board_digest(&authority),
        },
        "clients": clients_json,
    })
}

// ── WebSocket control handler ─────────────────────────────────────────────────

type CtrlState = (SharedState, Arc<broadcast::Sender<String>>, Arc<FullConfig>);

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<CtrlState>) -> Response {
    ws.on_upgrade(move |socket| handle_ws(socket, state))
}

async fn handle_ws(mut socket: WebSocket, (state, telem_tx, cfg): CtrlState) {
    let mut telem_rx = telem_tx.subscribe();

    // Send current state immediately on connect
    if let Some(telem) = state.read().await.last_telemetry.as_ref() {
        let _ = socket.send(Message::Text(telem.to_string())).await;
    }

    loop {
        tokio::select! {
            // Relay telemetry to client
            Ok(msg) = telem_rx.recv() => {
                if socket.send(Message::Text(msg)).await.is_err() { break; }
            }
            // Handle commands from the control panel
            Some(Ok(Message::Text(cmd))) = socket.recv() => {
                handle_command(&state, &cfg, &cmd).await;
            }
            else => break,
        }
    }
}

/// Handle commands from the control panel.
/// Commands are JSON: { "cmd": "...", "args": {...} }
async fn handle_command(state: &SharedState, cfg: &FullConfig, raw: &str) {
    let v: serde_json::Value = match serde_json::from_str(raw) {
        Ok(v) => v,
        Err(_) => return,
    };
    let cmd = v["cmd"].as_str().unwrap_or("");
    match cmd {
        "pause" => {
            state.write().await.paused = true;
            info!("⏸ Sim paused");
        }
        "resume" => {
            state.write().await.paused = false;
            info!("▶ Sim resumed");
        }
        "reset" => {
            let (hub, clients) = build_swarm(cfg);
            let mut s = state.write().await;
            s.hub = hub;
            s.clients = clients;
            s.tick = 0;
            s.windows_checked = 0;
            info!("↺ Sim reset");
        }
        "set_speed" => {
            if let Some(sp) = v["args"]["speed"].as_f64() {
                state.write().await.speed = sp.clamp(0.1, 20.0);
                info!("⚡ Sim speed set to {sp}×");
            }
        }
        "set_scenario" => {
            if let Ok(sc) = serde_json::from_value::<ScenarioConfig>(v["args"].clone()) {
                state.write().await.scenario = sc;
                info!("🎭 Scenario updated");
            }
        }
        "preset" => {
            let preset = v["args"]["name"].as_str().unwrap_or("");
            let n_clients = state.read().await.clients.len();
            let Some(sc) = scenario_by_name(preset, n_clients) else {
                warn!("Unknown preset: {preset}");
                return;
            };
            state.write().await.scenario = sc;
            info!("🎭 Preset '{preset}' loaded");
        }
        _ => warn!("Unknown control command: {cmd}"),
    }
}

fn scenario_by_name(name: &str, n_clients: usize) -> Option<ScenarioConfig> {
    match name {
        "default" => Some(scenarios::preset_default()),
        "contention" => Some(scenarios::preset_contention()),
        "churn" => Some(scenarios::preset_churn(n_clients)),
        "cursor_storm" => Some(scenarios::preset_cursor_storm()),
        _ => None,
    }
}

// ── Config structs ────────────────────────────────────────────────────────────

#[derive(Debug, serde::Deserialize)]
struct FullConfig {
    session: SessionCfg,
    simulation: SimTimingCfg,
    gestures: GestureTuning,
}

#[derive(Debug, serde::Deserialize)]
struct SessionCfg {
    id: String,
    formation: String,
    n_clients: usize,
}

#[derive(Debug, serde::Deserialize)]
struct SimTimingCfg {
    tick_rate_hz: f64,
    /// Window length; clients go quiet for the last `drain_ticks` of it so
    /// in-flight operations settle before the convergence check.
    quiesce_ticks: u64,
    drain_ticks: u64,
    seed: u64,
    ctrl_port: u16,
}
