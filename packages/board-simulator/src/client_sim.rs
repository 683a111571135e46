//! One scripted board client.
//!
//! Each client is a real `BoardSession` over a `MemoryChannel` — the same
//! engine the UI embeds, not a mock. The script advances once per tick:
//! multi-tick drag gestures with Gaussian path jitter, periodic undo/redo
//! and formation switches, and a cursor stream. Everything draws from a
//! per-client seeded RNG, so a run is reproducible from its seed.

use std::collections::VecDeque;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};
use tracing::debug;

use board_core::{
    BoardSession, ConnectionStatus, DragConfig, DragOutcome, FormationCatalog, MemoryChannel,
    SessionConfig, SessionHub, SyncConfig,
};
use board_types::{BoardState, FieldPoint, Player, Role};

use crate::scenarios::{ScenarioConfig, ScenarioKind};

// ── Tuning (populated from config.toml [gestures]) ────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct GestureTuning {
    /// Pointer-move ticks per drag.
    pub drag_ticks: u32,
    /// Std-dev of the Gaussian path jitter, field units.
    pub jitter_sd: f32,
    pub op_period_ticks: u64,
    pub undo_period_ticks: u64,
    pub formation_period_ticks: u64,
    pub cursor_period_ticks: u64,
}

impl Default for GestureTuning {
    fn default() -> Self {
        Self {
            drag_ticks: 6,
            jitter_sd: 1.5,
            op_period_ticks: 18,
            undo_period_ticks: 90,
            formation_period_ticks: 240,
            cursor_period_ticks: 2,
        }
    }
}

// ── Stats ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientStats {
    pub ops_committed: u64,
    pub drags_cancelled: u64,
    pub undos: u64,
    pub redos: u64,
    pub formation_changes: u64,
    pub cursor_calls: u64,
    pub reconnects: u64,
}

// ── Client ────────────────────────────────────────────────────────────────────

struct Gesture {
    path: VecDeque<FieldPoint>,
}

pub struct ClientSim {
    pub index: usize,
    pub user_id: String,
    pub session: BoardSession<MemoryChannel>,
    pub stats: ClientStats,
    rng: StdRng,
    jitter: Normal<f32>,
    formation_ids: Vec<String>,
    gesture: Option<Gesture>,
    /// Tick at which a churned client reconnects.
    offline_until: Option<u64>,
}

impl ClientSim {
    pub fn new(
        hub: &SessionHub,
        index: usize,
        seed: u64,
        session_id: &str,
        formation_id: &str,
        tuning: &GestureTuning,
    ) -> Self {
        let user_id = format!("sim-{index}");
        let catalog = FormationCatalog::builtin();
        let formation_ids = catalog.ids().map(str::to_owned).collect();
        let cfg = SessionConfig {
            session_id: session_id.to_owned(),
            user_id: user_id.clone(),
            user_name: format!("Sim {index}"),
            formation_id: formation_id.to_owned(),
            drag: DragConfig::default(),
            sync: SyncConfig::default(),
        };
        let session = BoardSession::new(hub.channel(&user_id), cfg, demo_roster(), catalog, 0)
            .expect("builtin formation");
        Self {
            index,
            user_id,
            session,
            stats: ClientStats::default(),
            rng: StdRng::seed_from_u64(seed.wrapping_add(index as u64)),
            jitter: Normal::new(0.0, tuning.jitter_sd.max(0.01)).expect("finite jitter sd"),
            formation_ids,
            gesture: None,
            offline_until: None,
        }
    }

    pub fn status(&self) -> ConnectionStatus {
        self.session.status()
    }

    pub fn board(&self) -> &BoardState {
        self.session.board()
    }

    /// Advances the script one tick. `quiet` suppresses new actions so a
    /// quiesce window can drain; an in-flight gesture still runs to its
    /// release, and churned clients still reconnect on schedule.
    pub fn step(
        &mut self,
        tick: u64,
        now_ms: i64,
        scenario: &ScenarioConfig,
        tuning: &GestureTuning,
        quiet: bool,
    ) {
        // Churn first: an offline client does nothing but wait.
        if let Some(until) = self.offline_until {
            if tick < until {
                return;
            }
            self.offline_until = None;
            if self.session.connect(now_ms).is_ok() {
                self.stats.reconnects += 1;
                debug!(client = %self.user_id, tick, "reconnected");
            }
            return;
        }
        if scenario.churns(self.index)
            && !quiet
            && self.gesture.is_none()
            && tick > 0
            && tick % scenario.churn_period_ticks == (self.index as u64 * 7) % scenario.churn_period_ticks
        {
            self.session.disconnect();
            self.offline_until = Some(tick + scenario.churn_offline_ticks);
            debug!(client = %self.user_id, tick, "dropped link");
            return;
        }

        // An active gesture always runs to completion, quiet or not.
        if let Some(gesture) = self.gesture.as_mut() {
            match gesture.path.pop_front() {
                Some(at) => {
                    self.session.pointer_move(at);
                }
                None => {
                    match self.session.pointer_up(now_ms) {
                        DragOutcome::Committed(_) => self.stats.ops_committed += 1,
                        DragOutcome::Cancelled { .. } => self.stats.drags_cancelled += 1,
                        DragOutcome::Ignored => {}
                    }
                    self.gesture = None;
                }
            }
            return;
        }

        if quiet {
            return;
        }

        // Until someone fills the board there is nothing to drag; the
        // first client seeds it.
        if self.session.board().placed_count() == 0 {
            if self.index == 0 && self.session.auto_assign(now_ms).is_ok() {
                self.stats.ops_committed += 1;
            }
            return;
        }

        self.emit_cursor(tick, now_ms, scenario, tuning);

        if tick % tuning.formation_period_ticks == (self.index as u64 * 31) % tuning.formation_period_ticks {
            let id = self.formation_ids[self.rng.gen_range(0..self.formation_ids.len())].clone();
            if self.session.change_formation(&id, now_ms).is_ok() {
                self.stats.formation_changes += 1;
            }
        } else if tick % tuning.undo_period_ticks == (self.index as u64 * 13) % tuning.undo_period_ticks {
            if self.rng.gen_bool(0.5) {
                if self.session.undo() {
                    self.stats.undos += 1;
                }
            } else if self.session.redo() {
                self.stats.redos += 1;
            }
        } else if tick % tuning.op_period_ticks == (self.index as u64 * 5) % tuning.op_period_ticks {
            self.start_gesture(scenario, tuning);
        }
    }

    fn emit_cursor(
        &mut self,
        tick: u64,
        now_ms: i64,
        scenario: &ScenarioConfig,
        tuning: &GestureTuning,
    ) {
        if scenario.has(&ScenarioKind::CursorStorm) {
            // Well above the outbound cap; the synchronizer's throttle has
            // to absorb the excess.
            for _ in 0..scenario.storm_per_tick {
                let at = self.random_point();
                self.session.cursor_moved(at, now_ms);
                self.stats.cursor_calls += 1;
            }
        } else if tick % tuning.cursor_period_ticks == 0 {
            let at = self.random_point();
            self.session.cursor_moved(at, now_ms);
            self.stats.cursor_calls += 1;
        }
    }

    /// Picks a placed token, picks a target anchor, and lays out a
    /// jittered multi-tick pointer path between them. The final point is
    /// exact so the drop lands inside the target's snap radius.
    fn start_gesture(&mut self, scenario: &ScenarioConfig, tuning: &GestureTuning) {
        let board = self.session.board();
        let formation = self.session.formation();

        let mut tokens: Vec<FieldPoint> = board
            .slot_assignments
            .keys()
            .filter_map(|slot_id| formation.slot(slot_id).map(|s| s.anchor))
            .collect();
        tokens.extend(board.free_positions.values().copied());
        if tokens.is_empty() {
            return;
        }
        let from = tokens[self.rng.gen_range(0..tokens.len())];

        let to = if scenario.has(&ScenarioKind::Contention) {
            match formation.slot(&scenario.contention_slot) {
                Some(slot) => slot.anchor,
                None => return,
            }
        } else {
            formation.slots[self.rng.gen_range(0..formation.slots.len())].anchor
        };

        if self.session.pointer_down(from).is_none() {
            return;
        }
        let steps = tuning.drag_ticks.max(1);
        let mut path = VecDeque::with_capacity(steps as usize);
        for i in 1..steps {
            let t = i as f32 / steps as f32;
            let at = FieldPoint::new(
                from.x + (to.x - from.x) * t + self.jitter.sample(&mut self.rng),
                from.y + (to.y - from.y) * t + self.jitter.sample(&mut self.rng),
            )
            .clamped();
            path.push_back(at);
        }
        path.push_back(to);
        self.gesture = Some(Gesture { path });
    }

    fn random_point(&mut self) -> FieldPoint {
        FieldPoint::new(self.rng.gen_range(0.0..100.0), self.rng.gen_range(0.0..100.0))
    }
}

/// Eleven starters plus bench cover so every builtin formation fills.
pub fn demo_roster() -> Vec<Player> {
    let p = |id: &str, name: &str, rating: u8, roles: Vec<Role>| Player {
        id: id.into(),
        name: name.into(),
        rating,
        roles,
        injured: false,
        suspended: false,
    };
    vec![
        p("p01", "Keller", 82, vec![Role::Gk]),
        p("p02", "Ibáñez", 79, vec![Role::Lb, Role::Lwb]),
        p("p03", "Okafor", 84, vec![Role::Cb]),
        p("p04", "Brandt", 81, vec![Role::Cb]),
        p("p05", "Sarr", 78, vec![Role::Rb, Role::Rwb]),
        p("p06", "Vidal", 83, vec![Role::Cdm, Role::Cm]),
        p("p07", "Moreau", 85, vec![Role::Cm, Role::Cam]),
        p("p08", "Tanaka", 80, vec![Role::Lm, Role::Lw]),
        p("p09", "Nkunku", 82, vec![Role::Rm, Role::Rw]),
        p("p10", "Ostrowski", 86, vec![Role::St, Role::Cf]),
        p("p11", "Djalo", 83, vec![Role::St]),
        p("p12", "Marino", 77, vec![Role::Cm]),
        p("p13", "Huang", 76, vec![Role::Cb, Role::Rb]),
        p("p14", "Acosta", 78, vec![Role::Cam, Role::Cf]),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scenarios::{preset_churn, preset_contention, preset_cursor_storm};
    use board_core::FormationCatalog;

    const TICK_MS: i64 = 33;

    fn swarm(n: usize, seed: u64) -> (SessionHub, Vec<ClientSim>, GestureTuning) {
        let hub = SessionHub::new("sim", "4-4-2", FormationCatalog::builtin()).unwrap();
        let tuning = GestureTuning::default();
        let mut clients: Vec<ClientSim> = (0..n)
            .map(|i| ClientSim::new(&hub, i, seed, "sim", "4-4-2", &tuning))
            .collect();
        for c in &mut clients {
            c.session.connect(0).unwrap();
        }
        hub.pump(0);
        for c in &mut clients {
            c.session.tick(0);
        }
        (hub, clients, tuning)
    }

    /// Drives the swarm for `ticks`, quiescing the tail of each window,
    /// and asserts every connected client matches the authority at each
    /// window boundary.
    fn run_and_check(
        hub: &SessionHub,
        clients: &mut [ClientSim],
        tuning: &GestureTuning,
        scenario: &ScenarioConfig,
        ticks: u64,
    ) -> usize {
        const WINDOW: u64 = 120;
        const DRAIN: u64 = 30;
        let mut checks = 0;
        for tick in 1..=ticks {
            let now = tick as i64 * TICK_MS;
            let quiet = tick % WINDOW >= WINDOW - DRAIN;
            for c in clients.iter_mut() {
                c.step(tick, now, scenario, tuning, quiet);
            }
            hub.pump(now);
            for c in clients.iter_mut() {
                c.session.tick(now);
            }
            if tick % WINDOW == WINDOW - 1 {
                let authority = hub.board();
                for c in clients.iter() {
                    if c.status() == ConnectionStatus::Connected {
                        assert_eq!(
                            c.board(),
                            &authority,
                            "client {} diverged at tick {tick}",
                            c.user_id
                        );
                    }
                }
                checks += 1;
            }
        }
        checks
    }

    #[test]
    fn default_swarm_converges_every_window() {
        let (hub, mut clients, tuning) = swarm(3, 42);
        let scenario = ScenarioConfig::default();
        let checks = run_and_check(&hub, &mut clients, &tuning, &scenario, 480);
        assert_eq!(checks, 4);
        let total_ops: u64 = clients.iter().map(|c| c.stats.ops_committed).sum();
        assert!(total_ops > 0, "the script actually did things");
    }

    #[test]
    fn contention_swarm_settles_on_one_winner_per_window() {
        let (hub, mut clients, tuning) = swarm(4, 7);
        let scenario = preset_contention();
        run_and_check(&hub, &mut clients, &tuning, &scenario, 480);
        // The fought-over slot holds exactly one player and every client
        // agrees who it is.
        let authority = hub.board();
        let winner = authority.occupant("gk");
        assert!(winner.is_some());
        for c in &clients {
            assert_eq!(c.board().occupant("gk"), winner);
        }
    }

    #[test]
    fn churned_clients_rejoin_and_reconverge() {
        let (hub, mut clients, tuning) = swarm(4, 99);
        let scenario = preset_churn(4);
        run_and_check(&hub, &mut clients, &tuning, &scenario, 600);
        let reconnects: u64 = clients.iter().map(|c| c.stats.reconnects).sum();
        assert!(reconnects > 0, "churn actually dropped a link");
        // Everyone is back online and identical at the end.
        let authority = hub.board();
        for c in &mut clients {
            assert_eq!(c.status(), ConnectionStatus::Connected);
            assert_eq!(c.board(), &authority);
        }
    }

    #[test]
    fn cursor_storm_does_not_disturb_the_board() {
        let (hub, mut clients, tuning) = swarm(3, 5);
        let scenario = preset_cursor_storm();
        let before_checks = run_and_check(&hub, &mut clients, &tuning, &scenario, 240);
        assert!(before_checks > 0);
        let calls: u64 = clients.iter().map(|c| c.stats.cursor_calls).sum();
        assert!(calls > 100, "the storm really ran");
    }

    #[test]
    fn same_seed_same_story() {
        let (hub_a, mut a, tuning) = swarm(3, 1234);
        let (hub_b, mut b, _) = swarm(3, 1234);
        let scenario = ScenarioConfig::default();
        run_and_check(&hub_a, &mut a, &tuning, &scenario, 360);
        run_and_check(&hub_b, &mut b, &tuning, &scenario, 360);
        assert_eq!(hub_a.board(), hub_b.board());
        for (ca, cb) in a.iter().zip(&b) {
            assert_eq!(ca.stats.ops_committed, cb.stats.ops_committed);
        }
    }
}
