//! Injectable collaboration scenarios.
//!
//! Each scenario stresses one convergence property of the engine:
//! last-write-wins under contention, resync after churn, and the cursor
//! throttle under a storm. Scenarios are swappable at runtime via the
//! WebSocket control API, and every one of them must leave all clients on
//! an identical board after the next quiesce window.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ScenarioKind {
    /// Every client drags a different player onto the same slot.
    Contention,
    /// Selected clients drop their link periodically and rejoin, forcing
    /// the welcome/resync path.
    Churn,
    /// Clients emit cursor updates far above the outbound throttle cap.
    CursorStorm,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioConfig {
    pub active: Vec<ScenarioKind>,
    /// The fought-over slot under `Contention`. The keeper slot exists in
    /// every builtin formation.
    pub contention_slot: String,
    /// Client indexes that churn.
    pub churn_clients: Vec<usize>,
    pub churn_period_ticks: u64,
    pub churn_offline_ticks: u64,
    /// Cursor calls per tick under `CursorStorm`; at 30 Hz a value of 4
    /// asks for 120/sec against the 60/sec cap.
    pub storm_per_tick: u32,
}

impl Default for ScenarioConfig {
    fn default() -> Self {
        Self {
            active: vec![],
            contention_slot: "gk".to_owned(),
            churn_clients: vec![],
            churn_period_ticks: 150,
            churn_offline_ticks: 24,
            storm_per_tick: 4,
        }
    }
}

impl ScenarioConfig {
    pub fn has(&self, kind: &ScenarioKind) -> bool {
        self.active.contains(kind)
    }

    pub fn churns(&self, client_index: usize) -> bool {
        self.has(&ScenarioKind::Churn) && self.churn_clients.contains(&client_index)
    }
}

/// Predefined presets selectable from the control panel.
pub fn preset_default() -> ScenarioConfig {
    ScenarioConfig::default()
}

pub fn preset_contention() -> ScenarioConfig {
    ScenarioConfig {
        active: vec![ScenarioKind::Contention],
        ..Default::default()
    }
}

pub fn preset_churn(n_clients: usize) -> ScenarioConfig {
    ScenarioConfig {
        active: vec![ScenarioKind::Churn],
        // Every other client drops; at least one stays to keep the room
        // moving while the others are away.
        churn_clients: (0..n_clients).step_by(2).skip(1).collect(),
        ..Default::default()
    }
}

pub fn preset_cursor_storm() -> ScenarioConfig {
    ScenarioConfig {
        active: vec![ScenarioKind::CursorStorm],
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn presets_activate_what_they_name() {
        assert!(preset_default().active.is_empty());
        assert!(preset_contention().has(&ScenarioKind::Contention));
        assert!(preset_cursor_storm().has(&ScenarioKind::CursorStorm));

        let churn = preset_churn(6);
        assert!(churn.has(&ScenarioKind::Churn));
        assert_eq!(churn.churn_clients, vec![2, 4]);
        assert!(churn.churns(2));
        assert!(!churn.churns(0), "client 0 stays online");
    }

    #[test]
    fn default_scenario_churns_nobody() {
        let sc = ScenarioConfig::default();
        for i in 0..8 {
            assert!(!sc.churns(i));
        }
    }
}
