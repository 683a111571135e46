//! Greedy weighted player/slot matching.
//!
//! Candidate pairs are scored by role affinity, sorted by score,
//! then rating, then ids, and taken greedily. The whole run is pure
//! arithmetic over a fixed table, so the same inputs always produce the
//! same lineup.

use std::collections::{BTreeMap, BTreeSet};

use board_types::{Formation, Player, Role, RoleCategory};
use tracing::debug;

/// Result of one matching run. Shortfalls are data, not errors: an
/// undersized roster shows up as `unfilled` slots and the board stays
/// usable.
#[derive(Debug, Clone, PartialEq)]
pub struct SlotAssignment {
    /// slot id to player id.
    pub slot_map: BTreeMap<String, String>,
    /// Slots left empty, in formation order.
    pub unfilled: Vec<String>,
    /// Available players left over, ordered by id.
    pub unassigned: Vec<String>,
}

impl SlotAssignment {
    pub fn is_complete(&self) -> bool {
        self.unfilled.is_empty()
    }
}

/// Affinity of one role tag for a slot role. `None` marks the pairing
/// ineligible; keepers never cross into outfield slots or vice versa.
pub fn role_affinity(tag: Role, slot_role: Role) -> Option<f32> {
    use Role::*;

    if tag == slot_role {
        return Some(1.0);
    }
    if tag.is_goalkeeper() != slot_role.is_goalkeeper() {
        return None;
    }

    // Wide mid and winger on the same flank are near-interchangeable.
    const WING: [(Role, Role); 2] = [(Lm, Lw), (Rm, Rw)];
    // Cross-line neighbours that fit better than line distance suggests.
    const ADJACENT: [(Role, Role); 6] = [
        (Cb, Cdm),
        (Cam, Cf),
        (Lb, Lm),
        (Rb, Rm),
        (Lwb, Lw),
        (Rwb, Rw),
    ];

    let holds = |table: &[(Role, Role)]| {
        table
            .iter()
            .any(|&(a, b)| (a, b) == (tag, slot_role) || (b, a) == (tag, slot_role))
    };

    if holds(&WING) {
        return Some(0.9);
    }

    let (tc, sc) = (tag.category(), slot_role.category());
    if tc == sc {
        return Some(0.8);
    }
    if holds(&ADJACENT) {
        return Some(0.7);
    }
    let lines = |c: RoleCategory| match c {
        RoleCategory::Goalkeeper => 0_i8,
        RoleCategory::Defense => 1,
        RoleCategory::Midfield => 2,
        RoleCategory::Attack => 3,
    };
    if (lines(tc) - lines(sc)).abs() == 1 {
        Some(0.5)
    } else {
        Some(0.2)
    }
}

/// Best affinity across all of the player's role tags.
fn player_affinity(player: &Player, slot_role: Role) -> Option<f32> {
    player
        .roles
        .iter()
        .filter_map(|&tag| role_affinity(tag, slot_role))
        .max_by(f32::total_cmp)
}

struct Candidate<'a> {
    score: f32,
    rating: u8,
    player_id: &'a str,
    slot_index: usize,
}

/// Fills `formation` from the available part of `roster`. Injured and
/// suspended players never enter the pool; they are not reported in
/// `unassigned` either.
pub fn assign(formation: &Formation, roster: &[Player]) -> SlotAssignment {
    let pool: Vec<&Player> = roster.iter().filter(|p| p.is_available()).collect();

    let mut candidates = Vec::with_capacity(pool.len() * formation.slots.len());
    for (slot_index, slot) in formation.slots.iter().enumerate() {
        for player in &pool {
            if let Some(score) = player_affinity(player, slot.role) {
                candidates.push(Candidate {
                    score,
                    rating: player.rating,
                    player_id: &player.id,
                    slot_index,
                });
            }
        }
    }
    candidates.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| b.rating.cmp(&a.rating))
            .then_with(|| a.player_id.cmp(b.player_id))
            .then_with(|| a.slot_index.cmp(&b.slot_index))
    });

    let mut slot_map = BTreeMap::new();
    let mut taken_players = BTreeSet::new();
    let mut filled_slots = BTreeSet::new();
    for c in &candidates {
        if taken_players.contains(c.player_id) || filled_slots.contains(&c.slot_index) {
            continue;
        }
        slot_map.insert(formation.slots[c.slot_index].id.clone(), c.player_id.to_owned());
        taken_players.insert(c.player_id);
        filled_slots.insert(c.slot_index);
    }

    let unfilled: Vec<String> = formation
        .slots
        .iter()
        .enumerate()
        .filter(|(i, _)| !filled_slots.contains(i))
        .map(|(_, s)| s.id.clone())
        .collect();
    let unassigned: Vec<String> = pool
        .iter()
        .filter(|p| !taken_players.contains(p.id.as_str()))
        .map(|p| p.id.clone())
        .collect();

    if !unfilled.is_empty() {
        debug!(
            formation = %formation.id,
            missing = unfilled.len(),
            "roster cannot fill the formation"
        );
    }

    SlotAssignment {
        slot_map,
        unfilled,
        unassigned,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::FormationCatalog;

    fn player(id: &str, rating: u8, roles: &[Role]) -> Player {
        Player {
            id: id.into(),
            name: id.to_ascii_uppercase(),
            rating,
            roles: roles.to_vec(),
            injured: false,
            suspended: false,
        }
    }

    fn full_442_roster() -> Vec<Player> {
        vec![
            player("p-gk", 80, &[Role::Gk]),
            player("p-lb", 78, &[Role::Lb]),
            player("p-cb1", 82, &[Role::Cb]),
            player("p-cb2", 81, &[Role::Cb]),
            player("p-rb", 77, &[Role::Rb]),
            player("p-lm", 79, &[Role::Lm]),
            player("p-cm1", 84, &[Role::Cm]),
            player("p-cm2", 80, &[Role::Cm]),
            player("p-rm", 78, &[Role::Rm]),
            player("p-st1", 86, &[Role::St]),
            player("p-st2", 83, &[Role::St]),
        ]
    }

    #[test]
    fn full_matching_roster_fills_every_slot() {
        let catalog = FormationCatalog::builtin();
        let f = catalog.get("4-4-2").unwrap();
        let a = assign(f, &full_442_roster());
        assert!(a.is_complete());
        assert_eq!(a.slot_map.len(), 11);
        assert!(a.unassigned.is_empty());
        assert_eq!(a.slot_map["gk"], "p-gk");
        assert_eq!(a.slot_map["lb"], "p-lb");
        assert_eq!(a.slot_map["rm"], "p-rm");
    }

    #[test]
    fn short_roster_reports_unfilled_not_failure() {
        let catalog = FormationCatalog::builtin();
        let f = catalog.get("4-4-2").unwrap();
        let mut roster = full_442_roster();
        roster.truncate(9);
        let a = assign(f, &roster);
        assert_eq!(a.slot_map.len(), 9);
        assert_eq!(a.unfilled.len(), 2);
        assert!(a.unassigned.is_empty());
        let placed: BTreeSet<_> = a.slot_map.values().collect();
        assert_eq!(placed.len(), 9, "every placed player appears once");
    }

    #[test]
    fn unavailable_players_never_enter_the_pool() {
        let catalog = FormationCatalog::builtin();
        let f = catalog.get("4-4-2").unwrap();
        let mut roster = full_442_roster();
        roster[10].injured = true;
        roster[9].suspended = true;
        let a = assign(f, &roster);
        assert!(!a.slot_map.values().any(|p| p == "p-st1" || p == "p-st2"));
        assert!(!a.unassigned.contains(&"p-st1".to_owned()));
        // The nine survivors keep their strongest slots; both striker
        // stations go empty.
        assert_eq!(a.unfilled, vec!["ls".to_owned(), "rs".to_owned()]);
    }

    #[test]
    fn keeper_tags_never_fill_outfield_slots() {
        let catalog = FormationCatalog::builtin();
        let f = catalog.get("4-3-3").unwrap();
        let mut roster = full_442_roster();
        // A second keeper instead of a striker: nothing outfield may take
        // them, so they stay in the pool.
        roster[10] = player("p-gk2", 90, &[Role::Gk]);
        let a = assign(f, &roster);
        assert_eq!(a.slot_map["gk"], "p-gk2", "higher rating wins the keeper slot");
        assert!(a.unassigned.contains(&"p-gk".to_owned()));
        assert!(!a.slot_map.values().any(|p| p == "p-gk"));
    }

    #[test]
    fn exact_role_beats_higher_rated_neighbour() {
        let catalog = FormationCatalog::builtin();
        let f = catalog.get("4-3-3").unwrap();
        let roster = vec![
            player("p-nat", 70, &[Role::St]),
            player("p-star", 95, &[Role::Cam]),
        ];
        let a = assign(f, &roster);
        assert_eq!(a.slot_map["st"], "p-nat");
    }

    #[test]
    fn rating_breaks_equal_affinity() {
        let catalog = FormationCatalog::builtin();
        let f = catalog.get("4-3-3").unwrap();
        let roster = vec![
            player("p-low", 70, &[Role::St]),
            player("p-high", 90, &[Role::St]),
        ];
        let a = assign(f, &roster);
        assert_eq!(a.slot_map["st"], "p-high");
        // The leftover striker still lands somewhere in the attack line.
        let other = a.slot_map.iter().find(|(_, p)| *p == "p-low");
        assert!(matches!(other, Some((s, _)) if s == "lw" || s == "rw"));
    }

    #[test]
    fn identical_candidates_resolve_by_id_then_slot_order() {
        let catalog = FormationCatalog::builtin();
        let f = catalog.get("4-4-2").unwrap();
        let roster = vec![
            player("pa", 80, &[Role::St]),
            player("pb", 80, &[Role::St]),
        ];
        let a = assign(f, &roster);
        assert_eq!(a.slot_map["ls"], "pa");
        assert_eq!(a.slot_map["rs"], "pb");
    }

    #[test]
    fn repeated_runs_are_identical() {
        let catalog = FormationCatalog::builtin();
        let f = catalog.get("3-5-2").unwrap();
        let mut roster = full_442_roster();
        roster.push(player("p-extra1", 75, &[Role::Cdm, Role::Cb]));
        roster.push(player("p-extra2", 75, &[Role::Rwb]));
        let first = assign(f, &roster);
        for _ in 0..5 {
            assert_eq!(assign(f, &roster), first);
        }
    }

    #[test]
    fn wing_affinity_outranks_same_line_fallback() {
        assert_eq!(role_affinity(Role::Lm, Role::Lw), Some(0.9));
        assert_eq!(role_affinity(Role::Cm, Role::Lw), Some(0.5));
        assert_eq!(role_affinity(Role::Cb, Role::Cdm), Some(0.7));
        assert_eq!(role_affinity(Role::Cb, Role::Lb), Some(0.8));
        assert_eq!(role_affinity(Role::Cb, Role::St), Some(0.2));
        assert_eq!(role_affinity(Role::Gk, Role::Cb), None);
        assert_eq!(role_affinity(Role::St, Role::Gk), None);
    }
}
