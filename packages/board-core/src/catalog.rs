//! Builtin formation templates.
//!
//! Anchors live in the normalized field frame: x runs 0..100 left to right
//! from the keeper's view, y runs 0..100 from own goal line toward the
//! opponent. Slot order is keeper first, then back to front, left to right,
//! which is also the order assignment uses to break ties.

use std::collections::BTreeSet;

use board_types::{FieldPoint, Formation, FormationSlot, Role};

use crate::error::ApplyError;

/// Lookup table of formations a board can activate. Starts with the
/// builtin set; sessions may register custom templates on top.
#[derive(Debug, Clone)]
pub struct FormationCatalog {
    formations: Vec<Formation>,
}

impl FormationCatalog {
    pub fn builtin() -> Self {
        Self {
            formations: vec![t_442(), t_433(), t_4231(), t_352(), t_532()],
        }
    }

    pub fn get(&self, id: &str) -> Option<&Formation> {
        self.formations.iter().find(|f| f.id == id)
    }

    /// Adds or replaces a template with the same id. Templates must hold
    /// the board invariants: unique slot ids, at most one goalkeeper slot.
    pub fn register(&mut self, formation: Formation) -> Result<(), ApplyError> {
        let mut seen = BTreeSet::new();
        for slot in &formation.slots {
            if !seen.insert(slot.id.as_str()) {
                return Err(ApplyError::DuplicateSlotId(slot.id.clone()));
            }
        }
        let keepers = formation.slots.iter().filter(|s| s.role.is_goalkeeper()).count();
        if keepers > 1 {
            return Err(ApplyError::ExtraGoalkeeper(formation.id.clone()));
        }
        match self.formations.iter_mut().find(|f| f.id == formation.id) {
            Some(existing) => *existing = formation,
            None => self.formations.push(formation),
        }
        Ok(())
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.formations.iter().map(|f| f.id.as_str())
    }

    pub fn len(&self) -> usize {
        self.formations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.formations.is_empty()
    }
}

fn slot(id: &str, role: Role, x: f32, y: f32) -> FormationSlot {
    FormationSlot {
        id: id.into(),
        role,
        anchor: FieldPoint::new(x, y),
    }
}

fn t_442() -> Formation {
    Formation {
        id: "4-4-2".into(),
        name: "4-4-2 Flat".into(),
        slots: vec![
            slot("gk", Role::Gk, 50.0, 4.0),
            slot("lb", Role::Lb, 15.0, 25.0),
            slot("lcb", Role::Cb, 35.0, 20.0),
            slot("rcb", Role::Cb, 65.0, 20.0),
            slot("rb", Role::Rb, 85.0, 25.0),
            slot("lm", Role::Lm, 15.0, 50.0),
            slot("lcm", Role::Cm, 35.0, 45.0),
            slot("rcm", Role::Cm, 65.0, 45.0),
            slot("rm", Role::Rm, 85.0, 50.0),
            slot("ls", Role::St, 35.0, 78.0),
            slot("rs", Role::St, 65.0, 78.0),
        ],
    }
}

fn t_433() -> Formation {
    Formation {
        id: "4-3-3".into(),
        name: "4-3-3".into(),
        slots: vec![
            slot("gk", Role::Gk, 50.0, 4.0),
            slot("lb", Role::Lb, 15.0, 25.0),
            slot("lcb", Role::Cb, 35.0, 20.0),
            slot("rcb", Role::Cb, 65.0, 20.0),
            slot("rb", Role::Rb, 85.0, 25.0),
            slot("cdm", Role::Cdm, 50.0, 38.0),
            slot("lcm", Role::Cm, 30.0, 50.0),
            slot("rcm", Role::Cm, 70.0, 50.0),
            slot("lw", Role::Lw, 15.0, 72.0),
            slot("st", Role::St, 50.0, 80.0),
            slot("rw", Role::Rw, 85.0, 72.0),
        ],
    }
}

fn t_4231() -> Formation {
    Formation {
        id: "4-2-3-1".into(),
        name: "4-2-3-1".into(),
        slots: vec![
            slot("gk", Role::Gk, 50.0, 4.0),
            slot("lb", Role::Lb, 15.0, 25.0),
            slot("lcb", Role::Cb, 35.0, 20.0),
            slot("rcb", Role::Cb, 65.0, 20.0),
            slot("rb", Role::Rb, 85.0, 25.0),
            slot("ldm", Role::Cdm, 35.0, 40.0),
            slot("rdm", Role::Cdm, 65.0, 40.0),
            slot("lam", Role::Lw, 15.0, 60.0),
            slot("cam", Role::Cam, 50.0, 58.0),
            slot("ram", Role::Rw, 85.0, 60.0),
            slot("st", Role::St, 50.0, 80.0),
        ],
    }
}

fn t_352() -> Formation {
    Formation {
        id: "3-5-2".into(),
        name: "3-5-2".into(),
        slots: vec![
            slot("gk", Role::Gk, 50.0, 4.0),
            slot("lcb", Role::Cb, 25.0, 20.0),
            slot("cb", Role::Cb, 50.0, 16.0),
            slot("rcb", Role::Cb, 75.0, 20.0),
            slot("lwb", Role::Lwb, 10.0, 48.0),
            slot("lcm", Role::Cm, 32.0, 45.0),
            slot("cdm", Role::Cdm, 50.0, 36.0),
            slot("rcm", Role::Cm, 68.0, 45.0),
            slot("rwb", Role::Rwb, 90.0, 48.0),
            slot("ls", Role::St, 38.0, 78.0),
            slot("rs", Role::St, 62.0, 78.0),
        ],
    }
}

fn t_532() -> Formation {
    Formation {
        id: "5-3-2".into(),
        name: "5-3-2".into(),
        slots: vec![
            slot("gk", Role::Gk, 50.0, 4.0),
            slot("lwb", Role::Lwb, 10.0, 30.0),
            slot("lcb", Role::Cb, 30.0, 18.0),
            slot("cb", Role::Cb, 50.0, 15.0),
            slot("rcb", Role::Cb, 70.0, 18.0),
            slot("rwb", Role::Rwb, 90.0, 30.0),
            slot("lcm", Role::Cm, 30.0, 48.0),
            slot("cm", Role::Cm, 50.0, 44.0),
            slot("rcm", Role::Cm, 70.0, 48.0),
            slot("ls", Role::St, 38.0, 78.0),
            slot("rs", Role::St, 62.0, 78.0),
        ],
    }
}
