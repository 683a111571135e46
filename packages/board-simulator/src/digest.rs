//! Convergence digests.
//!
//! `BoardState` serializes canonically (BTreeMaps, fixed field order), so
//! two clients holding equal state produce byte-identical JSON and the
//! same SHA-256. Comparing digests instead of structs keeps the telemetry
//! payload small and the mismatch log readable.

use sha2::{Digest, Sha256};

use board_types::BoardState;

pub fn board_digest(state: &BoardState) -> String {
    let bytes = serde_json::to_vec(state).expect("BoardState always serializes");
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    hex::encode(hasher.finalize())
}

#[derive(Debug, Clone)]
pub struct ConvergenceReport {
    pub authority: String,
    /// (client id, digest) for every client that was checked.
    pub clients: Vec<(String, String)>,
    pub converged: bool,
}

/// Compares every client board against the authority's. Offline clients
/// are the caller's business; only hand in boards that should agree.
pub fn check_convergence(
    authority: &BoardState,
    clients: &[(String, BoardState)],
) -> ConvergenceReport {
    let reference = board_digest(authority);
    let clients: Vec<(String, String)> = clients
        .iter()
        .map(|(id, board)| (id.clone(), board_digest(board)))
        .collect();
    let converged = clients.iter().all(|(_, d)| *d == reference);
    ConvergenceReport {
        authority: reference,
        clients,
        converged,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use board_types::FieldPoint;

    fn board() -> BoardState {
        let mut b = BoardState::new("4-4-2");
        b.slot_assignments.insert("gk".into(), "p1".into());
        b.slot_assignments.insert("lcm".into(), "p2".into());
        b.free_positions.insert("p3".into(), FieldPoint::new(40.0, 60.0));
        b.version = 7;
        b
    }

    #[test]
    fn digest_ignores_insertion_order() {
        let a = board();
        let mut b = BoardState::new("4-4-2");
        // Same content, reversed insertion order.
        b.free_positions.insert("p3".into(), FieldPoint::new(40.0, 60.0));
        b.slot_assignments.insert("lcm".into(), "p2".into());
        b.slot_assignments.insert("gk".into(), "p1".into());
        b.version = 7;
        assert_eq!(board_digest(&a), board_digest(&b));
    }

    #[test]
    fn report_flags_the_diverged_client() {
        let authority = board();
        let mut stray = board();
        stray.version = 8;

        let report = check_convergence(
            &authority,
            &[("sim-0".into(), board()), ("sim-1".into(), stray)],
        );
        assert!(!report.converged);
        assert_eq!(report.clients[0].1, report.authority);
        assert_ne!(report.clients[1].1, report.authority);

        let report = check_convergence(&authority, &[("sim-0".into(), board())]);
        assert!(report.converged);
    }
}
