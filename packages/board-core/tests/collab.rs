//! Multi-client convergence over the in-process session hub.
//!
//! Every test drives two or three full sessions against one authority and
//! pumps message delivery by hand, so interleavings that would be racy on
//! a real wire are exact here.

use board_core::{
    BoardSession, ConnectionStatus, DesyncReason, DragConfig, FormationCatalog, MemoryChannel,
    SessionConfig, SessionHub, SyncConfig, SyncEvent,
};
use board_types::{FieldPoint, Player, Role};

fn roster_of_nine() -> Vec<Player> {
    let p = |id: &str, rating: u8, role: Role| Player {
        id: id.into(),
        name: id.to_ascii_uppercase(),
        rating,
        roles: vec![role],
        injured: false,
        suspended: false,
    };
    vec![
        p("p-gk", 80, Role::Gk),
        p("p-lb", 78, Role::Lb),
        p("p-cb1", 82, Role::Cb),
        p("p-cb2", 81, Role::Cb),
        p("p-rb", 77, Role::Rb),
        p("p-lm", 79, Role::Lm),
        p("p-cm1", 84, Role::Cm),
        p("p-cm2", 80, Role::Cm),
        p("p-rm", 78, Role::Rm),
    ]
}

fn hub() -> SessionHub {
    SessionHub::new("s-tactics", "4-4-2", FormationCatalog::builtin()).unwrap()
}

fn session(hub: &SessionHub, user_id: &str, name: &str) -> BoardSession<MemoryChannel> {
    let cfg = SessionConfig {
        session_id: "s-tactics".into(),
        user_id: user_id.into(),
        user_name: name.into(),
        formation_id: "4-4-2".into(),
        drag: DragConfig::default(),
        sync: SyncConfig::default(),
    };
    BoardSession::new(
        hub.channel(user_id),
        cfg,
        roster_of_nine(),
        FormationCatalog::builtin(),
        0,
    )
    .unwrap()
}

fn connected(hub: &SessionHub, user_id: &str, name: &str) -> BoardSession<MemoryChannel> {
    let mut s = session(hub, user_id, name);
    s.connect(0).unwrap();
    hub.pump(0);
    s.tick(0);
    assert_eq!(s.status(), ConnectionStatus::Connected);
    s
}

fn settle(hub: &SessionHub, sessions: &mut [&mut BoardSession<MemoryChannel>], now_ms: i64) {
    hub.pump(now_ms);
    for s in sessions.iter_mut() {
        s.tick(now_ms);
    }
}

#[track_caller]
fn assert_converged(hub: &SessionHub, sessions: &[&BoardSession<MemoryChannel>]) {
    let authority = hub.board();
    for s in sessions {
        assert_eq!(
            s.board(),
            &authority,
            "client {} diverged from the authority",
            s.user_id()
        );
    }
}

fn anchor(s: &BoardSession<MemoryChannel>, slot: &str) -> FieldPoint {
    s.formation().slot(slot).unwrap().anchor
}

fn drag_to_slot(s: &mut BoardSession<MemoryChannel>, from: &str, to: &str, now_ms: i64) {
    let start = anchor(s, from);
    let end = anchor(s, to);
    assert!(s.pointer_down(start).is_some(), "no token at {from}");
    s.pointer_move(end);
    s.pointer_up(now_ms);
}

#[test]
fn concurrent_disjoint_moves_apply_on_every_board() {
    let hub = hub();
    let mut ana = connected(&hub, "ua", "Ana");
    let mut ben = connected(&hub, "ub", "Ben");
    let mut obs = connected(&hub, "uc", "Obs");

    ana.auto_assign(10).unwrap();
    settle(&hub, &mut [&mut ana, &mut ben, &mut obs], 20);
    assert_converged(&hub, &[&ana, &ben, &obs]);
    // Nine players on eleven slots: both striker stations are open.
    assert_eq!(hub.board().occupant("ls"), None);
    assert_eq!(hub.board().occupant("rs"), None);

    // Before any delivery, each mover only sees their own edit.
    let lcm_player = ana.board().occupant("lcm").unwrap().to_owned();
    let rcm_player = ben.board().occupant("rcm").unwrap().to_owned();
    drag_to_slot(&mut ana, "lcm", "ls", 30);
    drag_to_slot(&mut ben, "rcm", "rs", 30);
    assert_eq!(ana.board().occupant("rs"), None);
    assert_eq!(ben.board().occupant("ls"), None);

    settle(&hub, &mut [&mut ana, &mut ben, &mut obs], 40);
    assert_converged(&hub, &[&ana, &ben, &obs]);
    assert_eq!(hub.board().occupant("ls"), Some(lcm_player.as_str()));
    assert_eq!(hub.board().occupant("rs"), Some(rcm_player.as_str()));
    assert_eq!(hub.board().occupant("lcm"), None);
    assert_eq!(hub.board().occupant("rcm"), None);
}

#[test]
fn same_slot_contention_settles_on_the_later_received_write() {
    let hub = hub();
    let mut ana = connected(&hub, "ua", "Ana");
    let mut ben = connected(&hub, "ub", "Ben");
    let mut obs = connected(&hub, "uc", "Obs");

    ana.auto_assign(10).unwrap();
    settle(&hub, &mut [&mut ana, &mut ben, &mut obs], 20);

    // Ana's move reaches the authority first, Ben's second.
    drag_to_slot(&mut ana, "lcm", "ls", 30);
    drag_to_slot(&mut ben, "rcm", "ls", 31);
    // Optimistically each author sees their own player on the slot.
    assert_eq!(ana.board().occupant("ls"), Some("p-cm1"));
    assert_eq!(ben.board().occupant("ls"), Some("p-cm2"));

    settle(&hub, &mut [&mut ana, &mut ben, &mut obs], 40);
    assert_converged(&hub, &[&ana, &ben, &obs]);

    // The write received later by the session wins on every board; the
    // displaced player returns to the pool.
    assert_eq!(hub.board().occupant("ls"), Some("p-cm2"));
    assert!(!hub.board().is_placed("p-cm1"));
    assert_eq!(ana.board().occupant("ls"), Some("p-cm2"));
    assert!(!ana.board().is_placed("p-cm1"));
}

#[test]
fn remote_operations_are_locally_undoable() {
    let hub = hub();
    let mut ana = connected(&hub, "ua", "Ana");
    let mut ben = connected(&hub, "ub", "Ben");

    ana.auto_assign(10).unwrap();
    settle(&hub, &mut [&mut ana, &mut ben], 20);
    let seeded = hub.board().slot_assignments.clone();

    drag_to_slot(&mut ana, "lcm", "ls", 30);
    settle(&hub, &mut [&mut ana, &mut ben], 40);
    assert_eq!(ben.board().occupant("ls"), Some("p-cm1"));

    // Ben undoes Ana's move: his history recorded it, and the restored
    // state goes out as a fresh operation that converges everyone.
    assert!(ben.can_undo());
    assert!(ben.undo());
    assert_eq!(ben.board().slot_assignments, seeded);

    settle(&hub, &mut [&mut ana, &mut ben], 50);
    assert_converged(&hub, &[&ana, &ben]);
    assert_eq!(hub.board().slot_assignments, seeded);
    assert_eq!(ana.board().occupant("ls"), None);
}

#[test]
fn missed_broadcast_forces_resync_and_reconvergence() {
    let hub = hub();
    let mut ana = connected(&hub, "ua", "Ana");
    let mut ben = connected(&hub, "ub", "Ben");

    ana.auto_assign(10).unwrap();
    settle(&hub, &mut [&mut ana, &mut ben], 20);

    // Ana's next edit is delivered to the hub, but Ben's copy of the
    // broadcast is lost before he reads it.
    drag_to_slot(&mut ana, "lcm", "ls", 30);
    hub.pump(30);
    let lost = hub.drop_inbox("ub");
    assert!(lost > 0, "the broadcast was queued for Ben");

    // The next operation arrives with a gap in the receipt sequence; Ben
    // abandons the stream and asks for the full state.
    drag_to_slot(&mut ana, "rcm", "rs", 40);
    hub.pump(40);
    let events = ben.tick(50);
    assert!(events.contains(&SyncEvent::ResyncStarted {
        reason: DesyncReason::SequenceGap
    }));

    hub.pump(60);
    let events = ben.tick(70);
    assert!(matches!(events.last(), Some(SyncEvent::Resynced { .. })));
    settle(&hub, &mut [&mut ana, &mut ben], 80);
    assert_converged(&hub, &[&ana, &ben]);
    assert_eq!(ben.board().occupant("ls"), Some("p-cm1"));
    assert_eq!(ben.board().occupant("rs"), Some("p-cm2"));
}

#[test]
fn late_joiner_adopts_the_full_session_state() {
    let hub = hub();
    let mut ana = connected(&hub, "ua", "Ana");
    ana.auto_assign(10).unwrap();
    drag_to_slot(&mut ana, "lcm", "ls", 20);
    settle(&hub, &mut [&mut ana], 30);

    let carl = connected(&hub, "uc", "Carl");
    assert_converged(&hub, &[&ana, &carl]);
    assert_eq!(carl.board().occupant("ls"), Some("p-cm1"));
    assert!(!carl.can_undo(), "history starts at the adopted state");

    let peer_ids: Vec<&str> = carl.peers().map(|u| u.id.as_str()).collect();
    assert_eq!(peer_ids, vec!["ua"]);
    assert!(carl.color().is_some());
}

#[test]
fn presence_and_cursors_reach_the_room() {
    let hub = hub();
    let mut ana = connected(&hub, "ua", "Ana");
    let mut ben = connected(&hub, "ub", "Ben");
    // Flush the join chatter.
    settle(&hub, &mut [&mut ana, &mut ben], 5);

    ana.cursor_moved(FieldPoint::new(42.0, 24.0), 100);
    hub.pump(100);
    let events = ben.tick(110);
    assert!(events.iter().any(|e| matches!(
        e,
        SyncEvent::PeerCursor { user_id, at }
            if user_id == "ua" && *at == FieldPoint::new(42.0, 24.0)
    )));
    let ana_peer = ben.peers().find(|u| u.id == "ua").unwrap();
    assert_eq!(ana_peer.cursor, Some(FieldPoint::new(42.0, 24.0)));

    ana.disconnect();
    hub.pump(120);
    let events = ben.tick(130);
    assert!(events.contains(&SyncEvent::UserLeft {
        user_id: "ua".into()
    }));
    let ana_peer = ben.peers().find(|u| u.id == "ua").unwrap();
    assert!(!ana_peer.online);
    assert_eq!(ana_peer.cursor, None);
}

#[test]
fn edits_made_offline_flush_on_reconnect_and_converge() {
    let hub = hub();
    let mut ana = connected(&hub, "ua", "Ana");
    let mut ben = connected(&hub, "ub", "Ben");

    ana.auto_assign(10).unwrap();
    settle(&hub, &mut [&mut ana, &mut ben], 20);

    // Ben leaves the room and keeps editing his local board.
    ben.disconnect();
    hub.pump(25);
    drag_to_slot(&mut ben, "lcm", "ls", 30);
    drag_to_slot(&mut ben, "rcm", "rs", 31);
    assert_eq!(ben.board().occupant("ls"), Some("p-cm1"));
    assert_eq!(hub.board().occupant("ls"), None, "nothing shipped yet");

    // Coming back flushes the queued edits into the session before the
    // snapshot settles, so everyone picks them up.
    ben.connect(100).unwrap();
    settle(&hub, &mut [&mut ana, &mut ben], 110);
    settle(&hub, &mut [&mut ana, &mut ben], 120);

    assert_converged(&hub, &[&ana, &ben]);
    assert_eq!(hub.board().occupant("ls"), Some("p-cm1"));
    assert_eq!(hub.board().occupant("rs"), Some("p-cm2"));
}
