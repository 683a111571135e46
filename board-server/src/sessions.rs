use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use board_core::{ApplyError, BoardStore, FormationCatalog};
use board_types::{color_for, BoardState, CollaborationUser, Formation, Operation, Session};

use crate::persistence::PersistedSession;

pub const DEFAULT_FORMATION: &str = "4-4-2";

/// Activity log cap per session; oldest entries fall off.
const MAX_LOG_ENTRIES: usize = 100;

// ─── Socket Bookkeeping ───────────────────────────────────────────────────────

/// Which session/user a connected socket speaks for.
#[derive(Debug, Clone)]
pub struct Membership {
    pub session_id: String,
    pub user_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinSessionPayload {
    pub session_id: String,
    pub user_id: String,
    pub name: String,
    #[serde(default)]
    pub formation_id: Option<String>,
}

// ─── Activity Log ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityEntry {
    pub id: String,
    pub timestamp: i64,
    pub user_id: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

// ─── Session Room ─────────────────────────────────────────────────────────────

/// One collaborative board: the authoritative store, the receipt sequence,
/// the presence roster in join order, and a bounded activity log.
pub struct SessionRoom {
    pub session_id: String,
    pub store: BoardStore,
    pub seq: u64,
    pub users: Vec<CollaborationUser>,
    pub logs: Vec<ActivityEntry>,
    pub created_at: DateTime<Utc>,
    /// Set on board mutation, cleared by the autosave sweep.
    pub dirty: bool,
    catalog: FormationCatalog,
}

impl SessionRoom {
    /// Builds the room from a persisted blob when one exists and still
    /// parses against the catalog; otherwise starts a fresh board on the
    /// given formation.
    pub fn new(
        session_id: &str,
        formation: Formation,
        catalog: FormationCatalog,
        persisted: Option<PersistedSession>,
    ) -> Self {
        let (store, created_at) = match persisted {
            Some(p) => match BoardStore::from_state(p.board, &catalog) {
                Ok(store) => {
                    info!(
                        session = session_id,
                        version = store.state().version,
                        "restored board from disk"
                    );
                    (store, p.created_at)
                }
                Err(err) => {
                    warn!(session = session_id, %err, "stored board unusable, starting fresh");
                    (BoardStore::new(formation), Utc::now())
                }
            },
            None => (BoardStore::new(formation), Utc::now()),
        };
        Self {
            session_id: session_id.to_owned(),
            store,
            seq: 0,
            users: Vec::new(),
            logs: Vec::new(),
            created_at,
            dirty: false,
            catalog,
        }
    }

    /// Adds or revives a user. Colors are handed out by first-join order
    /// and survive rejoins.
    pub fn join(&mut self, user_id: &str, name: &str, now_ms: i64) -> CollaborationUser {
        if let Some(user) = self.users.iter_mut().find(|u| u.id == user_id) {
            user.online = true;
            user.name = name.to_owned();
            user.last_seen_ms = now_ms;
            return user.clone();
        }
        let user = CollaborationUser {
            id: user_id.to_owned(),
            name: name.to_owned(),
            color: color_for(self.users.len()).to_owned(),
            cursor: None,
            online: true,
            last_seen_ms: now_ms,
        };
        self.users.push(user.clone());
        user
    }

    /// Marks the user offline. True when they were present and online.
    pub fn leave(&mut self, user_id: &str) -> bool {
        match self.users.iter_mut().find(|u| u.id == user_id) {
            Some(user) if user.online => {
                user.online = false;
                user.cursor = None;
                true
            }
            _ => false,
        }
    }

    pub fn touch(&mut self, user_id: &str, now_ms: i64) {
        if let Some(user) = self.users.iter_mut().find(|u| u.id == user_id) {
            user.last_seen_ms = now_ms;
        }
    }

    pub fn set_cursor(&mut self, user_id: &str, at: board_types::FieldPoint, now_ms: i64) {
        if let Some(user) = self.users.iter_mut().find(|u| u.id == user_id) {
            user.cursor = Some(at);
            user.last_seen_ms = now_ms;
        }
    }

    /// Applies an operation authoritatively and stamps the next receipt
    /// sequence number. Rejected operations take no number.
    pub fn apply(&mut self, op: &Operation) -> Result<u64, ApplyError> {
        self.store.apply_operation(op, &self.catalog)?;
        self.seq += 1;
        self.dirty = true;
        Ok(self.seq)
    }

    pub fn push_log(&mut self, entry: ActivityEntry) {
        self.logs.push(entry);
        if self.logs.len() > MAX_LOG_ENTRIES {
            self.logs.remove(0);
        }
    }

    /// Marks users offline after silence past `timeout_ms`; returns the
    /// ids swept this pass.
    pub fn sweep_presence(&mut self, timeout_ms: i64, now_ms: i64) -> Vec<String> {
        let mut swept = Vec::new();
        for user in &mut self.users {
            if user.online && now_ms - user.last_seen_ms > timeout_ms {
                user.online = false;
                user.cursor = None;
                swept.push(user.id.clone());
            }
        }
        swept
    }

    pub fn welcome_payload(&self) -> Value {
        serde_json::json!({
            "session": self.session_meta(),
            "board": self.store.state(),
            "seq": self.seq,
            "log": self.logs,
        })
    }

    pub fn sync_payload(&self) -> Value {
        serde_json::json!({
            "board": self.store.state(),
            "seq": self.seq,
            "users": self.users,
        })
    }

    pub fn session_meta(&self) -> Session {
        Session {
            id: self.session_id.clone(),
            users: self.users.clone(),
            can_edit: true,
            can_invite: true,
            can_kick: false,
        }
    }

    pub fn board(&self) -> &BoardState {
        self.store.state()
    }

    pub fn to_persisted(&self) -> PersistedSession {
        PersistedSession {
            session_id: self.session_id.clone(),
            created_at: self.created_at,
            board: self.store.state().clone(),
        }
    }
}
