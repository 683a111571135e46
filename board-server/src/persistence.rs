//! Session board autosave. One JSON blob per session under the data dir;
//! the blob format is opaque to the engine, which only sees `BoardState`
//! round-tripped through serde.

use std::path::{Path, PathBuf};

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::{info, warn};

use board_types::BoardState;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedSession {
    pub session_id: String,
    pub created_at: DateTime<Utc>,
    pub board: BoardState,
}

/// Session ids come from clients; keep the filename boring.
fn session_path(data_dir: &Path, session_id: &str) -> PathBuf {
    let safe: String = session_id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    data_dir.join(format!("{safe}.json"))
}

/// Loads a persisted session blob. Missing or corrupt files mean a fresh
/// board, never an error.
pub async fn load_session(data_dir: &Path, session_id: &str) -> Option<PersistedSession> {
    let path = session_path(data_dir, session_id);
    if !path.exists() {
        return None;
    }
    match fs::read_to_string(&path).await {
        Ok(data) => match serde_json::from_str::<PersistedSession>(&data) {
            Ok(persisted) => {
                info!(
                    session = session_id,
                    version = persisted.board.version,
                    "loaded session blob"
                );
                Some(persisted)
            }
            Err(e) => {
                warn!(session = session_id, "failed to parse {}: {e}", path.display());
                None
            }
        },
        Err(e) => {
            warn!(session = session_id, "failed to read {}: {e}", path.display());
            None
        }
    }
}

pub async fn save_session(data_dir: &Path, persisted: &PersistedSession) -> Result<()> {
    fs::create_dir_all(data_dir).await?;
    let json = serde_json::to_string_pretty(persisted)?;
    fs::write(session_path(data_dir, &persisted.session_id), json).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_dir(tag: &str) -> PathBuf {
        std::env::temp_dir().join(format!("board-server-test-{tag}-{}", std::process::id()))
    }

    #[tokio::test]
    async fn blob_round_trips_and_survives_odd_ids() {
        let dir = temp_dir("roundtrip");
        let mut board = BoardState::new("4-4-2");
        board.slot_assignments.insert("gk".into(), "p1".into());
        board.version = 3;
        let persisted = PersistedSession {
            session_id: "team a/../weird".into(),
            created_at: Utc::now(),
            board,
        };

        save_session(&dir, &persisted).await.unwrap();
        let back = load_session(&dir, "team a/../weird").await.unwrap();
        assert_eq!(back.board, persisted.board);
        assert_eq!(back.session_id, persisted.session_id);

        let _ = fs::remove_dir_all(&dir).await;
    }

    #[tokio::test]
    async fn missing_and_corrupt_blobs_load_as_none() {
        let dir = temp_dir("corrupt");
        assert!(load_session(&dir, "nonesuch").await.is_none());

        fs::create_dir_all(&dir).await.unwrap();
        fs::write(dir.join("broken.json"), "{not json").await.unwrap();
        assert!(load_session(&dir, "broken").await.is_none());

        let _ = fs::remove_dir_all(&dir).await;
    }
}
