//! Session persistence.
//!
//! Finished sessions are handed to a [`SessionStore`]. The engine treats a
//! failed save as a warning, never as a session failure.
//!
//! # Usage
//!
//! ```rust,ignore
//! use debate_forge::storage::{JsonFileStore, SessionStore};
//!
//! let store = JsonFileStore::new("./sessions");
//! store.save(&session).await?;
//! let restored = store.load(&session.id).await?;
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;

use crate::debate::types::DebateSession;
use crate::error::StoreError;

/// Persistence collaborator for finished sessions.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn save(&self, session: &DebateSession) -> Result<(), StoreError>;

    async fn load(&self, session_id: &str) -> Result<DebateSession, StoreError>;
}

// ============================================================================
// JSON file store
// ============================================================================

/// Writes each session to `<dir>/<id>.json`.
pub struct JsonFileStore {
    base_path: PathBuf,
}

impl JsonFileStore {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    fn session_path(&self, session_id: &str) -> Result<PathBuf, StoreError> {
        // Ids are uuids; anything path-like is refused outright.
        let valid = !session_id.is_empty()
            && session_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            return Err(StoreError::NotFound(session_id.to_string()));
        }
        Ok(self.base_path.join(format!("{}.json", session_id)))
    }
}

async fn write_then_rename(tmp_path: &Path, path: &Path, content: &[u8]) -> Result<(), StoreError> {
    let mut file = fs::File::create(tmp_path).await?;
    file.write_all(content).await?;
    file.sync_all().await?;
    drop(file);
    fs::rename(tmp_path, path).await?;
    Ok(())
}

#[async_trait]
impl SessionStore for JsonFileStore {
    async fn save(&self, session: &DebateSession) -> Result<(), StoreError> {
        fs::create_dir_all(&self.base_path).await?;

        let path = self.session_path(&session.id)?;
        let tmp_path = path.with_extension("json.tmp");
        let content = serde_json::to_vec_pretty(session)?;

        if let Err(e) = write_then_rename(&tmp_path, &path, &content).await {
            if let Err(cleanup) = fs::remove_file(&tmp_path).await {
                if cleanup.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!(
                        path = %tmp_path.display(),
                        error = %cleanup,
                        "Failed to remove temporary session file"
                    );
                }
            }
            return Err(e);
        }

        tracing::debug!(
            session_id = %session.id,
            path = %path.display(),
            bytes = content.len(),
            "Session saved"
        );
        Ok(())
    }

    async fn load(&self, session_id: &str) -> Result<DebateSession, StoreError> {
        let path = self.session_path(session_id)?;
        let content = match fs::read(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StoreError::NotFound(session_id.to_string()));
            }
            Err(e) => return Err(e.into()),
        };
        Ok(serde_json::from_slice(&content)?)
    }
}

// ============================================================================
// In-memory store
// ============================================================================

/// Keeps sessions in memory. Useful for tests and embedding.
#[derive(Default)]
pub struct MemoryStore {
    sessions: RwLock<HashMap<String, DebateSession>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn save(&self, session: &DebateSession) -> Result<(), StoreError> {
        self.sessions
            .write()
            .await
            .insert(session.id.clone(), session.clone());
        Ok(())
    }

    async fn load(&self, session_id: &str) -> Result<DebateSession, StoreError> {
        self.sessions
            .read()
            .await
            .get(session_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(session_id.to_string()))
    }
}
