//! Session persistence.
//!
//! The session manager never persists directly; it goes through the
//! `SessionStore` contract. Implementations:
//! - `MemorySessionStore` - ephemeral, for tests and short-lived tools
//! - `FileSessionStore` - one JSON file, durable across restarts

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

use atmosphere_client::Did;

use crate::error::{AuthError, Result};
use crate::session::Session;

/// Caller-supplied persistence for sessions, keyed by DID.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn get(&self, did: &Did) -> Result<Option<Session>>;
    async fn set(&self, did: &Did, session: Session) -> Result<()>;
    async fn delete(&self, did: &Did) -> Result<()>;
    async fn clear(&self) -> Result<()>;
}

/// In-memory store; contents are lost when the process exits.
#[derive(Default)]
pub struct MemorySessionStore {
    sessions: RwLock<HashMap<String, Session>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn get(&self, did: &Did) -> Result<Option<Session>> {
        Ok(self.sessions.read().unwrap().get(did.as_str()).cloned())
    }

    async fn set(&self, did: &Did, session: Session) -> Result<()> {
        self.sessions
            .write()
            .unwrap()
            .insert(did.as_str().to_string(), session);
        Ok(())
    }

    async fn delete(&self, did: &Did) -> Result<()> {
        self.sessions.write().unwrap().remove(did.as_str());
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        self.sessions.write().unwrap().clear();
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct SessionFile {
    sessions: HashMap<String, Session>,
}

/// File-backed store: sessions live in a single pretty-printed JSON file,
/// loaded at construction and rewritten on every mutation.
pub struct FileSessionStore {
    path: PathBuf,
    sessions: RwLock<SessionFile>,
}

impl FileSessionStore {
    /// Open (or create) a store at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| AuthError::Store(format!("failed to create {parent:?}: {e}")))?;
        }

        let sessions = Self::load(&path)?;
        if !sessions.sessions.is_empty() {
            info!("Loaded {} stored sessions", sessions.sessions.len());
        }
        Ok(Self {
            path,
            sessions: RwLock::new(sessions),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(path: &Path) -> Result<SessionFile> {
        if !path.exists() {
            return Ok(SessionFile::default());
        }
        let content = std::fs::read_to_string(path)
            .map_err(|e| AuthError::Store(format!("failed to read {path:?}: {e}")))?;
        serde_json::from_str(&content)
            .map_err(|e| AuthError::Store(format!("corrupt session file {path:?}: {e}")))
    }

    fn save(&self) -> Result<()> {
        let content = {
            let sessions = self.sessions.read().unwrap();
            serde_json::to_string_pretty(&*sessions)
                .map_err(|e| AuthError::Store(e.to_string()))?
        };
        std::fs::write(&self.path, content)
            .map_err(|e| AuthError::Store(format!("failed to write {:?}: {e}", self.path)))
    }
}

#[async_trait]
impl SessionStore for FileSessionStore {
    async fn get(&self, did: &Did) -> Result<Option<Session>> {
        Ok(self
            .sessions
            .read()
            .unwrap()
            .sessions
            .get(did.as_str())
            .cloned())
    }

    async fn set(&self, did: &Did, session: Session) -> Result<()> {
        self.sessions
            .write()
            .unwrap()
            .sessions
            .insert(did.as_str().to_string(), session);
        self.save()
    }

    async fn delete(&self, did: &Did) -> Result<()> {
        self.sessions
            .write()
            .unwrap()
            .sessions
            .remove(did.as_str());
        self.save()
    }

    async fn clear(&self) -> Result<()> {
        self.sessions.write().unwrap().sessions.clear();
        self.save()
    }
}
