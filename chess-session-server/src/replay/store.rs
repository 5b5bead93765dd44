//! Replay Store
//!
//! One file per finished session, named `<DD-MM-YYYY_HH-MM-SS>_<session id>.bin`
//! under a fixed directory. Files are bincode-encoded [`ReplayRecord`]s and are
//! never rewritten.

use std::fmt;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use crate::game::session::{SessionId, SessionSnapshot};

/// Timestamp layout used in keys.
pub const KEY_TIME_FORMAT: &str = "%d-%m-%Y_%H-%M-%S";

/// File extension for stored records.
pub const REPLAY_EXTENSION: &str = "bin";

// =============================================================================
// KEY
// =============================================================================

/// Address of one stored replay. Orders chronologically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ReplayKey {
    /// When the session ended (server local time, whole seconds).
    pub ended_at: NaiveDateTime,
    /// Session that ended.
    pub session_id: SessionId,
}

impl fmt::Display for ReplayKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.ended_at.format(KEY_TIME_FORMAT), self.session_id)
    }
}

impl FromStr for ReplayKey {
    type Err = ReplayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ReplayError::NotFound(s.to_string());
        let (time, id) = s.rsplit_once('_').ok_or_else(invalid)?;
        let ended_at = NaiveDateTime::parse_from_str(time, KEY_TIME_FORMAT).map_err(|_| invalid())?;
        let session_id = id.parse::<u64>().map_err(|_| invalid())?;
        Ok(Self { ended_at, session_id: SessionId(session_id) })
    }
}

// =============================================================================
// RECORD
// =============================================================================

/// Immutable copy of a finished session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplayRecord {
    /// Key the record is stored under.
    pub key: String,
    /// Session as it was when it ended.
    pub session: SessionSnapshot,
}

/// Replay store errors.
#[derive(Debug, Error)]
pub enum ReplayError {
    /// No record under this key.
    #[error("replay not found: {0}")]
    NotFound(String),

    /// A record already exists under this key.
    #[error("replay already stored: {0}")]
    AlreadyExists(String),

    /// Filesystem failure.
    #[error("replay I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Record could not be encoded or decoded.
    #[error("replay encoding error: {0}")]
    Encoding(#[from] bincode::Error),
}

// =============================================================================
// STORE
// =============================================================================

/// Directory-backed replay storage.
#[derive(Debug, Clone)]
pub struct ReplayStore {
    dir: PathBuf,
}

impl ReplayStore {
    /// Store rooted at `dir`; the directory is created on first save.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Root directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &ReplayKey) -> PathBuf {
        self.dir.join(format!("{}.{}", key, REPLAY_EXTENSION))
    }

    /// Persist a finished session. Fails if the key is already taken.
    pub async fn save(
        &self,
        session: &SessionSnapshot,
        ended_at: NaiveDateTime,
    ) -> Result<ReplayKey, ReplayError> {
        let key = ReplayKey { ended_at, session_id: session.id };
        let record = ReplayRecord { key: key.to_string(), session: session.clone() };
        let bytes = bincode::serialize(&record)?;

        fs::create_dir_all(&self.dir).await?;
        let path = self.path_for(&key);
        let mut file = match fs::OpenOptions::new().write(true).create_new(true).open(&path).await {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                return Err(ReplayError::AlreadyExists(key.to_string()));
            }
            Err(e) => return Err(e.into()),
        };
        file.write_all(&bytes).await?;
        file.flush().await?;

        info!(session_id = %session.id, path = ?path, "Replay saved");
        Ok(key)
    }

    /// Every stored key, oldest first.
    pub async fn list(&self) -> Result<Vec<ReplayKey>, ReplayError> {
        let mut entries = match fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut keys = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            let Some(stem) = name.strip_suffix(&format!(".{}", REPLAY_EXTENSION)) else {
                continue;
            };
            match stem.parse::<ReplayKey>() {
                Ok(key) => keys.push(key),
                Err(_) => debug!(file = name, "Skipping unrecognized file in replay directory"),
            }
        }

        keys.sort();
        Ok(keys)
    }

    /// Load one record.
    pub async fn load(&self, key: &str) -> Result<ReplayRecord, ReplayError> {
        // Re-rendering the parsed key keeps lookups inside the replay directory.
        let parsed: ReplayKey = key.parse()?;
        let bytes = match fs::read(self.path_for(&parsed)).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(ReplayError::NotFound(key.to_string()));
            }
            Err(e) => return Err(e.into()),
        };
        Ok(bincode::deserialize(&bytes)?)
    }
}
