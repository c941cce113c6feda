//! Registration records: identity → one landmark set.
//!
//! [`FileStore`] keeps one JSON file per identity (`face_data_<identity>.json`)
//! in a data directory. There is no locking; two processes registering the
//! same identity at once race on the file.

use crate::types::LandmarkSet;
use std::collections::BTreeMap;
use std::path::PathBuf;
use thiserror::Error;

const RECORD_PREFIX: &str = "face_data_";
const RECORD_EXTENSION: &str = "json";

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("invalid identity {0:?}")]
    InvalidIdentity(String),
    #[error("record I/O for {identity:?}: {source}")]
    Io {
        identity: String,
        #[source]
        source: std::io::Error,
    },
    #[error("corrupt record for {identity:?}: {source}")]
    Corrupt {
        identity: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Key-value store of registration records.
pub trait RecordStore {
    /// Load the record for `identity`, `None` if it was never registered.
    fn load(&self, identity: &str) -> Result<Option<LandmarkSet>, StoreError>;

    /// Persist `landmarks` under `identity`, replacing any previous record.
    fn save(&mut self, identity: &str, landmarks: &LandmarkSet) -> Result<(), StoreError>;

    /// All registered identities, sorted.
    fn identities(&self) -> Result<Vec<String>, StoreError>;
}

/// Reject identities that cannot safely be embedded in a file name.
pub fn validate_identity(identity: &str) -> Result<(), StoreError> {
    let bad = identity.is_empty()
        || identity != identity.trim()
        || identity == "."
        || identity == ".."
        || identity.contains(['/', '\\'])
        || identity.chars().any(char::is_control);
    if bad {
        return Err(StoreError::InvalidIdentity(identity.to_string()));
    }
    Ok(())
}

/// One file per identity in `dir`.
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Path of the record file for `identity`.
    pub fn record_path(&self, identity: &str) -> PathBuf {
        self.dir
            .join(format!("{RECORD_PREFIX}{identity}.{RECORD_EXTENSION}"))
    }
}

impl RecordStore for FileStore {
    fn load(&self, identity: &str) -> Result<Option<LandmarkSet>, StoreError> {
        validate_identity(identity)?;
        let path = self.record_path(identity);

        let bytes = match std::fs::read(&path) {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(StoreError::Io {
                    identity: identity.to_string(),
                    source,
                })
            }
        };

        let set = serde_json::from_slice(&bytes).map_err(|source| StoreError::Corrupt {
            identity: identity.to_string(),
            source,
        })?;
        Ok(Some(set))
    }

    fn save(&mut self, identity: &str, landmarks: &LandmarkSet) -> Result<(), StoreError> {
        validate_identity(identity)?;
        let path = self.record_path(identity);
        let io_err = |source: std::io::Error| StoreError::Io {
            identity: identity.to_string(),
            source,
        };

        std::fs::create_dir_all(&self.dir).map_err(io_err)?;

        if path.exists() {
            tracing::warn!(identity, path = %path.display(), "overwriting existing registration");
        }

        let json = serde_json::to_vec(landmarks).map_err(|source| StoreError::Corrupt {
            identity: identity.to_string(),
            source,
        })?;
        std::fs::write(&path, json).map_err(io_err)?;

        tracing::info!(identity, points = landmarks.len(), path = %path.display(), "registration saved");
        Ok(())
    }

    fn identities(&self) -> Result<Vec<String>, StoreError> {
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(e) => e,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(StoreError::Io {
                    identity: String::new(),
                    source,
                })
            }
        };

        let mut ids: Vec<String> = entries
            .filter_map(Result::ok)
            .filter_map(|entry| {
                let name = entry.file_name().into_string().ok()?;
                let stem = name.strip_suffix(&format!(".{RECORD_EXTENSION}"))?;
                stem.strip_prefix(RECORD_PREFIX).map(str::to_string)
            })
            .filter(|id| validate_identity(id).is_ok())
            .collect();
        ids.sort();
        Ok(ids)
    }
}

/// In-memory store, for tests and dry runs.
#[derive(Default)]
pub struct MemoryStore {
    records: BTreeMap<String, LandmarkSet>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RecordStore for MemoryStore {
    fn load(&self, identity: &str) -> Result<Option<LandmarkSet>, StoreError> {
        validate_identity(identity)?;
        Ok(self.records.get(identity).cloned())
    }

    fn save(&mut self, identity: &str, landmarks: &LandmarkSet) -> Result<(), StoreError> {
        validate_identity(identity)?;
        self.records.insert(identity.to_string(), landmarks.clone());
        Ok(())
    }

    fn identities(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.records.keys().cloned().collect())
    }
}
