//! # Board Record Storage
//!
//! Persistence for board records. The registry talks to storage only through the
//! [`BoardDao`] trait (`exists`, `get`, `create`, `persist`, `destroy`, `get_all`);
//! [`BoardStore`] is the sled-backed implementation used by the daemon.
//!
//! Records are bincode-encoded and stored in the `boards` tree under
//! `boards:<id>`. Every write is flushed before returning so a crash never
//! loses an acknowledged create or delete.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use log::debug;
use serde::{Deserialize, Serialize};
use sled::IVec;
use thiserror::Error;

pub const BOARD_SCHEMA_VERSION: u8 = 1;

const TREE_BOARDS: &str = "boards";
const KEY_PREFIX: &str = "boards:";

/// Errors that can arise while interacting with the board store.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Wrapper around sled's error type.
    #[error("sled error: {0}")]
    Sled(#[from] sled::Error),

    /// Wrapper around bincode serialization and deserialization errors.
    #[error("serialization error: {0}")]
    Bincode(#[from] bincode::Error),

    /// Wrapper around IO errors (directory creation, etc.).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Returned when fetching a record that is not present.
    #[error("record not found: {0}")]
    NotFound(String),

    /// Returned when creating a record whose id already exists.
    #[error("record already exists: {0}")]
    Duplicate(String),

    /// Returned when deserializing a record with an unexpected schema version.
    #[error("schema mismatch for board {id}: expected {expected}, got {found}")]
    SchemaMismatch { id: String, expected: u8, found: u8 },
}

/// Persisted form of a board.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoardRecord {
    pub schema_version: u8,
    pub id: String,
    pub name: String,
    /// Variant tag (`Board`, `LedController`, `MajorTom`).
    pub board_type: String,
    /// Architecture name (`uno`, `esp8266`).
    pub architecture: String,
    pub online: bool,
    pub last_update: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl BoardRecord {
    /// Fresh record for a board seen for the first time. The display name
    /// defaults to the id.
    pub fn new(id: impl Into<String>, board_type: impl Into<String>) -> Self {
        let id = id.into();
        let now = Utc::now();
        Self {
            schema_version: BOARD_SCHEMA_VERSION,
            name: id.clone(),
            id,
            board_type: board_type.into(),
            architecture: crate::board::architecture::DEFAULT_ARCHITECTURE.to_string(),
            online: false,
            last_update: now,
            created_at: now,
        }
    }
}

/// Downward interface to the persistence layer.
pub trait BoardDao: Send + Sync {
    fn exists(&self, id: &str) -> Result<bool, StorageError>;

    fn get(&self, id: &str) -> Result<BoardRecord, StorageError>;

    /// Insert a new record. Fails with [`StorageError::Duplicate`] if the id is taken.
    fn create(&self, record: BoardRecord) -> Result<BoardRecord, StorageError>;

    /// Insert or overwrite a record.
    fn persist(&self, record: &BoardRecord) -> Result<(), StorageError>;

    fn destroy(&self, id: &str) -> Result<(), StorageError>;

    fn get_all(&self) -> Result<Vec<BoardRecord>, StorageError>;
}

/// Sled-backed board store.
pub struct BoardStore {
    _db: sled::Db,
    boards: sled::Tree,
    path: PathBuf,
}

impl BoardStore {
    /// Open (or create) the store rooted at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let path_ref = path.as_ref();
        std::fs::create_dir_all(path_ref)?;
        let db = sled::open(path_ref)?;
        let boards = db.open_tree(TREE_BOARDS)?;
        debug!("Opened board store at {}", path_ref.display());
        Ok(Self {
            _db: db,
            boards,
            path: path_ref.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn board_key(id: &str) -> Vec<u8> {
        format!("{}{}", KEY_PREFIX, id).into_bytes()
    }

    fn serialize(record: &BoardRecord) -> Result<Vec<u8>, StorageError> {
        Ok(bincode::serialize(record)?)
    }

    fn deserialize(bytes: IVec) -> Result<BoardRecord, StorageError> {
        let record: BoardRecord = bincode::deserialize(&bytes)?;
        if record.schema_version != BOARD_SCHEMA_VERSION {
            return Err(StorageError::SchemaMismatch {
                id: record.id,
                expected: BOARD_SCHEMA_VERSION,
                found: record.schema_version,
            });
        }
        Ok(record)
    }

    fn write(&self, record: &BoardRecord) -> Result<(), StorageError> {
        let mut record = record.clone();
        record.schema_version = BOARD_SCHEMA_VERSION;
        self.boards
            .insert(Self::board_key(&record.id), Self::serialize(&record)?)?;
        self.boards.flush()?;
        Ok(())
    }
}

impl BoardDao for BoardStore {
    fn exists(&self, id: &str) -> Result<bool, StorageError> {
        Ok(self.boards.contains_key(Self::board_key(id))?)
    }

    fn get(&self, id: &str) -> Result<BoardRecord, StorageError> {
        let Some(bytes) = self.boards.get(Self::board_key(id))? else {
            return Err(StorageError::NotFound(id.to_string()));
        };
        Self::deserialize(bytes)
    }

    fn create(&self, record: BoardRecord) -> Result<BoardRecord, StorageError> {
        if self.exists(&record.id)? {
            return Err(StorageError::Duplicate(record.id));
        }
        self.write(&record)?;
        Ok(record)
    }

    fn persist(&self, record: &BoardRecord) -> Result<(), StorageError> {
        self.write(record)
    }

    fn destroy(&self, id: &str) -> Result<(), StorageError> {
        if self.boards.remove(Self::board_key(id))?.is_none() {
            return Err(StorageError::NotFound(id.to_string()));
        }
        self.boards.flush()?;
        Ok(())
    }

    fn get_all(&self) -> Result<Vec<BoardRecord>, StorageError> {
        self.boards
            .scan_prefix(KEY_PREFIX.as_bytes())
            .map(|entry| {
                entry
                    .map_err(StorageError::from)
                    .and_then(|(_key, value)| Self::deserialize(value))
            })
            .collect()
    }
}
