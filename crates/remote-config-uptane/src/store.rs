//! Durable storage for committed client state.
//!
//! [`TrustStore`] is the seam the client persists through; [`RcStore`] is the
//! sled-backed implementation. Each cache key owns one current state blob and
//! a bounded ring of previously committed blobs, written together in a single
//! transaction so a crash never leaves them out of step.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use sled::transaction::{ConflictableTransactionError, TransactionError};
use sled::{Config as SledConfig, Db, Transactional, Tree};
use thiserror::Error;
use tracing::{debug, warn};

/// Tree holding the current state blob per cache key.
pub const TREE_CLIENT_STATE: &str = "client_state";
/// Tree holding the history ring per cache key.
pub const TREE_CLIENT_HISTORY: &str = "client_history";

/// Suffix of the history key storing the next sequence number for a cache key.
const HISTORY_NEXT_SEQ: &str = "next";

/// Errors emitted by trust stores.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Db(#[from] sled::Error),
    #[error("filesystem error: {0}")]
    Io(#[from] std::io::Error),
    /// Stored bytes exist but cannot be decoded or verified.
    #[error("persisted state is corrupt: {0}")]
    Corrupt(String),
}

/// Durable home of committed client state, keyed by cache key.
///
/// Implementations must make `save` atomic: after a crash, `load` returns
/// either the previous blob or the new one, never a mix.
pub trait TrustStore: Send + Sync {
    /// Returns the last committed state for `cache_key`, if any.
    fn load(&self, cache_key: &str) -> Result<Option<Vec<u8>>, StoreError>;

    /// Replaces the state for `cache_key` and appends it to a history ring
    /// holding at most `history_limit` entries.
    fn save(&self, cache_key: &str, state: &[u8], history_limit: usize)
        -> Result<(), StoreError>;

    /// Lock serialising updates for `cache_key`. Every caller asking for the
    /// same key receives the same mutex.
    fn update_lock(&self, cache_key: &str) -> Arc<Mutex<()>>;
}

/// Sled-backed [`TrustStore`].
#[derive(Debug, Clone)]
pub struct RcStore {
    db: Db,
    state: Tree,
    history: Tree,
    path: PathBuf,
    locks: Arc<Mutex<HashMap<String, Arc<Mutex<()>>>>>,
}

impl RcStore {
    /// Opens (or creates) a store at `path`.
    ///
    /// A database that fails to open with an IO error (stale lock, damaged
    /// files) is wiped and rebuilt; clients then bootstrap from their trust
    /// anchors again.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                // sled does not create intermediate directories.
                fs::create_dir_all(parent)?;
            }
        }

        let db = match sled_config(&path).open() {
            Ok(db) => db,
            Err(sled::Error::Io(err)) => {
                warn!(
                    path = %path.display(),
                    error = %err,
                    "uptane: trust store unreadable, rebuilding"
                );
                reset_path(&path)?;
                sled_config(&path).open()?
            }
            Err(other) => return Err(StoreError::Db(other)),
        };
        Self::from_db(db, path)
    }

    /// Opens an in-memory store that does not survive the process.
    pub fn open_ephemeral() -> Result<Self, StoreError> {
        let db = SledConfig::new().temporary(true).open()?;
        Self::from_db(db, PathBuf::new())
    }

    fn from_db(db: Db, path: PathBuf) -> Result<Self, StoreError> {
        let state = db.open_tree(TREE_CLIENT_STATE)?;
        let history = db.open_tree(TREE_CLIENT_HISTORY)?;
        Ok(Self {
            db,
            state,
            history,
            path,
            locks: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    /// Filesystem path backing the store; empty for ephemeral stores.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Flushes pending writes to disk.
    pub fn flush(&self) -> Result<(), StoreError> {
        self.db.flush()?;
        Ok(())
    }

    /// Previously committed blobs for `cache_key`, oldest first.
    pub fn history(&self, cache_key: &str) -> Result<Vec<Vec<u8>>, StoreError> {
        let prefix = format!("{cache_key}/");
        let mut entries = Vec::new();
        for item in self.history.scan_prefix(prefix.as_bytes()) {
            let (key, value) = item?;
            let Some(seq) = key
                .strip_prefix(prefix.as_bytes())
                .and_then(|rest| std::str::from_utf8(rest).ok())
                .and_then(|rest| rest.parse::<u64>().ok())
            else {
                continue;
            };
            entries.push((seq, value.to_vec()));
        }
        entries.sort_by_key(|(seq, _)| *seq);
        Ok(entries.into_iter().map(|(_, value)| value).collect())
    }
}

impl TrustStore for RcStore {
    fn load(&self, cache_key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.state.get(cache_key.as_bytes())?.map(|value| value.to_vec()))
    }

    fn save(
        &self,
        cache_key: &str,
        state: &[u8],
        history_limit: usize,
    ) -> Result<(), StoreError> {
        let next_key = history_key(cache_key, HISTORY_NEXT_SEQ);
        let result = (&self.state, &self.history).transaction(|(current, history)| {
            current.insert(cache_key.as_bytes(), state)?;
            if history_limit == 0 {
                return Ok::<_, ConflictableTransactionError<()>>(());
            }

            let seq = history
                .get(next_key.as_bytes())?
                .and_then(|raw| <[u8; 8]>::try_from(raw.as_ref()).ok())
                .map(u64::from_be_bytes)
                .unwrap_or(0);
            history.insert(history_key(cache_key, &seq_label(seq)).as_bytes(), state)?;
            history.insert(next_key.as_bytes(), &(seq + 1).to_be_bytes())?;
            // The ring holds at most `history_limit` entries; drop the one falling off.
            if let Some(evicted) = seq.checked_sub(history_limit as u64) {
                history.remove(history_key(cache_key, &seq_label(evicted)).as_bytes())?;
            }
            Ok(())
        });
        match result {
            Ok(()) => {}
            Err(TransactionError::Storage(err)) => return Err(StoreError::Db(err)),
            // The closure never aborts.
            Err(TransactionError::Abort(())) => {
                return Err(StoreError::Corrupt("state transaction aborted".to_string()))
            }
        }
        self.db.flush()?;
        debug!(cache_key, bytes = state.len(), "uptane: client state saved");
        Ok(())
    }

    fn update_lock(&self, cache_key: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        locks
            .entry(cache_key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}

fn history_key(cache_key: &str, suffix: &str) -> String {
    format!("{cache_key}/{suffix}")
}

/// Zero-padded so lexical and numeric order agree.
fn seq_label(seq: u64) -> String {
    format!("{seq:020}")
}

/// Builds a sled configuration using the provided filesystem path.
fn sled_config(path: &Path) -> SledConfig {
    SledConfig::new()
        .path(path)
        .cache_capacity(16 * 1024 * 1024)
}

/// Deletes the database file or directory to start from a clean slate.
fn reset_path(path: &Path) -> Result<(), StoreError> {
    if path.exists() {
        if path.is_dir() {
            fs::remove_dir_all(path)?;
        } else {
            fs::remove_file(path)?;
        }
    }
    Ok(())
}
