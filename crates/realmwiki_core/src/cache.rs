use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use rusqlite::{Connection, params};
use serde::Serialize;
use tracing::{debug, warn};

use crate::title::{canonical_title, title_key};

pub const DEFAULT_FLUSH_EVERY: usize = 25;

const CACHE_SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS page_existence (
    title_key TEXT PRIMARY KEY,
    title TEXT NOT NULL,
    page_exists INTEGER NOT NULL,
    checked_at_unix INTEGER NOT NULL
);
"#;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CacheEntry {
    pub title: String,
    pub exists: bool,
    pub checked_at_unix: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub present: usize,
    pub absent: usize,
    pub pending_writes: usize,
    pub persistent: bool,
}

#[derive(Default)]
struct CacheState {
    connection: Option<Connection>,
    entries: BTreeMap<String, CacheEntry>,
    dirty: BTreeSet<String>,
    removed: BTreeSet<String>,
    cleared: bool,
    writes_since_flush: usize,
}

/// Title existence memo shared by every worker of a run. Entries live until
/// explicitly invalidated. With a database path the map is written back
/// incrementally, so an interrupted run keeps what it already learned.
pub struct ExistenceCache {
    db_path: Option<PathBuf>,
    flush_every: usize,
    state: Mutex<CacheState>,
    check_lock: Mutex<()>,
}

impl ExistenceCache {
    pub fn in_memory() -> Self {
        Self {
            db_path: None,
            flush_every: 0,
            state: Mutex::new(CacheState::default()),
            check_lock: Mutex::new(()),
        }
    }

    /// Opens (or creates) the cache table at `db_path` and loads every row.
    /// `flush_every` of 0 disables automatic write-back.
    pub fn open(db_path: &Path, flush_every: usize) -> Result<Self> {
        let connection = open_cache_connection(db_path)?;
        initialize_cache_schema(&connection)?;
        let entries = load_entries(&connection)?;
        debug!(path = %db_path.display(), entries = entries.len(), "opened existence cache");

        Ok(Self {
            db_path: Some(db_path.to_path_buf()),
            flush_every,
            state: Mutex::new(CacheState {
                connection: Some(connection),
                entries,
                ..CacheState::default()
            }),
            check_lock: Mutex::new(()),
        })
    }

    pub fn db_path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }

    pub fn get(&self, title: &str) -> Option<bool> {
        self.lock()
            .entries
            .get(&title_key(title))
            .map(|entry| entry.exists)
    }

    pub fn entry(&self, title: &str) -> Option<CacheEntry> {
        self.lock().entries.get(&title_key(title)).cloned()
    }

    /// Records a definite answer. Persistence failures during automatic
    /// write-back are logged; the in-memory answer is kept either way.
    pub fn put(&self, title: &str, exists: bool) {
        let key = title_key(title);
        let mut state = self.lock();
        state.removed.remove(&key);
        state.entries.insert(
            key.clone(),
            CacheEntry {
                title: canonical_title(title),
                exists,
                checked_at_unix: now_unix(),
            },
        );
        if state.connection.is_none() {
            return;
        }
        state.dirty.insert(key);
        state.writes_since_flush += 1;

        if self.flush_every > 0
            && state.writes_since_flush >= self.flush_every
            && let Err(error) = flush_state(&mut state)
        {
            warn!(error = %error, "existence cache write-back failed");
        }
    }

    /// Forgets one title. Returns whether an entry was present.
    pub fn invalidate(&self, title: &str) -> bool {
        let key = title_key(title);
        let mut state = self.lock();
        state.dirty.remove(&key);
        let existed = state.entries.remove(&key).is_some();
        if state.connection.is_some() {
            state.removed.insert(key);
        }
        existed
    }

    pub fn clear(&self) {
        let mut state = self.lock();
        state.entries.clear();
        state.dirty.clear();
        state.removed.clear();
        state.cleared = state.connection.is_some();
    }

    /// Writes pending changes to disk. Returns the number of rows touched.
    pub fn flush(&self) -> Result<usize> {
        let mut state = self.lock();
        flush_state(&mut state)
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn entries(&self) -> Vec<CacheEntry> {
        self.lock().entries.values().cloned().collect()
    }

    pub fn stats(&self) -> CacheStats {
        let state = self.lock();
        let present = state.entries.values().filter(|entry| entry.exists).count();
        CacheStats {
            entries: state.entries.len(),
            present,
            absent: state.entries.len() - present,
            pending_writes: state.dirty.len() + state.removed.len() + usize::from(state.cleared),
            persistent: state.connection.is_some(),
        }
    }

    /// Held for the whole of an existence check so two checks against the
    /// same cache never query the same title at once.
    pub fn lock_checks(&self) -> MutexGuard<'_, ()> {
        self.check_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn lock(&self) -> MutexGuard<'_, CacheState> {
        // A panicked worker cannot leave an entry half-written, so the map
        // stays usable.
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Drop for ExistenceCache {
    fn drop(&mut self) {
        if let Err(error) = self.flush() {
            warn!(error = %error, "failed to flush existence cache on shutdown");
        }
    }
}

fn flush_state(state: &mut CacheState) -> Result<usize> {
    let CacheState {
        connection,
        entries,
        dirty,
        removed,
        cleared,
        writes_since_flush,
    } = state;
    *writes_since_flush = 0;
    let Some(connection) = connection.as_mut() else {
        dirty.clear();
        removed.clear();
        *cleared = false;
        return Ok(0);
    };
    if dirty.is_empty() && removed.is_empty() && !*cleared {
        return Ok(0);
    }

    let transaction = connection
        .transaction()
        .context("failed to start existence cache transaction")?;
    let mut touched = 0usize;
    if *cleared {
        touched += transaction
            .execute("DELETE FROM page_existence", [])
            .context("failed to clear existence cache")?;
    }
    for key in removed.iter() {
        touched += transaction
            .execute("DELETE FROM page_existence WHERE title_key = ?1", [key])
            .with_context(|| format!("failed to remove cached title {key}"))?;
    }
    for key in dirty.iter() {
        let Some(entry) = entries.get(key) else {
            continue;
        };
        touched += transaction
            .execute(
                "INSERT INTO page_existence (title_key, title, page_exists, checked_at_unix)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(title_key) DO UPDATE SET
                    title = excluded.title,
                    page_exists = excluded.page_exists,
                    checked_at_unix = excluded.checked_at_unix",
                params![
                    key,
                    entry.title,
                    i64::from(entry.exists),
                    i64::try_from(entry.checked_at_unix).unwrap_or(i64::MAX),
                ],
            )
            .with_context(|| format!("failed to store cached title {}", entry.title))?;
    }
    transaction
        .commit()
        .context("failed to commit existence cache transaction")?;

    dirty.clear();
    removed.clear();
    *cleared = false;
    debug!(rows = touched, "flushed existence cache");
    Ok(touched)
}

fn open_cache_connection(db_path: &Path) -> Result<Connection> {
    if let Some(parent) = db_path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent).with_context(|| {
            format!(
                "failed to create database parent directory {}",
                parent.display()
            )
        })?;
    }
    let connection = Connection::open(db_path)
        .with_context(|| format!("failed to open {}", db_path.display()))?;
    connection
        .busy_timeout(Duration::from_secs(5))
        .context("failed to set sqlite busy timeout")?;
    connection
        .pragma_update(None, "journal_mode", "WAL")
        .context("failed to enable WAL journal mode")?;
    Ok(connection)
}

fn initialize_cache_schema(connection: &Connection) -> Result<()> {
    connection
        .execute_batch(CACHE_SCHEMA_SQL)
        .context("failed to initialize existence cache schema")
}

fn load_entries(connection: &Connection) -> Result<BTreeMap<String, CacheEntry>> {
    let mut statement = connection
        .prepare("SELECT title_key, title, page_exists, checked_at_unix FROM page_existence")
        .context("failed to prepare existence cache query")?;
    let rows = statement
        .query_map([], |row| {
            let key: String = row.get(0)?;
            let title: String = row.get(1)?;
            let exists: i64 = row.get(2)?;
            let checked_at: i64 = row.get(3)?;
            Ok((
                key,
                CacheEntry {
                    title,
                    exists: exists != 0,
                    checked_at_unix: u64::try_from(checked_at).unwrap_or(0),
                },
            ))
        })
        .context("failed to read existence cache")?;

    let mut entries = BTreeMap::new();
    for row in rows {
        let (key, entry) = row.context("failed to decode existence cache row")?;
        entries.insert(key, entry);
    }
    Ok(entries)
}

fn now_unix() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_secs())
        .unwrap_or(0)
}
