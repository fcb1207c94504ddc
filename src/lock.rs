//! Game directory locking.
//!
//! Two layers cooperate:
//!
//! - [`DirectoryLocker`] claims a directory by atomically creating a `.lock`
//!   marker inside it (`O_CREAT | O_EXCL`). This is what keeps separate
//!   processes apart.
//! - [`LockManager`] maps `game:<id>` keys to the lockers this process holds,
//!   behind one mutex, so threads of the same process see a busy game without
//!   touching the filesystem.
//!
//! Acquisition is try-once everywhere. Callers that want to wait must poll.

use crate::lineage::now_timestamp;
use serde::{Deserialize, Serialize};
use std::{
    collections::HashMap,
    fs::{self, OpenOptions},
    io::{self, Write},
    path::{Path, PathBuf},
    sync::{Arc, Mutex, MutexGuard},
    time::{Duration, SystemTime, UNIX_EPOCH},
};
use tracing::{debug, info, warn};

use crate::layout::LOCK_FILE;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockHolder {
    pub pid: u32,
    pub acquired_at: i64,
}

#[derive(Debug)]
pub struct DirectoryLocker {
    directory: PathBuf,
    marker: PathBuf,
    held: bool,
}

impl DirectoryLocker {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        let directory = directory.into();
        let marker = directory.join(LOCK_FILE);
        Self {
            directory,
            marker,
            held: false,
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn marker_path(&self) -> &Path {
        &self.marker
    }

    pub fn is_held(&self) -> bool {
        self.held
    }

    /// Creates the marker if it does not exist yet. Returns false when another
    /// holder already owns the directory.
    pub fn acquire_lock(&mut self) -> bool {
        if self.held {
            return false;
        }
        let holder = LockHolder {
            pid: std::process::id(),
            acquired_at: now_timestamp(),
        };
        match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.marker)
        {
            Ok(mut file) => {
                if let Ok(raw) = serde_json::to_string(&holder) {
                    if let Err(err) = file.write_all(raw.as_bytes()) {
                        warn!(marker = ?self.marker, "write lock holder: {err}");
                    }
                }
                self.held = true;
                debug!(directory = ?self.directory, "directory locked");
                true
            }
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => false,
            Err(err) => {
                warn!(marker = ?self.marker, "create lock marker: {err}");
                false
            }
        }
    }

    /// Deletes the marker if this locker holds it. Never fails.
    pub fn release_lock(&mut self) {
        if !self.held {
            return;
        }
        match fs::remove_file(&self.marker) {
            Ok(()) => debug!(directory = ?self.directory, "directory unlocked"),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                warn!(marker = ?self.marker, "lock marker vanished while held");
            }
            Err(err) => warn!(marker = ?self.marker, "remove lock marker: {err}"),
        }
        self.held = false;
    }

    /// One-shot acquire. The marker stays until someone removes it.
    pub fn lock_directory(path: impl Into<PathBuf>) -> bool {
        DirectoryLocker::new(path).acquire_lock()
    }

    pub fn holder(&self) -> Option<LockHolder> {
        read_holder(&self.marker)
    }

    /// Removes a marker older than `max_age`. The age comes from the recorded
    /// holder, or the marker's mtime when the holder record is unreadable.
    ///
    /// The marker is first renamed to a private sibling and its age checked
    /// again there, so a holder that acquired after the first check keeps its
    /// lock.
    pub fn sweep_stale(&self, max_age: Duration) -> bool {
        if self.held {
            return false;
        }
        if !marker_age(&self.marker).is_some_and(|age| age > max_age) {
            return false;
        }
        let claimed = self.claimed_path();
        if let Err(err) = fs::rename(&self.marker, &claimed) {
            if err.kind() != io::ErrorKind::NotFound {
                warn!(marker = ?self.marker, "claim stale lock marker: {err}");
            }
            return false;
        }
        self.finish_sweep(&claimed, max_age)
    }

    fn claimed_path(&self) -> PathBuf {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_nanos())
            .unwrap_or_default();
        self.directory
            .join(format!("{LOCK_FILE}.stale-{}-{nanos}", std::process::id()))
    }

    fn finish_sweep(&self, claimed: &Path, max_age: Duration) -> bool {
        let Some(age) = marker_age(claimed).filter(|age| *age > max_age) else {
            // A fresh holder slipped in between the check and the rename.
            if let Err(err) = fs::hard_link(claimed, &self.marker) {
                warn!(marker = ?self.marker, "reinstate lock marker: {err}");
            }
            if let Err(err) = fs::remove_file(claimed) {
                warn!(marker = ?claimed, "remove claimed lock marker: {err}");
            }
            return false;
        };
        match fs::remove_file(claimed) {
            Ok(()) => {
                info!(
                    marker = ?self.marker,
                    age_secs = age.as_secs(),
                    "removed stale lock marker"
                );
                true
            }
            Err(err) => {
                warn!(marker = ?claimed, "remove stale lock marker: {err}");
                false
            }
        }
    }
}

fn read_holder(marker: &Path) -> Option<LockHolder> {
    let raw = fs::read_to_string(marker).ok()?;
    serde_json::from_str(&raw).ok()
}

fn marker_age(marker: &Path) -> Option<Duration> {
    match read_holder(marker) {
        Some(holder) => {
            let secs = now_timestamp().saturating_sub(holder.acquired_at).max(0);
            Some(Duration::from_secs(secs as u64))
        }
        None => fs::metadata(marker)
            .and_then(|meta| meta.modified())
            .ok()
            .and_then(|modified| SystemTime::now().duration_since(modified).ok()),
    }
}

pub fn game_key(game_id: &str) -> String {
    format!("game:{game_id}")
}

/// Registry of the game locks held by this process.
#[derive(Debug, Default)]
pub struct LockManager {
    stale_after: Option<Duration>,
    lockers: Mutex<HashMap<String, DirectoryLocker>>,
}

impl LockManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_stale_sweep(stale_after: Option<Duration>) -> Self {
        Self {
            stale_after,
            lockers: Mutex::new(HashMap::new()),
        }
    }

    pub fn lock_game(&self, game_id: &str, directory: &Path) -> bool {
        let key = game_key(game_id);
        let mut lockers = self.entries();
        if lockers.contains_key(&key) {
            debug!(key = %key, "game already locked in this process");
            return false;
        }
        let mut locker = DirectoryLocker::new(directory);
        if let Some(max_age) = self.stale_after {
            locker.sweep_stale(max_age);
        }
        if !locker.acquire_lock() {
            debug!(key = %key, directory = ?directory, "game directory busy");
            return false;
        }
        lockers.insert(key, locker);
        true
    }

    pub fn is_locked(&self, key: &str) -> bool {
        self.entries().contains_key(key)
    }

    pub fn unlock_game(&self, game_id: &str) {
        let key = game_key(game_id);
        if let Some(mut locker) = self.entries().remove(&key) {
            locker.release_lock();
        }
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<String, DirectoryLocker>> {
        self.lockers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Releases its game lock when dropped.
#[derive(Debug)]
pub struct GameLockGuard {
    manager: Arc<LockManager>,
    game_id: String,
}

impl GameLockGuard {
    pub fn try_acquire(
        manager: &Arc<LockManager>,
        game_id: &str,
        directory: &Path,
    ) -> Option<Self> {
        if !manager.lock_game(game_id, directory) {
            return None;
        }
        Some(Self {
            manager: Arc::clone(manager),
            game_id: game_id.to_string(),
        })
    }

    pub fn game_id(&self) -> &str {
        &self.game_id
    }
}

impl Drop for GameLockGuard {
    fn drop(&mut self) {
        self.manager.unlock_game(&self.game_id);
    }
}
