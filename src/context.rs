use crate::lock::{GameLockGuard, LockManager};
use std::{path::Path, sync::Arc, time::Duration};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ManagerSettings {
    /// Lock markers older than this are removed before acquiring. `None`
    /// leaves abandoned markers for the user to clear.
    pub stale_lock_after: Option<Duration>,
}

/// Process-side state shared by every coordinator that should see the same
/// in-process locks. Clones share the registry.
#[derive(Debug, Clone)]
pub struct ManagerContext {
    locks: Arc<LockManager>,
    settings: ManagerSettings,
}

impl ManagerContext {
    pub fn new(settings: ManagerSettings) -> Self {
        let locks = Arc::new(LockManager::with_stale_sweep(settings.stale_lock_after));
        Self { locks, settings }
    }

    pub fn settings(&self) -> &ManagerSettings {
        &self.settings
    }

    pub fn locks(&self) -> &Arc<LockManager> {
        &self.locks
    }

    pub fn lock_game(&self, game_id: &str, directory: &Path) -> Option<GameLockGuard> {
        GameLockGuard::try_acquire(&self.locks, game_id, directory)
    }
}

impl Default for ManagerContext {
    fn default() -> Self {
        Self::new(ManagerSettings::default())
    }
}
