use crate::error::{ManagerError, Result};
use blake3::Hasher;
use std::path::{Component, Path, PathBuf};

pub const MANAGER_DIR: &str = ".mod_manager";
pub const LOCK_FILE: &str = ".lock";

/// Resolved on-disk locations for one game root.
#[derive(Debug, Clone)]
pub struct GameLayout {
    root: PathBuf,
}

impl GameLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn manager_dir(&self) -> PathBuf {
        self.root.join(MANAGER_DIR)
    }

    pub fn manifests_dir(&self) -> PathBuf {
        self.manager_dir().join("manifests")
    }

    pub fn manifest_path(&self, mod_id: &str) -> PathBuf {
        self.manifests_dir().join(format!("{mod_id}.json"))
    }

    pub fn lineages_dir(&self) -> PathBuf {
        self.manager_dir().join("lineages")
    }

    pub fn lineage_path(&self, managed: &str) -> PathBuf {
        self.lineages_dir()
            .join(format!("{}.json", sanitize_managed_path(managed)))
    }

    pub fn game_state_path(&self) -> PathBuf {
        self.manager_dir().join("game_state.json")
    }

    pub fn backups_dir(&self) -> PathBuf {
        self.manager_dir().join("backups")
    }

    pub fn backup_path(&self, managed: &str) -> PathBuf {
        self.backups_dir().join(sanitize_managed_path(managed))
    }

    pub fn objects_dir(&self) -> PathBuf {
        self.manager_dir().join("objects")
    }

    pub fn object_path(&self, hash: &str) -> PathBuf {
        let shard = hash.get(..2).unwrap_or("00");
        self.objects_dir().join(shard).join(hash)
    }

    pub fn live_path(&self, managed: &str) -> PathBuf {
        let mut path = self.root.clone();
        for part in managed.split('/') {
            path.push(part);
        }
        path
    }

    pub fn lock_marker(&self) -> PathBuf {
        self.root.join(LOCK_FILE)
    }
}

/// Normalizes a mod-relative path to the `/`-separated form used as a lineage key.
pub fn normalize_managed_path(raw: &str) -> Result<String> {
    let unified = raw.replace('\\', "/");
    let path = Path::new(&unified);
    let mut parts = Vec::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => {
                let part = part
                    .to_str()
                    .ok_or_else(|| ManagerError::InvalidPath(raw.to_string()))?;
                parts.push(part.to_string());
            }
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(ManagerError::InvalidPath(raw.to_string()));
            }
        }
    }
    if parts.is_empty() {
        return Err(ManagerError::InvalidPath(raw.to_string()));
    }
    if parts.first().is_some_and(|part| part == MANAGER_DIR) || parts == [LOCK_FILE] {
        return Err(ManagerError::InvalidPath(raw.to_string()));
    }
    Ok(parts.join("/"))
}

/// Mod ids become file names, so they are restricted to a portable alphabet.
pub fn validate_mod_id(mod_id: &str) -> Result<()> {
    let valid = !mod_id.is_empty()
        && !mod_id.starts_with('.')
        && mod_id
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_' | '.'));
    if valid {
        Ok(())
    } else {
        Err(ManagerError::InvalidModId(mod_id.to_string()))
    }
}

/// File-name-safe form of a managed path. The hash suffix keeps paths that
/// flatten to the same label apart.
pub fn sanitize_managed_path(managed: &str) -> String {
    let label: String = managed
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || ch == '-' || ch == '.' {
                ch
            } else {
                '_'
            }
        })
        .collect();
    let mut hasher = Hasher::new();
    hasher.update(managed.as_bytes());
    let digest = hasher.finalize().to_hex().to_string();
    format!("{label}-{}", &digest[..12])
}
