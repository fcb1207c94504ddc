use crate::context::ManagerSettings;
use anyhow::{Context, Result};
use directories::BaseDirs;
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

pub const CONFIG_DIR_ENV: &str = "LAYERKEEP_CONFIG_DIR";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameEntry {
    pub id: String,
    pub root: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_game")]
    pub default_game: String,
    #[serde(default)]
    pub games: Vec<GameEntry>,
    /// Age after which a leftover `.lock` marker is considered abandoned.
    #[serde(default)]
    pub stale_lock_secs: Option<u64>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            default_game: default_game(),
            games: Vec::new(),
            stale_lock_secs: None,
        }
    }
}

impl AppConfig {
    pub fn load_or_create() -> Result<Self> {
        Self::load_or_create_in(&base_config_dir()?)
    }

    pub fn load_or_create_in(dir: &Path) -> Result<Self> {
        fs::create_dir_all(dir).context("create config dir")?;
        let path = dir.join("config.json");
        if path.exists() {
            let raw = fs::read_to_string(&path).context("read config")?;
            let mut config: AppConfig = serde_json::from_str(&raw).context("parse config")?;
            if config.default_game.trim().is_empty() {
                config.default_game = default_game();
                config.save_in(dir)?;
            }
            return Ok(config);
        }

        let config = AppConfig::default();
        config.save_in(dir)?;
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        self.save_in(&base_config_dir()?)
    }

    pub fn save_in(&self, dir: &Path) -> Result<()> {
        fs::create_dir_all(dir).context("create config dir")?;
        let raw = serde_json::to_string_pretty(self).context("serialize config")?;
        fs::write(dir.join("config.json"), raw).context("write config")?;
        Ok(())
    }

    pub fn game_root(&self, game_id: &str) -> Option<&Path> {
        self.games
            .iter()
            .find(|entry| entry.id == game_id)
            .map(|entry| entry.root.as_path())
    }

    pub fn set_game_root(&mut self, game_id: &str, root: PathBuf) {
        if let Some(entry) = self.games.iter_mut().find(|entry| entry.id == game_id) {
            entry.root = root;
            return;
        }
        self.games.push(GameEntry {
            id: game_id.to_string(),
            root,
        });
    }

    pub fn manager_settings(&self) -> ManagerSettings {
        ManagerSettings {
            stale_lock_after: self.stale_lock_secs.map(Duration::from_secs),
        }
    }
}

fn default_game() -> String {
    "default".to_string()
}

fn base_config_dir() -> Result<PathBuf> {
    if let Some(dir) = std::env::var_os(CONFIG_DIR_ENV).filter(|value| !value.is_empty()) {
        return Ok(PathBuf::from(dir));
    }
    let base = BaseDirs::new().context("resolve home dir")?;
    Ok(base.data_local_dir().join("layerkeep"))
}
