use crate::{lineage::now_timestamp, manifest::ModManifest, store::Entity};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameState {
    #[serde(default)]
    pub last_modified: i64,
    #[serde(default)]
    pub deployed_mods: Vec<ModManifest>,
}

impl Entity for GameState {
    const KIND: &'static str = "game_state";
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("mod {0} is already deployed")]
pub struct DuplicateOwner(pub String);

impl GameState {
    pub fn append_mod(&mut self, mod_entry: ModManifest) -> Result<(), DuplicateOwner> {
        if self.is_deployed(&mod_entry.id) {
            return Err(DuplicateOwner(mod_entry.id));
        }
        self.deployed_mods.push(mod_entry);
        Ok(())
    }

    pub fn remove_mod(&mut self, mod_id: &str) -> Option<ModManifest> {
        let index = self
            .deployed_mods
            .iter()
            .position(|entry| entry.id == mod_id)?;
        Some(self.deployed_mods.remove(index))
    }

    /// Ascending by load order; equal orders fall back to mod id so the list
    /// matches the layering inside every lineage.
    pub fn sort_deployed_mods(&mut self) {
        self.deployed_mods
            .sort_by(|a, b| a.load_order.cmp(&b.load_order).then_with(|| a.id.cmp(&b.id)));
    }

    pub fn get(&self, mod_id: &str) -> Option<&ModManifest> {
        self.deployed_mods.iter().find(|entry| entry.id == mod_id)
    }

    pub fn is_deployed(&self, mod_id: &str) -> bool {
        self.get(mod_id).is_some()
    }

    pub fn load_order_of(&self, mod_id: &str) -> Option<u32> {
        self.get(mod_id).map(|entry| entry.load_order)
    }

    pub fn touch(&mut self) {
        self.last_modified = now_timestamp();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manifest(id: &str, load_order: u32) -> ModManifest {
        ModManifest {
            id: id.to_string(),
            game_id: "demo".to_string(),
            name: id.to_string(),
            version: "1.0".to_string(),
            load_order,
            download_source: None,
            description: None,
            files: Vec::new(),
            enabled: true,
        }
    }

    #[test]
    fn append_rejects_duplicates() {
        let mut state = GameState::default();
        state.append_mod(manifest("a", 1)).unwrap();
        assert_eq!(
            state.append_mod(manifest("a", 9)),
            Err(DuplicateOwner("a".to_string()))
        );
        assert_eq!(state.deployed_mods.len(), 1);
        assert_eq!(state.load_order_of("a"), Some(1));
    }

    #[test]
    fn sorts_by_load_order_then_id() {
        let mut state = GameState::default();
        for (id, order) in [("z", 2), ("m", 0), ("b", 2), ("a", 7)] {
            state.append_mod(manifest(id, order)).unwrap();
        }
        state.sort_deployed_mods();
        let ids: Vec<&str> = state.deployed_mods.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, ["m", "b", "z", "a"]);
    }

    #[test]
    fn remove_mod_returns_entry() {
        let mut state = GameState::default();
        state.append_mod(manifest("a", 1)).unwrap();
        assert_eq!(state.remove_mod("a").unwrap().id, "a");
        assert!(state.remove_mod("a").is_none());
        assert!(!state.is_deployed("a"));
    }
}
