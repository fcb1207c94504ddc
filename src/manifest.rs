use crate::store::Entity;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModFile {
    pub path: String,
    pub content_hash: String,
    pub size: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModManifest {
    pub id: String,
    pub game_id: String,
    pub name: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub load_order: u32,
    #[serde(default)]
    pub download_source: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub files: Vec<ModFile>,
    #[serde(default)]
    pub enabled: bool,
}

impl Entity for ModManifest {
    const KIND: &'static str = "mod_manifest";
}

impl ModManifest {
    pub fn total_bytes(&self) -> u64 {
        self.files.iter().map(|file| file.size).sum()
    }

    pub fn file(&self, path: &str) -> Option<&ModFile> {
        self.files.iter().find(|file| file.path == path)
    }
}

/// Descriptive fields supplied when packing a source directory into a mod.
#[derive(Debug, Clone, Default)]
pub struct CompileMetadata {
    pub id: String,
    pub name: Option<String>,
    pub version: Option<String>,
    pub load_order: u32,
    pub download_source: Option<String>,
    pub description: Option<String>,
}

impl CompileMetadata {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }

    pub fn with_load_order(mut self, load_order: u32) -> Self {
        self.load_order = load_order;
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    pub(crate) fn into_manifest(self, game_id: &str, files: Vec<ModFile>) -> ModManifest {
        let name = self
            .name
            .filter(|name| !name.trim().is_empty())
            .unwrap_or_else(|| self.id.clone());
        ModManifest {
            id: self.id,
            game_id: game_id.to_string(),
            name,
            version: self.version.unwrap_or_default(),
            load_order: self.load_order,
            download_source: self.download_source,
            description: self.description,
            files,
            enabled: false,
        }
    }
}
