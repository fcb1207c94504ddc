#![allow(dead_code)]

use layerkeep::{CompileMetadata, DeploymentCoordinator, ManagerContext, ModManifest};
use std::{fs, path::Path};
use tempfile::TempDir;

pub const GAME_ID: &str = "demo";
pub const PRISTINE: &[u8] = b"original rock texture";

/// A scratch game root with one original file at `Data/rock.dds`.
pub struct TestGame {
    pub root: TempDir,
    pub sources: TempDir,
    pub coordinator: DeploymentCoordinator,
}

impl TestGame {
    pub fn new() -> Self {
        Self::with_context(ManagerContext::default())
    }

    pub fn with_context(context: ManagerContext) -> Self {
        let root = tempfile::tempdir().unwrap();
        write_file(root.path(), "Data/rock.dds", PRISTINE);
        let sources = tempfile::tempdir().unwrap();
        let coordinator = DeploymentCoordinator::new(context, GAME_ID, root.path());
        Self {
            root,
            sources,
            coordinator,
        }
    }

    /// Another coordinator bound to the same game root.
    pub fn second_coordinator(&self, context: ManagerContext) -> DeploymentCoordinator {
        DeploymentCoordinator::new(context, GAME_ID, self.root.path())
    }

    pub fn compile(&self, id: &str, load_order: u32, files: &[(&str, &str)]) -> ModManifest {
        let source = self.sources.path().join(id);
        for (path, contents) in files {
            write_file(&source, path, contents.as_bytes());
        }
        self.coordinator
            .compile(&source, CompileMetadata::new(id).with_load_order(load_order))
            .unwrap()
    }

    pub fn live(&self, path: &str) -> Option<Vec<u8>> {
        fs::read(self.root.path().join(path)).ok()
    }

    pub fn owners(&self, path: &str) -> Vec<String> {
        self.coordinator
            .lineage(path)
            .unwrap()
            .map(|lineage| lineage.versions.into_iter().map(|v| v.mod_id).collect())
            .unwrap_or_default()
    }

    pub fn has_backup(&self, path: &str) -> bool {
        self.coordinator.layout().backup_path(path).exists()
    }

    pub fn has_lineage_doc(&self, path: &str) -> bool {
        self.coordinator.layout().lineage_path(path).exists()
    }
}

pub fn write_file(root: &Path, rel: &str, contents: &[u8]) {
    let path = root.join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, contents).unwrap();
}

pub fn hash(contents: &[u8]) -> String {
    blake3::hash(contents).to_hex().to_string()
}
