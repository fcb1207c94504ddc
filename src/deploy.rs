//! Deploy, remove and compile for one game root.
//!
//! Every mutating operation runs under the game lock and walks the mod's files
//! strictly in manifest order. Deploy and compile are all-or-nothing: a failure
//! on any file undoes the work already done in the same call. Remove keeps
//! going past broken files and reports them, so a damaged install can always be
//! walked back towards its pristine state.

use crate::{
    backup,
    content::{self, remove_file_if_exists},
    context::ManagerContext,
    error::{ManagerError, Result},
    layout::{normalize_managed_path, validate_mod_id, GameLayout},
    lineage::{FileLineage, FileVersion},
    lock::GameLockGuard,
    manifest::{CompileMetadata, ModFile, ModManifest},
    state::GameState,
    store::{self, StoreError},
};
use serde::Serialize;
use std::{
    fs, io,
    path::{Path, PathBuf},
};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Lifecycle of a mod within one game. Reports carry the state a mod ended in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ModState {
    #[default]
    Stored,
    Deploying,
    Deployed,
    Removing,
    Trashed,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct DeployReport {
    pub mod_id: String,
    pub state: ModState,
    /// Paths whose live content now comes from this mod.
    pub applied: Vec<String>,
    /// Paths recorded underneath a higher-priority owner.
    pub shadowed: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SkippedFile {
    pub path: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RemoveReport {
    pub mod_id: String,
    pub state: ModState,
    /// Paths now showing a lower-priority owner's content.
    pub restored: Vec<String>,
    /// Paths returned to their original game content.
    pub reverted: Vec<String>,
    /// Paths where another mod stayed on top; live content untouched.
    pub unchanged: Vec<String>,
    pub skipped: Vec<SkippedFile>,
}

impl RemoveReport {
    pub fn is_partial(&self) -> bool {
        !self.skipped.is_empty()
    }
}

enum LayerRemoval {
    Restored,
    Reverted,
    Unchanged,
    /// Ownership was released but the live file could not be updated.
    LiveStale(ManagerError),
}

pub struct DeploymentCoordinator {
    context: ManagerContext,
    game_id: String,
    layout: GameLayout,
}

impl DeploymentCoordinator {
    pub fn new(
        context: ManagerContext,
        game_id: impl Into<String>,
        root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            context,
            game_id: game_id.into(),
            layout: GameLayout::new(root),
        }
    }

    pub fn game_id(&self) -> &str {
        &self.game_id
    }

    pub fn layout(&self) -> &GameLayout {
        &self.layout
    }

    pub fn context(&self) -> &ManagerContext {
        &self.context
    }

    pub fn deploy(&self, mod_id: &str) -> Result<DeployReport> {
        validate_mod_id(mod_id)?;
        let _guard = self.acquire()?;

        let mut manifest = self.load_manifest(mod_id)?;
        if manifest.game_id != self.game_id {
            return Err(ManagerError::GameMismatch {
                mod_id: mod_id.to_string(),
                expected: self.game_id.clone(),
                found: manifest.game_id,
            });
        }
        let mut state = self.load_state()?;
        if state.is_deployed(mod_id) {
            return Err(ManagerError::AlreadyDeployed(mod_id.to_string()));
        }
        transition(mod_id, ModState::Stored, ModState::Deploying);

        let mut txn = DeployTransaction::new(&self.layout);
        let mut report = match self.apply_files(&manifest, &state, &mut txn) {
            Ok(report) => report,
            Err(err) => {
                warn!(mod_id, "deploy failed, rolling back: {err}");
                txn.rollback();
                transition(mod_id, ModState::Deploying, ModState::Stored);
                return Err(err);
            }
        };

        manifest.enabled = true;
        let committed = txn.persist_lineages().and_then(|()| {
            state
                .append_mod(manifest.clone())
                .map_err(|dup| ManagerError::AlreadyDeployed(dup.0))?;
            state.sort_deployed_mods();
            self.save_state(&mut state)
        });
        if let Err(err) = committed {
            warn!(mod_id, "persisting deploy failed, rolling back: {err}");
            txn.rollback();
            transition(mod_id, ModState::Deploying, ModState::Stored);
            return Err(err);
        }

        if let Err(err) = store::write(&manifest, &self.layout.manifest_path(mod_id)) {
            warn!(mod_id, "update manifest enabled flag: {err}");
        }
        transition(mod_id, ModState::Deploying, ModState::Deployed);
        report.state = ModState::Deployed;
        info!(
            mod_id,
            applied = report.applied.len(),
            shadowed = report.shadowed.len(),
            "deployed mod"
        );
        Ok(report)
    }

    fn apply_files(
        &self,
        manifest: &ModManifest,
        state: &GameState,
        txn: &mut DeployTransaction<'_>,
    ) -> Result<DeployReport> {
        let load_order_of = |id: &str| {
            if id == manifest.id {
                manifest.load_order
            } else {
                state.load_order_of(id).unwrap_or(0)
            }
        };
        let mut report = DeployReport {
            mod_id: manifest.id.clone(),
            ..DeployReport::default()
        };

        for file in &manifest.files {
            let managed = normalize_managed_path(&file.path)?;
            if !content::object_exists(&self.layout, &file.content_hash) {
                return Err(ManagerError::io(
                    "locate stored object",
                    self.layout.object_path(&file.content_hash),
                    io::Error::from(io::ErrorKind::NotFound),
                ));
            }

            let prior = match txn.lineage(&managed) {
                Some(lineage) => Some(lineage.clone()),
                None => self.load_lineage(&managed)?,
            };
            let first_override = prior.is_none();
            let mut lineage = prior.clone().unwrap_or_else(|| {
                FileLineage::new(managed.clone(), self.layout.live_path(&managed).is_file())
            });
            let previous_top = lineage.peek().map(|version| version.content_hash.clone());
            let position = lineage
                .insert_ordered_version(
                    FileVersion::new(&manifest.id, &file.content_hash),
                    load_order_of,
                )
                .map_err(|err| ManagerError::from_lineage(err, &managed))?;

            let entry = txn.begin(&managed, prior, lineage);
            if position.is_top {
                if first_override && !backup::has_pristine(&self.layout, &managed) {
                    entry.backup_created = backup::snapshot_pristine(&self.layout, &managed)?;
                }
                entry.previous_top = previous_top;
                entry.live_changed = true;
                content::install_object(&self.layout, &managed, &file.content_hash)?;
                debug!(mod_id = %manifest.id, path = %managed, "applied file");
                report.applied.push(managed);
            } else {
                debug!(
                    mod_id = %manifest.id,
                    path = %managed,
                    index = position.index,
                    "recorded shadowed layer"
                );
                report.shadowed.push(managed);
            }
        }

        Ok(report)
    }

    pub fn remove(&self, mod_id: &str) -> Result<RemoveReport> {
        validate_mod_id(mod_id)?;
        let _guard = self.acquire()?;

        let mut state = self.load_state()?;
        let entry = state
            .get(mod_id)
            .cloned()
            .ok_or_else(|| ManagerError::NotDeployed(mod_id.to_string()))?;
        transition(mod_id, ModState::Deployed, ModState::Removing);

        let mut report = RemoveReport {
            mod_id: mod_id.to_string(),
            ..RemoveReport::default()
        };
        for file in &entry.files {
            let outcome = normalize_managed_path(&file.path).and_then(|managed| {
                self.remove_layer(&managed, mod_id, &state)
                    .map(|outcome| (managed, outcome))
            });
            match outcome {
                Ok((managed, LayerRemoval::Restored)) => report.restored.push(managed),
                Ok((managed, LayerRemoval::Reverted)) => report.reverted.push(managed),
                Ok((managed, LayerRemoval::Unchanged)) => report.unchanged.push(managed),
                Ok((managed, LayerRemoval::LiveStale(err))) => {
                    warn!(mod_id, path = %managed, "live file left stale: {err}");
                    report.skipped.push(SkippedFile {
                        path: managed,
                        reason: format!("ownership released, live file not updated: {err}"),
                    });
                }
                Err(err) => {
                    warn!(mod_id, path = %file.path, "skipping file during remove: {err}");
                    report.skipped.push(SkippedFile {
                        path: file.path.clone(),
                        reason: err.to_string(),
                    });
                }
            }
        }

        state.remove_mod(mod_id);
        self.save_state(&mut state)?;

        match store::read_optional::<ModManifest>(&self.layout.manifest_path(mod_id)) {
            Ok(Some(mut manifest)) => {
                manifest.enabled = false;
                if let Err(err) = store::write(&manifest, &self.layout.manifest_path(mod_id)) {
                    warn!(mod_id, "update manifest enabled flag: {err}");
                }
            }
            Ok(None) => {}
            Err(err) => warn!(mod_id, "read manifest after remove: {err}"),
        }

        transition(mod_id, ModState::Removing, ModState::Trashed);
        report.state = ModState::Trashed;
        info!(
            mod_id,
            restored = report.restored.len(),
            reverted = report.reverted.len(),
            skipped = report.skipped.len(),
            "removed mod"
        );
        Ok(report)
    }

    /// Pops `mod_id` off one lineage. The lineage document is settled before
    /// the live file is touched, so a failed copy never leaves the mod listed.
    fn remove_layer(
        &self,
        managed: &str,
        mod_id: &str,
        state: &GameState,
    ) -> Result<LayerRemoval> {
        let path = self.layout.lineage_path(managed);
        let mut lineage = store::read_optional::<FileLineage>(&path)?.ok_or_else(|| {
            ManagerError::OwnerNotFound {
                mod_id: mod_id.to_string(),
                path: managed.to_string(),
            }
        })?;
        let previous_top = lineage.peek().cloned();
        let outcome = lineage
            .pop_until(mod_id)
            .map_err(|err| ManagerError::from_lineage(err, managed))?;

        // Layers above the removed one still belong to deployed mods.
        let load_order_of = |id: &str| state.load_order_of(id).unwrap_or(0);
        for survivor in outcome.cascaded {
            lineage
                .insert_ordered_version(survivor, load_order_of)
                .map_err(|err| ManagerError::from_lineage(err, managed))?;
        }

        let Some(top) = lineage.peek() else {
            store::remove(&path)?;
            // The backup outlives a failed restore so a later deploy reuses it.
            let restored =
                backup::restore_pristine(&self.layout, managed, lineage.original_present);
            if let Err(err) = restored {
                return Ok(LayerRemoval::LiveStale(err));
            }
            if let Err(err) = backup::discard_pristine(&self.layout, managed) {
                warn!(path = managed, "discard backup: {err}");
            }
            return Ok(LayerRemoval::Reverted);
        };

        store::write(&lineage, &path)?;
        let same_top = previous_top.as_ref().is_some_and(|previous| {
            previous.mod_id == top.mod_id && previous.content_hash == top.content_hash
        });
        if same_top {
            return Ok(LayerRemoval::Unchanged);
        }
        match content::install_object(&self.layout, managed, &top.content_hash) {
            Ok(()) => Ok(LayerRemoval::Restored),
            Err(err) => Ok(LayerRemoval::LiveStale(err)),
        }
    }

    /// Packs `source_dir` into content-addressed storage and writes its manifest.
    pub fn compile(&self, source_dir: &Path, metadata: CompileMetadata) -> Result<ModManifest> {
        validate_mod_id(&metadata.id)?;
        if !source_dir.is_dir() {
            return Err(ManagerError::io(
                "open mod source",
                source_dir,
                io::Error::from(io::ErrorKind::NotFound),
            ));
        }
        let _guard = self.acquire()?;

        let state = self.load_state()?;
        if state.is_deployed(&metadata.id) {
            return Err(ManagerError::AlreadyDeployed(metadata.id));
        }

        let mut created = Vec::new();
        let manifest = match self.pack_source(source_dir, metadata, &mut created) {
            Ok(manifest) => manifest,
            Err(err) => {
                for hash in &created {
                    if let Err(cleanup) = remove_file_if_exists(&self.layout.object_path(hash)) {
                        warn!("remove object {hash} after failed compile: {cleanup}");
                    }
                }
                return Err(err);
            }
        };
        info!(
            mod_id = %manifest.id,
            files = manifest.files.len(),
            bytes = manifest.total_bytes(),
            new_objects = created.len(),
            "compiled mod"
        );
        Ok(manifest)
    }

    fn pack_source(
        &self,
        source_dir: &Path,
        metadata: CompileMetadata,
        created: &mut Vec<String>,
    ) -> Result<ModManifest> {
        let mut files = Vec::new();
        for entry in WalkDir::new(source_dir)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| !is_ignored_source_path(entry.path()))
        {
            let entry = entry.map_err(|err| {
                let path = err
                    .path()
                    .map(Path::to_path_buf)
                    .unwrap_or_else(|| source_dir.to_path_buf());
                ManagerError::io("walk mod source", path, io::Error::from(err))
            })?;
            if !entry.file_type().is_file() {
                continue;
            }
            let rel = entry
                .path()
                .strip_prefix(source_dir)
                .map_err(|_| ManagerError::InvalidPath(entry.path().display().to_string()))?;
            let managed = normalize_managed_path(&rel.to_string_lossy())?;
            let stored = content::store_object(&self.layout, entry.path())?;
            if stored.created {
                created.push(stored.hash.clone());
            }
            files.push(ModFile {
                path: managed,
                content_hash: stored.hash,
                size: stored.size,
            });
        }
        files.sort_by(|a, b| a.path.cmp(&b.path));

        let manifest = metadata.into_manifest(&self.game_id, files);
        store::write(&manifest, &self.layout.manifest_path(&manifest.id))?;
        Ok(manifest)
    }

    pub fn deployed_mods(&self) -> Result<Vec<ModManifest>> {
        Ok(self.load_state()?.deployed_mods)
    }

    pub fn manifest(&self, mod_id: &str) -> Result<ModManifest> {
        validate_mod_id(mod_id)?;
        self.load_manifest(mod_id)
    }

    /// Every manifest in storage, deployed or not, sorted by id.
    pub fn stored_manifests(&self) -> Result<Vec<ModManifest>> {
        let dir = self.layout.manifests_dir();
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(ManagerError::io("list manifests", dir, err)),
        };
        let mut manifests = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|err| ManagerError::io("list manifests", &dir, err))?;
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }
            manifests.push(store::read::<ModManifest>(&path)?);
        }
        manifests.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(manifests)
    }

    pub fn lineage(&self, path: &str) -> Result<Option<FileLineage>> {
        let managed = normalize_managed_path(path)?;
        self.load_lineage(&managed)
    }

    fn acquire(&self) -> Result<GameLockGuard> {
        self.context
            .lock_game(&self.game_id, self.layout.root())
            .ok_or_else(|| ManagerError::GameLocked {
                game_id: self.game_id.clone(),
            })
    }

    fn load_manifest(&self, mod_id: &str) -> Result<ModManifest> {
        match store::read(&self.layout.manifest_path(mod_id)) {
            Ok(manifest) => Ok(manifest),
            Err(StoreError::NotFound(_)) => Err(ManagerError::ManifestNotFound(mod_id.to_string())),
            Err(err) => Err(err.into()),
        }
    }

    fn load_state(&self) -> Result<GameState> {
        Ok(store::read_optional(&self.layout.game_state_path())?.unwrap_or_default())
    }

    fn save_state(&self, state: &mut GameState) -> Result<()> {
        state.touch();
        store::write(state, &self.layout.game_state_path())?;
        Ok(())
    }

    fn load_lineage(&self, managed: &str) -> Result<Option<FileLineage>> {
        Ok(store::read_optional(&self.layout.lineage_path(managed))?)
    }
}

fn transition(mod_id: &str, from: ModState, to: ModState) {
    debug!(mod_id, ?from, ?to, "mod state");
}

fn is_ignored_source_path(path: &Path) -> bool {
    path.file_name().is_some_and(|name| {
        let part = name.to_string_lossy();
        part.eq_ignore_ascii_case("__MACOSX")
            || part.eq_ignore_ascii_case(".ds_store")
            || part.eq_ignore_ascii_case("thumbs.db")
            || part == ".git"
            || part == ".svn"
    })
}

struct TouchedFile {
    managed: String,
    /// Lineage as persisted before this call.
    prior: Option<FileLineage>,
    lineage: FileLineage,
    previous_top: Option<String>,
    live_changed: bool,
    backup_created: bool,
    persisted: bool,
}

/// Undo log for one deploy call.
struct DeployTransaction<'a> {
    layout: &'a GameLayout,
    touched: Vec<TouchedFile>,
}

impl<'a> DeployTransaction<'a> {
    fn new(layout: &'a GameLayout) -> Self {
        Self {
            layout,
            touched: Vec::new(),
        }
    }

    fn lineage(&self, managed: &str) -> Option<&FileLineage> {
        self.touched
            .iter()
            .rev()
            .find(|entry| entry.managed == managed)
            .map(|entry| &entry.lineage)
    }

    fn begin(
        &mut self,
        managed: &str,
        prior: Option<FileLineage>,
        lineage: FileLineage,
    ) -> &mut TouchedFile {
        self.touched.push(TouchedFile {
            managed: managed.to_string(),
            prior,
            lineage,
            previous_top: None,
            live_changed: false,
            backup_created: false,
            persisted: false,
        });
        let last = self.touched.len() - 1;
        &mut self.touched[last]
    }

    fn persist_lineages(&mut self) -> Result<()> {
        for entry in &mut self.touched {
            store::write(&entry.lineage, &self.layout.lineage_path(&entry.managed))?;
            entry.persisted = true;
        }
        Ok(())
    }

    fn rollback(self) {
        for entry in self.touched.iter().rev() {
            if entry.live_changed {
                let restored = match &entry.previous_top {
                    Some(hash) => content::install_object(self.layout, &entry.managed, hash),
                    None => backup::restore_pristine(
                        self.layout,
                        &entry.managed,
                        entry.lineage.original_present,
                    ),
                };
                if let Err(err) = restored {
                    warn!(path = %entry.managed, "rollback live file: {err}");
                }
            }
            if entry.backup_created {
                if let Err(err) = backup::discard_pristine(self.layout, &entry.managed) {
                    warn!(path = %entry.managed, "rollback backup: {err}");
                }
            }
            if entry.persisted {
                let path = self.layout.lineage_path(&entry.managed);
                let reverted = match &entry.prior {
                    Some(prior) => store::write(prior, &path),
                    None => store::remove(&path),
                };
                if let Err(err) = reverted {
                    warn!(path = %entry.managed, "rollback lineage: {err}");
                }
            }
        }
    }
}
