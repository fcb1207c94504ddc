//! Per-file ownership stacks.
//!
//! A [`FileLineage`] lists every deployed mod that ships a given managed path,
//! bottom to top. The stack is kept ascending by `(load order, mod id)`, so the
//! top entry is the mod whose content is live on disk. Mods with equal load
//! orders are ordered by id, which makes the outcome independent of the order
//! in which they were deployed.

use crate::store::Entity;
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileVersion {
    pub mod_id: String,
    pub content_hash: String,
    pub timestamp: i64,
}

impl FileVersion {
    pub fn new(mod_id: impl Into<String>, content_hash: impl Into<String>) -> Self {
        Self {
            mod_id: mod_id.into(),
            content_hash: content_hash.into(),
            timestamp: now_timestamp(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LineageError {
    #[error("mod {0} already has a layer")]
    DuplicateOwner(String),
    #[error("mod {0} has no layer")]
    OwnerNotFound(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InsertPosition {
    pub index: usize,
    pub is_top: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PopOutcome {
    pub removed: FileVersion,
    /// Layers that sat above the removed one, bottom to top.
    pub cascaded: Vec<FileVersion>,
    pub top: Option<FileVersion>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileLineage {
    pub path: String,
    /// Whether a live file existed before the first override.
    #[serde(default = "default_true")]
    pub original_present: bool,
    #[serde(default)]
    pub versions: Vec<FileVersion>,
}

impl Entity for FileLineage {
    const KIND: &'static str = "file_lineage";
}

impl FileLineage {
    pub fn new(path: impl Into<String>, original_present: bool) -> Self {
        Self {
            path: path.into(),
            original_present,
            versions: Vec::new(),
        }
    }

    pub fn peek(&self) -> Option<&FileVersion> {
        self.versions.last()
    }

    pub fn is_empty(&self) -> bool {
        self.versions.is_empty()
    }

    pub fn len(&self) -> usize {
        self.versions.len()
    }

    pub fn contains(&self, mod_id: &str) -> bool {
        self.versions.iter().any(|version| version.mod_id == mod_id)
    }

    pub fn owners(&self) -> impl Iterator<Item = &str> {
        self.versions.iter().map(|version| version.mod_id.as_str())
    }

    /// Inserts `version` below the first layer whose owner sorts strictly
    /// after it, or on top when none does.
    pub fn insert_ordered_version<F>(
        &mut self,
        version: FileVersion,
        load_order_of: F,
    ) -> Result<InsertPosition, LineageError>
    where
        F: Fn(&str) -> u32,
    {
        if self.contains(&version.mod_id) {
            return Err(LineageError::DuplicateOwner(version.mod_id));
        }
        let key = (load_order_of(&version.mod_id), version.mod_id.as_str());
        let index = self
            .versions
            .iter()
            .position(|existing| {
                (load_order_of(&existing.mod_id), existing.mod_id.as_str()) > key
            })
            .unwrap_or(self.versions.len());
        self.versions.insert(index, version);
        Ok(InsertPosition {
            index,
            is_top: index + 1 == self.versions.len(),
        })
    }

    /// Removes `mod_id` and every layer stacked above it.
    pub fn pop_until(&mut self, mod_id: &str) -> Result<PopOutcome, LineageError> {
        let index = self
            .versions
            .iter()
            .position(|version| version.mod_id == mod_id)
            .ok_or_else(|| LineageError::OwnerNotFound(mod_id.to_string()))?;
        let mut drained = self.versions.split_off(index);
        let cascaded = drained.split_off(1);
        let removed = drained
            .pop()
            .ok_or_else(|| LineageError::OwnerNotFound(mod_id.to_string()))?;
        Ok(PopOutcome {
            removed,
            cascaded,
            top: self.peek().cloned(),
        })
    }

    /// Unordered append. Callers that track load order use
    /// [`insert_ordered_version`](Self::insert_ordered_version) instead.
    pub fn push_version(
        &mut self,
        mod_id: impl Into<String>,
        content_hash: impl Into<String>,
    ) -> Result<(), LineageError> {
        let version = FileVersion::new(mod_id, content_hash);
        if self.contains(&version.mod_id) {
            return Err(LineageError::DuplicateOwner(version.mod_id));
        }
        self.versions.push(version);
        Ok(())
    }
}

fn default_true() -> bool {
    true
}

pub(crate) fn now_timestamp() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}
