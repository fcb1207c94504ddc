use crate::lineage::LineageError;
use std::{io, path::PathBuf};

pub type Result<T, E = ManagerError> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum ManagerError {
    #[error("mod {mod_id} already owns {path}")]
    DuplicateOwner { mod_id: String, path: String },
    #[error("mod {mod_id} has no layer on {path}")]
    OwnerNotFound { mod_id: String, path: String },
    #[error("game {game_id} is locked by another operation")]
    GameLocked { game_id: String },
    #[error("mod {0} is already deployed")]
    AlreadyDeployed(String),
    #[error("mod {0} is not deployed")]
    NotDeployed(String),
    #[error("no manifest stored for mod {0}")]
    ManifestNotFound(String),
    #[error("mod {mod_id} targets game {found}, expected {expected}")]
    GameMismatch {
        mod_id: String,
        expected: String,
        found: String,
    },
    #[error("content hash mismatch for {path} (expected {expected}, found {actual})")]
    HashMismatch {
        path: String,
        expected: String,
        actual: String,
    },
    #[error("invalid managed path: {0}")]
    InvalidPath(String),
    #[error("invalid mod id: {0:?}")]
    InvalidModId(String),
    #[error("{context} {path:?}: {source}")]
    Io {
        context: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("parse {path:?}: {message}")]
    Parse { path: PathBuf, message: String },
}

impl ManagerError {
    pub fn io(context: &'static str, path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            context,
            path: path.into(),
            source,
        }
    }

    pub(crate) fn from_lineage(err: LineageError, path: &str) -> Self {
        match err {
            LineageError::DuplicateOwner(mod_id) => Self::DuplicateOwner {
                mod_id,
                path: path.to_string(),
            },
            LineageError::OwnerNotFound(mod_id) => Self::OwnerNotFound {
                mod_id,
                path: path.to_string(),
            },
        }
    }
}
