//! Typed document persistence.
//!
//! Every persisted entity is written as a small envelope that names its type
//! and carries the entity as a string-keyed field map:
//!
//! ```json
//! { "type": "game_state", "fields": { "last_modified": 0, "deployed_mods": [] } }
//! ```
//!
//! Reads check the type tag before decoding the fields, so a lineage document
//! can never be mistaken for a manifest. Writes go to a sibling temp file and
//! are renamed into place.

use crate::error::ManagerError;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{Map, Value};
use std::{
    ffi::OsString,
    fs, io,
    path::{Path, PathBuf},
};

pub trait Entity: Serialize + DeserializeOwned {
    const KIND: &'static str;
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("document not found: {0:?}")]
    NotFound(PathBuf),
    #[error("document {path:?} has type {found}, expected {expected}")]
    TypeMismatch {
        path: PathBuf,
        expected: &'static str,
        found: String,
    },
    #[error("parse {path:?}: {message}")]
    Parse { path: PathBuf, message: String },
    #[error("{context} {path:?}: {source}")]
    Io {
        context: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }
}

impl From<StoreError> for ManagerError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(path) => ManagerError::io(
                "read document",
                path,
                io::Error::from(io::ErrorKind::NotFound),
            ),
            StoreError::TypeMismatch {
                path,
                expected,
                found,
            } => ManagerError::Parse {
                path,
                message: format!("expected {expected} document, found {found}"),
            },
            StoreError::Parse { path, message } => ManagerError::Parse { path, message },
            StoreError::Io {
                context,
                path,
                source,
            } => ManagerError::Io {
                context,
                path,
                source,
            },
        }
    }
}

#[derive(Serialize, Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
    fields: Map<String, Value>,
}

pub fn read<T: Entity>(path: &Path) -> Result<T, StoreError> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            return Err(StoreError::NotFound(path.to_path_buf()));
        }
        Err(source) => {
            return Err(StoreError::Io {
                context: "read document",
                path: path.to_path_buf(),
                source,
            });
        }
    };
    let envelope: Envelope = serde_json::from_str(&raw).map_err(|err| StoreError::Parse {
        path: path.to_path_buf(),
        message: err.to_string(),
    })?;
    if envelope.kind != T::KIND {
        return Err(StoreError::TypeMismatch {
            path: path.to_path_buf(),
            expected: T::KIND,
            found: envelope.kind,
        });
    }
    serde_json::from_value(Value::Object(envelope.fields)).map_err(|err| StoreError::Parse {
        path: path.to_path_buf(),
        message: err.to_string(),
    })
}

/// Like [`read`], but a missing document is `Ok(None)`.
pub fn read_optional<T: Entity>(path: &Path) -> Result<Option<T>, StoreError> {
    match read(path) {
        Ok(entity) => Ok(Some(entity)),
        Err(err) if err.is_not_found() => Ok(None),
        Err(err) => Err(err),
    }
}

pub fn write<T: Entity>(entity: &T, path: &Path) -> Result<(), StoreError> {
    let fields = match serde_json::to_value(entity) {
        Ok(Value::Object(fields)) => fields,
        Ok(other) => {
            return Err(StoreError::Parse {
                path: path.to_path_buf(),
                message: format!("{} did not serialize to a field map: {other}", T::KIND),
            });
        }
        Err(err) => {
            return Err(StoreError::Parse {
                path: path.to_path_buf(),
                message: err.to_string(),
            });
        }
    };
    let envelope = Envelope {
        kind: T::KIND.to_string(),
        fields,
    };
    let raw = serde_json::to_string_pretty(&envelope).map_err(|err| StoreError::Parse {
        path: path.to_path_buf(),
        message: err.to_string(),
    })?;
    write_atomic(path, raw.as_bytes())
}

pub fn remove(path: &Path) -> Result<(), StoreError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(source) => Err(StoreError::Io {
            context: "remove document",
            path: path.to_path_buf(),
            source,
        }),
    }
}

fn write_atomic(path: &Path, contents: &[u8]) -> Result<(), StoreError> {
    let io_err = |context: &'static str, path: &Path| {
        let path = path.to_path_buf();
        move |source| StoreError::Io {
            context,
            path,
            source,
        }
    };
    let parent = path.parent().ok_or_else(|| StoreError::Io {
        context: "resolve document parent",
        path: path.to_path_buf(),
        source: io::Error::from(io::ErrorKind::InvalidInput),
    })?;
    fs::create_dir_all(parent).map_err(io_err("create document dir", parent))?;

    let mut temp_name = path
        .file_name()
        .map(OsString::from)
        .unwrap_or_else(|| OsString::from("document"));
    temp_name.push(".tmp");
    let temp = parent.join(temp_name);
    fs::write(&temp, contents).map_err(io_err("write document temp", &temp))?;
    if let Err(source) = fs::rename(&temp, path) {
        let _ = fs::remove_file(&temp);
        return Err(StoreError::Io {
            context: "finalize document",
            path: path.to_path_buf(),
            source,
        });
    }
    Ok(())
}
