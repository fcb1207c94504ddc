//! Whole-file hashing, the content-addressed object store and verified copies
//! onto live game paths.

use crate::{
    error::{ManagerError, Result},
    layout::GameLayout,
};
use blake3::Hasher;
use filetime::{set_file_mtime, FileTime};
use std::{
    ffi::OsString,
    fs::{self, File},
    io,
    path::{Path, PathBuf},
    time::UNIX_EPOCH,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub hash: String,
    pub size: u64,
    /// False when an identical object was already present.
    pub created: bool,
}

pub fn hash_file(path: &Path) -> Result<String> {
    let mut file = File::open(path).map_err(|err| ManagerError::io("open for hashing", path, err))?;
    let mut hasher = Hasher::new();
    io::copy(&mut file, &mut hasher).map_err(|err| ManagerError::io("hash file", path, err))?;
    Ok(hasher.finalize().to_hex().to_string())
}

pub fn store_object(layout: &GameLayout, source: &Path) -> Result<StoredObject> {
    let hash = hash_file(source)?;
    let size = fs::metadata(source)
        .map_err(|err| ManagerError::io("stat source", source, err))?
        .len();
    let dest = layout.object_path(&hash);
    if dest.exists() {
        return Ok(StoredObject {
            hash,
            size,
            created: false,
        });
    }
    copy_via_temp(source, &dest)?;
    preserve_mtime(source, &dest);
    Ok(StoredObject {
        hash,
        size,
        created: true,
    })
}

pub fn object_exists(layout: &GameLayout, hash: &str) -> bool {
    layout.object_path(hash).is_file()
}

/// Copies the stored object for `expected_hash` onto the live path of
/// `managed`. The copy is hashed before it replaces the live file.
pub fn install_object(layout: &GameLayout, managed: &str, expected_hash: &str) -> Result<()> {
    let source = layout.object_path(expected_hash);
    let live = layout.live_path(managed);
    install_verified(&source, &live, managed, expected_hash)
}

pub(crate) fn install_verified(
    source: &Path,
    live: &Path,
    managed: &str,
    expected_hash: &str,
) -> Result<()> {
    let temp = temp_sibling(live);
    if let Some(parent) = live.parent() {
        fs::create_dir_all(parent).map_err(|err| ManagerError::io("create live dir", parent, err))?;
    }
    fs::copy(source, &temp).map_err(|err| ManagerError::io("copy object", source, err))?;
    let actual = match hash_file(&temp) {
        Ok(actual) => actual,
        Err(err) => {
            let _ = fs::remove_file(&temp);
            return Err(err);
        }
    };
    if actual != expected_hash {
        let _ = fs::remove_file(&temp);
        return Err(ManagerError::HashMismatch {
            path: managed.to_string(),
            expected: expected_hash.to_string(),
            actual,
        });
    }
    if let Err(err) = fs::rename(&temp, live) {
        let _ = fs::remove_file(&temp);
        return Err(ManagerError::io("replace live file", live, err));
    }
    Ok(())
}

pub(crate) fn copy_via_temp(source: &Path, dest: &Path) -> Result<()> {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent).map_err(|err| ManagerError::io("create dir", parent, err))?;
    }
    let temp = temp_sibling(dest);
    fs::copy(source, &temp).map_err(|err| ManagerError::io("copy file", source, err))?;
    if let Err(err) = fs::rename(&temp, dest) {
        let _ = fs::remove_file(&temp);
        return Err(ManagerError::io("finalize copy", dest, err));
    }
    Ok(())
}

pub(crate) fn remove_file_if_exists(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(ManagerError::io("remove file", path, err)),
    }
}

fn temp_sibling(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(OsString::from)
        .unwrap_or_else(|| OsString::from("file"));
    name.push(".layerkeep.tmp");
    path.with_file_name(name)
}

fn preserve_mtime(source: &Path, dest: &Path) {
    let Ok(meta) = fs::metadata(source) else {
        return;
    };
    let Ok(modified) = meta.modified() else {
        return;
    };
    let Ok(duration) = modified.duration_since(UNIX_EPOCH) else {
        return;
    };
    let mtime = FileTime::from_unix_time(duration.as_secs() as i64, 0);
    let _ = set_file_mtime(dest, mtime);
}
