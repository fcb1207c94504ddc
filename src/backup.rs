use crate::{
    content::{copy_via_temp, remove_file_if_exists},
    error::Result,
    layout::GameLayout,
};
use tracing::debug;

/// Captures the live file of `managed` before its first override.
///
/// Returns whether a live file existed. An existing backup is never replaced:
/// it already holds the pristine content.
pub fn snapshot_pristine(layout: &GameLayout, managed: &str) -> Result<bool> {
    let live = layout.live_path(managed);
    if !live.is_file() {
        return Ok(false);
    }
    let backup = layout.backup_path(managed);
    if backup.exists() {
        return Ok(true);
    }
    copy_via_temp(&live, &backup)?;
    debug!(path = managed, "captured pristine backup");
    Ok(true)
}

/// Puts the pristine content back on the live path. When no original existed
/// the live file is deleted instead.
pub fn restore_pristine(layout: &GameLayout, managed: &str, original_present: bool) -> Result<()> {
    let live = layout.live_path(managed);
    if original_present {
        copy_via_temp(&layout.backup_path(managed), &live)?;
    } else {
        remove_file_if_exists(&live)?;
    }
    debug!(path = managed, original_present, "restored pristine content");
    Ok(())
}

pub fn discard_pristine(layout: &GameLayout, managed: &str) -> Result<()> {
    remove_file_if_exists(&layout.backup_path(managed))
}

pub fn has_pristine(layout: &GameLayout, managed: &str) -> bool {
    layout.backup_path(managed).is_file()
}
