// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Atomic JSON file persistence: write to a sibling temp file, fsync, then
//! rename over the target so readers never observe a partial write.

use std::io::Write;
use std::path::Path;

use serde::de::DeserializeOwned;
use serde::Serialize;

/// Load and deserialize JSON from `path`. Returns `Ok(None)` if the file does
/// not exist.
pub fn load<T: DeserializeOwned>(path: &Path) -> anyhow::Result<Option<T>> {
    match std::fs::read(path) {
        Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Serialize `value` and atomically replace `path`'s contents.
///
/// Writes to `<path>.tmp-<pid>` in the same directory, fsyncs, then renames
/// so concurrent readers always see either the old or the new content.
pub fn save<T: Serialize>(path: &Path, value: &T) -> anyhow::Result<()> {
    save_with_mode(path, value, None)
}

/// As [`save`], but sets Unix file permissions (e.g. `0o600`) on the temp
/// file before the rename so secrets are never briefly world-readable.
pub fn save_with_mode<T: Serialize>(
    path: &Path,
    value: &T,
    mode: Option<u32>,
) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let tmp_path = path.with_extension(format!("tmp-{}", std::process::id()));
    let json = serde_json::to_vec_pretty(value)?;

    {
        let mut file = std::fs::File::create(&tmp_path)?;
        file.write_all(&json)?;
        file.sync_all()?;

        #[cfg(unix)]
        if let Some(mode) = mode {
            use std::os::unix::fs::PermissionsExt;
            file.set_permissions(std::fs::Permissions::from_mode(mode))?;
        }
    }

    std::fs::rename(&tmp_path, path)?;
    Ok(())
}

#[cfg(test)]
#[path = "persist_tests.rs"]
mod tests;
