//! Crash-safe file replacement.
//!
//! Every durable write goes through a temp file created in the target's own
//! directory followed by a rename, so the target is always either the old
//! contents or the new contents.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, warn};

/// Temp path used for staging writes to `path` (same directory, hidden name).
pub fn temp_path_for(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "file".to_string());
    path.with_file_name(format!(".{name}.tmp"))
}

/// Atomically replace `path` with `contents`.
///
/// On failure the temp file is removed and the previous file is left as-is.
pub fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("path missing parent {}", path.display()))?;
    if !parent.as_os_str().is_empty() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create directory {}", parent.display()))?;
    }
    let tmp_path = temp_path_for(path);
    let result = fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp file {}", tmp_path.display()))
        .and_then(|()| {
            fs::rename(&tmp_path, path).with_context(|| format!("replace {}", path.display()))
        });
    if result.is_err() {
        discard_temp(&tmp_path);
    }
    result
}

/// Copy `src` to `dest`, verifying the byte size before the copy becomes visible.
///
/// The data is staged in a temp file next to `dest`; only a size-verified
/// copy is renamed into place. Returns the number of bytes copied.
pub fn copy_verified(src: &Path, dest: &Path) -> Result<u64> {
    let source_len = fs::metadata(src)
        .with_context(|| format!("stat {}", src.display()))?
        .len();
    let tmp_path = temp_path_for(dest);
    let result = (|| -> Result<u64> {
        fs::copy(src, &tmp_path)
            .with_context(|| format!("copy {} to {}", src.display(), tmp_path.display()))?;
        let copied_len = fs::metadata(&tmp_path)
            .with_context(|| format!("stat {}", tmp_path.display()))?
            .len();
        if copied_len != source_len {
            return Err(anyhow!(
                "size mismatch copying {}: source {} bytes, copy {} bytes",
                src.display(),
                source_len,
                copied_len
            ));
        }
        fs::rename(&tmp_path, dest).with_context(|| format!("rename into {}", dest.display()))?;
        Ok(copied_len)
    })();
    match &result {
        Ok(bytes) => debug!(src = %src.display(), dest = %dest.display(), bytes, "copy verified"),
        Err(_) => discard_temp(&tmp_path),
    }
    result
}

fn discard_temp(tmp_path: &Path) {
    if tmp_path.is_file()
        && let Err(err) = fs::remove_file(tmp_path)
    {
        warn!(path = %tmp_path.display(), err = %err, "failed to remove temp file");
    }
}
