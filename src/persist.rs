//! Whole-file JSON writes through a sibling temp file.

use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};

use log::warn;

fn temp_path(path: &Path) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(".tmp");
    PathBuf::from(name)
}

/// Replace `path` with `contents`. Readers see either the old file or the
/// new one. Falls back to an in-place write when the rename is refused.
pub(crate) async fn write_atomic(path: &Path, contents: &[u8]) -> io::Result<()> {
    let tmp = temp_path(path);
    tokio::fs::write(&tmp, contents).await?;
    if let Err(e) = tokio::fs::rename(&tmp, path).await {
        warn!("Rename onto {} failed ({}), writing in place", path.display(), e);
        let _ = tokio::fs::remove_file(&tmp).await;
        tokio::fs::write(path, contents).await?;
    }
    Ok(())
}
