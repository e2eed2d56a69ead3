//! SSH credential files in the output directory

use anyhow::{Context, Result};
use glob::{Pattern, glob};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::defaults::SSH_CREDENTIALS_GLOB;

/// Files in `output_dir` matching `*ssh*`
pub fn find(output_dir: &Path) -> Result<Vec<PathBuf>> {
    let escaped = Pattern::escape(&output_dir.to_string_lossy());
    let pattern = format!("{escaped}/{SSH_CREDENTIALS_GLOB}");
    let entries = glob(&pattern).with_context(|| format!("Invalid credential pattern {pattern}"))?;
    Ok(entries.flatten().filter(|p| p.is_file()).collect())
}

/// Restrict every credential file to owner read/write.
///
/// Returns the number of files updated.
pub fn restrict(output_dir: &Path) -> Result<usize> {
    let files = find(output_dir)?;
    for file in &files {
        set_owner_only(file)?;
        debug!(path = %file.display(), "Restricted credential permissions");
    }
    Ok(files.len())
}

/// Delete every credential file, logging failures.
///
/// Returns the paths that could not be removed.
pub fn remove(output_dir: &Path) -> Result<Vec<PathBuf>> {
    let mut failed = Vec::new();
    for file in find(output_dir)? {
        match std::fs::remove_file(&file) {
            Ok(()) => debug!(path = %file.display(), "Deleted credential file"),
            Err(e) => {
                warn!(path = %file.display(), error = %e, "Failed to delete credential file");
                failed.push(file);
            }
        }
    }
    Ok(failed)
}

#[cfg(unix)]
fn set_owner_only(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
        .with_context(|| format!("Failed to set permissions on {}", path.display()))
}

#[cfg(not(unix))]
fn set_owner_only(_path: &Path) -> Result<()> {
    Ok(())
}
