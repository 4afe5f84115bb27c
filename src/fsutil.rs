//! Whole-file replacement via a temporary sibling and rename.

use anyhow::{Context, Result};
use std::fs;
use std::io::Write;
use std::path::Path;

/// Fill a temporary file next to `dest`, then rename it over `dest` with
/// `mode` permissions. If `fill` fails, `dest` keeps its previous content and
/// the temporary file is removed.
pub fn write_atomically<F>(dest: &Path, mode: u32, fill: F) -> Result<()>
where
    F: FnOnce(&mut fs::File) -> Result<()>,
{
    let dir = dest
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let file_name = dest
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    let mut tmp = tempfile::Builder::new()
        .prefix(&format!(".{}.", file_name))
        .suffix(".syn")
        .tempfile_in(dir)
        .with_context(|| format!("Failed to create temporary file in {}", dir.display()))?;

    fill(tmp.as_file_mut())?;
    tmp.as_file_mut().flush()?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(tmp.path(), fs::Permissions::from_mode(mode))?;
    }

    tmp.persist(dest)
        .with_context(|| format!("Failed to replace {}", dest.display()))?;
    Ok(())
}
