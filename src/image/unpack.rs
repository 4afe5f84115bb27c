//! Unpack collaborator: materializes an OCI layout tag into a runtime bundle.

use anyhow::{Context, Result};
use std::ffi::OsString;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::cmd::Cmd;
use crate::error::DockrootError;

/// Layer metadata files umoci leaves beside the bundle.
const UMOCI_META: &str = "umoci.json";
const MTREE_PATTERN: &str = "*.mtree";

/// Unpacks `tag` from the OCI layout at `store` into `dest`, producing
/// `dest/config.json` and `dest/rootfs/`.
pub trait LayerUnpacker {
    fn unpack(&self, store: &Path, tag: &str, dest: &Path) -> Result<()>;
}

/// `umoci`-backed unpacker.
pub struct UmociUnpacker {
    binary: PathBuf,
    rootless: bool,
}

impl UmociUnpacker {
    /// Find `umoci` on `PATH`. Unprivileged callers get `--rootless`.
    pub fn locate() -> Result<Self> {
        let binary = which::which("umoci").map_err(|e| DockrootError::DependencyUnavailable {
            name: "umoci".to_string(),
            reason: format!("{} (install umoci to unpack images)", e),
        })?;
        let rootless = !nix::unistd::geteuid().is_root();
        debug!(binary = %binary.display(), rootless, "unpack:located umoci");
        Ok(Self { binary, rootless })
    }
}

impl LayerUnpacker for UmociUnpacker {
    fn unpack(&self, store: &Path, tag: &str, dest: &Path) -> Result<()> {
        let mut image: OsString = store.as_os_str().to_owned();
        image.push(":");
        image.push(tag);

        let mut args: Vec<OsString> = vec!["unpack".into()];
        if self.rootless {
            args.push("--rootless".into());
        }
        args.push("--image".into());
        args.push(image);
        args.push(dest.as_os_str().to_owned());

        Cmd::new(&self.binary)
            .args(&args)
            .run_streaming(&mut std::io::stdout())
            .with_context(|| format!("Failed to unpack {}:{}", store.display(), tag))
    }
}

/// Remove layer metadata files left in `bundle` by the unpacker.
pub fn cleanup_transient(bundle: &Path) -> Result<()> {
    remove_if_present(&bundle.join(UMOCI_META))?;

    let pattern = format!(
        "{}/{}",
        glob::Pattern::escape(&bundle.to_string_lossy()),
        MTREE_PATTERN
    );
    let entries = glob::glob(&pattern).context("Invalid metadata glob pattern")?;
    for entry in entries {
        match entry {
            Ok(path) => remove_if_present(&path)?,
            Err(e) => warn!(error = %e, "unpack:unreadable metadata entry"),
        }
    }
    Ok(())
}

fn remove_if_present(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => {
            debug!(path = %path.display(), "unpack:removed transient file");
            Ok(())
        }
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e).with_context(|| format!("Failed to remove {}", path.display())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn cleanup_removes_only_layer_metadata() {
        let tmp = TempDir::new().unwrap();
        let bundle = tmp.path();
        fs::create_dir(bundle.join("rootfs")).unwrap();
        fs::write(bundle.join("config.json"), "{}").unwrap();
        fs::write(bundle.join("umoci.json"), "{}").unwrap();
        fs::write(bundle.join("sha256_abc.mtree"), "").unwrap();
        fs::write(bundle.join("sha256_def.mtree"), "").unwrap();

        cleanup_transient(bundle).unwrap();

        let mut left: Vec<_> = fs::read_dir(bundle)
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        left.sort();
        assert_eq!(left, vec!["config.json", "rootfs"]);
    }

    #[test]
    fn cleanup_tolerates_clean_bundle_with_glob_metacharacters() {
        let tmp = TempDir::new().unwrap();
        let bundle = tmp.path().join("odd[1]");
        fs::create_dir(&bundle).unwrap();
        fs::write(bundle.join("layer.mtree"), "").unwrap();

        cleanup_transient(&bundle).unwrap();
        assert!(!bundle.join("layer.mtree").exists());
        cleanup_transient(&bundle).unwrap();
    }
}
