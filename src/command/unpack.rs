use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::DockrootError;
use crate::image::unpack::{self, LayerUnpacker, UmociUnpacker};

/// Split `OCI-DIR:TAG` on its last colon.
pub fn parse_layout(spec: &str) -> Result<(PathBuf, String), DockrootError> {
    match spec.rsplit_once(':') {
        Some((dir, tag)) if !dir.is_empty() && !tag.is_empty() && !tag.contains('/') => {
            Ok((PathBuf::from(dir), tag.to_string()))
        }
        _ => Err(DockrootError::InvalidReference(spec.to_string())),
    }
}

pub fn run(layout: &str, dest: &Path) -> Result<()> {
    let (store, tag) = parse_layout(layout)?;
    let unpacker = UmociUnpacker::locate()?;
    unpack_layout(&unpacker, &store, &tag, dest)?;
    println!("Unpacked {}:{} into {}", store.display(), tag, dest.display());
    Ok(())
}

fn unpack_layout(unpacker: &dyn LayerUnpacker, store: &Path, tag: &str, dest: &Path) -> Result<()> {
    if let Some(parent) = dest.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let unpacked = unpacker.unpack(store, tag, dest);
    if dest.is_dir() {
        unpack::cleanup_transient(dest)?;
    }
    unpacked
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    struct MetaOnly;

    impl LayerUnpacker for MetaOnly {
        fn unpack(&self, _store: &Path, _tag: &str, dest: &Path) -> Result<()> {
            fs::create_dir_all(dest.join("rootfs"))?;
            fs::write(dest.join("config.json"), "{}")?;
            fs::write(dest.join("umoci.json"), "{}")?;
            fs::write(dest.join("a.mtree"), "")?;
            Ok(())
        }
    }

    #[test]
    fn parses_layout_spec() {
        let (dir, tag) = parse_layout("./alpine-oci:latest").unwrap();
        assert_eq!(dir, PathBuf::from("./alpine-oci"));
        assert_eq!(tag, "latest");
        assert!(parse_layout("./alpine-oci").is_err());
        assert!(parse_layout(":latest").is_err());
    }

    #[test]
    fn unpack_leaves_only_bundle() {
        let tmp = TempDir::new().unwrap();
        let dest = tmp.path().join("nested/bundle");

        unpack_layout(&MetaOnly, Path::new("oci"), "latest", &dest).unwrap();

        assert!(dest.join("config.json").exists());
        assert!(!dest.join("umoci.json").exists());
        assert!(!dest.join("a.mtree").exists());
    }
}
