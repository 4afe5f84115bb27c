//! Per-instance directories under the data root.

use anyhow::{Context, Result};
use regex::Regex;
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::sync::LazyLock;

use crate::error::DockrootError;

pub const BUNDLE_CONFIG: &str = "config.json";
pub const ROOTFS_DIR: &str = "rootfs";
pub const ENGINE_CONFIG: &str = "ruri.conf";
pub const ENGINE_LOG: &str = "ruri.log";
pub const IMAGE_STORE_DIR: &str = "images";

static DISALLOWED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^\p{Han}a-zA-Z0-9\-\s\\/_]").unwrap());

/// Normalize a user-given instance name into a directory name.
///
/// Keeps Han characters, ASCII letters and digits, hyphens and path
/// separators; whitespace and underscores become hyphens; the result is
/// lowercased.
pub fn sanitize_name(name: &str) -> String {
    DISALLOWED
        .replace_all(name, "")
        .chars()
        .map(|c| if c.is_whitespace() || c == '_' { '-' } else { c })
        .collect::<String>()
        .to_lowercase()
}

/// One sandbox instance directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instance {
    name: String,
    dir: PathBuf,
}

impl Instance {
    /// Locate the instance named `name` (sanitized) under `data_root`.
    ///
    /// Leading and repeated separators are dropped so the directory always
    /// lies below `data_root`; a name with nothing left is rejected.
    pub fn resolve(data_root: &Path, name: &str) -> Result<Self, DockrootError> {
        let sanitized = sanitize_name(name);
        let invalid = || {
            DockrootError::InvalidOption(format!(
                "Invalid instance name '{}': must name a directory inside the data root",
                name
            ))
        };

        let mut relative = PathBuf::new();
        for component in Path::new(&sanitized).components() {
            match component {
                Component::Normal(part) => relative.push(part),
                Component::RootDir | Component::CurDir => {}
                Component::ParentDir | Component::Prefix(_) => return Err(invalid()),
            }
        }
        if relative.as_os_str().is_empty() {
            return Err(invalid());
        }

        let dir = data_root.join(&relative);
        let dir = std::path::absolute(&dir).unwrap_or(dir);
        Ok(Self {
            name: relative.to_string_lossy().into_owned(),
            dir,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn bundle_config(&self) -> PathBuf {
        self.dir.join(BUNDLE_CONFIG)
    }

    pub fn rootfs(&self) -> PathBuf {
        self.dir.join(ROOTFS_DIR)
    }

    pub fn engine_config(&self) -> PathBuf {
        self.dir.join(ENGINE_CONFIG)
    }

    pub fn engine_log(&self) -> PathBuf {
        self.dir.join(ENGINE_LOG)
    }

    pub fn image_store(&self) -> PathBuf {
        self.dir.join(IMAGE_STORE_DIR)
    }

    /// Holds an unpacked bundle (`config.json` and `rootfs/`).
    pub fn is_valid(&self) -> bool {
        self.bundle_config().exists() && self.rootfs().exists()
    }

    pub fn is_configured(&self) -> bool {
        self.engine_config().exists()
    }

    /// Fail unless the unpacked bundle spec exists.
    pub fn require_bundle(&self) -> Result<(), DockrootError> {
        self.require(self.bundle_config())
    }

    /// Fail unless the engine configuration exists.
    pub fn require_engine_config(&self) -> Result<(), DockrootError> {
        self.require(self.engine_config())
    }

    fn require(&self, path: PathBuf) -> Result<(), DockrootError> {
        if path.exists() {
            Ok(())
        } else {
            Err(DockrootError::InstanceNotFound {
                name: self.name.clone(),
                path,
            })
        }
    }
}

/// Every valid instance under `data_root`, sorted by name.
pub fn list(data_root: &Path) -> Result<Vec<Instance>> {
    let entries = fs::read_dir(data_root)
        .with_context(|| format!("Failed to read data root {}", data_root.display()))?;

    let mut instances = Vec::new();
    for entry in entries {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        let Some(name) = entry.file_name().to_str().map(str::to_string) else {
            continue;
        };
        let instance = Instance {
            name,
            dir: entry.path(),
        };
        if instance.is_valid() {
            instances.push(instance);
        }
    }
    instances.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(instances)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn sanitize_examples() {
        assert_eq!(sanitize_name("Test User"), "test-user");
        assert_eq!(sanitize_name("my_app!v2"), "my-appv2");
        assert_eq!(sanitize_name("家庭 助手"), "家庭-助手");
        assert_eq!(sanitize_name("a/B\\c"), "a/b\\c");
        assert_eq!(sanitize_name("tab\there"), "tab-here");
    }

    #[test]
    fn sanitize_is_idempotent() {
        for name in [
            "Test User",
            "Home_Assistant 2024.1",
            "  MiXeD__case ?*& name ",
            "Ünïcödé name",
            "中文 Name_x",
            "already-clean",
            "",
        ] {
            let once = sanitize_name(name);
            assert_eq!(sanitize_name(&once), once, "not idempotent for {name:?}");
            assert!(!once.contains(' ') && !once.contains('_'));
            assert_eq!(once, once.to_lowercase());
        }
    }

    #[test]
    fn layout_paths() {
        let instance = Instance::resolve(Path::new("/data"), "Alpine One").unwrap();
        assert_eq!(instance.name(), "alpine-one");
        assert_eq!(instance.dir(), Path::new("/data/alpine-one"));
        assert_eq!(
            instance.engine_config(),
            PathBuf::from("/data/alpine-one/ruri.conf")
        );
        assert_eq!(instance.image_store(), PathBuf::from("/data/alpine-one/images"));
    }

    #[test]
    fn absolute_names_stay_inside_data_root() {
        let root = Path::new("/data/root");

        let nested = Instance::resolve(root, "/etc/evil").unwrap();
        assert_eq!(nested.dir(), Path::new("/data/root/etc/evil"));
        assert_eq!(nested.name(), "etc/evil");
        assert!(nested.image_store().starts_with(root));

        let collapsed = Instance::resolve(root, "a//b/").unwrap();
        assert_eq!(collapsed.dir(), Path::new("/data/root/a/b"));
    }

    #[test]
    fn names_without_a_directory_are_rejected() {
        let root = Path::new("/data/root");
        for name in ["/", "//", "", "..", "../..", "?*&"] {
            assert!(
                matches!(
                    Instance::resolve(root, name),
                    Err(DockrootError::InvalidOption(_))
                ),
                "expected rejection for {name:?}"
            );
        }
    }

    #[test]
    fn require_reports_missing_paths() {
        let tmp = TempDir::new().unwrap();
        let instance = Instance::resolve(tmp.path(), "ghost").unwrap();

        match instance.require_engine_config() {
            Err(DockrootError::InstanceNotFound { name, path }) => {
                assert_eq!(name, "ghost");
                assert!(path.ends_with("ruri.conf"));
            }
            other => panic!("expected InstanceNotFound, got {other:?}"),
        }
        assert!(instance.require_bundle().is_err());
    }

    #[test]
    fn list_returns_only_valid_instances_sorted() {
        let tmp = TempDir::new().unwrap();
        for name in ["zeta", "alpha"] {
            let dir = tmp.path().join(name);
            fs::create_dir_all(dir.join("rootfs")).unwrap();
            fs::write(dir.join("config.json"), "{}").unwrap();
        }
        fs::create_dir_all(tmp.path().join("half/rootfs")).unwrap();
        fs::create_dir_all(tmp.path().join("cache")).unwrap();
        fs::write(tmp.path().join("stray.txt"), "").unwrap();

        let names: Vec<_> = list(tmp.path())
            .unwrap()
            .iter()
            .map(|i| i.name().to_string())
            .collect();
        assert_eq!(names, vec!["alpha", "zeta"]);
    }
}
