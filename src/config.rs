//! Persisted registry settings (`dockroot.json`) and the per-invocation context.

use anyhow::{Context as _, Result, anyhow};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::http::HttpClient;

/// File name of the registry settings, stored next to the binary.
pub const REGISTRY_FILE: &str = "dockroot.json";

/// Installation directory name that makes the data root a sibling directory.
const BIN_DIR_NAME: &str = "DockRootBin";
const DATA_DIR_NAME: &str = "DockRootData";

/// Environment variable overriding the installation directory.
pub const INSTALL_DIR_ENV: &str = "DOCKROOT_INSTALL_DIR";

/// Mirrors written on first run.
const DEFAULT_MIRRORS: &[&str] = &[
    "https://registry.istoreos.com",
    "https://docker1.linkease.com:60005",
    "https://kooldocker.openpop.cn",
    "https://kooldocker.gvpu.cn",
    "https://docker.1ms.run",
    "https://docker.m.daocloud.io",
];

/// Registry settings shared by every command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryInfo {
    /// Docker Hub mirror URLs, in preference order
    #[serde(rename = "registry-mirrors", default)]
    pub mirrors: Vec<String>,

    /// Absolute path holding one directory per instance
    #[serde(rename = "data-root")]
    pub data_root: PathBuf,

    /// Route default-registry pulls through the local caching proxy
    #[serde(rename = "useKspeeder", default)]
    pub use_proxy: bool,
}

impl RegistryInfo {
    /// Settings written on first run for a given installation directory.
    pub fn default_for(install_dir: &Path) -> Self {
        let data_root = match (install_dir.file_name(), install_dir.parent()) {
            (Some(name), Some(parent)) if name == BIN_DIR_NAME => parent.join(DATA_DIR_NAME),
            _ => install_dir.join(DATA_DIR_NAME),
        };
        Self {
            mirrors: DEFAULT_MIRRORS.iter().map(|m| m.to_string()).collect(),
            data_root,
            use_proxy: true,
        }
    }

    /// Read `dockroot.json` from the installation directory.
    pub fn load(install_dir: &Path) -> Result<Self> {
        let path = install_dir.join(REGISTRY_FILE);
        let contents = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read registry settings {}", path.display()))?;
        let info: Self = serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse registry settings {}", path.display()))?;
        debug!(path = %path.display(), data_root = %info.data_root.display(), "config:loaded");
        Ok(info)
    }

    /// Read the settings, rewriting defaults when the file is unreadable or the
    /// data root has gone missing.
    pub fn load_or_init(install_dir: &Path) -> Result<Self> {
        match Self::load(install_dir) {
            Ok(info) if info.data_root.is_dir() => Ok(info),
            Ok(info) => {
                warn!(data_root = %info.data_root.display(), "config:data root missing, rewriting defaults");
                Self::write_default(install_dir)
            }
            Err(e) => {
                debug!(error = %e, "config:no usable settings, writing defaults");
                Self::write_default(install_dir)
            }
        }
    }

    fn write_default(install_dir: &Path) -> Result<Self> {
        let info = Self::default_for(install_dir);
        fs::create_dir_all(&info.data_root).with_context(|| {
            format!("Failed to create data root {}", info.data_root.display())
        })?;
        info.save(install_dir)?;
        info!(data_root = %info.data_root.display(), "config:wrote defaults");
        Ok(info)
    }

    /// Rewrite `dockroot.json` in full.
    pub fn save(&self, install_dir: &Path) -> Result<()> {
        let path = install_dir.join(REGISTRY_FILE);
        let json = serde_json::to_string_pretty(self).context("Failed to serialize settings")?;
        fs::write(&path, json)
            .with_context(|| format!("Failed to write registry settings {}", path.display()))
    }
}

/// Resolve the installation directory: `$DOCKROOT_INSTALL_DIR`, else the
/// directory holding the running executable.
pub fn install_dir() -> Result<PathBuf> {
    if let Some(dir) = std::env::var_os(INSTALL_DIR_ENV).filter(|d| !d.is_empty()) {
        return Ok(PathBuf::from(dir));
    }
    let exe = std::env::current_exe().context("Failed to locate the dockroot executable")?;
    let exe = exe.canonicalize().unwrap_or(exe);
    exe.parent()
        .map(Path::to_path_buf)
        .ok_or_else(|| anyhow!("Executable {} has no parent directory", exe.display()))
}

/// Everything a command needs, loaded once per invocation and passed down.
pub struct Context {
    pub install_dir: PathBuf,
    pub registry: RegistryInfo,
    pub http: HttpClient,
}

impl Context {
    /// Context for commands that require existing settings.
    pub fn load() -> Result<Self> {
        let install_dir = install_dir()?;
        let registry = RegistryInfo::load(&install_dir)?;
        Ok(Self::new(install_dir, registry))
    }

    /// Context for commands allowed to create first-run settings.
    pub fn load_or_init() -> Result<Self> {
        let install_dir = install_dir()?;
        let registry = RegistryInfo::load_or_init(&install_dir)?;
        Ok(Self::new(install_dir, registry))
    }

    pub fn new(install_dir: PathBuf, registry: RegistryInfo) -> Self {
        Self {
            install_dir,
            registry,
            http: HttpClient::new(),
        }
    }

    /// Directory where the caching proxy keeps its blobs.
    pub fn proxy_cache_dir(&self) -> PathBuf {
        self.registry.data_root.join("cache")
    }
}
