//! The OCI runtime bundle specification (`config.json`) written by the unpacker.
//!
//! Only the fields dockroot reads are typed; everything else is carried
//! through untouched so a hostname patch does not drop the rest of the file.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::debug;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BundleSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub process: Option<Process>,

    /// Image labels copied in by the unpacker
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Process {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<String>,

    #[serde(default)]
    pub cwd: String,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl BundleSpec {
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read bundle spec {}", path.display()))?;
        serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse bundle spec {}", path.display()))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self).context("Failed to serialize bundle spec")?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write bundle spec {}", path.display()))?;
        debug!(path = %path.display(), "bundle:saved");
        Ok(())
    }

    pub fn hostname(&self) -> &str {
        self.hostname.as_deref().unwrap_or_default()
    }

    pub fn args(&self) -> &[String] {
        self.process.as_ref().map(|p| p.args.as_slice()).unwrap_or_default()
    }

    pub fn env(&self) -> &[String] {
        self.process.as_ref().map(|p| p.env.as_slice()).unwrap_or_default()
    }

    pub fn cwd(&self) -> &str {
        self.process.as_ref().map(|p| p.cwd.as_str()).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const UMOCI_CONFIG: &str = r#"{
        "ociVersion": "1.0.2",
        "process": {
            "terminal": true,
            "user": {"uid": 0, "gid": 0},
            "args": ["/bin/sh"],
            "env": ["PATH=/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin"],
            "cwd": "/"
        },
        "root": {"path": "rootfs"},
        "hostname": "umoci-default",
        "annotations": {"org.opencontainers.image.title": "alpine"},
        "mounts": [{"destination": "/proc", "type": "proc", "source": "proc"}]
    }"#;

    #[test]
    fn reads_typed_fields() {
        let spec: BundleSpec = serde_json::from_str(UMOCI_CONFIG).unwrap();
        assert_eq!(spec.hostname(), "umoci-default");
        assert_eq!(spec.args(), ["/bin/sh"]);
        assert_eq!(spec.cwd(), "/");
        assert_eq!(spec.env().len(), 1);
        assert_eq!(spec.annotations["org.opencontainers.image.title"], "alpine");
    }

    #[test]
    fn hostname_patch_preserves_unknown_fields() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("config.json");
        std::fs::write(&path, UMOCI_CONFIG).unwrap();

        let mut spec = BundleSpec::load(&path).unwrap();
        spec.hostname = Some("alpine".to_string());
        spec.save(&path).unwrap();

        let raw: Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw["hostname"], "alpine");
        assert_eq!(raw["ociVersion"], "1.0.2");
        assert_eq!(raw["root"]["path"], "rootfs");
        assert_eq!(raw["process"]["terminal"], true);
        assert_eq!(raw["process"]["user"]["uid"], 0);
        assert_eq!(raw["annotations"]["org.opencontainers.image.title"], "alpine");
    }

    #[test]
    fn missing_process_is_empty() {
        let spec: BundleSpec = serde_json::from_str("{}").unwrap();
        assert!(spec.args().is_empty());
        assert!(spec.env().is_empty());
        assert_eq!(spec.cwd(), "");
        assert_eq!(spec.hostname(), "");
    }
}
