//! Builds a [`SandboxDescriptor`] from an unpacked bundle plus user overrides.
//!
//! Besides the pure mapping, synthesis prepares the rootfs for the engine:
//! it pins the resolver and, for Home Assistant images whose s6 init cannot
//! run under the engine, drops in a replacement entry script.

use anyhow::{Context, Result, bail};
use std::collections::HashSet;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::bundle::BundleSpec;
use crate::fsutil;
use crate::instance::Instance;
use crate::sandbox::descriptor::{Isolation, SandboxDescriptor};

const FULL_SHELL: &str = "/bin/bash";
const MINIMAL_SHELL: &str = "/bin/sh";

const NAMESERVER: &str = "223.5.5.5";

/// First argument of images that boot through their own init system.
const INIT_MARKER: &str = "/init";

const HA_HOSTNAME_MARKER: &str = "home-assistant";
const HA_VENDOR_DOMAIN: &str = "home-assistant.io";

/// Entry script location relative to the rootfs.
const ENTRY_SCRIPT: &str = "root/entry.sh";
const HA_ENTRY_TEMPLATE: &str = include_str!("templates/homeassistant.sh");

/// User-supplied changes applied on top of the bundle spec.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub hostname: Option<String>,
    pub workdir: Option<String>,
    /// `KEY=VALUE` entries
    pub env: Vec<String>,
    /// `SRC:DST[:ro]` entries
    pub volumes: Vec<String>,
}

impl Overrides {
    pub fn is_empty(&self) -> bool {
        self.hostname.is_none()
            && self.workdir.is_none()
            && self.env.is_empty()
            && self.volumes.is_empty()
    }
}

/// A parsed `-v` entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Volume {
    ReadWrite(String, String),
    ReadOnly(String, String),
}

/// Parse `SRC:DST[:ro]`. Entries without a destination yield `None`.
pub fn parse_volume(spec: &str) -> Option<Volume> {
    let mut parts = spec.splitn(3, ':');
    let source = parts.next()?;
    let dest = parts.next().filter(|d| !d.is_empty())?;
    match parts.next() {
        Some("ro") => Some(Volume::ReadOnly(source.to_string(), dest.to_string())),
        _ => Some(Volume::ReadWrite(source.to_string(), dest.to_string())),
    }
}

/// Parse `KEY=VALUE` entries, dropping ones without `=` or with an empty value.
pub fn parse_env<S: AsRef<str>>(entries: &[S]) -> Vec<(String, String)> {
    entries
        .iter()
        .filter_map(|e| {
            let (key, value) = e.as_ref().split_once('=')?;
            (!value.is_empty()).then(|| (key.to_string(), value.to_string()))
        })
        .collect()
}

/// Override pairs first, then bundle pairs whose key is not yet present.
pub fn merge_env(overrides: &[String], bundle: &[String]) -> Vec<(String, String)> {
    let mut seen = HashSet::new();
    let mut merged = Vec::new();
    for (key, value) in parse_env(overrides).into_iter().chain(parse_env(bundle)) {
        if seen.insert(key.clone()) {
            merged.push((key, value));
        }
    }
    merged
}

/// `/bin/bash` when the rootfs ships it, `/bin/sh` otherwise.
pub fn select_shell(rootfs: &Path) -> &'static str {
    if fs::symlink_metadata(rootfs.join("bin/bash")).is_ok() {
        FULL_SHELL
    } else {
        MINIMAL_SHELL
    }
}

/// Replace `etc/resolv.conf` in the rootfs with a fixed nameserver.
pub fn write_resolver(rootfs: &Path) -> Result<()> {
    let etc = rootfs.join("etc");
    // A symlinked etc would redirect the write onto the host.
    if fs::symlink_metadata(&etc).is_ok_and(|m| m.file_type().is_symlink()) {
        bail!(
            "Refusing to write resolver: {} is a symlink",
            etc.display()
        );
    }
    fs::create_dir_all(&etc).with_context(|| format!("Failed to create {}", etc.display()))?;

    let path = etc.join("resolv.conf");
    match fs::remove_file(&path) {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => {
            return Err(e).with_context(|| format!("Failed to replace {}", path.display()));
        }
    }
    fs::write(&path, format!("nameserver {}\n", NAMESERVER))
        .with_context(|| format!("Failed to write {}", path.display()))
}

/// Whether the bundle looks like a Home Assistant image.
pub fn is_home_assistant(bundle: &BundleSpec, hostname: &str) -> bool {
    bundle.hostname().contains(HA_HOSTNAME_MARKER)
        || hostname.contains(HA_HOSTNAME_MARKER)
        || bundle.env().iter().any(|e| e.contains(HA_VENDOR_DOMAIN))
        || bundle
            .annotations
            .values()
            .any(|v| v.contains(HA_VENDOR_DOMAIN))
}

/// Install the Home Assistant entry script and return its in-sandbox path.
pub fn write_entry_script(rootfs: &Path, shell: &str) -> Result<String> {
    let path = rootfs.join(ENTRY_SCRIPT);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    fsutil::write_atomically(&path, 0o755, |f| {
        writeln!(f, "#!{}", shell)?;
        f.write_all(HA_ENTRY_TEMPLATE.as_bytes())?;
        Ok(())
    })
    .with_context(|| format!("Failed to write entry script {}", path.display()))?;
    info!(path = %path.display(), "synth:installed entry script");
    Ok(format!("/{}", ENTRY_SCRIPT))
}

/// Hostname override, else the sanitized instance name.
pub fn resolve_hostname(instance: &Instance, overrides: &Overrides) -> String {
    match overrides.hostname.as_deref().filter(|h| !h.is_empty()) {
        Some(hostname) => hostname.to_string(),
        None => instance.name().to_string(),
    }
}

fn entrypoint(bundle: &BundleSpec, hostname: &str, rootfs: &Path, shell: &str) -> Result<Vec<String>> {
    let args = bundle.args();
    match args.first() {
        None => Ok(vec![shell.to_string()]),
        Some(first) if first == INIT_MARKER => {
            if is_home_assistant(bundle, hostname) {
                Ok(vec![write_entry_script(rootfs, shell)?])
            } else {
                debug!("synth:init entrypoint without replacement, using shell");
                Ok(vec![shell.to_string()])
            }
        }
        Some(_) => Ok(args.to_vec()),
    }
}

/// Map `bundle` and `overrides` to a descriptor for `instance`, preparing the
/// rootfs along the way.
pub fn synthesize(
    instance: &Instance,
    engine_path: &Path,
    bundle: &BundleSpec,
    overrides: &Overrides,
) -> Result<SandboxDescriptor> {
    let rootfs: PathBuf = instance.rootfs();
    let shell = select_shell(&rootfs);
    write_resolver(&rootfs)?;

    let hostname = resolve_hostname(instance, overrides);
    let workdir = overrides
        .workdir
        .clone()
        .filter(|w| !w.is_empty())
        .unwrap_or_else(|| bundle.cwd().to_string());
    let env = merge_env(&overrides.env, bundle.env());
    let command = entrypoint(bundle, &hostname, &rootfs, shell)?;

    let mut mounts = Vec::new();
    let mut ro_mounts = Vec::new();
    for spec in &overrides.volumes {
        match parse_volume(spec) {
            Some(Volume::ReadWrite(src, dst)) => mounts.push((src, dst)),
            Some(Volume::ReadOnly(src, dst)) => ro_mounts.push((src, dst)),
            None => debug!(volume = %spec, "synth:skipping malformed volume"),
        }
    }

    debug!(
        instance = instance.name(),
        hostname = %hostname,
        shell,
        command = ?command,
        env_count = env.len(),
        "synth:descriptor ready"
    );

    Ok(SandboxDescriptor {
        engine_path: engine_path.to_path_buf(),
        container_dir: rootfs,
        hostname,
        workdir,
        env,
        mounts,
        ro_mounts,
        command,
        isolation: Isolation::default(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bundle::Process;
    use tempfile::TempDir;

    fn bundle(args: &[&str], env: &[&str]) -> BundleSpec {
        BundleSpec {
            process: Some(Process {
                args: args.iter().map(|s| s.to_string()).collect(),
                env: env.iter().map(|s| s.to_string()).collect(),
                cwd: "/srv".to_string(),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn instance_with_rootfs(tmp: &TempDir, name: &str) -> Instance {
        let instance = Instance::resolve(tmp.path(), name).unwrap();
        fs::create_dir_all(instance.rootfs().join("etc")).unwrap();
        instance
    }

    fn strings(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn override_env_wins_without_duplicates() {
        let merged = merge_env(&strings(&["A=1"]), &strings(&["A=2", "B=3"]));
        assert_eq!(
            merged,
            vec![
                ("A".to_string(), "1".to_string()),
                ("B".to_string(), "3".to_string())
            ]
        );
    }

    #[test]
    fn env_entries_without_value_are_dropped() {
        let parsed = parse_env(&["EMPTY=", "NOEQ", "X=a=b"]);
        assert_eq!(parsed, vec![("X".to_string(), "a=b".to_string())]);
    }

    #[test]
    fn volume_parsing() {
        assert_eq!(
            parse_volume("/host:/ctr"),
            Some(Volume::ReadWrite("/host".into(), "/ctr".into()))
        );
        assert_eq!(
            parse_volume("/host:/ctr:ro"),
            Some(Volume::ReadOnly("/host".into(), "/ctr".into()))
        );
        assert_eq!(
            parse_volume("/host:/ctr:rw"),
            Some(Volume::ReadWrite("/host".into(), "/ctr".into()))
        );
        assert_eq!(parse_volume("/host"), None);
        assert_eq!(parse_volume("/host:"), None);
    }

    #[test]
    fn shell_prefers_bash_even_as_dangling_symlink() {
        let tmp = TempDir::new().unwrap();
        let rootfs = tmp.path();
        assert_eq!(select_shell(rootfs), "/bin/sh");

        fs::create_dir_all(rootfs.join("bin")).unwrap();
        std::os::unix::fs::symlink("/usr/bin/bash", rootfs.join("bin/bash")).unwrap();
        assert_eq!(select_shell(rootfs), "/bin/bash");
    }

    #[test]
    fn resolver_replaces_symlink_instead_of_following_it() {
        let tmp = TempDir::new().unwrap();
        let outside = tmp.path().join("host-resolv.conf");
        fs::write(&outside, "nameserver 10.0.0.1\n").unwrap();
        let rootfs = tmp.path().join("rootfs");
        fs::create_dir_all(rootfs.join("etc")).unwrap();
        std::os::unix::fs::symlink(&outside, rootfs.join("etc/resolv.conf")).unwrap();

        write_resolver(&rootfs).unwrap();

        assert_eq!(
            fs::read_to_string(rootfs.join("etc/resolv.conf")).unwrap(),
            "nameserver 223.5.5.5\n"
        );
        assert_eq!(fs::read_to_string(&outside).unwrap(), "nameserver 10.0.0.1\n");
    }

    #[test]
    fn resolver_refuses_symlinked_etc() {
        let tmp = TempDir::new().unwrap();
        let host_etc = tmp.path().join("host-etc");
        fs::create_dir_all(&host_etc).unwrap();
        let rootfs = tmp.path().join("rootfs");
        fs::create_dir_all(&rootfs).unwrap();
        std::os::unix::fs::symlink(&host_etc, rootfs.join("etc")).unwrap();

        assert!(write_resolver(&rootfs).is_err());
        assert!(!host_etc.join("resolv.conf").exists());
    }

    #[test]
    fn plain_image_uses_its_own_entrypoint() {
        let tmp = TempDir::new().unwrap();
        let instance = instance_with_rootfs(&tmp, "Web App");
        let spec = bundle(&["nginx", "-g", "daemon off;"], &["PATH=/usr/bin"]);

        let desc = synthesize(&instance, Path::new("/opt/ruri"), &spec, &Overrides::default())
            .unwrap();

        assert_eq!(desc.command, strings(&["nginx", "-g", "daemon off;"]));
        assert_eq!(desc.hostname, "web-app");
        assert_eq!(desc.workdir, "/srv");
        assert_eq!(desc.container_dir, instance.rootfs());
        assert!(desc.mounts.is_empty() && desc.ro_mounts.is_empty());
        assert!(!instance.rootfs().join(ENTRY_SCRIPT).exists());
    }

    #[test]
    fn empty_args_fall_back_to_shell() {
        let tmp = TempDir::new().unwrap();
        let instance = instance_with_rootfs(&tmp, "bare");
        let desc = synthesize(&instance, Path::new("ruri"), &bundle(&[], &[]), &Overrides::default())
            .unwrap();
        assert_eq!(desc.command, strings(&["/bin/sh"]));
    }

    #[test]
    fn init_without_home_assistant_falls_back_to_shell() {
        let tmp = TempDir::new().unwrap();
        let instance = instance_with_rootfs(&tmp, "s6-app");
        let desc = synthesize(&instance, Path::new("ruri"), &bundle(&["/init"], &[]), &Overrides::default())
            .unwrap();
        assert_eq!(desc.command, strings(&["/bin/sh"]));
    }

    #[test]
    fn home_assistant_init_gets_entry_script() {
        let tmp = TempDir::new().unwrap();
        let instance = instance_with_rootfs(&tmp, "home-assistant");
        fs::create_dir_all(instance.rootfs().join("bin")).unwrap();
        fs::write(instance.rootfs().join("bin/bash"), "").unwrap();

        let desc = synthesize(&instance, Path::new("ruri"), &bundle(&["/init"], &[]), &Overrides::default())
            .unwrap();

        assert_eq!(desc.command, strings(&["/root/entry.sh"]));
        let script = fs::read_to_string(instance.rootfs().join(ENTRY_SCRIPT)).unwrap();
        assert!(script.starts_with("#!/bin/bash\n"));
        assert!(script.contains("homeassistant"));
    }

    #[test]
    fn home_assistant_detected_from_env_or_annotations() {
        let by_env = bundle(&["/init"], &["URL=https://www.home-assistant.io/"]);
        assert!(is_home_assistant(&by_env, "ha"));

        let mut by_label = bundle(&["/init"], &[]);
        by_label.annotations.insert(
            "org.opencontainers.image.url".to_string(),
            "https://www.home-assistant.io/".to_string(),
        );
        assert!(is_home_assistant(&by_label, "ha"));

        assert!(!is_home_assistant(&bundle(&["/init"], &[]), "ha"));
    }

    #[test]
    fn overrides_are_applied() {
        let tmp = TempDir::new().unwrap();
        let instance = instance_with_rootfs(&tmp, "svc");
        let overrides = Overrides {
            hostname: Some("box".to_string()),
            workdir: Some("/work".to_string()),
            env: strings(&["A=1"]),
            volumes: strings(&["/data:/data", "/etc/ssl:/etc/ssl:ro", "/broken"]),
        };

        let desc = synthesize(&instance, Path::new("ruri"), &bundle(&["app"], &["A=2", "B=3"]), &overrides)
            .unwrap();

        assert_eq!(desc.hostname, "box");
        assert_eq!(desc.workdir, "/work");
        assert_eq!(desc.env.len(), 2);
        assert_eq!(desc.mounts, vec![("/data".to_string(), "/data".to_string())]);
        assert_eq!(
            desc.ro_mounts,
            vec![("/etc/ssl".to_string(), "/etc/ssl".to_string())]
        );
    }
}
