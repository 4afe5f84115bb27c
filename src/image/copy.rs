//! Image copy collaborator: fetches a registry image into a local OCI layout.

use anyhow::{Context, Result};
use minijinja::{AutoEscape, Environment, context};
use serde::Serialize;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use crate::cmd::Cmd;
use crate::error::DockrootError;

const REGISTRIES_CONF_TEMPLATE: &str = include_str!("templates/registries.conf");

/// Copy failures that another attempt cannot fix.
const PERMANENT_FAILURES: &[&str] = &[
    "manifest unknown",
    "name unknown",
    "unauthorized",
    "authentication required",
    "access to the resource is denied",
    "invalid reference format",
    "failed to execute command",
];

#[derive(Debug, Clone, Default)]
pub struct CopyOptions {
    /// Layers copied concurrently
    pub parallelism: u32,
    /// Deadline for the whole copy
    pub timeout: Option<Duration>,
    /// Mirrors to try for the source host, as `(host, mirror urls)`
    pub mirrors: Option<(String, Vec<String>)>,
}

/// Copies `source` to `dest` and returns the manifest digest.
pub trait ImageCopier {
    fn copy(&self, source: &str, dest: &str, opts: &CopyOptions) -> Result<String>;
}

/// `skopeo`-backed copier.
pub struct SkopeoCopier {
    binary: PathBuf,
}

impl SkopeoCopier {
    /// Find `skopeo` on `PATH`.
    pub fn locate() -> Result<Self> {
        let binary = which::which("skopeo").map_err(|e| DockrootError::DependencyUnavailable {
            name: "skopeo".to_string(),
            reason: format!("{} (install skopeo to pull images)", e),
        })?;
        debug!(binary = %binary.display(), "copy:located skopeo");
        Ok(Self { binary })
    }
}

impl ImageCopier for SkopeoCopier {
    fn copy(&self, source: &str, dest: &str, opts: &CopyOptions) -> Result<String> {
        let scratch = tempfile::Builder::new()
            .prefix("dockroot-copy-")
            .tempdir()
            .context("Failed to create temporary directory for image copy")?;
        let digest_file = scratch.path().join("digest");

        let mut args: Vec<OsString> = vec!["--insecure-policy".into()];
        if let Some(timeout) = opts.timeout {
            args.push("--command-timeout".into());
            args.push(format!("{}s", timeout.as_secs()).into());
        }
        if let Some((host, mirrors)) = &opts.mirrors {
            let conf = scratch.path().join("registries.conf");
            std::fs::write(&conf, render_registries_conf(host, mirrors)?)
                .context("Failed to write registries.conf")?;
            args.push("--registries-conf".into());
            args.push(conf.into_os_string());
        }
        args.push("copy".into());
        args.push("--image-parallel-copies".into());
        args.push(opts.parallelism.max(1).to_string().into());
        args.push("--digestfile".into());
        args.push(digest_file.clone().into_os_string());
        args.push(source.into());
        args.push(dest.into());

        Cmd::new(&self.binary)
            .args(&args)
            .run_streaming(&mut std::io::stdout())
            .with_context(|| format!("Failed to copy {} to {}", source, dest))?;

        read_digest(&digest_file)
    }
}

/// Whether a failed copy is worth another attempt. Missing images, bad
/// credentials and malformed references are not.
pub fn is_retryable(error: &anyhow::Error) -> bool {
    let text = format!("{:#}", error).to_lowercase();
    !PERMANENT_FAILURES.iter().any(|marker| text.contains(marker))
}

fn read_digest(path: &Path) -> Result<String> {
    let digest = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read manifest digest {}", path.display()))?;
    Ok(digest.trim().to_string())
}

#[derive(Debug, Serialize)]
struct MirrorEntry {
    location: String,
    insecure: bool,
}

/// Render a `registries.conf` that tries `mirrors` before `host`.
pub fn render_registries_conf(host: &str, mirrors: &[String]) -> Result<String> {
    let entries: Vec<MirrorEntry> = mirrors
        .iter()
        .filter_map(|m| {
            let (location, insecure) = if let Some(rest) = m.strip_prefix("https://") {
                (rest, false)
            } else if let Some(rest) = m.strip_prefix("http://") {
                (rest, true)
            } else {
                (m.as_str(), false)
            };
            let location = location.trim_end_matches('/');
            (!location.is_empty()).then(|| MirrorEntry {
                location: location.to_string(),
                insecure,
            })
        })
        .collect();

    let mut env = Environment::new();
    env.set_auto_escape_callback(|_| AutoEscape::None);
    env.set_keep_trailing_newline(true);
    env.render_str(
        REGISTRIES_CONF_TEMPLATE,
        context! { host => host, mirrors => entries },
    )
    .context("Failed to render registries.conf")
}
