//! Bootstrap of the two downloaded executables: the ruri sandbox engine and
//! the kspeeder caching proxy.

use anyhow::Result;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

use crate::cmd::Cmd;
use crate::error::DockrootError;
use crate::fsutil;
use crate::http::HttpClient;
use crate::spinner;

pub const ENGINE_URL: &str = "https://fw0.koolcenter.com/binary/DockRoot/ruri";
pub const PROXY_URL: &str = "https://fw0.koolcenter.com/binary/kspeeder/kspeeder-linux";

/// Deadline for a whole binary download.
const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(120);

/// Deadline for running `--help`/`-v` on a candidate binary.
const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// An executable dockroot downloads and installs next to itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dependency {
    Engine,
    Proxy,
}

impl Dependency {
    pub fn file_name(self) -> &'static str {
        match self {
            Dependency::Engine => "ruri",
            Dependency::Proxy => "kspeeder",
        }
    }

    fn probe_flag(self) -> &'static str {
        match self {
            Dependency::Engine => "-v",
            Dependency::Proxy => "--help",
        }
    }

    fn marker(self) -> &'static str {
        match self {
            Dependency::Engine => "ruri version",
            Dependency::Proxy => "localAddr",
        }
    }

    fn url_prefix(self) -> &'static str {
        match self {
            Dependency::Engine => ENGINE_URL,
            Dependency::Proxy => PROXY_URL,
        }
    }

    /// Canonical install path inside the installation directory.
    pub fn path_in(self, install_dir: &Path) -> PathBuf {
        install_dir.join(self.file_name())
    }

    /// Download URL for the host architecture.
    pub fn download_url(self) -> String {
        format!("{}.{}", self.url_prefix(), release_arch())
    }
}

/// Architecture suffix used by the release server.
pub fn release_arch() -> &'static str {
    match std::env::consts::ARCH {
        "x86_64" => "amd64",
        "aarch64" => "arm64",
        "x86" => "386",
        "loongarch64" => "loong64",
        "mips" if cfg!(target_endian = "little") => "mipsle",
        "mips64" if cfg!(target_endian = "little") => "mips64le",
        other => other,
    }
}

/// Run `binary <flag>` and look for `marker` in its combined output.
pub fn probe_binary(binary: &Path, flag: &str, marker: &str) -> bool {
    match Cmd::new(binary).arg(flag).probe_output(PROBE_TIMEOUT) {
        Some(output) => output.contains(marker),
        None => false,
    }
}

/// Whether the dependency is installed and passes its self-check.
pub fn is_installed(dep: Dependency, install_dir: &Path) -> bool {
    let present = probe_binary(&dep.path_in(install_dir), dep.probe_flag(), dep.marker());
    debug!(dependency = dep.file_name(), present, "deps:probe");
    present
}

/// Make sure `dep` is usable, downloading it once if the self-check fails.
///
/// A second failed self-check after installing is fatal.
pub fn ensure(dep: Dependency, install_dir: &Path, http: &HttpClient) -> Result<PathBuf> {
    let path = dep.path_in(install_dir);
    if is_installed(dep, install_dir) {
        return Ok(path);
    }

    install(dep, &path, http).map_err(|e| DockrootError::DependencyUnavailable {
        name: dep.file_name().to_string(),
        reason: format!("{:#}", e),
    })?;

    if !is_installed(dep, install_dir) {
        return Err(DockrootError::DependencyUnavailable {
            name: dep.file_name().to_string(),
            reason: format!(
                "downloaded binary at {} failed its self-check",
                path.display()
            ),
        }
        .into());
    }
    info!(dependency = dep.file_name(), path = %path.display(), "deps:installed");
    Ok(path)
}

fn install(dep: Dependency, path: &Path, http: &HttpClient) -> Result<()> {
    let url = dep.download_url();
    println!(
        "Downloading {}... please wait. This may take a while.",
        dep.file_name()
    );
    spinner::with_spinner(&format!("Downloading {}", url), || {
        download_atomically(http, &url, path)
    })
}

/// Stream `url` into a temporary sibling of `dest`, then rename it into place
/// with executable permissions. `dest` is never observed half-written.
pub fn download_atomically(http: &HttpClient, url: &str, dest: &Path) -> Result<()> {
    fsutil::write_atomically(dest, 0o755, |file| {
        http.download(url, file, DOWNLOAD_TIMEOUT)?;
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::TempDir;

    fn write_script(path: &Path, body: &str) {
        fs::write(path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        fs::set_permissions(path, fs::Permissions::from_mode(0o755)).unwrap();
    }

    #[test]
    fn download_url_carries_arch_suffix() {
        let url = Dependency::Engine.download_url();
        assert!(url.starts_with(ENGINE_URL));
        assert!(url.ends_with(&format!(".{}", release_arch())));
    }

    #[test]
    fn probe_requires_marker() {
        let echo = Path::new("echo");
        assert!(probe_binary(echo, "ruri version 3.8", "ruri version"));
        assert!(!probe_binary(echo, "ruri version 3.8", "localAddr"));
    }

    #[test]
    fn probe_fails_on_nonzero_exit() {
        assert!(!probe_binary(Path::new("false"), "-v", ""));
    }

    #[test]
    fn is_installed_false_when_missing() {
        let tmp = TempDir::new().unwrap();
        assert!(!is_installed(Dependency::Proxy, tmp.path()));
    }

    #[test]
    fn ensure_skips_download_when_present() {
        let tmp = TempDir::new().unwrap();
        write_script(&tmp.path().join("kspeeder"), "echo '  -localAddr string'");
        let path = ensure(Dependency::Proxy, tmp.path(), &HttpClient::new()).unwrap();
        assert_eq!(path, tmp.path().join("kspeeder"));
    }
}
