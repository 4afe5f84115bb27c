//! Caching-proxy coordination for pulls from the default registry.
//!
//! kspeeder intercepts traffic to the default registry host. When it is
//! enabled but not answering, it is installed if needed, started in the
//! background and polled until healthy. A proxy that never comes up fails the
//! pull instead of silently going direct.

use anyhow::{Context, Result};
use std::path::Path;
use std::process::{Command, Stdio};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::Context as DockrootContext;
use crate::deps::{self, Dependency};
use crate::error::DockrootError;
use crate::http::HttpClient;
use crate::image::reference::{DEFAULT_REGISTRY, ImageReference};
use crate::spinner;

/// Registry API root answered by the proxy once it is serving.
pub const HEALTH_URL: &str = "https://registry.linkease.net:5443/v2/";

const HEALTH_TIMEOUT: Duration = Duration::from_secs(3);
const HEALTH_BODY_LIMIT: u64 = 1024;

/// Hours the proxy keeps running before exiting on its own.
const PROXY_LIFETIME_HOURS: &str = "1";

/// Polling schedule while waiting for a freshly started proxy.
#[derive(Debug, Clone, Copy)]
pub struct PollSchedule {
    pub attempts: u32,
    pub interval: Duration,
    /// Extra wait after the first healthy answer before the proxy takes requests reliably.
    pub settle: Duration,
}

impl Default for PollSchedule {
    fn default() -> Self {
        Self {
            attempts: 5,
            interval: Duration::from_secs(2),
            settle: Duration::from_secs(10),
        }
    }
}

/// Something that can tell whether the proxy is serving.
pub trait ProxyProbe {
    fn is_healthy(&self) -> bool;
}

impl ProxyProbe for HttpClient {
    fn is_healthy(&self) -> bool {
        match self.fetch_prefix(HEALTH_URL, HEALTH_BODY_LIMIT, HEALTH_TIMEOUT) {
            Ok(body) => body.starts_with("{}"),
            Err(e) => {
                debug!(error = %e, "cache:health check failed");
                false
            }
        }
    }
}

/// Whether a pull of `reference` should go through the proxy.
pub fn needs_proxy(reference: &ImageReference, proxy_enabled: bool) -> bool {
    proxy_enabled && reference.source().contains(DEFAULT_REGISTRY)
}

/// Ensure the proxy is serving before a pull of `reference` starts.
pub fn ensure_proxy_if_needed(ctx: &DockrootContext, reference: &ImageReference) -> Result<()> {
    if !needs_proxy(reference, ctx.registry.use_proxy) {
        debug!(source = reference.source(), "cache:proxy not needed");
        return Ok(());
    }

    println!("checking kspeeder");
    if ctx.http.is_healthy() {
        debug!("cache:proxy already healthy");
        return Ok(());
    }

    let binary = deps::ensure(Dependency::Proxy, &ctx.install_dir, &ctx.http)?;
    start_proxy(&binary, &ctx.proxy_cache_dir())?;
    wait_until_healthy(&ctx.http, PollSchedule::default())
}

/// Start the proxy detached from this process; it exits on its own later.
fn start_proxy(binary: &Path, cache_dir: &Path) -> Result<()> {
    println!("Running kspeeder... please wait. This may take a while.");
    std::fs::create_dir_all(cache_dir)
        .with_context(|| format!("Failed to create proxy cache {}", cache_dir.display()))?;

    #[cfg(unix)]
    use std::os::unix::process::CommandExt;

    let mut cmd = Command::new(binary);
    cmd.arg("--cachePath")
        .arg(cache_dir)
        .arg("--exitAfter")
        .arg(PROXY_LIFETIME_HOURS)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null());
    #[cfg(unix)]
    cmd.process_group(0);

    let child = cmd
        .spawn()
        .with_context(|| format!("Failed to start {}", binary.display()))?;
    info!(pid = child.id(), cache = %cache_dir.display(), "cache:proxy started");
    Ok(())
}

/// Poll `probe` on `schedule`, sleeping before each check.
pub fn wait_until_healthy(probe: &dyn ProxyProbe, schedule: PollSchedule) -> Result<()> {
    for attempt in 1..=schedule.attempts {
        std::thread::sleep(schedule.interval);
        if probe.is_healthy() {
            info!(attempt, "cache:proxy healthy");
            println!(
                "kspeeder started but wait for {} seconds.",
                schedule.settle.as_secs()
            );
            spinner::wait("Waiting for kspeeder to settle", schedule.settle);
            println!("kspeeder started successfully. It will stop after 1 hours.");
            return Ok(());
        }
        debug!(attempt, "cache:proxy not ready");
    }

    warn!(attempts = schedule.attempts, "cache:proxy never became healthy");
    Err(DockrootError::ProxyStartTimeout {
        attempts: schedule.attempts,
    }
    .into())
}
