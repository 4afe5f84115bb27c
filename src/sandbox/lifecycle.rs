//! Instance lifecycle: configure, query, stop and tear down.
//!
//! Nothing here caches state between calls. Every decision re-reads the
//! instance directory and asks the engine for live PIDs.

use anyhow::Result;
use std::io::Write;
use std::path::Path;
use tracing::{debug, info, warn};

use crate::bundle::BundleSpec;
use crate::error::{DockrootError, KillFailure};
use crate::instance::Instance;
use crate::sandbox::descriptor::SandboxDescriptor;
use crate::sandbox::engine::{ProcessKiller, SandboxEngine};
use crate::sandbox::render;
use crate::sandbox::synth::{self, Overrides};

/// The only network mode the engine supports.
pub const HOST_NETWORK: &str = "host";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstanceState {
    /// No engine config yet
    Unconfigured,
    /// Config present, no live processes
    Configured,
    Running(Vec<String>),
}

pub fn state(instance: &Instance, engine: &dyn SandboxEngine) -> Result<InstanceState> {
    if !instance.is_configured() {
        return Ok(InstanceState::Unconfigured);
    }
    let pids = engine.pids(&instance.engine_config())?;
    Ok(if pids.is_empty() {
        InstanceState::Configured
    } else {
        InstanceState::Running(pids)
    })
}

/// Synthesize and write `ruri.conf` for `instance`, persisting the canonical
/// hostname back into `config.json` when it changed.
pub fn configure(
    instance: &Instance,
    engine_path: &Path,
    overrides: &Overrides,
) -> Result<SandboxDescriptor> {
    instance.require_bundle()?;
    let bundle_path = instance.bundle_config();
    let mut bundle = BundleSpec::load(&bundle_path)?;

    let descriptor = synth::synthesize(instance, engine_path, &bundle, overrides)?;

    if bundle.hostname() != descriptor.hostname {
        debug!(
            from = bundle.hostname(),
            to = %descriptor.hostname,
            "lifecycle:patching bundle hostname"
        );
        bundle.hostname = Some(descriptor.hostname.clone());
        bundle.save(&bundle_path)?;
    }

    render::write_config(&descriptor, &instance.engine_config())?;
    info!(instance = instance.name(), "lifecycle:configured");
    Ok(descriptor)
}

/// Flags accepted by `run`.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub renew: bool,
    pub detach: bool,
    pub network: Option<String>,
    pub restart: Option<String>,
    pub publish: Vec<String>,
    pub overrides: Overrides,
}

impl RunOptions {
    /// Reject unsupported or inconsistent flags before touching the instance.
    pub fn validate(&self) -> Result<(), DockrootError> {
        if !self.renew && !self.overrides.is_empty() {
            return Err(DockrootError::InvalidOption(
                "Cannot specify --hostname, --workdir, --env or --volume without --renew"
                    .to_string(),
            ));
        }
        if let Some(network) = self.network.as_deref()
            && network != HOST_NETWORK
        {
            return Err(DockrootError::InvalidOption(format!(
                "Invalid network '{}', only '{}' is supported",
                network, HOST_NETWORK
            )));
        }
        if !self.publish.is_empty() {
            return Err(DockrootError::InvalidOption(
                "Publishing ports is not supported".to_string(),
            ));
        }
        if let Some(restart) = self.restart.as_deref() {
            return Err(DockrootError::InvalidOption(format!(
                "Restart policy '{}' is not supported",
                restart
            )));
        }
        Ok(())
    }

    /// Whether `ruri.conf` has to be (re)written before launch.
    pub fn needs_configure(&self, instance: &Instance) -> bool {
        self.renew || !instance.is_configured()
    }
}

/// Kill every PID in `pids`, continuing past failures. All failures are
/// reported together.
pub fn kill_all(pids: &[String], killer: &dyn ProcessKiller) -> Result<(), DockrootError> {
    let mut failures = Vec::new();
    for pid in pids {
        let outcome = pid
            .parse::<i32>()
            .map_err(|e| format!("invalid pid: {}", e))
            .and_then(|n| killer.kill(n).map_err(|e| format!("{:#}", e)));
        match outcome {
            Ok(()) => debug!(pid = %pid, "lifecycle:killed"),
            Err(reason) => {
                warn!(pid = %pid, reason = %reason, "lifecycle:kill failed");
                failures.push(KillFailure {
                    pid: pid.clone(),
                    reason,
                });
            }
        }
    }
    if failures.is_empty() {
        Ok(())
    } else {
        Err(DockrootError::PartialTermination { failures })
    }
}

/// Kill every live process of `instance`. Returns how many PIDs were found.
pub fn stop(
    instance: &Instance,
    engine: &dyn SandboxEngine,
    killer: &dyn ProcessKiller,
) -> Result<usize> {
    instance.require_engine_config()?;
    let pids = engine.pids(&instance.engine_config())?;
    if pids.is_empty() {
        debug!(instance = instance.name(), "lifecycle:stop no-op");
        return Ok(0);
    }
    kill_all(&pids, killer)?;
    info!(instance = instance.name(), count = pids.len(), "lifecycle:stopped");
    Ok(pids.len())
}

/// Unmount `instance`. Live processes block removal unless `force` is set,
/// in which case they are killed first.
pub fn remove(
    instance: &Instance,
    engine: &dyn SandboxEngine,
    killer: &dyn ProcessKiller,
    force: bool,
    out: &mut dyn Write,
) -> Result<()> {
    instance.require_engine_config()?;
    let conf = instance.engine_config();
    let pids = engine.pids(&conf)?;
    if !pids.is_empty() {
        if !force {
            return Err(DockrootError::InstanceBusy {
                name: instance.name().to_string(),
                pids,
            }
            .into());
        }
        if let Err(e) = kill_all(&pids, killer) {
            warn!(instance = instance.name(), error = %e, "lifecycle:forced kill incomplete");
            writeln!(out, "warning: {}", e)?;
        }
    }
    engine.unmount(&conf, out)?;
    info!(instance = instance.name(), forced = force, "lifecycle:removed");
    Ok(())
}
