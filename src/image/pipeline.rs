//! Acquisition: copy an image into a per-instance OCI store, unpack it into a
//! runtime bundle, then discard the store.

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use super::copy::{self, CopyOptions, ImageCopier};
use super::reference::ImageReference;
use super::retry::RetryPolicy;
use super::unpack::{self, LayerUnpacker};
use crate::error::DockrootError;
use crate::instance::Instance;
use crate::sandbox::lifecycle;
use crate::sandbox::synth::Overrides;

/// Layers fetched concurrently unless told otherwise.
pub const DEFAULT_PARALLELISM: u32 = 2;

#[derive(Debug, Clone)]
pub struct PullOptions {
    pub retry: RetryPolicy,
    pub parallelism: u32,
    pub timeout: Option<std::time::Duration>,
    /// Write the manifest digest here after a successful copy
    pub digest_file: Option<PathBuf>,
    /// Docker Hub mirrors, used only for Docker Hub references
    pub mirrors: Vec<String>,
}

impl Default for PullOptions {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            parallelism: DEFAULT_PARALLELISM,
            timeout: None,
            digest_file: None,
            mirrors: Vec::new(),
        }
    }
}

impl PullOptions {
    fn copy_options(&self, reference: &ImageReference) -> CopyOptions {
        let mirrors = (reference.is_docker_hub() && !self.mirrors.is_empty())
            .then(|| (reference.host().to_string(), self.mirrors.clone()));
        CopyOptions {
            parallelism: self.parallelism,
            timeout: self.timeout,
            mirrors,
        }
    }
}

/// Fetch `reference` into `instance` and unpack it. Returns the manifest digest.
pub fn acquire(
    instance: &Instance,
    reference: &ImageReference,
    opts: &PullOptions,
    copier: &dyn ImageCopier,
    unpacker: &dyn LayerUnpacker,
) -> Result<String> {
    let dir = instance.dir();
    if dir.exists() {
        // Existing content is layered over, not purged.
        println!("Destination directory {} already exists", dir.display());
        warn!(dir = %dir.display(), "pipeline:re-pulling into existing instance");
    } else {
        fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create instance directory {}", dir.display()))?;
    }

    let dest = reference.store_locator(dir);
    let copy_opts = opts.copy_options(reference);
    info!(source = reference.source(), dest = %dest, "pipeline:copy start");

    let digest = opts
        .retry
        .run_if("image copy", copy::is_retryable, || {
            copier.copy(reference.source(), &dest, &copy_opts)
        })
        .map_err(|exhausted| DockrootError::TransferFailure {
            attempts: exhausted.attempts,
            message: format!("{:#}", exhausted.error),
        })?;
    info!(digest = %digest, "pipeline:copy done");

    if let Some(path) = &opts.digest_file {
        fs::write(path, &digest)
            .with_context(|| format!("Failed to write digest to {}", path.display()))?;
    }

    let unpacked = unpacker.unpack(&instance.image_store(), reference.tag(), dir);
    let cleaned = discard_store(instance);
    unpacked?;
    cleaned?;
    info!(instance = instance.name(), "pipeline:unpacked");
    Ok(digest)
}

/// Remove the OCI store and unpacker metadata from the instance directory.
fn discard_store(instance: &Instance) -> Result<()> {
    let store = instance.image_store();
    if store.exists() {
        fs::remove_dir_all(&store)
            .with_context(|| format!("Failed to remove image store {}", store.display()))?;
    }
    unpack::cleanup_transient(instance.dir())
}

/// Full pull: acquire, then synthesize the engine config so the instance is
/// immediately runnable.
pub fn pull_into(
    data_root: &Path,
    engine_path: &Path,
    reference: &ImageReference,
    name: &str,
    opts: &PullOptions,
    copier: &dyn ImageCopier,
    unpacker: &dyn LayerUnpacker,
) -> Result<Instance> {
    let instance = Instance::resolve(data_root, name)?;
    acquire(&instance, reference, opts, copier, unpacker)?;
    lifecycle::configure(&instance, engine_path, &Overrides::default())?;
    Ok(instance)
}
