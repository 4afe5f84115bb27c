use anyhow::Result;
use tracing::info;

use crate::config::Context;
use crate::instance::Instance;
use crate::sandbox::lifecycle::{self, RunOptions};

pub fn run(name: &str, command: &[String], opts: RunOptions) -> Result<()> {
    opts.validate()?;
    let ctx = Context::load()?;
    let instance = Instance::resolve(&ctx.registry.data_root, name)?;
    instance.require_bundle()?;

    let engine = super::engine(&ctx)?;
    if opts.needs_configure(&instance) {
        lifecycle::configure(&instance, engine.path(), &opts.overrides)?;
    }

    let conf = instance.engine_config();
    if opts.detach {
        let pid = engine.spawn_detached(&conf, &instance.engine_log(), command)?;
        info!(instance = instance.name(), pid, "run:detached");
        println!(
            "{} started in the background, log at {}",
            instance.name(),
            instance.engine_log().display()
        );
        return Ok(());
    }

    match engine.exec_foreground(&conf, command)? {}
}
