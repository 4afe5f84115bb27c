use anyhow::Result;

use crate::config::Context;
use crate::instance::Instance;
use crate::sandbox::engine::SigKill;
use crate::sandbox::lifecycle;

pub fn run(name: &str, force: bool) -> Result<()> {
    let ctx = Context::load()?;
    let engine = super::engine(&ctx)?;
    let instance = Instance::resolve(&ctx.registry.data_root, name)?;

    lifecycle::remove(&instance, &engine, &SigKill, force, &mut std::io::stdout())?;
    println!("Unmounted {}", instance.name());
    Ok(())
}
