use anyhow::Result;

use crate::config::Context;
use crate::instance::Instance;
use crate::sandbox::engine::SigKill;
use crate::sandbox::lifecycle;

pub fn run(name: &str) -> Result<()> {
    let ctx = Context::load()?;
    let engine = super::engine(&ctx)?;
    let instance = Instance::resolve(&ctx.registry.data_root, name)?;

    match lifecycle::stop(&instance, &engine, &SigKill)? {
        0 => println!("{} is not running", instance.name()),
        n => println!("Stopped {} ({} process(es) killed)", instance.name(), n),
    }
    Ok(())
}
