use anyhow::Result;
use tracing::info;

use crate::config::Context;
use crate::deps::{self, Dependency};

pub fn run() -> Result<()> {
    let ctx = Context::load_or_init()?;

    if ctx.registry.use_proxy {
        deps::ensure(Dependency::Proxy, &ctx.install_dir, &ctx.http)?;
    } else {
        info!("ensure_deps:proxy disabled, skipping");
    }
    deps::ensure(Dependency::Engine, &ctx.install_dir, &ctx.http)?;

    println!(
        "Dependencies ready in {} (data root {})",
        ctx.install_dir.display(),
        ctx.registry.data_root.display()
    );
    Ok(())
}
