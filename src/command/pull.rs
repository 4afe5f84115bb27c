use anyhow::Result;
use console::style;
use tracing::info;

use super::args::PullArgs;
use crate::cache;
use crate::config::Context;
use crate::deps::{self, Dependency};
use crate::image::copy::SkopeoCopier;
use crate::image::pipeline;
use crate::image::reference::ImageReference;
use crate::image::unpack::UmociUnpacker;

pub fn run(reference: &str, name: &str, args: &PullArgs) -> Result<()> {
    let reference = ImageReference::parse(reference)?;
    let ctx = Context::load_or_init()?;

    cache::ensure_proxy_if_needed(&ctx, &reference)?;
    let engine = deps::ensure(Dependency::Engine, &ctx.install_dir, &ctx.http)?;
    let copier = SkopeoCopier::locate()?;
    let unpacker = UmociUnpacker::locate()?;

    let opts = args.to_options(ctx.registry.mirrors.clone());
    info!(
        repository = reference.repository(),
        tag = reference.tag(),
        source = reference.source(),
        name,
        "pull:start"
    );
    let instance = pipeline::pull_into(
        &ctx.registry.data_root,
        &engine,
        &reference,
        name,
        &opts,
        &copier,
        &unpacker,
    )?;

    println!(
        "{} {} into {}",
        style("Pulled").green().bold(),
        reference.source(),
        instance.dir().display()
    );
    println!(
        "Start it with: {}",
        style(format!("dockroot run {}", instance.name())).cyan()
    );
    Ok(())
}
