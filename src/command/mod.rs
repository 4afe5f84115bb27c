pub mod args;
pub mod ensure_deps;
pub mod ps;
pub mod pull;
pub mod rm;
pub mod run;
pub mod stop;
pub mod unpack;

use anyhow::Result;

use crate::config::Context;
use crate::deps::{self, Dependency};
use crate::sandbox::engine::Ruri;

/// The engine, installed on demand.
pub fn engine(ctx: &Context) -> Result<Ruri> {
    let path = deps::ensure(Dependency::Engine, &ctx.install_dir, &ctx.http)?;
    Ok(Ruri::new(path))
}
