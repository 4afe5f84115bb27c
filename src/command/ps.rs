use anyhow::Result;
use tabled::{
    Table, Tabled,
    settings::{Padding, Style, object::Columns},
};

use crate::config::Context;
use crate::instance::{self, Instance};
use crate::sandbox::engine::SandboxEngine;
use crate::sandbox::lifecycle::{self, InstanceState};

#[derive(Tabled)]
struct InstanceRow {
    #[tabled(rename = "NAME")]
    name: String,
    #[tabled(rename = "STATE")]
    state: String,
    #[tabled(rename = "PIDS")]
    pids: String,
    #[tabled(rename = "PATH")]
    path: String,
}

fn describe(state: &InstanceState) -> (String, String) {
    match state {
        InstanceState::Unconfigured => ("unconfigured".to_string(), "-".to_string()),
        InstanceState::Configured => ("stopped".to_string(), "-".to_string()),
        InstanceState::Running(pids) => ("running".to_string(), pids.join(" ")),
    }
}

pub fn run(name: Option<&str>, detail: bool) -> Result<()> {
    let ctx = Context::load()?;
    let engine = super::engine(&ctx)?;

    let Some(name) = name else {
        return list(&ctx, &engine);
    };

    let instance = Instance::resolve(&ctx.registry.data_root, name)?;
    instance.require_engine_config()?;
    let conf = instance.engine_config();
    if detail {
        return engine.list_detail(&conf, &mut std::io::stdout());
    }
    println!("{}", engine.pids(&conf)?.join(" "));
    Ok(())
}

fn list(ctx: &Context, engine: &dyn SandboxEngine) -> Result<()> {
    let instances = instance::list(&ctx.registry.data_root)?;
    if instances.is_empty() {
        println!("No instances under {}", ctx.registry.data_root.display());
        return Ok(());
    }

    let rows: Vec<InstanceRow> = instances
        .iter()
        .map(|inst| {
            let (state, pids) = match lifecycle::state(inst, engine) {
                Ok(state) => describe(&state),
                Err(_) => ("unknown".to_string(), "-".to_string()),
            };
            InstanceRow {
                name: inst.name().to_string(),
                state,
                pids,
                path: inst.dir().display().to_string(),
            }
        })
        .collect();

    let mut table = Table::new(rows);
    table
        .with(Style::blank())
        .modify(Columns::new(0..4), Padding::new(0, 1, 0, 0));
    println!("{table}");
    Ok(())
}
