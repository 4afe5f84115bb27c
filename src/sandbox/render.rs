//! Renders a [`SandboxDescriptor`] into the engine's `ruri.conf` format.

use anyhow::{Context, Result};
use minijinja::{AutoEscape, Environment};
use serde::Serialize;
use std::io::Write;
use std::path::Path;
use tracing::debug;

use crate::fsutil;
use crate::sandbox::descriptor::{Isolation, SandboxDescriptor};

const RURI_CONF_TEMPLATE: &str = include_str!("templates/ruri.conf");

pub type TemplateEnv = Environment<'static>;

/// Template environment with the k2v quoting filters.
pub fn create_template_env() -> TemplateEnv {
    let mut env = Environment::new();
    env.set_auto_escape_callback(|_| AutoEscape::None);
    env.set_keep_trailing_newline(true);
    env.add_filter("k2v_str", k2v_str);
    env.add_filter("k2v_list", k2v_list);
    env.add_filter("k2v_bool", k2v_bool);
    env
}

/// Lowercase `true`/`false`, as the engine's parser expects.
fn k2v_bool(value: bool) -> &'static str {
    if value { "true" } else { "false" }
}

/// `"value"` with `\` and `"` escaped.
fn k2v_str(value: String) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for c in value.chars() {
        if matches!(c, '\\' | '"') {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('"');
    out
}

/// `"a","b"`; empty lists render as nothing.
fn k2v_list(values: Vec<String>) -> String {
    values
        .into_iter()
        .map(k2v_str)
        .collect::<Vec<_>>()
        .join(",")
}

/// Template view of a descriptor, with pair lists flattened the way the
/// engine expects them (`key, value, key, value, ...`).
#[derive(Serialize)]
struct RuriConf<'a> {
    engine_path: String,
    container_dir: String,
    hostname: &'a str,
    workdir: &'a str,
    env: Vec<&'a str>,
    mounts: Vec<&'a str>,
    ro_mounts: Vec<&'a str>,
    command: &'a [String],
    isolation: IsolationView<'a>,
}

#[derive(Serialize)]
struct IsolationView<'a> {
    drop_caps: &'a [String],
    no_new_privs: bool,
    enable_unshare: bool,
    rootless: bool,
    no_warnings: bool,
    cross_arch: &'a str,
    qemu_path: &'a str,
    use_rurienv: bool,
    enable_seccomp: bool,
    hidepid: i32,
    cpuset: &'a str,
    cpupercent: i32,
    memory: &'a str,
    just_chroot: bool,
    unmask_dirs: bool,
    mount_host_runtime: bool,
    rootfs_source: &'a str,
    ro_root: bool,
    no_network: bool,
    use_kvm: bool,
    oom_score_adj: i32,
    char_devs: &'a [String],
    timens_monotonic_offset: i64,
    timens_realtime_offset: i64,
    deny_syscall: &'a [String],
}

impl<'a> From<&'a Isolation> for IsolationView<'a> {
    fn from(i: &'a Isolation) -> Self {
        Self {
            drop_caps: &i.drop_caps,
            no_new_privs: i.no_new_privs,
            enable_unshare: i.enable_unshare,
            rootless: i.rootless,
            no_warnings: i.no_warnings,
            cross_arch: &i.cross_arch,
            qemu_path: &i.qemu_path,
            use_rurienv: i.use_rurienv,
            enable_seccomp: i.enable_seccomp,
            hidepid: i.hidepid,
            cpuset: &i.cpuset,
            cpupercent: i.cpupercent,
            memory: &i.memory,
            just_chroot: i.just_chroot,
            unmask_dirs: i.unmask_dirs,
            mount_host_runtime: i.mount_host_runtime,
            rootfs_source: &i.rootfs_source,
            ro_root: i.ro_root,
            no_network: i.no_network,
            use_kvm: i.use_kvm,
            oom_score_adj: i.oom_score_adj,
            char_devs: &i.char_devs,
            timens_monotonic_offset: i.timens_monotonic_offset,
            timens_realtime_offset: i.timens_realtime_offset,
            deny_syscall: &i.deny_syscall,
        }
    }
}

fn flatten(pairs: &[(String, String)]) -> Vec<&str> {
    pairs
        .iter()
        .flat_map(|(k, v)| [k.as_str(), v.as_str()])
        .collect()
}

impl<'a> From<&'a SandboxDescriptor> for RuriConf<'a> {
    fn from(d: &'a SandboxDescriptor) -> Self {
        Self {
            engine_path: d.engine_path.to_string_lossy().into_owned(),
            container_dir: d.container_dir.to_string_lossy().into_owned(),
            hostname: &d.hostname,
            workdir: &d.workdir,
            env: flatten(&d.env),
            mounts: flatten(&d.mounts),
            ro_mounts: flatten(&d.ro_mounts),
            command: &d.command,
            isolation: IsolationView::from(&d.isolation),
        }
    }
}

/// Expand `descriptor` into config file text.
pub fn render(env: &TemplateEnv, descriptor: &SandboxDescriptor) -> Result<String> {
    env.render_str(RURI_CONF_TEMPLATE, RuriConf::from(descriptor))
        .context("Failed to render ruri.conf template")
}

/// Render and replace `dest` wholesale; on any failure `dest` is untouched.
pub fn write_config(descriptor: &SandboxDescriptor, dest: &Path) -> Result<()> {
    let text = render(&create_template_env(), descriptor)?;
    fsutil::write_atomically(dest, 0o644, |f| {
        f.write_all(text.as_bytes())?;
        Ok(())
    })
    .with_context(|| format!("Failed to write {}", dest.display()))?;
    debug!(path = %dest.display(), bytes = text.len(), "render:wrote engine config");
    Ok(())
}
