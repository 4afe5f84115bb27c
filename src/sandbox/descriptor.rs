use std::path::PathBuf;

/// Sentinel telling the engine to leave `/proc` hidepid alone.
pub const HIDEPID_UNSET: i32 = -114;

/// Isolation and resource knobs passed through to the engine unchanged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Isolation {
    pub drop_caps: Vec<String>,
    pub no_new_privs: bool,
    pub enable_unshare: bool,
    pub rootless: bool,
    pub no_warnings: bool,
    pub cross_arch: String,
    pub qemu_path: String,
    pub use_rurienv: bool,
    pub enable_seccomp: bool,
    pub hidepid: i32,
    pub cpuset: String,
    pub cpupercent: i32,
    pub memory: String,
    pub just_chroot: bool,
    pub unmask_dirs: bool,
    pub mount_host_runtime: bool,
    pub rootfs_source: String,
    pub ro_root: bool,
    pub no_network: bool,
    pub use_kvm: bool,
    pub oom_score_adj: i32,
    pub char_devs: Vec<String>,
    pub timens_monotonic_offset: i64,
    pub timens_realtime_offset: i64,
    pub deny_syscall: Vec<String>,
}

impl Default for Isolation {
    fn default() -> Self {
        Self {
            drop_caps: Vec::new(),
            no_new_privs: false,
            enable_unshare: false,
            rootless: false,
            no_warnings: true,
            cross_arch: String::new(),
            qemu_path: String::new(),
            use_rurienv: true,
            enable_seccomp: false,
            hidepid: HIDEPID_UNSET,
            cpuset: String::new(),
            cpupercent: 0,
            memory: String::new(),
            just_chroot: false,
            unmask_dirs: false,
            mount_host_runtime: false,
            rootfs_source: String::new(),
            ro_root: false,
            no_network: false,
            use_kvm: false,
            oom_score_adj: 0,
            char_devs: Vec::new(),
            timens_monotonic_offset: 0,
            timens_realtime_offset: 0,
            deny_syscall: Vec::new(),
        }
    }
}

/// Everything the engine needs to start one sandbox. Built fresh for each
/// render and never persisted except through the rendered config.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SandboxDescriptor {
    pub engine_path: PathBuf,
    pub container_dir: PathBuf,
    pub hostname: String,
    pub workdir: String,
    /// `(key, value)` in precedence order, keys unique
    pub env: Vec<(String, String)>,
    /// `(host source, container destination)`
    pub mounts: Vec<(String, String)>,
    pub ro_mounts: Vec<(String, String)>,
    /// Never empty
    pub command: Vec<String>,
    pub isolation: Isolation,
}
