//! The ruri isolation engine and process termination.

use anyhow::{Context, Result};
use std::convert::Infallible;
use std::ffi::OsString;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use tracing::{debug, info};

use crate::cmd::Cmd;

/// Engine operations the lifecycle manager needs against a config file.
pub trait SandboxEngine {
    /// Live PIDs tied to `conf`, in listing order. Always queried fresh.
    fn pids(&self, conf: &Path) -> Result<Vec<String>>;

    /// Stream the engine's verbose process listing to `out`.
    fn list_detail(&self, conf: &Path, out: &mut dyn Write) -> Result<()>;

    /// Unmount the sandbox filesystem described by `conf`.
    fn unmount(&self, conf: &Path, out: &mut dyn Write) -> Result<()>;
}

/// Sends the kill signal to a process.
pub trait ProcessKiller {
    fn kill(&self, pid: i32) -> Result<()>;
}

/// `SIGKILL` via `kill(2)`.
pub struct SigKill;

impl ProcessKiller for SigKill {
    fn kill(&self, pid: i32) -> Result<()> {
        nix::sys::signal::kill(
            nix::unistd::Pid::from_raw(pid),
            nix::sys::signal::Signal::SIGKILL,
        )
        .with_context(|| format!("Failed to kill process {}", pid))
    }
}

/// First whitespace-separated field of every non-empty line.
pub fn parse_pid_listing(listing: &str) -> Vec<String> {
    listing
        .lines()
        .filter_map(|line| line.split_whitespace().next())
        .map(str::to_string)
        .collect()
}

#[derive(Debug, Clone)]
pub struct Ruri {
    path: PathBuf,
}

impl Ruri {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn launch_args(conf: &Path, command: &[String]) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec!["-c".into(), conf.as_os_str().to_owned()];
        args.extend(command.iter().map(OsString::from));
        args
    }

    /// Replace this process with the engine running `conf`. Only returns on
    /// failure to start the engine.
    #[cfg(unix)]
    pub fn exec_foreground(&self, conf: &Path, command: &[String]) -> Result<Infallible> {
        use std::os::unix::process::CommandExt;

        let arg0 = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| self.path.as_os_str().to_owned());
        let args = Self::launch_args(conf, command);
        info!(engine = %self.path.display(), conf = %conf.display(), "engine:exec foreground");

        let err = Command::new(&self.path).arg0(arg0).args(&args).exec();
        Err(err).with_context(|| format!("Failed to exec {}", self.path.display()))
    }

    /// Start the engine in the background with output logged to `log`, and
    /// return without waiting for it.
    pub fn spawn_detached(&self, conf: &Path, log: &Path, command: &[String]) -> Result<u32> {
        let mut args: Vec<OsString> = vec!["-b".into(), "-L".into(), log.as_os_str().to_owned()];
        args.extend(Self::launch_args(conf, command));

        let mut cmd = Command::new(&self.path);
        cmd.args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            cmd.process_group(0);
        }

        let child = cmd
            .spawn()
            .with_context(|| format!("Failed to start {}", self.path.display()))?;
        let pid = child.id();
        info!(pid, conf = %conf.display(), log = %log.display(), "engine:spawned detached");
        Ok(pid)
    }
}

impl SandboxEngine for Ruri {
    fn pids(&self, conf: &Path) -> Result<Vec<String>> {
        let listing = Cmd::new(&self.path)
            .arg("-P")
            .arg(conf)
            .run_and_capture_stdout()
            .with_context(|| format!("Failed to list processes for {}", conf.display()))?;
        let pids = parse_pid_listing(&listing);
        debug!(conf = %conf.display(), count = pids.len(), "engine:pids");
        Ok(pids)
    }

    fn list_detail(&self, conf: &Path, out: &mut dyn Write) -> Result<()> {
        Cmd::new(&self.path).arg("-P").arg(conf).run_streaming(out)
    }

    fn unmount(&self, conf: &Path, out: &mut dyn Write) -> Result<()> {
        Cmd::new(&self.path)
            .arg("-U")
            .arg(conf)
            .run_streaming(out)
            .with_context(|| format!("Failed to unmount {}", conf.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pid_listing_takes_first_field() {
        let listing = "1234 /bin/sh\n\n  5678   sleep 100\n9\n";
        assert_eq!(parse_pid_listing(listing), vec!["1234", "5678", "9"]);
        assert!(parse_pid_listing("").is_empty());
        assert!(parse_pid_listing("\n  \n").is_empty());
    }

    #[test]
    fn launch_args_put_command_after_config() {
        let command = ["sh".to_string(), "-l".to_string()];
        let args = Ruri::launch_args(Path::new("/d/ruri.conf"), &command);
        assert_eq!(args, vec!["-c", "/d/ruri.conf", "sh", "-l"]);
    }

    #[test]
    fn engine_pids_from_fake_binary() {
        // `echo` prints its arguments, so the first field is the `-P` flag.
        let engine = Ruri::new(PathBuf::from("echo"));
        let pids = engine.pids(Path::new("/tmp/ruri.conf")).unwrap();
        assert_eq!(pids, vec!["-P"]);
    }

    #[test]
    fn sigkill_on_missing_process_fails() {
        // PIDs near i32::MAX are never allocated on Linux.
        assert!(SigKill.kill(i32::MAX - 1).is_err());
    }
}
