use anyhow::{Context, Result, anyhow};
use std::collections::VecDeque;
use std::ffi::OsStr;
use std::io::{BufRead, BufReader, Write};
use std::process::{Command, Output, Stdio};
use std::time::Duration;
use tracing::{debug, trace};
use wait_timeout::ChildExt;

/// Stderr lines kept for the error of a failed streaming command.
const STDERR_TAIL_LINES: usize = 20;

/// A builder for executing external programs with unified error handling
pub struct Cmd<'a> {
    command: &'a OsStr,
    args: Vec<&'a OsStr>,
}

impl<'a> Cmd<'a> {
    /// Create a new command builder
    pub fn new<S: AsRef<OsStr> + ?Sized>(command: &'a S) -> Self {
        Self {
            command: command.as_ref(),
            args: Vec::new(),
        }
    }

    /// Add a single argument
    pub fn arg<S: AsRef<OsStr> + ?Sized>(mut self, arg: &'a S) -> Self {
        self.args.push(arg.as_ref());
        self
    }

    /// Add multiple arguments
    pub fn args<S: AsRef<OsStr>>(mut self, args: &'a [S]) -> Self {
        self.args.extend(args.iter().map(|a| a.as_ref()));
        self
    }

    fn display(&self) -> String {
        std::iter::once(self.command)
            .chain(self.args.iter().copied())
            .map(|s| s.to_string_lossy())
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Execute the command and return the output
    /// Returns an error if the command fails (non-zero exit code)
    pub fn run(self) -> Result<Output> {
        let shown = self.display();
        trace!(command = %shown, "cmd:run start");

        let output = Command::new(self.command)
            .args(&self.args)
            .output()
            .with_context(|| format!("Failed to execute command: {}", shown))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            debug!(
                command = %shown,
                status = ?output.status.code(),
                stderr = %stderr.trim(),
                "cmd:run failure"
            );
            return Err(anyhow!("Command failed: {}\n{}", shown, stderr.trim()));
        }
        trace!(command = %shown, "cmd:run success");
        Ok(output)
    }

    /// Execute the command and return stdout as a string
    pub fn run_and_capture_stdout(self) -> Result<String> {
        let output = self.run()?;
        Ok(String::from_utf8(output.stdout)?)
    }

    /// Execute the command, forwarding each stdout line to `out` as it arrives.
    /// Stderr is echoed to this process's stderr so engine diagnostics stay
    /// visible; its last lines are carried in the error on failure.
    pub fn run_streaming(self, out: &mut dyn Write) -> Result<()> {
        let shown = self.display();
        trace!(command = %shown, "cmd:stream start");

        let mut child = Command::new(self.command)
            .args(&self.args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| format!("Failed to execute command: {}", shown))?;

        let stderr_tail = child.stderr.take().map(|stderr| {
            std::thread::spawn(move || {
                let mut tail = VecDeque::with_capacity(STDERR_TAIL_LINES);
                for line in BufReader::new(stderr).lines().map_while(|line| line.ok()) {
                    eprintln!("{}", line);
                    if tail.len() == STDERR_TAIL_LINES {
                        tail.pop_front();
                    }
                    tail.push_back(line);
                }
                Vec::from(tail).join("\n")
            })
        });

        if let Some(stdout) = child.stdout.take() {
            for line in BufReader::new(stdout).lines() {
                writeln!(out, "{}", line?)?;
            }
        }

        let status = child
            .wait()
            .with_context(|| format!("Failed to wait for command: {}", shown))?;
        let stderr = stderr_tail
            .and_then(|handle| handle.join().ok())
            .unwrap_or_default();
        if !status.success() {
            debug!(
                command = %shown,
                status = ?status.code(),
                stderr = %stderr.trim(),
                "cmd:stream failure"
            );
            return Err(anyhow!(
                "Command failed: {} (exit code: {})\n{}",
                shown,
                status.code().unwrap_or(-1),
                stderr.trim()
            ));
        }
        Ok(())
    }

    /// Execute the command with a deadline and return combined stdout+stderr.
    ///
    /// Returns `None` when the command cannot be spawned, exits non-zero or
    /// runs past `timeout` (in which case it is killed). Used for self-checks
    /// where any failure simply means "not usable".
    pub fn probe_output(self, timeout: Duration) -> Option<String> {
        let shown = self.display();
        trace!(command = %shown, "cmd:probe start");

        let mut child = match Command::new(self.command)
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
        {
            Ok(child) => child,
            Err(e) => {
                trace!(command = %shown, error = %e, "cmd:probe spawn failed");
                return None;
            }
        };

        match child.wait_timeout(timeout) {
            Ok(Some(status)) if status.success() => {}
            Ok(Some(status)) => {
                trace!(command = %shown, status = ?status.code(), "cmd:probe failed");
                return None;
            }
            Ok(None) => {
                debug!(command = %shown, "cmd:probe timed out");
                let _ = child.kill();
                let _ = child.wait();
                return None;
            }
            Err(e) => {
                debug!(command = %shown, error = %e, "cmd:probe wait failed");
                return None;
            }
        }

        let output = child.wait_with_output().ok()?;
        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));
        Some(combined)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_and_capture_stdout_returns_output() {
        let out = Cmd::new("sh")
            .args(&["-c", "echo hello"])
            .run_and_capture_stdout()
            .unwrap();
        assert_eq!(out.trim(), "hello");
    }

    #[test]
    fn run_reports_stderr_on_failure() {
        let err = Cmd::new("sh")
            .args(&["-c", "echo boom >&2; exit 3"])
            .run()
            .unwrap_err();
        assert!(err.to_string().contains("boom"));
    }

    #[test]
    fn run_streaming_forwards_lines() {
        let mut buf = Vec::new();
        Cmd::new("sh")
            .args(&["-c", "printf 'a\\nb\\n'"])
            .run_streaming(&mut buf)
            .unwrap();
        assert_eq!(String::from_utf8(buf).unwrap(), "a\nb\n");
    }

    #[test]
    fn run_streaming_failure_carries_stderr_tail() {
        let mut buf = Vec::new();
        let err = Cmd::new("sh")
            .args(&["-c", "echo progress; echo 'manifest unknown' >&2; exit 1"])
            .run_streaming(&mut buf)
            .unwrap_err();
        assert_eq!(String::from_utf8(buf).unwrap(), "progress\n");
        let msg = err.to_string();
        assert!(msg.contains("exit code: 1"));
        assert!(msg.contains("manifest unknown"));
    }

    #[test]
    fn probe_output_combines_streams() {
        let out = Cmd::new("sh")
            .args(&["-c", "echo out; echo err >&2"])
            .probe_output(Duration::from_secs(5))
            .unwrap();
        assert!(out.contains("out"));
        assert!(out.contains("err"));
    }

    #[test]
    fn probe_output_none_for_missing_binary() {
        assert!(
            Cmd::new("/nonexistent/dockroot-probe")
                .probe_output(Duration::from_secs(1))
                .is_none()
        );
    }

    #[test]
    fn probe_output_none_on_timeout() {
        assert!(
            Cmd::new("sh")
                .args(&["-c", "sleep 5"])
                .probe_output(Duration::from_millis(100))
                .is_none()
        );
    }
}
