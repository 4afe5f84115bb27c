//! Error taxonomy surfaced at the command boundary.
//!
//! Plumbing code returns `anyhow::Result`; these variants are raised through
//! `anyhow` where a caller (or a test) needs to tell failures apart.

use std::path::PathBuf;

/// A single PID the kill sweep could not terminate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KillFailure {
    pub pid: String,
    pub reason: String,
}

#[derive(Debug, thiserror::Error)]
pub enum DockrootError {
    #[error("{name} is unavailable: {reason}")]
    DependencyUnavailable { name: String, reason: String },

    #[error("caching proxy did not start successfully after {attempts} health checks")]
    ProxyStartTimeout { attempts: u32 },

    #[error("image transfer failed after {attempts} attempt(s): {message}")]
    TransferFailure { attempts: u32, message: String },

    #[error("Invalid image reference '{0}': expected IMAGE:TAG")]
    InvalidReference(String),

    #[error("{0}")]
    InvalidOption(String),

    #[error("Instance '{name}' not found: {} does not exist", .path.display())]
    InstanceNotFound { name: String, path: PathBuf },

    #[error("Instance '{name}' is running (pids: {}), use --force to stop it first", .pids.join(" "))]
    InstanceBusy { name: String, pids: Vec<String> },

    #[error("failed to terminate {} process(es): {}", .failures.len(), format_failures(.failures))]
    PartialTermination { failures: Vec<KillFailure> },
}

fn format_failures(failures: &[KillFailure]) -> String {
    failures
        .iter()
        .map(|f| format!("{} ({})", f.pid, f.reason))
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_termination_lists_every_failure() {
        let err = DockrootError::PartialTermination {
            failures: vec![
                KillFailure {
                    pid: "12".to_string(),
                    reason: "EPERM".to_string(),
                },
                KillFailure {
                    pid: "abc".to_string(),
                    reason: "invalid pid".to_string(),
                },
            ],
        };
        let msg = err.to_string();
        assert!(msg.contains("2 process(es)"));
        assert!(msg.contains("12 (EPERM)"));
        assert!(msg.contains("abc (invalid pid)"));
    }

    #[test]
    fn instance_busy_mentions_force() {
        let err = DockrootError::InstanceBusy {
            name: "alpine".to_string(),
            pids: vec!["1".to_string(), "2".to_string()],
        };
        assert_eq!(
            err.to_string(),
            "Instance 'alpine' is running (pids: 1 2), use --force to stop it first"
        );
    }
}
