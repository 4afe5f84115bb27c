use std::path::PathBuf;
use std::time::Duration;

use crate::image::pipeline::{DEFAULT_PARALLELISM, PullOptions};
use crate::image::retry::RetryPolicy;
use crate::sandbox::lifecycle::RunOptions;
use crate::sandbox::synth::Overrides;

#[derive(clap::Args, Debug)]
pub struct PullArgs {
    /// Write the manifest digest of the pulled image to this file
    #[arg(long = "digestfile", value_name = "FILE")]
    pub digest_file: Option<PathBuf>,

    /// Number of times to retry the whole image copy
    #[arg(long = "retry-times", default_value_t = 3)]
    pub retry_times: u32,

    /// Seconds to wait before the first retry; doubles for each further retry
    #[arg(long = "retry-delay", value_name = "SECONDS", default_value_t = 1)]
    pub retry_delay: u64,

    /// Number of layers to fetch concurrently
    #[arg(long, default_value_t = DEFAULT_PARALLELISM, value_parser = clap::value_parser!(u32).range(1..=16))]
    pub parallel: u32,

    /// Abort a single copy attempt after this many seconds
    #[arg(long = "command-timeout", value_name = "SECONDS")]
    pub command_timeout: Option<u64>,
}

impl PullArgs {
    pub fn to_options(&self, mirrors: Vec<String>) -> PullOptions {
        PullOptions {
            retry: RetryPolicy {
                max_retries: self.retry_times,
                delay: Duration::from_secs(self.retry_delay),
            },
            parallelism: self.parallel,
            timeout: self.command_timeout.map(Duration::from_secs),
            digest_file: self.digest_file.clone(),
            mirrors,
        }
    }
}

#[derive(clap::Args, Debug)]
pub struct RunArgs {
    /// Regenerate ruri.conf; required for any override flag
    #[arg(long)]
    pub renew: bool,

    /// Run in the background, logging to ruri.log
    #[arg(short = 'd', long)]
    pub detach: bool,

    /// Hostname inside the sandbox
    #[arg(long)]
    pub hostname: Option<String>,

    /// Working directory inside the sandbox
    #[arg(short = 'w', long)]
    pub workdir: Option<String>,

    /// Network mode (only "host" is supported)
    #[arg(long)]
    pub network: Option<String>,

    /// Restart policy (not supported)
    #[arg(long)]
    pub restart: Option<String>,

    /// Set an environment variable (KEY=VALUE)
    #[arg(short = 'e', long = "env", value_name = "KEY=VALUE", value_delimiter = ',')]
    pub env: Vec<String>,

    /// Bind mount a host path (SRC:DST[:ro])
    #[arg(short = 'v', long = "volume", value_name = "SRC:DST[:ro]", value_delimiter = ',')]
    pub volumes: Vec<String>,

    /// Publish a port (not supported)
    #[arg(short = 'p', long = "publish")]
    pub publish: Vec<String>,
}

impl From<RunArgs> for RunOptions {
    fn from(args: RunArgs) -> Self {
        RunOptions {
            renew: args.renew,
            detach: args.detach,
            network: args.network,
            restart: args.restart,
            publish: args.publish,
            overrides: Overrides {
                hostname: args.hostname,
                workdir: args.workdir,
                env: args.env,
                volumes: args.volumes,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pull_args_map_to_options() {
        let args = PullArgs {
            digest_file: Some(PathBuf::from("/tmp/d")),
            retry_times: 5,
            retry_delay: 2,
            parallel: 4,
            command_timeout: Some(600),
        };
        let opts = args.to_options(vec!["https://m".to_string()]);
        assert_eq!(opts.retry.max_retries, 5);
        assert_eq!(opts.retry.delay, Duration::from_secs(2));
        assert_eq!(opts.parallelism, 4);
        assert_eq!(opts.timeout, Some(Duration::from_secs(600)));
        assert_eq!(opts.mirrors, vec!["https://m"]);
    }
}
