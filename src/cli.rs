use crate::command;
use crate::command::args::{PullArgs, RunArgs};
use crate::config;
use crate::instance;
use anyhow::Result;
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{Shell, generate};
use std::path::PathBuf;

/// Parser for instance names, used by run/ps/stop/rm.
#[derive(Clone, Debug)]
struct InstanceNameParser;

impl InstanceNameParser {
    fn new() -> Self {
        Self
    }

    fn get_names() -> Vec<String> {
        // Fail silently on completion; don't disrupt the user's shell.
        let Ok(install_dir) = config::install_dir() else {
            return Vec::new();
        };
        let Ok(registry) = config::RegistryInfo::load(&install_dir) else {
            return Vec::new();
        };
        instance::list(&registry.data_root)
            .map(|list| list.iter().map(|i| i.name().to_string()).collect())
            .unwrap_or_default()
    }
}

impl clap::builder::TypedValueParser for InstanceNameParser {
    type Value = String;

    fn parse_ref(
        &self,
        cmd: &clap::Command,
        _arg: Option<&clap::Arg>,
        value: &std::ffi::OsStr,
    ) -> Result<Self::Value, clap::Error> {
        clap::builder::StringValueParser::new().parse_ref(cmd, None, value)
    }

    fn possible_values(
        &self,
    ) -> Option<Box<dyn Iterator<Item = clap::builder::PossibleValue> + '_>> {
        // Listed lazily by the _complete-instances subcommand instead, so
        // generating the completion script never touches the data root.
        None
    }
}

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
#[command(name = "dockroot")]
#[command(about = "Run OCI images as lightweight ruri sandboxes without a container daemon")]
pub struct Cli {
    /// Also print debug logs to stderr
    #[arg(long, global = true)]
    pub debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Download the ruri engine and the kspeeder proxy if missing
    #[command(name = "ensuredeps")]
    EnsureDeps,

    /// Pull an image from a registry into a new instance
    #[command(after_help = "Example: dockroot pull alpine:latest alpine001")]
    Pull {
        /// Image reference (IMAGE:TAG)
        reference: String,

        /// Instance name
        name: String,

        #[command(flatten)]
        args: PullArgs,
    },

    /// Unpack a local OCI layout into a bundle directory
    #[command(after_help = "Example: dockroot unpack ./alpine-oci:latest alpine-bundle")]
    Unpack {
        /// OCI layout directory and tag (OCI-DIR:TAG)
        layout: String,

        /// Destination bundle directory
        dest: PathBuf,
    },

    /// Run an instance in the foreground, or in the background with -d
    #[command(after_help = "Example: dockroot run alpine001 [COMMAND [ARGS]]")]
    Run {
        /// Instance name
        #[arg(value_parser = InstanceNameParser::new())]
        name: String,

        /// Command to run instead of the configured entrypoint
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<String>,

        #[command(flatten)]
        args: RunArgs,
    },

    /// Show the PIDs of an instance, or list all instances
    Ps {
        /// Instance name; omit to list every instance
        #[arg(value_parser = InstanceNameParser::new())]
        name: Option<String>,

        /// Show the engine's detailed process listing
        #[arg(long, requires = "name")]
        detail: bool,
    },

    /// Kill every process of an instance
    Stop {
        /// Instance name
        #[arg(value_parser = InstanceNameParser::new())]
        name: String,
    },

    /// Unmount an instance's filesystem
    Rm {
        /// Instance name
        #[arg(value_parser = InstanceNameParser::new())]
        name: String,

        /// Kill running processes first
        #[arg(short, long)]
        force: bool,
    },

    /// Generate shell completions
    Completions {
        /// The shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },

    /// Output instance names for shell completion (internal use)
    #[command(hide = true, name = "_complete-instances")]
    CompleteInstances,
}

// --- Public Entry Point ---
pub fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::EnsureDeps => command::ensure_deps::run(),
        Commands::Pull {
            reference,
            name,
            args,
        } => command::pull::run(&reference, &name, &args),
        Commands::Unpack { layout, dest } => command::unpack::run(&layout, &dest),
        Commands::Run {
            name,
            command,
            args,
        } => command::run::run(&name, &command, args.into()),
        Commands::Ps { name, detail } => command::ps::run(name.as_deref(), detail),
        Commands::Stop { name } => command::stop::run(&name),
        Commands::Rm { name, force } => command::rm::run(&name, force),
        Commands::Completions { shell } => {
            generate_completions(shell);
            Ok(())
        }
        Commands::CompleteInstances => {
            for name in InstanceNameParser::get_names() {
                println!("{name}");
            }
            Ok(())
        }
    }
}

fn generate_completions(shell: Shell) {
    let mut cmd = Cli::command();
    let name = cmd.get_name().to_string();

    let mut buf = Vec::new();
    generate(shell, &mut cmd, &name, &mut buf);
    print!("{}", String::from_utf8_lossy(&buf));

    // Instance names are appended per shell; other shells get static completions only.
    match shell {
        Shell::Bash => print!("{}", include_str!("scripts/completions/bash_dynamic.bash")),
        Shell::Fish => print!("{}", include_str!("scripts/completions/fish_dynamic.fish")),
        _ => {}
    }
}
