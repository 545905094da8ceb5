mod cmd;
mod output;
mod root;

use clap::{Parser, Subcommand};
use cmd::Session;
use envboot_core::{orchestrator::RunOptions, BootError};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "envboot",
    about = "Bootstrap reproducible development environments from a step manifest",
    version,
    propagate_version = true
)]
struct Cli {
    /// Project root (default: auto-detect from envboot.yaml or .git/)
    #[arg(long, global = true, env = "ENVBOOT_ROOT")]
    root: Option<PathBuf>,

    /// Manifest path, relative to the root (default: envboot.yaml)
    #[arg(long, global = true)]
    manifest: Option<PathBuf>,

    /// Output as JSON
    #[arg(long, global = true, short = 'j')]
    json: bool,

    /// Override a manifest variable (KEY=VALUE, repeatable)
    #[arg(long = "set", global = true, value_name = "KEY=VALUE")]
    set: Vec<String>,

    /// More log output (-v debug, -vv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run an environment's steps, resuming from the last recorded state
    Run {
        environment: String,
        /// Re-run every step, ignoring recorded success and idempotency checks
        #[arg(long)]
        force: bool,
        /// Show what would run without executing or recording anything
        #[arg(long)]
        dry_run: bool,
        /// Only run these steps (comma-separated or repeated)
        #[arg(long, value_delimiter = ',')]
        steps: Vec<String>,
    },

    /// Show the recorded status of each step
    Status { environment: String },

    /// Forget recorded step outcomes so they run again
    Reset {
        environment: String,
        /// Only reset these steps (comma-separated or repeated)
        #[arg(long, value_delimiter = ',')]
        steps: Vec<String>,
    },

    /// Print the execution order without running anything
    Plan {
        environment: String,
        #[arg(long, value_delimiter = ',')]
        steps: Vec<String>,
    },

    /// List environments in the manifest
    List,

    /// Validate the manifest
    Validate,
}

/// Exit status for a failed command, keyed on the typed error in the chain.
fn exit_code(err: &anyhow::Error) -> i32 {
    let boot = err.chain().find_map(|e| e.downcast_ref::<BootError>());
    match boot {
        Some(e) if e.is_configuration() => 2,
        Some(BootError::StepExecution { .. }) => 3,
        Some(BootError::Locked { .. }) => 4,
        _ => 1,
    }
}

fn main() {
    let cli = Cli::parse();

    let default_level = match cli.verbose {
        0 if matches!(cli.command, Commands::Run { .. }) => tracing::Level::INFO,
        0 => tracing::Level::WARN,
        1 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(default_level.into()),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let root = root::resolve_root(cli.root.as_deref());
    let session = Session {
        root: &root,
        manifest: cli.manifest.as_deref(),
        assignments: &cli.set,
        json: cli.json,
    };

    let result = match cli.command {
        Commands::Run {
            environment,
            force,
            dry_run,
            steps,
        } => cmd::run::run(
            &session,
            &environment,
            RunOptions {
                force,
                dry_run,
                only: cmd::step_selection(&steps),
            },
        ),
        Commands::Status { environment } => cmd::status::run(&session, &environment),
        Commands::Reset { environment, steps } => {
            cmd::reset::run(&session, &environment, cmd::step_selection(&steps))
        }
        Commands::Plan { environment, steps } => {
            cmd::plan::run(&session, &environment, cmd::step_selection(&steps))
        }
        Commands::List => cmd::list::run(&session),
        Commands::Validate => cmd::validate::run(&session),
    };

    if let Err(e) = result {
        eprintln!("error: {e:#}");
        std::process::exit(exit_code(&e));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use envboot_core::ConfigError;

    #[test]
    fn exit_codes_follow_error_kind() {
        let config = anyhow::Error::new(BootError::from(ConfigError::UnknownEnvironment(
            "nope".into(),
        )));
        assert_eq!(exit_code(&config), 2);

        let step = anyhow::Error::new(BootError::StepExecution {
            step: "b".into(),
            position: 2,
            cause: "boom".into(),
        });
        assert_eq!(exit_code(&step), 3);

        let other = anyhow::anyhow!("disk on fire");
        assert_eq!(exit_code(&other), 1);
    }

    #[test]
    fn context_does_not_hide_error_kind() {
        let err = anyhow::Error::new(BootError::from(ConfigError::ManifestNotFound(
            "envboot.yaml".into(),
        )))
        .context("failed to load envboot.yaml");
        assert_eq!(exit_code(&err), 2);
    }
}
