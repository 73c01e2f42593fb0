mod cmd;
mod output;

use clap::{Parser, Subcommand};
use diagrule_core::registry::TypeCatalog;
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "rulectl",
    about = "Validate collection rule files and inspect their action graphs",
    version,
    propagate_version = true
)]
struct Cli {
    /// Output as JSON
    #[arg(long, global = true, short = 'j')]
    json: bool,

    /// Log at debug level
    #[arg(long, global = true, short = 'v')]
    verbose: bool,

    /// Additional action type to accept (repeatable)
    #[arg(long = "action-type", value_name = "NAME", global = true)]
    action_types: Vec<String>,

    /// Additional trigger type to accept (repeatable)
    #[arg(long = "trigger-type", value_name = "NAME", global = true)]
    trigger_types: Vec<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check a rule file for errors and likely mistakes
    Validate {
        /// Path to the YAML rule file
        file: PathBuf,
    },

    /// Show which earlier actions each action's tokens depend on
    Deps {
        /// Path to the YAML rule file
        file: PathBuf,

        /// Only show this rule
        #[arg(long)]
        rule: Option<String>,
    },
}

fn main() {
    let cli = Cli::parse();

    let default_level = if cli.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::WARN
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(default_level.into()),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let mut catalog = TypeCatalog::well_known();
    for name in &cli.action_types {
        catalog.add_action(name.clone());
    }
    for name in &cli.trigger_types {
        catalog.add_trigger(name.clone());
    }

    let result = match cli.command {
        Commands::Validate { file } => cmd::validate::run(&file, &catalog, cli.json),
        Commands::Deps { file, rule } => cmd::deps::run(&file, rule.as_deref(), &catalog, cli.json),
    };

    if let Err(e) = result {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}
