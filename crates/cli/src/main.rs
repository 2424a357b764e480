mod cmd;
mod output;
mod prompts;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use crate::cmd::SnapshotCommand;
use crate::output::OutputFormat;

/// envbake - bake a declarative environment descriptor into a filesystem snapshot
#[derive(Parser)]
#[command(name = "envbake")]
#[command(author, version, about, long_about = None)]
struct Cli {
  /// Enable verbose output
  #[arg(short, long, global = true)]
  verbose: bool,

  #[command(subcommand)]
  command: Commands,
}

#[derive(Subcommand)]
enum Commands {
  /// Validate a descriptor and show the steps it would run
  Plan {
    /// Descriptor file (default: Bakefile in the build context)
    file: Option<PathBuf>,

    /// Build context directory
    #[arg(short, long, default_value = ".")]
    context: PathBuf,

    /// Output format
    #[arg(short = 'o', long, value_enum, default_value = "text")]
    output: OutputFormat,
  },

  /// Run the pipeline and store the resulting snapshot
  Build {
    /// Descriptor file (default: Bakefile in the build context)
    file: Option<PathBuf>,

    /// Build context directory
    #[arg(short, long, default_value = ".")]
    context: PathBuf,

    /// Base artifact directory (overrides config)
    #[arg(long)]
    artifacts: Option<PathBuf>,

    /// Local package index (overrides config)
    #[arg(long)]
    index: Option<PathBuf>,

    /// Run the pipeline without storing the snapshot
    #[arg(long)]
    no_save: bool,

    /// Output format
    #[arg(short = 'o', long, value_enum, default_value = "text")]
    output: OutputFormat,
  },

  /// Manage stored snapshots
  Snapshot {
    #[command(subcommand)]
    command: SnapshotCommand,
  },
}

fn main() -> Result<()> {
  let cli = Cli::parse();

  let default_level = if cli.verbose { "debug" } else { "warn" };
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(std::io::stderr)
    .without_time()
    .init();

  match cli.command {
    Commands::Plan { file, context, output } => cmd::cmd_plan(file.as_deref(), &context, output),
    Commands::Build {
      file,
      context,
      artifacts,
      index,
      no_save,
      output,
    } => cmd::cmd_build(cmd::BuildArgs {
      file,
      context,
      artifacts,
      index,
      no_save,
      output,
    }),
    Commands::Snapshot { command } => cmd::cmd_snapshot(command),
  }
}
