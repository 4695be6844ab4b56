use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::Result;
use clap::{ArgAction, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use layercake_lib::platform::paths::store_dir;

mod cmd;
mod output;

use output::{OutputFormat, print_error};

/// layercake - layered build cache
#[derive(Parser, Debug)]
#[command(name = "layercake")]
#[command(author, version, about, long_about = None)]
struct Cli {
  /// Increase log verbosity (-v info, -vv debug)
  #[arg(short, long, global = true, action = ArgAction::Count)]
  verbose: u8,

  /// Cache store location (default: $LAYERCAKE_STORE or the user cache dir)
  #[arg(long, global = true)]
  store: Option<PathBuf>,

  #[command(subcommand)]
  command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
  /// Build a descriptor, reusing the longest cached prefix
  Build {
    /// Build descriptor (YAML or JSON)
    descriptor: PathBuf,

    /// Directory file inputs are resolved against (default: the descriptor's directory)
    #[arg(long)]
    context: Option<PathBuf>,

    /// Per-step time limit (e.g., "90s", "10m")
    #[arg(long, value_parser = humantime::parse_duration)]
    timeout: Option<Duration>,

    /// Directory of base images, laid out as <name>/<tag>
    #[arg(long)]
    images: Option<PathBuf>,

    /// Write the final filesystem into this directory
    #[arg(long)]
    export: Option<PathBuf>,

    /// Output format
    #[arg(short = 'o', long, value_enum, default_value = "text")]
    output: OutputFormat,
  },

  /// Show the step chain and which steps would be reused
  Plan {
    /// Build descriptor (YAML or JSON)
    descriptor: PathBuf,

    /// Directory file inputs are resolved against (default: the descriptor's directory)
    #[arg(long)]
    context: Option<PathBuf>,

    /// Output format
    #[arg(short = 'o', long, value_enum, default_value = "text")]
    output: OutputFormat,
  },

  /// List cache entries, most recently used first
  Ls {
    /// Output format
    #[arg(short = 'o', long, value_enum, default_value = "text")]
    output: OutputFormat,
  },

  /// Evict cache entries
  Gc {
    /// Evict least recently used entries until the store is at most this many bytes
    #[arg(long)]
    max_size: Option<u64>,

    /// Evict entries unused for longer than this (e.g., "7d", "24h")
    #[arg(long, value_parser = humantime::parse_duration)]
    max_age: Option<Duration>,

    /// Evict least recently used entries until at most this many remain
    #[arg(long)]
    max_entries: Option<usize>,

    /// Report what would be evicted without removing anything
    #[arg(long)]
    dry_run: bool,

    /// Output format
    #[arg(short = 'o', long, value_enum, default_value = "text")]
    output: OutputFormat,
  },

  /// Show store location and usage
  Info {
    /// Output format
    #[arg(short = 'o', long, value_enum, default_value = "text")]
    output: OutputFormat,
  },
}

fn init_logging(verbose: u8) {
  let default = match verbose {
    0 => "warn",
    1 => "info",
    _ => "debug",
  };
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(std::io::stderr)
    .without_time()
    .init();
}

fn main() -> ExitCode {
  let cli = Cli::parse();
  init_logging(cli.verbose);

  match run(cli) {
    Ok(()) => ExitCode::SUCCESS,
    Err(e) => {
      print_error(&format!("{:#}", e));
      ExitCode::FAILURE
    }
  }
}

fn run(cli: Cli) -> Result<()> {
  let store = cli.store.unwrap_or_else(store_dir);

  match cli.command {
    Commands::Build {
      descriptor,
      context,
      timeout,
      images,
      export,
      output,
    } => cmd::cmd_build(
      &store,
      cmd::BuildArgs {
        descriptor,
        context,
        timeout,
        images,
        export,
      },
      output,
    ),
    Commands::Plan {
      descriptor,
      context,
      output,
    } => cmd::cmd_plan(&store, &descriptor, context.as_deref(), output),
    Commands::Ls { output } => cmd::cmd_ls(&store, output),
    Commands::Gc {
      max_size,
      max_age,
      max_entries,
      dry_run,
      output,
    } => cmd::cmd_gc(
      &store,
      cmd::GcArgs {
        max_size,
        max_age,
        max_entries,
        dry_run,
      },
      output,
    ),
    Commands::Info { output } => cmd::cmd_info(&store, output),
  }
}
