//! pinfetch - fetch pinned build resources and cache them locally.

mod args;
mod commands;

use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use args::{ConfigArgs, Session};
use commands::{cache, resource};

#[derive(Parser)]
#[command(name = "pinfetch", version, about = "Fetch pinned build resources and cache them locally")]
struct Cli {
    #[command(flatten)]
    config: ConfigArgs,

    /// Increase log output (-v info, -vv debug)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Resolve a resource from the configured source and print its local path
    File(resource::FileArgs),
    /// Print a value from a property file of the configured source
    Prop(resource::PropArgs),
    /// Fetch an immutable URL and print its local path
    Url(resource::UrlArgs),
    /// List cached entries
    List,
    /// Delete the whole cache directory
    Wipe,
    /// Show cache directory path
    Path,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            if let Some(hint) = e.downcast_ref::<pinfetch::Error>().and_then(|e| e.hint()) {
                eprintln!("Hint: {hint}");
            }
            ExitCode::FAILURE
        }
    }
}

fn init_logging(verbose: u8) {
    // RUST_LOG wins over -v.
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| match verbose {
        0 => EnvFilter::new("pinfetch=warn"),
        1 => EnvFilter::new("pinfetch=info"),
        _ => EnvFilter::new("pinfetch=debug"),
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .without_time()
        .with_writer(std::io::stderr)
        .init();
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let session = Session::load(&cli.config)?;
    match cli.command {
        Commands::File(args) => resource::run_file(args, &session),
        Commands::Prop(args) => resource::run_prop(args, &session),
        Commands::Url(args) => resource::run_url(args, &session),
        Commands::List => cache::run_list(&session),
        Commands::Wipe => cache::run_wipe(&session),
        Commands::Path => {
            cache::run_path(&session);
            Ok(())
        }
    }
}
