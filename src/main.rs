use anyhow::Context;
use clap::{Parser, Subcommand};
use clap_verbosity_flag::{InfoLevel, Verbosity};
use log::{error, info};
use std::path::{Path, PathBuf};
use std::process;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use vrtdb::colgen;
use vrtdb::config::{self, Config};
use vrtdb::library::{self, CancelToken};

const EXIT_CONFIG_OR_IO: i32 = 1;
const EXIT_MISSING_SUBCOMMAND: i32 = 2;
const EXIT_MISSING_ARGUMENT: i32 = 3;

/// Extract text types and positional attribute statistics from a
/// corpus vertical file into a database
#[derive(Parser)]
#[command(version)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,
    /// Verbosity
    #[command(flatten)]
    verbose: Verbosity<InfoLevel>,
}

#[derive(Subcommand)]
enum Command {
    /// Run an export into a new database (existing data is replaced)
    Create {
        /// Task configuration (JSON)
        config: Option<PathBuf>,
    },
    /// Run an export adding data to an existing database
    Append {
        /// Task configuration (JSON)
        config: Option<PathBuf>,
    },
    /// Print a scaffold configuration to stdout
    Template {
        /// Corpus name to prefill
        corpus: Option<String>,
    },
    /// Show detailed version information
    Version,
}

fn export_data(conf_path: &Path, append: bool) -> anyhow::Result<()> {
    let conf = Config::load(conf_path)
        .with_context(|| format!("failed to load config {}", conf_path.display()))?;
    let cancel: CancelToken = Arc::new(AtomicBool::new(false));
    {
        let cancel = cancel.clone();
        ctrlc::set_handler(move || cancel.store(true, Ordering::Relaxed))
            .context("failed to install signal handler")?;
    }
    let t0 = Instant::now();
    let job = library::extract_data(&conf, append, cancel)?;
    for status in job.status.iter() {
        if let Some(err) = &status.error {
            error!("{}: {err}", status.file);
        }
    }
    job.wait()?;
    info!("finished in {:.2?}", t0.elapsed());
    Ok(())
}

fn run_export(config: Option<PathBuf>, append: bool) {
    let Some(path) = config else {
        eprintln!("missing config argument (supported selfJoin generators: {})",
            colgen::generator_names().join(", "));
        process::exit(EXIT_MISSING_ARGUMENT);
    };
    if let Err(e) = export_data(&path, append) {
        error!("{e:#}");
        process::exit(EXIT_CONFIG_OR_IO);
    }
}

fn print_template(corpus: &str) {
    let conf = config::template(corpus);
    match serde_json::to_string_pretty(&conf) {
        Ok(out) => println!("{out}"),
        Err(e) => {
            error!("failed to dump a new config: {e}");
            process::exit(EXIT_CONFIG_OR_IO);
        }
    }
}

fn main() {
    let args = Args::parse();
    pretty_env_logger::formatted_timed_builder()
        .filter_level(args.verbose.log_level_filter())
        .init();
    let Some(command) = args.command else {
        eprintln!("missing subcommand; expected one of: create, append, template, version");
        process::exit(EXIT_MISSING_SUBCOMMAND);
    };
    match command {
        Command::Create { config } => run_export(config, false),
        Command::Append { config } => run_export(config, true),
        Command::Template { corpus } => print_template(corpus.as_deref().unwrap_or("")),
        Command::Version => {
            println!("vrtdb {}", env!("CARGO_PKG_VERSION"));
            println!(
                "build date: {}",
                option_env!("VRTDB_BUILD_DATE").unwrap_or("unknown")
            );
            println!(
                "last commit: {}",
                option_env!("VRTDB_GIT_COMMIT").unwrap_or("unknown")
            );
        }
    }
}
