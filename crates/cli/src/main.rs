// gstate - run gatherstate reconciliation passes from the command line
// See DESIGN.md for the pass pipeline and the exit-code contract

mod exit_codes;
mod input;
mod pass;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

use gatherstate_recon::config::InputFormat;

use exit_codes::EXIT_SUCCESS;

#[derive(Parser)]
#[command(name = "gstate")]
#[command(about = "Reconcile freshly gathered records against their last-known state")]
#[command(long_version = long_version())]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one reconciliation pass from a TOML config file
    #[command(after_help = "\
Examples:
  gstate run listings.toml
  gstate run listings.toml --input today.ndjson --json
  gather-listings | gstate run listings.toml --input - --format ndjson
  gstate run listings.toml --output pass.json --exit-code")]
    Run {
        /// Path to the pass config
        config: PathBuf,

        /// Fresh records (overrides [input].file; '-' reads stdin)
        #[arg(long, short = 'i')]
        input: Option<PathBuf>,

        /// Input format (default: [input].format, then file extension, then json)
        #[arg(long, short = 'f')]
        format: Option<Format>,

        /// Print the JSON report to stdout
        #[arg(long)]
        json: bool,

        /// Write the JSON report to a file
        #[arg(long, short = 'o')]
        output: Option<PathBuf>,

        /// Pass time, RFC 3339 (default: current time)
        #[arg(long, env = "GSTATE_NOW")]
        now: Option<String>,

        /// Exit 1 when anything was added, changed or removed
        #[arg(long)]
        exit_code: bool,
    },

    /// Validate a pass config without running it
    #[command(after_help = "\
Examples:
  gstate validate listings.toml")]
    Validate {
        /// Path to the pass config
        config: PathBuf,
    },

    /// Print the persisted state of a pass
    #[command(after_help = "\
Examples:
  gstate dump listings.toml
  gstate dump listings.toml --json | jq length")]
    Dump {
        /// Path to the pass config
        config: PathBuf,

        /// Print rows as a JSON array
        #[arg(long)]
        json: bool,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Format {
    Json,
    Ndjson,
    Csv,
}

impl From<Format> for InputFormat {
    fn from(f: Format) -> Self {
        match f {
            Format::Json => InputFormat::Json,
            Format::Ndjson => InputFormat::Ndjson,
            Format::Csv => InputFormat::Csv,
        }
    }
}

fn long_version() -> &'static str {
    concat!(
        env!("CARGO_PKG_VERSION"),
        " (", env!("GSTATE_COMMIT"), ")",
        "\nrecon:   gatherstate-recon ", env!("CARGO_PKG_VERSION"),
        "\ntarget:  ", env!("GSTATE_TARGET"),
    )
}

/// Diagnostics go to stderr so `--json` output stays clean.
/// `GSTATE_LOG` takes a tracing filter, e.g. `gstate=debug`.
fn init_tracing() {
    let filter = EnvFilter::try_from_env("GSTATE_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .compact()
        .init();
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing();

    let result = match cli.command {
        None => {
            eprintln!("Usage: gstate <command> [options]");
            eprintln!("       gstate --help for more information");
            Ok(())
        }
        Some(Commands::Run {
            config,
            input,
            format,
            json,
            output,
            now,
            exit_code,
        }) => pass::cmd_run(pass::RunArgs {
            config,
            input,
            format: format.map(InputFormat::from),
            json,
            output,
            now,
            exit_code,
        }),
        Some(Commands::Validate { config }) => pass::cmd_validate(config),
        Some(Commands::Dump { config, json }) => pass::cmd_dump(config, json),
    };

    match result {
        Ok(()) => ExitCode::from(EXIT_SUCCESS),
        Err(CliError { code, message, hint }) => {
            if !message.is_empty() {
                eprintln!("error: {}", message);
            }
            if let Some(hint) = hint {
                eprintln!("hint:  {}", hint);
            }
            ExitCode::from(code)
        }
    }
}

#[derive(Debug)]
pub struct CliError {
    pub code: u8,
    pub message: String,
    pub hint: Option<String>,
}

impl CliError {
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }
}
