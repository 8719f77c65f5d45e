use std::path::PathBuf;

use clap::{Parser, Subcommand};

use benchrun::cli::commands;
use benchrun::cli::commands::RunOptions;

#[derive(Parser)]
#[command(name = "benchrun", about = "benchrun — XML-driven test-campaign engine", version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a campaign and emit the run record
    Run {
        /// Campaign XML file
        campaign: PathBuf,

        /// Catalog directories, merged in order after the built-ins
        #[arg(short, long = "catalog")]
        catalogs: Vec<PathBuf>,

        /// Write the record here instead of stdout
        #[arg(short, long)]
        report: Option<PathBuf>,

        /// Record format: json or yaml
        #[arg(short, long, default_value = "json")]
        format: String,

        /// Retry failed or blocked cases up to N times
        #[arg(long, default_value_t = 0)]
        max_retries: u32,

        /// Write a re-runnable campaign of the non-passing cases
        #[arg(long)]
        failed_campaign: Option<PathBuf>,
    },

    /// Resolve a campaign's cases and step ids without executing
    Validate {
        /// Campaign XML file
        campaign: PathBuf,

        /// Catalog directories, merged in order after the built-ins
        #[arg(short, long = "catalog")]
        catalogs: Vec<PathBuf>,
    },

    /// List loaded catalog entries
    Catalog {
        /// Catalog directories, merged in order after the built-ins
        #[arg(short, long = "catalog")]
        catalogs: Vec<PathBuf>,
    },
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Run {
            campaign,
            catalogs,
            report,
            format,
            max_retries,
            failed_campaign,
        }) => {
            let options = RunOptions {
                catalogs,
                report,
                format,
                max_retries,
                failed_campaign,
            };
            match commands::run_run(&campaign, &options) {
                Ok(summary) => {
                    print!("{}", summary.output);
                    if !summary.passed {
                        std::process::exit(1);
                    }
                }
                Err(e) => {
                    eprintln!("error: {e}");
                    std::process::exit(2);
                }
            }
        }
        Some(Commands::Validate { campaign, catalogs }) => {
            match commands::run_validate(&campaign, &catalogs) {
                Ok(result) => print!("{result}"),
                Err(e) => {
                    eprintln!("error: {e}");
                    std::process::exit(1);
                }
            }
        }
        Some(Commands::Catalog { catalogs }) => match commands::run_catalog(&catalogs) {
            Ok(result) => print!("{result}"),
            Err(e) => {
                eprintln!("error: {e}");
                std::process::exit(1);
            }
        },
        None => {
            // No subcommand — clap will show help via the derive
            Cli::parse_from(["benchrun", "--help"]);
        }
    }
}
