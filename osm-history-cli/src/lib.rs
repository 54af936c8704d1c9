//! Command-line interface for the OSM history importer.
#![forbid(unsafe_code)]

use clap::{Parser, Subcommand};
use std::io::Write;

mod error;
mod import;

pub use error::CliError;
pub use import::ImportOutcome;

use import::{ImportArgs, run_import};

const ARG_OSM_PBF: &str = "osm-pbf";
const ARG_DATABASE: &str = "database";
const ARG_MIN_LON: &str = "min-lon";
const ARG_MIN_LAT: &str = "min-lat";
const ARG_MAX_LON: &str = "max-lon";
const ARG_MAX_LAT: &str = "max-lat";
const ARG_BATCH_SIZE: &str = "batch-size";
const ARG_WORKERS: &str = "workers";
const ARG_LOOKUP_TIMEOUT_MS: &str = "lookup-timeout-ms";
const ARG_PROGRESS_EVERY: &str = "progress-every";
const ARG_SKIP_RELATIONS: &str = "skip-relations";
const ENV_OSM_PBF: &str = "OSM_HISTORY_CMDS_IMPORT_OSM_PBF";
const ENV_MIN_LON: &str = "OSM_HISTORY_CMDS_IMPORT_MIN_LON";
const ENV_MIN_LAT: &str = "OSM_HISTORY_CMDS_IMPORT_MIN_LAT";
const ENV_MAX_LON: &str = "OSM_HISTORY_CMDS_IMPORT_MAX_LON";
const ENV_MAX_LAT: &str = "OSM_HISTORY_CMDS_IMPORT_MAX_LAT";

/// Run the CLI with the current process arguments and environment.
///
/// The run summary is written to standard output.
pub fn run() -> Result<(), CliError> {
    let cli = Cli::try_parse().map_err(CliError::ArgumentParsing)?;
    let mut stdout = std::io::stdout().lock();
    run_with(cli, &mut stdout)
}

fn run_with(cli: Cli, writer: &mut dyn Write) -> Result<(), CliError> {
    match cli.command {
        Command::Import(args) => {
            let outcome = run_import(args)?;
            writeln!(writer, "{outcome}").map_err(CliError::WriteOutput)
        }
    }
}

#[derive(Debug, Parser)]
#[command(
    name = "osm-history",
    about = "Import OpenStreetMap editing history into SQLite",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Import the history of one zone from a full-history extract.
    Import(ImportArgs),
}

#[cfg(test)]
mod tests;
