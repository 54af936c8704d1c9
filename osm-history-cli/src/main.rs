//! Entry point for the command-line interface.
#![forbid(unsafe_code)]

use std::error::Error;

use osm_history_cli::CliError;

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    match osm_history_cli::run() {
        Ok(()) => {}
        Err(CliError::ArgumentParsing(err)) => err.exit(),
        Err(err) => {
            eprintln!("osm-history: error: {err}");
            let mut cause = err.source();
            while let Some(current) = cause {
                eprintln!("  caused by: {current}");
                cause = current.source();
            }
            std::process::exit(1);
        }
    }
}
