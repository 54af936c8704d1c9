//! Error types emitted by the OSM history CLI.

use std::sync::Arc;

use camino::Utf8PathBuf;
use osm_history_core::ZoneError;
use osm_history_data::ImportError;
use thiserror::Error;

/// Errors emitted by the OSM history CLI.
#[derive(Debug, Error)]
pub enum CliError {
    /// Provided arguments failed Clap validation.
    #[error(transparent)]
    ArgumentParsing(#[from] clap::Error),
    /// Configuration layering failed (files, env, CLI).
    #[error("failed to load configuration: {0}")]
    Configuration(#[from] Arc<ortho_config::OrthoError>),
    /// A required option is missing after configuration merging.
    #[error("missing {field} (set --{field} or {env})")]
    MissingArgument {
        field: &'static str,
        env: &'static str,
    },
    /// A tuning option was given a value the importer cannot use.
    #[error("--{field} must be greater than zero")]
    ZeroSetting { field: &'static str },
    /// The zone coordinates do not describe a usable rectangle.
    #[error("invalid import zone: {0}")]
    Zone(#[from] ZoneError),
    /// A referenced input path does not exist on disk.
    #[error("{field} path {path:?} does not exist")]
    MissingSourceFile {
        field: &'static str,
        path: Utf8PathBuf,
    },
    /// A referenced input path exists but is not a file.
    #[error("{field} path {path:?} exists but is not a file")]
    SourcePathNotFile {
        field: &'static str,
        path: Utf8PathBuf,
    },
    /// A referenced input path could not be inspected due to an IO error.
    #[error("failed to inspect {field} path {path:?}: {source}")]
    InspectSourcePath {
        field: &'static str,
        path: Utf8PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// The import itself failed.
    #[error("failed to import history into {database:?}")]
    Import {
        database: Utf8PathBuf,
        #[source]
        source: ImportError,
    },
    /// Writing the run summary failed.
    #[error("failed to write import summary: {0}")]
    WriteOutput(#[source] std::io::Error),
}
