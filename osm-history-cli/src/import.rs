//! Import command implementation for the OSM history CLI.

use std::{fmt, io::ErrorKind, time::Duration};

use camino::{Utf8Path, Utf8PathBuf};
use clap::Parser;
use log::info;
use ortho_config::{OrthoConfig, SubcmdConfigMerge};
use osm_history_core::{ImportStats, ZoneBoundary};
use osm_history_data::{ImportOptions, PbfHistoryFeed, import_into_sqlite};
use serde::{Deserialize, Serialize};

use crate::{
    ARG_BATCH_SIZE, ARG_DATABASE, ARG_LOOKUP_TIMEOUT_MS, ARG_MAX_LAT, ARG_MAX_LON, ARG_MIN_LAT,
    ARG_MIN_LON, ARG_OSM_PBF, ARG_PROGRESS_EVERY, ARG_SKIP_RELATIONS, ARG_WORKERS, CliError,
    ENV_MAX_LAT, ENV_MAX_LON, ENV_MIN_LAT, ENV_MIN_LON, ENV_OSM_PBF,
};

/// Database written when none is configured.
pub(crate) const DEFAULT_DATABASE: &str = "history.db";

/// CLI arguments for the `import` subcommand.
#[derive(Debug, Clone, Parser, Deserialize, Serialize, OrthoConfig, Default)]
#[command(
    long_about = "Import the points, paths and relations of an OSM full-history \
                 extract that fall inside a rectangular zone. Settings can come \
                 from CLI flags, configuration files, or environment variables.",
    about = "Import OSM history for a zone into SQLite"
)]
#[ortho_config(prefix = "OSM_HISTORY")]
pub(crate) struct ImportArgs {
    /// Path to the OpenStreetMap full-history PBF file.
    #[arg(long = ARG_OSM_PBF, value_name = "path")]
    #[serde(default)]
    pub(crate) osm_pbf: Option<Utf8PathBuf>,
    /// SQLite database to create or extend.
    #[arg(long = ARG_DATABASE, value_name = "path")]
    #[serde(default)]
    pub(crate) database: Option<Utf8PathBuf>,
    /// Western edge of the zone in degrees.
    #[arg(long = ARG_MIN_LON, value_name = "degrees", allow_negative_numbers = true)]
    #[serde(default)]
    pub(crate) min_lon: Option<f64>,
    /// Southern edge of the zone in degrees.
    #[arg(long = ARG_MIN_LAT, value_name = "degrees", allow_negative_numbers = true)]
    #[serde(default)]
    pub(crate) min_lat: Option<f64>,
    /// Eastern edge of the zone in degrees.
    #[arg(long = ARG_MAX_LON, value_name = "degrees", allow_negative_numbers = true)]
    #[serde(default)]
    pub(crate) max_lon: Option<f64>,
    /// Northern edge of the zone in degrees.
    #[arg(long = ARG_MAX_LAT, value_name = "degrees", allow_negative_numbers = true)]
    #[serde(default)]
    pub(crate) max_lat: Option<f64>,
    /// Pending inserts above which a batch is committed.
    #[arg(long = ARG_BATCH_SIZE, value_name = "count")]
    #[serde(default)]
    pub(crate) batch_size: Option<usize>,
    /// Lookup worker threads used while resolving members.
    #[arg(long = ARG_WORKERS, value_name = "count")]
    #[serde(default)]
    pub(crate) workers: Option<usize>,
    /// Milliseconds after which a member lookup counts as not found.
    #[arg(long = ARG_LOOKUP_TIMEOUT_MS, value_name = "ms")]
    #[serde(default)]
    pub(crate) lookup_timeout_ms: Option<u64>,
    /// Records between progress lines; 0 disables them.
    #[arg(long = ARG_PROGRESS_EVERY, value_name = "count")]
    #[serde(default)]
    pub(crate) progress_every: Option<u64>,
    /// Stop after the paths pass.
    #[arg(
        long = ARG_SKIP_RELATIONS,
        value_name = "bool",
        num_args = 0..=1,
        default_missing_value = "true"
    )]
    #[serde(default)]
    pub(crate) skip_relations: Option<bool>,
}

impl ImportArgs {
    pub(crate) fn into_config(self) -> Result<ImportConfig, CliError> {
        let merged = self.load_and_merge().map_err(CliError::Configuration)?;
        ImportConfig::try_from(merged)
    }
}

/// Resolved `import` command configuration.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ImportConfig {
    /// Path to the history extract.
    pub(crate) osm_pbf: Utf8PathBuf,
    /// Path to the SQLite database.
    pub(crate) database: Utf8PathBuf,
    /// Zone and tuning handed to the pipeline.
    pub(crate) options: ImportOptions,
}

impl ImportConfig {
    pub(crate) fn validate_sources(&self) -> Result<(), CliError> {
        Self::require_existing(&self.osm_pbf, ARG_OSM_PBF)
    }

    fn require_existing(path: &Utf8Path, field: &'static str) -> Result<(), CliError> {
        match path.metadata() {
            Ok(metadata) if metadata.is_file() => Ok(()),
            Ok(_) => Err(CliError::SourcePathNotFile {
                field,
                path: path.to_path_buf(),
            }),
            Err(source) if source.kind() == ErrorKind::NotFound => {
                Err(CliError::MissingSourceFile {
                    field,
                    path: path.to_path_buf(),
                })
            }
            Err(source) => Err(CliError::InspectSourcePath {
                field,
                path: path.to_path_buf(),
                source,
            }),
        }
    }
}

fn required<T>(value: Option<T>, field: &'static str, env: &'static str) -> Result<T, CliError> {
    value.ok_or(CliError::MissingArgument { field, env })
}

fn positive(value: Option<usize>, field: &'static str) -> Result<Option<usize>, CliError> {
    match value {
        Some(0) => Err(CliError::ZeroSetting { field }),
        other => Ok(other),
    }
}

impl TryFrom<ImportArgs> for ImportConfig {
    type Error = CliError;

    fn try_from(args: ImportArgs) -> Result<Self, Self::Error> {
        let osm_pbf = required(args.osm_pbf, ARG_OSM_PBF, ENV_OSM_PBF)?;
        let zone = ZoneBoundary::from_degrees(
            required(args.min_lon, ARG_MIN_LON, ENV_MIN_LON)?,
            required(args.min_lat, ARG_MIN_LAT, ENV_MIN_LAT)?,
            required(args.max_lon, ARG_MAX_LON, ENV_MAX_LON)?,
            required(args.max_lat, ARG_MAX_LAT, ENV_MAX_LAT)?,
        )?;
        let database = args
            .database
            .unwrap_or_else(|| Utf8PathBuf::from(DEFAULT_DATABASE));

        let mut options = ImportOptions::new(zone)
            .with_relations(!args.skip_relations.unwrap_or(false));
        if let Some(batch_size) = positive(args.batch_size, ARG_BATCH_SIZE)? {
            options = options.with_batch_threshold(batch_size);
        }
        if let Some(workers) = positive(args.workers, ARG_WORKERS)? {
            options = options.with_workers(workers);
        }
        if let Some(timeout) = args.lookup_timeout_ms {
            if timeout == 0 {
                return Err(CliError::ZeroSetting {
                    field: ARG_LOOKUP_TIMEOUT_MS,
                });
            }
            options = options.with_lookup_timeout(Duration::from_millis(timeout));
        }
        if let Some(progress_every) = args.progress_every {
            options = options.with_progress_every(progress_every);
        }

        Ok(Self {
            osm_pbf,
            database,
            options,
        })
    }
}

/// Result of a successful `import` run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportOutcome {
    /// Extract that was read.
    pub osm_pbf: Utf8PathBuf,
    /// Database that received the history.
    pub database: Utf8PathBuf,
    /// Per-kind counters of the run.
    pub stats: ImportStats,
}

impl fmt::Display for ImportOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "imported {} into {}", self.osm_pbf, self.database)?;
        write!(f, "{}", self.stats)
    }
}

pub(crate) fn resolve_import_config(args: ImportArgs) -> Result<ImportConfig, CliError> {
    let config = args.into_config()?;
    config.validate_sources()?;
    Ok(config)
}

pub(crate) fn run_import(args: ImportArgs) -> Result<ImportOutcome, CliError> {
    let config = resolve_import_config(args)?;
    execute_import(config)
}

pub(crate) fn execute_import(config: ImportConfig) -> Result<ImportOutcome, CliError> {
    let ImportConfig {
        osm_pbf,
        database,
        options,
    } = config;
    info!(
        "importing {osm_pbf} into {database} with {} lookup workers",
        options.workers
    );
    let feed = PbfHistoryFeed::new(osm_pbf.clone());
    let stats =
        import_into_sqlite(&feed, &database, options).map_err(|source| CliError::Import {
            database: database.clone(),
            source,
        })?;
    Ok(ImportOutcome {
        osm_pbf,
        database,
        stats,
    })
}

#[cfg(test)]
pub(crate) fn config_from_layers_for_test(
    layers: Vec<ortho_config::MergeLayer<'static>>,
) -> Result<ImportConfig, CliError> {
    let merged = ImportArgs::merge_from_layers(layers).map_err(CliError::from)?;
    ImportConfig::try_from(merged)
}
