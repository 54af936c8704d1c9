//! Focused unit tests covering import configuration and execution.

use super::*;
use crate::import::{
    DEFAULT_DATABASE, ImportConfig, config_from_layers_for_test, execute_import,
    resolve_import_config,
};
use camino::Utf8PathBuf;
use osm_history_core::{EntityKind, ZoneBoundary, ZoneError};
use osm_history_data::{ImportError, ImportOptions};
use rstest::{fixture, rstest};
use rusqlite::Connection;
use std::{fs, time::Duration};
use tempfile::TempDir;

struct Workspace {
    _dir: TempDir,
    root: Utf8PathBuf,
}

impl Workspace {
    fn file(&self, name: &str, contents: &[u8]) -> Utf8PathBuf {
        let path = self.root.join(name);
        fs::write(&path, contents).expect("write workspace file");
        path
    }
}

#[fixture]
fn workspace() -> Workspace {
    let dir = TempDir::new().expect("tempdir");
    let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).expect("utf-8 workspace");
    Workspace { _dir: dir, root }
}

fn monaco_args() -> ImportArgs {
    ImportArgs {
        osm_pbf: Some(Utf8PathBuf::from("monaco.osh.pbf")),
        min_lon: Some(7.407_896),
        min_lat: Some(43.724_759),
        max_lon: Some(7.441_014),
        max_lat: Some(43.752_079),
        ..ImportArgs::default()
    }
}

fn monaco_zone() -> ZoneBoundary {
    ZoneBoundary::from_degrees(7.407_896, 43.724_759, 7.441_014, 43.752_079).expect("valid zone")
}

#[rstest]
#[case::extract(ImportArgs { osm_pbf: None, ..monaco_args() }, ARG_OSM_PBF, ENV_OSM_PBF)]
#[case::min_lon(ImportArgs { min_lon: None, ..monaco_args() }, ARG_MIN_LON, ENV_MIN_LON)]
#[case::min_lat(ImportArgs { min_lat: None, ..monaco_args() }, ARG_MIN_LAT, ENV_MIN_LAT)]
#[case::max_lon(ImportArgs { max_lon: None, ..monaco_args() }, ARG_MAX_LON, ENV_MAX_LON)]
#[case::max_lat(ImportArgs { max_lat: None, ..monaco_args() }, ARG_MAX_LAT, ENV_MAX_LAT)]
fn converting_without_required_fields_errors(
    #[case] args: ImportArgs,
    #[case] field: &'static str,
    #[case] env_var: &'static str,
) {
    let err = ImportConfig::try_from(args).expect_err("missing field should error");
    match err {
        CliError::MissingArgument {
            field: missing,
            env,
        } => {
            assert_eq!(missing, field);
            assert_eq!(env, env_var);
        }
        other => panic!("expected MissingArgument, found {other:?}"),
    }
}

#[rstest]
fn converting_applies_defaults() {
    let config = ImportConfig::try_from(monaco_args()).expect("valid arguments");
    assert_eq!(config.database.as_str(), DEFAULT_DATABASE);
    assert_eq!(config.options, ImportOptions::new(monaco_zone()));
}

#[rstest]
fn converting_applies_tuning() {
    let args = ImportArgs {
        database: Some(Utf8PathBuf::from("out/monaco.db")),
        batch_size: Some(500),
        workers: Some(3),
        lookup_timeout_ms: Some(250),
        progress_every: Some(0),
        skip_relations: Some(true),
        ..monaco_args()
    };
    let config = ImportConfig::try_from(args).expect("valid arguments");
    let expected = ImportOptions::new(monaco_zone())
        .with_batch_threshold(500)
        .with_workers(3)
        .with_lookup_timeout(Duration::from_millis(250))
        .with_progress_every(0)
        .with_relations(false);
    assert_eq!(config.database.as_str(), "out/monaco.db");
    assert_eq!(config.options, expected);
}

#[rstest]
#[case::workers(ImportArgs { workers: Some(0), ..monaco_args() }, ARG_WORKERS)]
#[case::batch(ImportArgs { batch_size: Some(0), ..monaco_args() }, ARG_BATCH_SIZE)]
#[case::timeout(ImportArgs { lookup_timeout_ms: Some(0), ..monaco_args() }, ARG_LOOKUP_TIMEOUT_MS)]
fn converting_rejects_zero_settings(#[case] args: ImportArgs, #[case] expected: &'static str) {
    match ImportConfig::try_from(args) {
        Err(CliError::ZeroSetting { field }) => assert_eq!(field, expected),
        other => panic!("expected ZeroSetting, found {other:?}"),
    }
}

#[rstest]
fn converting_rejects_inverted_zone() {
    let args = ImportArgs {
        min_lon: Some(8.0),
        max_lon: Some(7.0),
        ..monaco_args()
    };
    match ImportConfig::try_from(args) {
        Err(CliError::Zone(ZoneError::Inverted { .. })) => {}
        other => panic!("expected an inverted zone, found {other:?}"),
    }
}

#[rstest]
fn parsing_accepts_negative_coordinates_and_bare_flags() {
    let cli = Cli::try_parse_from([
        "osm-history",
        "import",
        "--min-lon",
        "-3.25",
        "--min-lat",
        "-1.5",
        "--max-lon",
        "-3.0",
        "--max-lat",
        "2",
        "--skip-relations",
    ])
    .expect("arguments parse");
    let Command::Import(args) = cli.command;
    assert_eq!(args.min_lon, Some(-3.25));
    assert_eq!(args.min_lat, Some(-1.5));
    assert_eq!(args.max_lon, Some(-3.0));
    assert_eq!(args.skip_relations, Some(true));
}

#[rstest]
fn validate_sources_reports_missing_files(workspace: Workspace) {
    let args = ImportArgs {
        osm_pbf: Some(workspace.root.join("absent.osh.pbf")),
        ..monaco_args()
    };
    match resolve_import_config(args) {
        Err(CliError::MissingSourceFile { field, .. }) => assert_eq!(field, ARG_OSM_PBF),
        other => panic!("unexpected outcome {other:?}"),
    }
}

#[rstest]
fn validate_sources_rejects_directories(workspace: Workspace) {
    let config = ImportConfig {
        osm_pbf: workspace.root.clone(),
        ..ImportConfig::try_from(monaco_args()).expect("valid arguments")
    };
    match config.validate_sources() {
        Err(CliError::SourcePathNotFile { field, .. }) => assert_eq!(field, ARG_OSM_PBF),
        other => panic!("unexpected outcome {other:?}"),
    }
}

#[rstest]
fn merge_layers_maps_configuration_errors() {
    use ortho_config::MergeComposer;
    use serde_json::json;

    let mut composer = MergeComposer::new();
    composer.push_cli(json!({ "workers": "many" }));

    match config_from_layers_for_test(composer.layers()) {
        Err(CliError::Configuration(_)) => {}
        other => panic!("expected CliError::Configuration, found {other:?}"),
    }
}

#[rstest]
fn empty_extract_creates_schema_and_reports(workspace: Workspace) {
    let extract = workspace.file("empty.osh.pbf", b"");
    let database = workspace.root.join("nested/history.db");
    let cli = Cli::try_parse_from([
        "osm-history",
        "import",
        "--osm-pbf",
        extract.as_str(),
        "--database",
        database.as_str(),
        "--min-lon",
        "0",
        "--min-lat",
        "0",
        "--max-lon",
        "1",
        "--max-lat",
        "1",
        "--workers",
        "2",
    ])
    .expect("arguments parse");
    let mut output = Vec::new();
    run_with(cli, &mut output).expect("import succeeds");

    let summary = String::from_utf8(output).expect("utf-8 summary");
    assert!(summary.starts_with(&format!("imported {extract} into {database}")));
    assert!(summary.contains("points"), "summary lists kinds: {summary}");

    let connection = Connection::open(database.as_std_path()).expect("open database");
    let tables: i64 = connection
        .query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' \
             AND name IN ('points', 'paths', 'path_members', 'relations', 'relation_members')",
            [],
            |row| row.get(0),
        )
        .expect("count tables");
    assert_eq!(tables, 5);
}

#[rstest]
fn corrupt_extract_names_the_database(workspace: Workspace) {
    let extract = workspace.file("corrupt.osh.pbf", &[0, 0, 0, 4, 1, 2, 3, 4, 5]);
    let database = workspace.root.join("history.db");
    let config = ImportConfig {
        osm_pbf: extract,
        database: database.clone(),
        options: ImportOptions::new(monaco_zone()).with_workers(1),
    };
    match execute_import(config) {
        Err(CliError::Import {
            database: reported,
            source: ImportError::Feed { source },
        }) => {
            assert_eq!(reported, database);
            assert!(matches!(
                source,
                osm_history_core::FeedError::Decode {
                    kind: EntityKind::Points,
                    ..
                }
            ));
        }
        other => panic!("expected a feed failure, found {other:?}"),
    }
}
