#![forbid(unsafe_code)]

use rusqlite::{Connection, Error as SqliteError, OptionalExtension, Transaction};
use thiserror::Error;

/// Version recorded in `history_schema_version` by this build.
pub const SCHEMA_VERSION: i64 = 1;

/// Initialise the history tables inside an existing SQLite database.
///
/// The function enables foreign keys, creates the owner and member tables
/// plus the point lookup index, and records the schema version. Existing
/// installations must already match the expected version; mismatches are
/// rejected so migrations can be applied explicitly.
///
/// # Examples
/// ```
/// use rusqlite::Connection;
/// use osm_history_data::store::initialise_schema;
///
/// let mut conn = Connection::open_in_memory().expect("create in-memory database");
/// initialise_schema(&mut conn).expect("create history schema");
///
/// let version: i64 = conn
///     .query_row(
///         "SELECT version FROM history_schema_version LIMIT 1",
///         [],
///         |row| row.get(0),
///     )
///     .expect("read schema version");
/// assert_eq!(version, 1);
/// ```
pub fn initialise_schema(connection: &mut Connection) -> Result<(), SchemaError> {
    connection
        .pragma_update(None, "foreign_keys", true)
        .map_err(|source| SchemaError::ForeignKeys { source })?;

    let transaction = connection
        .transaction()
        .map_err(|source| SchemaError::Migration {
            step: "begin schema transaction",
            source,
        })?;

    create_owner_tables(&transaction)?;
    create_member_tables(&transaction)?;
    create_indexes(&transaction)?;
    ensure_schema_version(&transaction)?;

    transaction
        .commit()
        .map_err(|source| SchemaError::Migration {
            step: "commit schema transaction",
            source,
        })?;

    Ok(())
}

fn create_owner_tables(transaction: &Transaction<'_>) -> Result<(), SchemaError> {
    run_migration_step(
        transaction,
        "create points",
        "CREATE TABLE IF NOT EXISTS points (
            id INTEGER NOT NULL,
            version INTEGER NOT NULL CHECK (version > 0),
            deleted INTEGER NOT NULL,
            visible INTEGER NOT NULL,
            changeset INTEGER NOT NULL,
            uid INTEGER NOT NULL,
            author TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            tags TEXT NOT NULL,
            lon INTEGER NOT NULL,
            lat INTEGER NOT NULL,
            PRIMARY KEY (id, version)
        ) WITHOUT ROWID",
    )?;
    run_migration_step(
        transaction,
        "create paths",
        "CREATE TABLE IF NOT EXISTS paths (
            id INTEGER NOT NULL,
            version INTEGER NOT NULL CHECK (version > 0),
            deleted INTEGER NOT NULL,
            visible INTEGER NOT NULL,
            changeset INTEGER NOT NULL,
            uid INTEGER NOT NULL,
            author TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            tags TEXT NOT NULL,
            PRIMARY KEY (id, version)
        ) WITHOUT ROWID",
    )?;
    run_migration_step(
        transaction,
        "create relations",
        "CREATE TABLE IF NOT EXISTS relations (
            id INTEGER NOT NULL,
            version INTEGER NOT NULL CHECK (version > 0),
            deleted INTEGER NOT NULL,
            visible INTEGER NOT NULL,
            changeset INTEGER NOT NULL,
            uid INTEGER NOT NULL,
            author TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            tags TEXT NOT NULL,
            PRIMARY KEY (id, version)
        ) WITHOUT ROWID",
    )
}

fn create_member_tables(transaction: &Transaction<'_>) -> Result<(), SchemaError> {
    run_migration_step(
        transaction,
        "create path_members",
        "CREATE TABLE IF NOT EXISTS path_members (
            path_id INTEGER NOT NULL,
            path_version INTEGER NOT NULL,
            point_id INTEGER NOT NULL,
            point_version INTEGER NOT NULL,
            sequence INTEGER NOT NULL CHECK (sequence >= 0),
            lon INTEGER NOT NULL,
            lat INTEGER NOT NULL,
            PRIMARY KEY (path_id, path_version, sequence),
            FOREIGN KEY (path_id, path_version) REFERENCES paths(id, version)
        ) WITHOUT ROWID",
    )?;
    run_migration_step(
        transaction,
        "create relation_members",
        "CREATE TABLE IF NOT EXISTS relation_members (
            relation_id INTEGER NOT NULL,
            relation_version INTEGER NOT NULL,
            member_id INTEGER NOT NULL,
            member_type TEXT NOT NULL CHECK (member_type IN ('n', 'w', 'r')),
            role TEXT,
            sequence INTEGER NOT NULL CHECK (sequence >= 0),
            PRIMARY KEY (relation_id, relation_version, sequence),
            FOREIGN KEY (relation_id, relation_version) REFERENCES relations(id, version)
        ) WITHOUT ROWID",
    )
}

fn create_indexes(transaction: &Transaction<'_>) -> Result<(), SchemaError> {
    run_migration_step(
        transaction,
        "index points by creation",
        "CREATE INDEX IF NOT EXISTS idx_points_created
            ON points(id, created_at, version)",
    )
}

fn ensure_schema_version(transaction: &Transaction<'_>) -> Result<(), SchemaError> {
    run_migration_step(
        transaction,
        "create schema version table",
        "CREATE TABLE IF NOT EXISTS history_schema_version (
            version INTEGER PRIMARY KEY CHECK (version > 0),
            applied_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ', 'now'))
        ) WITHOUT ROWID",
    )?;

    let existing_version: Option<i64> = transaction
        .query_row(
            "SELECT version FROM history_schema_version LIMIT 1",
            [],
            |row| row.get(0),
        )
        .optional()
        .map_err(|source| SchemaError::Migration {
            step: "read schema version",
            source,
        })?;

    match existing_version {
        Some(version) if version == SCHEMA_VERSION => {}
        Some(found) => {
            return Err(SchemaError::VersionMismatch {
                expected: SCHEMA_VERSION,
                found,
            });
        }
        None => {
            transaction
                .execute(
                    "INSERT INTO history_schema_version (version) VALUES (?1)",
                    [SCHEMA_VERSION],
                )
                .map_err(|source| SchemaError::Migration {
                    step: "record schema version",
                    source,
                })?;
        }
    }

    Ok(())
}

fn run_migration_step(
    transaction: &Transaction<'_>,
    step: &'static str,
    sql: &str,
) -> Result<(), SchemaError> {
    transaction
        .execute(sql, [])
        .map(|_| ())
        .map_err(|source| SchemaError::Migration { step, source })
}

/// Errors raised when initialising the history schema.
#[derive(Debug, Error)]
pub enum SchemaError {
    /// Enabling foreign key enforcement failed.
    #[error("failed to enable SQLite foreign keys")]
    ForeignKeys {
        /// Source error returned by `rusqlite`.
        #[source]
        source: SqliteError,
    },
    /// A schema statement failed.
    #[error("failed to execute migration step '{step}'")]
    Migration {
        /// Step being applied.
        step: &'static str,
        /// Source error returned by `rusqlite`.
        #[source]
        source: SqliteError,
    },
    /// The database was created by a different schema version.
    #[error(
        "expected history schema version {expected} but found {found}; apply migrations before retrying"
    )]
    VersionMismatch {
        /// Version this build writes.
        expected: i64,
        /// Version recorded in the database.
        found: i64,
    },
}
