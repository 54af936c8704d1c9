//! Opening the writable import database.
#![forbid(unsafe_code)]

use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::{ambient_authority, fs_utf8};
use log::debug;
use rusqlite::{Connection, Error as SqliteError};
use thiserror::Error;

use super::schema::{SchemaError, initialise_schema};

const BUSY_TIMEOUT: Duration = Duration::from_secs(30);

/// Errors raised when opening the import database.
#[derive(Debug, Error)]
pub enum OpenStoreError {
    /// Failed to create the parent directory for the database.
    #[error("failed to create parent directory {path:?}")]
    CreateDirectory {
        /// Directory that could not be created.
        path: Utf8PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// Opening the SQLite database failed.
    #[error("failed to open SQLite database at {path:?}")]
    Open {
        /// Destination database path.
        path: Utf8PathBuf,
        /// Source error returned by `rusqlite`.
        #[source]
        source: SqliteError,
    },
    /// A connection setting could not be applied.
    #[error("failed to configure {setting} on {path:?}")]
    Configure {
        /// Setting being applied.
        setting: &'static str,
        /// Destination database path.
        path: Utf8PathBuf,
        /// Source error returned by `rusqlite`.
        #[source]
        source: SqliteError,
    },
    /// Creating or validating the schema failed.
    #[error("failed to initialise history schema in {path:?}")]
    Schema {
        /// Destination database path.
        path: Utf8PathBuf,
        /// Schema failure.
        #[source]
        source: SchemaError,
    },
}

/// Open (creating if needed) the import database and apply the schema.
///
/// Parent directories are created automatically. The database is switched
/// to write-ahead logging so lookup readers can run alongside the writer and
/// only see committed batches.
pub fn open_store(path: &Utf8Path) -> Result<Connection, OpenStoreError> {
    ensure_parent_dir(path)?;
    let mut connection =
        Connection::open(path.as_std_path()).map_err(|source| OpenStoreError::Open {
            path: path.to_path_buf(),
            source,
        })?;
    let configure = |setting: &'static str| {
        move |source: SqliteError| OpenStoreError::Configure {
            setting,
            path: path.to_path_buf(),
            source,
        }
    };
    let mode: String = connection
        .pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))
        .map_err(configure("journal_mode"))?;
    debug!("opened {path} with journal mode {mode}");
    connection
        .busy_timeout(BUSY_TIMEOUT)
        .map_err(configure("busy_timeout"))?;
    initialise_schema(&mut connection).map_err(|source| OpenStoreError::Schema {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(connection)
}

fn ensure_parent_dir(path: &Utf8Path) -> Result<(), OpenStoreError> {
    let Some(parent) = path.parent() else {
        return Ok(());
    };
    if parent.as_str().is_empty() || parent == Utf8Path::new("/") {
        return Ok(());
    }

    let (base, relative) = if parent.is_absolute() {
        ("/", parent.strip_prefix("/").unwrap_or(parent))
    } else {
        (".", parent)
    };
    let create_error = |source| OpenStoreError::CreateDirectory {
        path: parent.to_path_buf(),
        source,
    };
    let base_dir =
        fs_utf8::Dir::open_ambient_dir(base, ambient_authority()).map_err(create_error)?;
    base_dir.create_dir_all(relative).map_err(create_error)
}
