//! SQLite-backed history store reading committed feature versions.

use std::{
    fmt,
    path::{Path, PathBuf},
    sync::{Mutex, PoisonError},
    time::Duration,
};

use chrono::{DateTime, Utc};
use log::{debug, trace};
use rusqlite::{Connection, OpenFlags, OptionalExtension, params};
use thiserror::Error;

use crate::{FeatureKey, MemberKind};

use super::{HistoryStore, HistoryStoreError, PointMatch, PointRecord, PointResolution};

/// How long a reader waits on a locked database before giving up.
const BUSY_TIMEOUT: Duration = Duration::from_secs(30);

const POINT_AS_OF_SQL: &str = "SELECT id, version, created_at, lon, lat FROM points \
     WHERE id = ?1 AND created_at <= ?2 \
     ORDER BY created_at DESC, version DESC LIMIT 1";

const POINT_EARLIEST_SQL: &str = "SELECT id, version, created_at, lon, lat FROM points \
     WHERE id = ?1 ORDER BY created_at ASC, version ASC LIMIT 1";

/// Error raised while opening a [`SqliteHistoryStore`].
#[derive(Debug, Error)]
pub enum SqliteHistoryStoreError {
    /// Opening a read-only connection failed.
    #[error("failed to open SQLite history at {path}")]
    Open {
        /// Location of the SQLite database on disk.
        path: PathBuf,
        /// Source error returned by `rusqlite`.
        #[source]
        source: rusqlite::Error,
    },
}

/// Read-only history store over the importer's SQLite database.
///
/// Each concurrent lookup borrows its own connection, so lookups run in
/// parallel and never observe a writer's open transaction. Connections are
/// opened lazily and returned to an idle list after use.
pub struct SqliteHistoryStore {
    path: PathBuf,
    idle: Mutex<Vec<Connection>>,
}

impl fmt::Debug for SqliteHistoryStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let idle = self
            .idle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len();
        f.debug_struct("SqliteHistoryStore")
            .field("path", &self.path)
            .field("idle_connections", &idle)
            .finish()
    }
}

impl SqliteHistoryStore {
    /// Open a store over an existing database.
    ///
    /// One connection is opened eagerly so a missing or unreadable file is
    /// reported before any lookup runs.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, SqliteHistoryStoreError> {
        let path = path.as_ref().to_path_buf();
        let first = open_reader(&path)?;
        debug!("opened history store at {}", path.display());
        Ok(Self {
            path,
            idle: Mutex::new(vec![first]),
        })
    }

    /// Location of the backing database.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Run `query` on an idle connection, opening a new one when none is free.
    fn with_connection<T>(
        &self,
        id: i64,
        query: impl FnOnce(&Connection) -> Result<T, HistoryStoreError>,
    ) -> Result<T, HistoryStoreError> {
        let reused = self
            .idle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop();
        let connection = match reused {
            Some(connection) => connection,
            None => {
                trace!("opening extra reader on {}", self.path.display());
                open_reader(&self.path).map_err(|err| HistoryStoreError::Query {
                    operation: "open reader",
                    id,
                    source: Box::new(err),
                })?
            }
        };
        let result = query(&connection);
        self.idle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(connection);
        result
    }
}

fn open_reader(path: &Path) -> Result<Connection, SqliteHistoryStoreError> {
    let flags = OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX;
    let connection = Connection::open_with_flags(path, flags).map_err(|source| {
        SqliteHistoryStoreError::Open {
            path: path.to_path_buf(),
            source,
        }
    })?;
    connection
        .busy_timeout(BUSY_TIMEOUT)
        .map_err(|source| SqliteHistoryStoreError::Open {
            path: path.to_path_buf(),
            source,
        })?;
    Ok(connection)
}

fn query_error(
    operation: &'static str,
    id: i64,
) -> impl FnOnce(rusqlite::Error) -> HistoryStoreError {
    move |err| HistoryStoreError::Query {
        operation,
        id,
        source: Box::new(err),
    }
}

fn find_point(
    connection: &Connection,
    sql: &str,
    params: impl rusqlite::Params,
    id: i64,
) -> Result<Option<PointRecord>, HistoryStoreError> {
    let row = connection
        .prepare_cached(sql)
        .and_then(|mut statement| {
            statement
                .query_row(params, |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, i64>(2)?,
                        row.get::<_, i32>(3)?,
                        row.get::<_, i32>(4)?,
                    ))
                })
                .optional()
        })
        .map_err(query_error("point lookup", id))?;

    row.map(|(id, version, millis, lon, lat)| {
        let created_at = DateTime::<Utc>::from_timestamp_millis(millis)
            .ok_or(HistoryStoreError::InvalidTimestamp { id, millis })?;
        Ok(PointRecord {
            key: FeatureKey::new(id, version),
            created_at,
            lon,
            lat,
        })
    })
    .transpose()
}

impl HistoryStore for SqliteHistoryStore {
    fn point_as_of(
        &self,
        point_id: i64,
        at: DateTime<Utc>,
    ) -> Result<Option<PointResolution>, HistoryStoreError> {
        self.with_connection(point_id, |connection| {
            let as_of = find_point(
                connection,
                POINT_AS_OF_SQL,
                params![point_id, at.timestamp_millis()],
                point_id,
            )?;
            if let Some(record) = as_of {
                return Ok(Some(PointResolution {
                    record,
                    matched: PointMatch::AsOf,
                }));
            }
            let earliest = find_point(connection, POINT_EARLIEST_SQL, params![point_id], point_id)?;
            if let Some(record) = &earliest {
                trace!("point {point_id} has no version at {at}; falling back to {}", record.key);
            }
            Ok(earliest.map(|record| PointResolution {
                record,
                matched: PointMatch::EarliestFallback,
            }))
        })
    }

    fn latest_exists(&self, kind: MemberKind, id: i64) -> Result<bool, HistoryStoreError> {
        let sql = match kind {
            MemberKind::Point => "SELECT 1 FROM points WHERE id = ?1 LIMIT 1",
            MemberKind::Path => "SELECT 1 FROM paths WHERE id = ?1 LIMIT 1",
            MemberKind::Relation => "SELECT 1 FROM relations WHERE id = ?1 LIMIT 1",
        };
        self.with_connection(id, |connection| {
            connection
                .prepare_cached(sql)
                .and_then(|mut statement| statement.exists(params![id]))
                .map_err(query_error("existence check", id))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::at;
    use rstest::{fixture, rstest};
    use std::sync::Arc;
    use std::thread;
    use tempfile::TempDir;

    struct Fixture {
        _dir: TempDir,
        path: PathBuf,
    }

    impl Fixture {
        fn writer(&self) -> Connection {
            Connection::open(&self.path).expect("open writer")
        }
    }

    #[fixture]
    fn history() -> Fixture {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("history.db");
        let connection = Connection::open(&path).expect("create database");
        connection
            .execute_batch(
                "CREATE TABLE points (id INTEGER, version INTEGER, created_at INTEGER, \
                     lon INTEGER, lat INTEGER, PRIMARY KEY (id, version));
                 CREATE TABLE paths (id INTEGER, version INTEGER, PRIMARY KEY (id, version));
                 CREATE TABLE relations (id INTEGER, version INTEGER, PRIMARY KEY (id, version));",
            )
            .expect("create tables");
        for (version, year, lon) in [(1_i64, 2010, 100_i32), (2, 2012, 200), (3, 2014, 300)] {
            connection
                .execute(
                    "INSERT INTO points (id, version, created_at, lon, lat) VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![7_i64, version, at(year, 1, 1).timestamp_millis(), lon, -lon],
                )
                .expect("insert point");
        }
        connection
            .execute("INSERT INTO paths (id, version) VALUES (40, 1)", [])
            .expect("insert path");
        Fixture { _dir: dir, path }
    }

    #[rstest]
    #[case(at(2011, 1, 1), 1, PointMatch::AsOf)]
    #[case(at(2012, 1, 1), 2, PointMatch::AsOf)]
    #[case(at(2030, 1, 1), 3, PointMatch::AsOf)]
    #[case(at(2001, 1, 1), 1, PointMatch::EarliestFallback)]
    fn resolves_point_versions(
        history: Fixture,
        #[case] instant: DateTime<Utc>,
        #[case] version: i64,
        #[case] matched: PointMatch,
    ) {
        let store = SqliteHistoryStore::open(&history.path).expect("open store");
        let found = store
            .point_as_of(7, instant)
            .expect("lookup succeeds")
            .expect("point exists");
        assert_eq!(found.record.key, FeatureKey::new(7, version));
        assert_eq!(found.record.lon, i32::try_from(version * 100).expect("fits"));
        assert_eq!(found.matched, matched);
    }

    #[rstest]
    fn missing_point_returns_none(history: Fixture) {
        let store = SqliteHistoryStore::open(&history.path).expect("open store");
        assert!(
            store
                .point_as_of(8, at(2030, 1, 1))
                .expect("lookup succeeds")
                .is_none()
        );
    }

    #[rstest]
    #[case(MemberKind::Point, 7, true)]
    #[case(MemberKind::Path, 40, true)]
    #[case(MemberKind::Path, 7, false)]
    #[case(MemberKind::Relation, 40, false)]
    fn checks_existence_per_table(
        history: Fixture,
        #[case] kind: MemberKind,
        #[case] id: i64,
        #[case] expected: bool,
    ) {
        let store = SqliteHistoryStore::open(&history.path).expect("open store");
        assert_eq!(store.latest_exists(kind, id).expect("lookup succeeds"), expected);
    }

    #[rstest]
    fn ignores_uncommitted_rows(history: Fixture) {
        let store = SqliteHistoryStore::open(&history.path).expect("open store");
        let mut writer = history.writer();
        let transaction = writer.transaction().expect("begin");
        transaction
            .execute("INSERT INTO relations (id, version) VALUES (90, 1)", [])
            .expect("insert relation");
        assert!(
            !store
                .latest_exists(MemberKind::Relation, 90)
                .expect("lookup succeeds")
        );
        transaction.commit().expect("commit");
        assert!(
            store
                .latest_exists(MemberKind::Relation, 90)
                .expect("lookup succeeds")
        );
    }

    #[rstest]
    fn serves_concurrent_readers(history: Fixture) {
        let store = Arc::new(SqliteHistoryStore::open(&history.path).expect("open store"));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let store = Arc::clone(&store);
                thread::spawn(move || store.latest_exists(MemberKind::Point, 7))
            })
            .collect();
        for handle in handles {
            assert!(handle.join().expect("reader thread").expect("lookup succeeds"));
        }
    }

    #[rstest]
    fn reports_missing_database() {
        let dir = TempDir::new().expect("tempdir");
        let err = SqliteHistoryStore::open(dir.path().join("absent.db"))
            .expect_err("read-only open of a missing file fails");
        assert!(matches!(err, SqliteHistoryStoreError::Open { .. }));
    }
}
