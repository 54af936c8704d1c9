//! SQLite destination for import batches.
#![forbid(unsafe_code)]

use camino::Utf8Path;
use rusqlite::{Connection, Transaction, params};

use super::batch::{BatchSink, BatchSinkError, WriteStatement};
use crate::store::{OpenStoreError, open_store};

const INSERT_POINT: &str = "INSERT INTO points
    (id, version, deleted, visible, changeset, uid, author, created_at, tags, lon, lat)
    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)";

const INSERT_PATH: &str = "INSERT INTO paths
    (id, version, deleted, visible, changeset, uid, author, created_at, tags)
    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)";

const INSERT_PATH_MEMBER: &str = "INSERT INTO path_members
    (path_id, path_version, point_id, point_version, sequence, lon, lat)
    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)";

const INSERT_RELATION: &str = "INSERT INTO relations
    (id, version, deleted, visible, changeset, uid, author, created_at, tags)
    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)";

const INSERT_RELATION_MEMBER: &str = "INSERT INTO relation_members
    (relation_id, relation_version, member_id, member_type, role, sequence)
    VALUES (?1, ?2, ?3, ?4, ?5, ?6)";

/// Batch sink committing each batch as one SQLite transaction.
///
/// Inserts are plain `INSERT`s: writing an `(id, version)` pair that already
/// exists fails the batch with a primary-key violation.
#[derive(Debug)]
pub struct SqliteBatchSink {
    connection: Connection,
}

impl SqliteBatchSink {
    /// Wrap an open connection whose schema is already initialised.
    pub fn new(connection: Connection) -> Self {
        Self { connection }
    }

    /// Open the database at `path`, creating it and its schema if needed.
    pub fn open(path: &Utf8Path) -> Result<Self, OpenStoreError> {
        open_store(path).map(Self::new)
    }

    /// Give back the underlying connection.
    pub fn into_inner(self) -> Connection {
        self.connection
    }
}

impl BatchSink for SqliteBatchSink {
    fn commit(&mut self, statements: &[WriteStatement]) -> Result<(), BatchSinkError> {
        let transaction =
            self.connection
                .transaction()
                .map_err(|source| BatchSinkError::Transaction {
                    operation: "begin",
                    source: Box::new(source),
                })?;
        for (offset, statement) in statements.iter().enumerate() {
            execute(&transaction, statement).map_err(|source| BatchSinkError::Statement {
                offset,
                statement: statement.to_string(),
                source: Box::new(source),
            })?;
        }
        transaction
            .commit()
            .map_err(|source| BatchSinkError::Transaction {
                operation: "commit",
                source: Box::new(source),
            })
    }
}

fn execute(transaction: &Transaction<'_>, statement: &WriteStatement) -> rusqlite::Result<()> {
    match statement {
        WriteStatement::Point(row) => {
            let owner = &row.feature;
            transaction.prepare_cached(INSERT_POINT)?.execute(params![
                owner.key.id,
                owner.key.version,
                owner.deleted,
                owner.visible,
                owner.changeset,
                owner.uid,
                owner.author,
                owner.created_at.timestamp_millis(),
                owner.tags_json,
                row.lon,
                row.lat,
            ])?;
        }
        WriteStatement::Path(owner) | WriteStatement::Relation(owner) => {
            let sql = if matches!(statement, WriteStatement::Path(_)) {
                INSERT_PATH
            } else {
                INSERT_RELATION
            };
            transaction.prepare_cached(sql)?.execute(params![
                owner.key.id,
                owner.key.version,
                owner.deleted,
                owner.visible,
                owner.changeset,
                owner.uid,
                owner.author,
                owner.created_at.timestamp_millis(),
                owner.tags_json,
            ])?;
        }
        WriteStatement::PathMember(row) => {
            transaction.prepare_cached(INSERT_PATH_MEMBER)?.execute(params![
                row.path.id,
                row.path.version,
                row.point_id,
                row.point_version,
                row.sequence,
                row.lon,
                row.lat,
            ])?;
        }
        WriteStatement::RelationMember(row) => {
            transaction
                .prepare_cached(INSERT_RELATION_MEMBER)?
                .execute(params![
                    row.relation.id,
                    row.relation.version,
                    row.member_id,
                    row.kind.code(),
                    row.role,
                    row.sequence,
                ])?;
        }
    }
    Ok(())
}
