//! Buffered, transactional writes of accepted feature versions.

use std::{error::Error as StdError, fmt, sync::Arc};

use chrono::{DateTime, Utc};
use log::debug;
use osm_history_core::{
    EntityKind, FeatureRow, HistoryStore, HistoryStoreError, PathMemberRow, PointResolution,
    PointRow, RelationMemberRow,
};
use thiserror::Error;

/// Pending statement count above which [`BatchWriter::add`] flushes.
pub const DEFAULT_BATCH_THRESHOLD: usize = 100_000;

/// One insert waiting to be committed.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteStatement {
    /// Insert into `points`.
    Point(PointRow),
    /// Insert into `paths`.
    Path(FeatureRow),
    /// Insert into `path_members`.
    PathMember(PathMemberRow),
    /// Insert into `relations`.
    Relation(FeatureRow),
    /// Insert into `relation_members`.
    RelationMember(RelationMemberRow),
}

impl WriteStatement {
    /// Record kind whose pass produced the statement.
    pub const fn kind(&self) -> EntityKind {
        match self {
            Self::Point(_) => EntityKind::Points,
            Self::Path(_) | Self::PathMember(_) => EntityKind::Paths,
            Self::Relation(_) | Self::RelationMember(_) => EntityKind::Relations,
        }
    }
}

impl fmt::Display for WriteStatement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Point(row) => write!(f, "point {}", row.feature.key),
            Self::Path(row) => write!(f, "path {}", row.key),
            Self::PathMember(row) => write!(f, "path {} member #{}", row.path, row.sequence),
            Self::Relation(row) => write!(f, "relation {}", row.key),
            Self::RelationMember(row) => {
                write!(f, "relation {} member #{}", row.relation, row.sequence)
            }
        }
    }
}

/// Statements for one accepted feature version: the owner row followed by
/// its member rows.
#[derive(Debug, Clone, PartialEq)]
pub struct WriteSet {
    kind: EntityKind,
    statements: Vec<WriteStatement>,
}

impl WriteSet {
    /// Write set for a point inside the zone.
    pub fn point(row: PointRow) -> Self {
        Self {
            kind: EntityKind::Points,
            statements: vec![WriteStatement::Point(row)],
        }
    }

    /// Write set for a path and its surviving members.
    pub fn path(owner: FeatureRow, members: Vec<PathMemberRow>) -> Self {
        let mut statements = Vec::with_capacity(members.len() + 1);
        statements.push(WriteStatement::Path(owner));
        statements.extend(members.into_iter().map(WriteStatement::PathMember));
        Self {
            kind: EntityKind::Paths,
            statements,
        }
    }

    /// Write set for a relation and its surviving members.
    pub fn relation(owner: FeatureRow, members: Vec<RelationMemberRow>) -> Self {
        let mut statements = Vec::with_capacity(members.len() + 1);
        statements.push(WriteStatement::Relation(owner));
        statements.extend(members.into_iter().map(WriteStatement::RelationMember));
        Self {
            kind: EntityKind::Relations,
            statements,
        }
    }

    /// Kind of the owning feature.
    pub const fn kind(&self) -> EntityKind {
        self.kind
    }

    /// Statements in insertion order.
    #[must_use]
    pub fn statements(&self) -> &[WriteStatement] {
        &self.statements
    }

    /// Number of statements.
    #[must_use]
    pub fn len(&self) -> usize {
        self.statements.len()
    }

    /// Whether the set holds no statements.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.statements.is_empty()
    }
}

/// Errors reported by a [`BatchSink`].
#[derive(Debug, Error)]
pub enum BatchSinkError {
    /// Opening or committing the transaction failed.
    #[error("failed to {operation} batch transaction")]
    Transaction {
        /// Transaction step that failed.
        operation: &'static str,
        /// Underlying failure.
        #[source]
        source: Box<dyn StdError + Send + Sync>,
    },
    /// A single statement was rejected.
    #[error("statement {offset} ({statement}) was rejected")]
    Statement {
        /// Position of the statement in the batch.
        offset: usize,
        /// Description of the rejected statement.
        statement: String,
        /// Underlying failure.
        #[source]
        source: Box<dyn StdError + Send + Sync>,
    },
}

/// Destination that commits a batch of statements atomically.
pub trait BatchSink {
    /// Commit every statement in one transaction, or none of them.
    fn commit(&mut self, statements: &[WriteStatement]) -> Result<(), BatchSinkError>;
}

/// Error raised when a batch could not be committed.
#[derive(Debug, Error)]
#[error(
    "failed to commit {kind} batch {batch} ({})",
    describe_range(.first_statement.as_deref(), .last_statement.as_deref())
)]
pub struct FlushError {
    /// Pass that produced the batch.
    pub kind: EntityKind,
    /// One-based ordinal of the batch within the run.
    pub batch: u64,
    /// First statement of the batch, if any.
    pub first_statement: Option<String>,
    /// Last statement of the batch, if any.
    pub last_statement: Option<String>,
    /// Sink failure.
    #[source]
    pub source: BatchSinkError,
}

fn describe_range(first: Option<&str>, last: Option<&str>) -> String {
    match (first, last) {
        (Some(first), Some(last)) => format!("{first} .. {last}"),
        _ => "empty batch".to_owned(),
    }
}

/// Buffers write sets and commits them in threshold-sized transactions.
///
/// The writer is owned by the pipeline thread. Member resolution reads the
/// same database through the shared [`HistoryStore`], which only observes
/// batches once they are committed.
pub struct BatchWriter<S> {
    sink: S,
    history: Arc<dyn HistoryStore>,
    threshold: usize,
    pending: Vec<WriteStatement>,
    current_kind: EntityKind,
    committed_statements: u64,
    flushes: u64,
}

impl<S> fmt::Debug for BatchWriter<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchWriter")
            .field("threshold", &self.threshold)
            .field("pending", &self.pending.len())
            .field("current_kind", &self.current_kind)
            .field("committed_statements", &self.committed_statements)
            .field("flushes", &self.flushes)
            .finish_non_exhaustive()
    }
}

impl<S: BatchSink> BatchWriter<S> {
    /// Create a writer flushing once more than `threshold` statements wait.
    pub fn new(sink: S, history: Arc<dyn HistoryStore>, threshold: usize) -> Self {
        Self {
            sink,
            history,
            threshold,
            pending: Vec::new(),
            current_kind: EntityKind::Points,
            committed_statements: 0,
            flushes: 0,
        }
    }

    /// Queue a write set, flushing when the pending count exceeds the
    /// threshold.
    pub fn add(&mut self, set: WriteSet) -> Result<(), FlushError> {
        self.current_kind = set.kind;
        self.pending.extend(set.statements);
        if self.pending.len() > self.threshold {
            self.flush()?;
        }
        Ok(())
    }

    /// Commit every pending statement as one transaction.
    ///
    /// An empty batch still opens and commits a transaction.
    pub fn flush(&mut self) -> Result<(), FlushError> {
        let batch = self.flushes + 1;
        self.sink
            .commit(&self.pending)
            .map_err(|source| FlushError {
                kind: self.current_kind,
                batch,
                first_statement: self.pending.first().map(ToString::to_string),
                last_statement: self.pending.last().map(ToString::to_string),
                source,
            })?;
        let committed = u64::try_from(self.pending.len()).unwrap_or(u64::MAX);
        debug!(
            "committed {} batch {batch} with {committed} statements",
            self.current_kind
        );
        self.committed_statements += committed;
        self.flushes = batch;
        self.pending.clear();
        Ok(())
    }

    /// Flush whatever remains of a pass.
    pub fn finalize_entity_kind(&mut self, kind: EntityKind) -> Result<(), FlushError> {
        self.current_kind = kind;
        self.flush()
    }

    /// Look up a committed point version through the shared history.
    pub fn point_as_of(
        &self,
        point_id: i64,
        at: DateTime<Utc>,
    ) -> Result<Option<PointResolution>, HistoryStoreError> {
        self.history.point_as_of(point_id, at)
    }

    /// Shared history the writer's commits become visible through.
    #[must_use]
    pub fn history(&self) -> Arc<dyn HistoryStore> {
        Arc::clone(&self.history)
    }

    /// Statements waiting for the next flush.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Statements committed so far.
    #[must_use]
    pub const fn committed_statements(&self) -> u64 {
        self.committed_statements
    }

    /// Transactions committed so far.
    #[must_use]
    pub const fn flushes(&self) -> u64 {
        self.flushes
    }

    /// Give back the sink.
    pub fn into_sink(self) -> S {
        self.sink
    }
}
