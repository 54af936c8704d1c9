//! Kind-by-kind import of a history feed into the store.
//!
//! The pipeline runs one pass per record kind: points, then paths, then
//! relations. Each pass filters or resolves every record, hands survivors to
//! the [`BatchWriter`] and flushes before the next pass starts, so later
//! passes resolve members against fully committed history.

use std::{ops::ControlFlow, sync::Arc, time::Duration, time::Instant};

use camino::Utf8Path;
use log::{debug, info};
use osm_history_core::{
    EntityKind, EntityMeta, FeatureKey, FeatureRow, FeedError, HistoryStore, ImportStats,
    PathFeature, PointFeature, PointRow, RecordFeed, RelationFeature, SqliteHistoryStore,
    SqliteHistoryStoreError, TagCodec, TagCodecError, Visitor, ZoneBoundary,
};
use thiserror::Error;

use super::batch::{BatchSink, BatchWriter, DEFAULT_BATCH_THRESHOLD, FlushError, WriteSet};
use super::pool::PoolError;
use super::resolver::{
    DEFAULT_LOOKUP_TIMEOUT, DEFAULT_WORKERS, MemberResolver, ResolveError, Resolved,
};
use super::sqlite::SqliteBatchSink;
use crate::store::OpenStoreError;

/// Records between progress lines when none is configured.
pub const DEFAULT_PROGRESS_EVERY: u64 = 100_000;

/// Position of the pipeline in its pass sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportState {
    /// Filtering points by zone.
    ImportingPoints,
    /// Resolving path members.
    ImportingPaths,
    /// Resolving relation members.
    ImportingRelations,
    /// Every pass has been flushed.
    Done,
}

impl ImportState {
    /// Record kind handled in this state.
    pub const fn kind(self) -> Option<EntityKind> {
        match self {
            Self::ImportingPoints => Some(EntityKind::Points),
            Self::ImportingPaths => Some(EntityKind::Paths),
            Self::ImportingRelations => Some(EntityKind::Relations),
            Self::Done => None,
        }
    }

    /// State entered once the current pass has been flushed.
    pub const fn next(self, import_relations: bool) -> Self {
        match self {
            Self::ImportingPoints => Self::ImportingPaths,
            Self::ImportingPaths if import_relations => Self::ImportingRelations,
            Self::ImportingPaths | Self::ImportingRelations | Self::Done => Self::Done,
        }
    }
}

/// Settings for one import run.
#[derive(Debug, Clone, PartialEq)]
pub struct ImportOptions {
    /// Rectangle points must fall inside.
    pub zone: ZoneBoundary,
    /// Pending statement count above which the writer flushes.
    pub batch_threshold: usize,
    /// Lookup worker threads per pass.
    pub workers: usize,
    /// Per-lookup timeout.
    pub lookup_timeout: Duration,
    /// Whether the relations pass runs.
    pub import_relations: bool,
    /// Records between progress lines; zero disables them.
    pub progress_every: u64,
    /// Codec for the stored tag column.
    pub tag_codec: TagCodec,
}

impl ImportOptions {
    /// Options with default tuning for `zone`.
    pub fn new(zone: ZoneBoundary) -> Self {
        Self {
            zone,
            batch_threshold: DEFAULT_BATCH_THRESHOLD,
            workers: DEFAULT_WORKERS,
            lookup_timeout: DEFAULT_LOOKUP_TIMEOUT,
            import_relations: true,
            progress_every: DEFAULT_PROGRESS_EVERY,
            tag_codec: TagCodec::default(),
        }
    }

    /// Override the flush threshold.
    #[must_use]
    pub fn with_batch_threshold(mut self, batch_threshold: usize) -> Self {
        self.batch_threshold = batch_threshold;
        self
    }

    /// Override the number of lookup workers.
    #[must_use]
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Override the per-lookup timeout.
    #[must_use]
    pub fn with_lookup_timeout(mut self, lookup_timeout: Duration) -> Self {
        self.lookup_timeout = lookup_timeout;
        self
    }

    /// Enable or disable the relations pass.
    #[must_use]
    pub fn with_relations(mut self, import_relations: bool) -> Self {
        self.import_relations = import_relations;
        self
    }

    /// Override the progress interval.
    #[must_use]
    pub fn with_progress_every(mut self, progress_every: u64) -> Self {
        self.progress_every = progress_every;
        self
    }

    /// Override the tag codec.
    #[must_use]
    pub fn with_tag_codec(mut self, tag_codec: TagCodec) -> Self {
        self.tag_codec = tag_codec;
        self
    }
}

/// Errors that abort an import run.
#[derive(Debug, Error)]
pub enum ImportError {
    /// The feed could not be read.
    #[error("failed to read history feed")]
    Feed {
        /// Feed failure.
        #[from]
        source: FeedError,
    },
    /// A batch could not be committed.
    #[error(transparent)]
    Flush(#[from] FlushError),
    /// Member lookups failed.
    #[error(transparent)]
    Resolve(#[from] ResolveError),
    /// The lookup pool for a pass could not be started.
    #[error("failed to start lookup workers for {kind} pass")]
    Pool {
        /// Pass being started.
        kind: EntityKind,
        /// Pool failure.
        #[source]
        source: PoolError,
    },
    /// Tags could not be encoded.
    #[error("failed to encode tags of {kind} {owner}")]
    Tags {
        /// Kind of the feature.
        kind: EntityKind,
        /// Feature whose tags failed.
        owner: FeatureKey,
        /// Codec failure.
        #[source]
        source: TagCodecError,
    },
    /// The target database could not be opened.
    #[error(transparent)]
    OpenStore(#[from] OpenStoreError),
    /// The read-only history view could not be opened.
    #[error(transparent)]
    OpenHistory(#[from] SqliteHistoryStoreError),
}

/// Drives a feed through filtering, resolution and batched writes.
#[derive(Debug)]
pub struct ImportPipeline<'f, F: RecordFeed + ?Sized, S: BatchSink> {
    feed: &'f F,
    writer: BatchWriter<S>,
    options: ImportOptions,
    state: ImportState,
    stats: ImportStats,
}

impl<'f, F: RecordFeed + ?Sized, S: BatchSink> ImportPipeline<'f, F, S> {
    /// Prepare a run starting with the points pass.
    pub fn new(feed: &'f F, writer: BatchWriter<S>, options: ImportOptions) -> Self {
        let stats = ImportStats {
            relations_skipped: !options.import_relations,
            ..ImportStats::default()
        };
        Self {
            feed,
            writer,
            options,
            state: ImportState::ImportingPoints,
            stats,
        }
    }

    /// Current state.
    pub const fn state(&self) -> ImportState {
        self.state
    }

    /// Statistics gathered so far.
    pub const fn stats(&self) -> &ImportStats {
        &self.stats
    }

    /// Run the pass for the current state, flush it and advance.
    pub fn step(&mut self) -> Result<ImportState, ImportError> {
        let Some(kind) = self.state.kind() else {
            return Ok(ImportState::Done);
        };
        info!("starting {kind} pass");
        match kind {
            EntityKind::Points => self.import_points()?,
            EntityKind::Paths => self.import_paths()?,
            EntityKind::Relations => self.import_relations()?,
        }
        self.writer.finalize_entity_kind(kind)?;
        self.stats.batches = self.writer.flushes();
        let stats = self.stats.kind(kind);
        info!(
            "finished {kind} pass: {} added, {} discarded",
            stats.added, stats.discarded
        );
        self.state = self.state.next(self.options.import_relations);
        Ok(self.state)
    }

    /// Run every remaining pass and return the run statistics.
    pub fn run(&mut self) -> Result<ImportStats, ImportError> {
        let started = Instant::now();
        while self.state != ImportState::Done {
            self.step()?;
        }
        self.stats.elapsed += started.elapsed();
        Ok(self.stats.clone())
    }

    /// Give back the writer, for example to inspect its sink.
    pub fn into_writer(self) -> BatchWriter<S> {
        self.writer
    }

    fn import_points(&mut self) -> Result<(), ImportError> {
        let feed = self.feed;
        drive_pass(
            |visit| feed.scan_points(visit),
            |point| self.accept_point(point),
        )
    }

    fn import_paths(&mut self) -> Result<(), ImportError> {
        let feed = self.feed;
        let resolver = self.start_resolver(EntityKind::Paths)?;
        drive_pass(
            |visit| feed.scan_paths(visit),
            |path| self.accept_path(&resolver, path),
        )
    }

    fn import_relations(&mut self) -> Result<(), ImportError> {
        let feed = self.feed;
        let resolver = self.start_resolver(EntityKind::Relations)?;
        drive_pass(
            |visit| feed.scan_relations(visit),
            |relation| self.accept_relation(&resolver, relation),
        )
    }

    fn start_resolver(&self, kind: EntityKind) -> Result<MemberResolver, ImportError> {
        MemberResolver::new(
            self.writer.history(),
            self.options.workers,
            self.options.lookup_timeout,
        )
        .map_err(|source| ImportError::Pool { kind, source })
    }

    fn accept_point(&mut self, point: PointFeature) -> Result<(), ImportError> {
        let kind = EntityKind::Points;
        if self.options.zone.contains(point.lon, point.lat) {
            let feature = self.feature_row(kind, &point.meta)?;
            self.writer.add(WriteSet::point(PointRow {
                feature,
                lon: point.lon,
                lat: point.lat,
            }))?;
            self.stats.kind_mut(kind).record_added(&point.meta);
        } else {
            debug!("point {} lies outside the zone", point.meta.key());
            self.stats.kind_mut(kind).record_discarded();
        }
        self.report_progress(kind);
        Ok(())
    }

    fn accept_path(
        &mut self,
        resolver: &MemberResolver,
        path: PathFeature,
    ) -> Result<(), ImportError> {
        let kind = EntityKind::Paths;
        let resolved = resolver.resolve_path(&path)?;
        self.accept_owner(kind, &path.meta, resolved, WriteSet::path)
    }

    fn accept_relation(
        &mut self,
        resolver: &MemberResolver,
        relation: RelationFeature,
    ) -> Result<(), ImportError> {
        let kind = EntityKind::Relations;
        let resolved = resolver.resolve_relation(&relation)?;
        self.accept_owner(kind, &relation.meta, resolved, WriteSet::relation)
    }

    fn accept_owner<R>(
        &mut self,
        kind: EntityKind,
        meta: &EntityMeta,
        resolved: Resolved<R>,
        write_set: fn(FeatureRow, Vec<R>) -> WriteSet,
    ) -> Result<(), ImportError> {
        let stats = self.stats.kind_mut(kind);
        stats.fallback_lookups += resolved.fallbacks;
        stats.timed_out_lookups += resolved.timed_out;
        if resolved.discarded() {
            debug!("{kind} {} has no resolvable members", meta.key());
            stats.record_discarded();
        } else {
            let owner = self.feature_row(kind, meta)?;
            self.writer.add(write_set(owner, resolved.rows))?;
            self.stats.kind_mut(kind).record_added(meta);
        }
        self.report_progress(kind);
        Ok(())
    }

    fn feature_row(&mut self, kind: EntityKind, meta: &EntityMeta) -> Result<FeatureRow, ImportError> {
        let encoded = self
            .options
            .tag_codec
            .encode(meta.tags.iter().map(|(key, value)| (key, value)))
            .map_err(|source| ImportError::Tags {
                kind,
                owner: meta.key(),
                source,
            })?;
        if encoded.is_lossy() {
            debug!(
                "{kind} {}: tag sanitisation altered {} pairs and merged {} keys",
                meta.key(),
                encoded.stripped_pairs,
                encoded.collisions
            );
            self.stats.kind_mut(kind).sanitised_tags += 1;
        }
        Ok(FeatureRow::from_meta(meta, encoded.json))
    }

    fn report_progress(&self, kind: EntityKind) {
        let every = self.options.progress_every;
        let stats = self.stats.kind(kind);
        let processed = stats.processed();
        if every > 0 && processed.is_multiple_of(every) {
            info!(
                "{kind}: {processed} processed, {} added, {} discarded",
                stats.added, stats.discarded
            );
        }
    }
}

/// Feed one pass through `handle`, stopping the scan at the first error.
fn drive_pass<T>(
    scan: impl FnOnce(&mut Visitor<'_, T>) -> Result<(), FeedError>,
    mut handle: impl FnMut(T) -> Result<(), ImportError>,
) -> Result<(), ImportError> {
    let mut failure = None;
    scan(&mut |record| match handle(record) {
        Ok(()) => ControlFlow::Continue(()),
        Err(err) => {
            failure = Some(err);
            ControlFlow::Break(())
        }
    })?;
    failure.map_or(Ok(()), Err)
}

/// Import `feed` into the SQLite database at `database`.
///
/// The database and its schema are created when missing. Member lookups read
/// through separate read-only connections, so they only see committed
/// batches.
///
/// # Examples
/// ```no_run
/// use camino::Utf8Path;
/// use osm_history_core::{MemoryFeed, ZoneBoundary};
/// use osm_history_data::{ImportOptions, import_into_sqlite};
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let zone = ZoneBoundary::from_degrees(7.407896, 43.724759, 7.441014, 43.752079)?;
/// let stats = import_into_sqlite(
///     &MemoryFeed::default(),
///     Utf8Path::new("monaco.db"),
///     ImportOptions::new(zone),
/// )?;
/// println!("{stats}");
/// # Ok(())
/// # }
/// ```
pub fn import_into_sqlite<F: RecordFeed + ?Sized>(
    feed: &F,
    database: &Utf8Path,
    options: ImportOptions,
) -> Result<ImportStats, ImportError> {
    info!("importing history into {database}");
    let sink = SqliteBatchSink::open(database)?;
    let history: Arc<dyn HistoryStore> =
        Arc::new(SqliteHistoryStore::open(database.as_std_path())?);
    let writer = BatchWriter::new(sink, history, options.batch_threshold);
    ImportPipeline::new(feed, writer, options).run()
}
