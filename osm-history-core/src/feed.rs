//! Typed record feeds consumed by the import pipeline.
//!
//! A feed delivers one kind of record per pass. Each `scan_*` call starts a
//! fresh pass from the beginning of the source, which lets the pipeline
//! finish every point before it resolves a single path.

use std::{error::Error as StdError, ops::ControlFlow};

use thiserror::Error;

use crate::{EntityKind, PathFeature, PointFeature, RelationFeature};

/// Errors raised while reading a feed.
#[derive(Debug, Error)]
pub enum FeedError {
    /// The source could not be opened for a pass.
    #[error("failed to open feed for {kind} pass")]
    Open {
        /// Pass being started.
        kind: EntityKind,
        /// Underlying failure.
        #[source]
        source: Box<dyn StdError + Send + Sync>,
    },
    /// A record could not be decoded.
    #[error("failed to decode {kind} record")]
    Decode {
        /// Pass during which decoding failed.
        kind: EntityKind,
        /// Underlying failure.
        #[source]
        source: Box<dyn StdError + Send + Sync>,
    },
}

/// Visitor invoked once per record; returning `Break` ends the pass early.
pub type Visitor<'a, T> = dyn FnMut(T) -> ControlFlow<()> + 'a;

/// Source of typed history records.
///
/// Implementations perform no filtering: every record in the source reaches
/// the visitor in source order.
pub trait RecordFeed {
    /// Visit every point version.
    fn scan_points(&self, visit: &mut Visitor<'_, PointFeature>) -> Result<(), FeedError>;

    /// Visit every path version.
    fn scan_paths(&self, visit: &mut Visitor<'_, PathFeature>) -> Result<(), FeedError>;

    /// Visit every relation version.
    fn scan_relations(&self, visit: &mut Visitor<'_, RelationFeature>) -> Result<(), FeedError>;
}

/// Feed backed by in-memory vectors.
///
/// # Examples
///
/// ```
/// use std::ops::ControlFlow;
///
/// use chrono::Utc;
/// use osm_history_core::{EntityMeta, MemoryFeed, PointFeature, RecordFeed};
///
/// let feed = MemoryFeed::default()
///     .with_point(PointFeature::new(EntityMeta::new(1, 1, Utc::now()), 0, 0));
/// let mut seen = 0;
/// feed.scan_points(&mut |_| {
///     seen += 1;
///     ControlFlow::Continue(())
/// })?;
/// assert_eq!(seen, 1);
/// # Ok::<(), osm_history_core::FeedError>(())
/// ```
#[derive(Debug, Clone, Default)]
pub struct MemoryFeed {
    points: Vec<PointFeature>,
    paths: Vec<PathFeature>,
    relations: Vec<RelationFeature>,
}

impl MemoryFeed {
    /// Append a point version.
    #[must_use]
    pub fn with_point(mut self, point: PointFeature) -> Self {
        self.points.push(point);
        self
    }

    /// Append a path version.
    #[must_use]
    pub fn with_path(mut self, path: PathFeature) -> Self {
        self.paths.push(path);
        self
    }

    /// Append a relation version.
    #[must_use]
    pub fn with_relation(mut self, relation: RelationFeature) -> Self {
        self.relations.push(relation);
        self
    }

    /// Number of records held across all kinds.
    #[must_use]
    pub fn len(&self) -> usize {
        self.points.len() + self.paths.len() + self.relations.len()
    }

    /// Whether the feed holds no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn replay<T: Clone>(items: &[T], visit: &mut Visitor<'_, T>) {
    for item in items {
        if visit(item.clone()).is_break() {
            break;
        }
    }
}

impl RecordFeed for MemoryFeed {
    fn scan_points(&self, visit: &mut Visitor<'_, PointFeature>) -> Result<(), FeedError> {
        replay(&self.points, visit);
        Ok(())
    }

    fn scan_paths(&self, visit: &mut Visitor<'_, PathFeature>) -> Result<(), FeedError> {
        replay(&self.paths, visit);
        Ok(())
    }

    fn scan_relations(&self, visit: &mut Visitor<'_, RelationFeature>) -> Result<(), FeedError> {
        replay(&self.relations, visit);
        Ok(())
    }
}
