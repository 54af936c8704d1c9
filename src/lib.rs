//! Facade crate for the OSM history importer.
//!
//! This crate re-exports the core domain types and exposes the SQLite history
//! store and the import pipeline behind feature flags.

#![forbid(unsafe_code)]

pub use osm_history_core::{
    EncodedTags, EntityKind, EntityMeta, FeatureKey, FeatureRow, FeedError, HistoryStore,
    HistoryStoreError, ImportStats, KindStats, MemberKind, MemoryFeed, PathFeature,
    PathMemberRow, PointFeature, PointMatch, PointRecord, PointResolution, PointRow,
    RecordFeed, RelationFeature, RelationMember, RelationMemberRow, TagCodec, TagCodecError,
    Visitor, ZoneBoundary, ZoneError,
};

#[cfg(feature = "store-sqlite")]
pub use osm_history_core::{SqliteHistoryStore, SqliteHistoryStoreError};

#[cfg(feature = "import")]
pub use osm_history_data::{
    BatchSink, BatchWriter, ImportError, ImportOptions, ImportPipeline, ImportState,
    MemberResolver, PbfFeedError, PbfHistoryFeed, SqliteBatchSink, import_into_sqlite,
};
