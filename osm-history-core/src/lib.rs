//! Core domain types for importing OpenStreetMap-style edit history.
//!
//! The crate models versioned point, path and relation records, the
//! rectangular zone that restricts an import, the tag codec used for the
//! stored tag column, and the read-only [`HistoryStore`] contract that member
//! resolution runs against. Constructors that accept configuration return
//! `Result` so invalid input is rejected before any record is processed.

pub mod feed;
pub mod model;
pub mod stats;
pub mod store;
pub mod tags;
pub mod zone;

#[cfg(any(test, feature = "test-support"))]
pub mod test_support;

pub use feed::{FeedError, MemoryFeed, RecordFeed, Visitor};
pub use model::{
    EntityKind, EntityMeta, FeatureKey, FeatureRow, MemberKind, PathFeature, PathMemberRow,
    PointFeature, PointRow, RelationFeature, RelationMember, RelationMemberRow,
};
pub use stats::{ImportStats, KindStats};
pub use store::{HistoryStore, HistoryStoreError, PointMatch, PointRecord, PointResolution};
#[cfg(feature = "store-sqlite")]
pub use store::{SqliteHistoryStore, SqliteHistoryStoreError};
pub use tags::{EncodedTags, LEGACY_RESERVED_DELIMITER, TagCodec, TagCodecError};
pub use zone::{COORDINATE_SCALE, ZoneBoundary, ZoneError};
