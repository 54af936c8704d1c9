//! Storage and import logic for OSM full-history extracts.
//!
//! Responsibilities:
//! - Decode full-history PBF files into record feeds.
//! - Create and migrate the SQLite history schema.
//! - Resolve path and relation members against committed history.
//! - Write accepted versions in large transactional batches.
//!
//! Boundaries:
//! - Do not encode domain rules (live in `osm-history-core`).
//! - Keep lookups on dedicated worker threads; the pipeline itself is
//!   single-threaded.
//!
//! Invariants:
//! - Points are committed before paths and paths before relations.
//! - No global mutable state.

pub mod feed;
pub mod import;
pub mod store;

pub use feed::{PbfFeedError, PbfHistoryFeed};
pub use import::{
    BatchSink, BatchSinkError, BatchWriter, FlushError, ImportError, ImportOptions,
    ImportPipeline, ImportState, MemberResolver, SqliteBatchSink, WriteSet, WriteStatement,
    import_into_sqlite,
};
pub use store::{OpenStoreError, SchemaError, open_store};
