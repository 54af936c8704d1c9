//! History import: member resolution, batched writes and the pass pipeline.

mod batch;
mod pipeline;
mod pool;
mod resolver;
mod sqlite;

pub use batch::{
    BatchSink, BatchSinkError, BatchWriter, DEFAULT_BATCH_THRESHOLD, FlushError, WriteSet,
    WriteStatement,
};
pub use pipeline::{
    DEFAULT_PROGRESS_EVERY, ImportError, ImportOptions, ImportPipeline, ImportState,
    import_into_sqlite,
};
pub use pool::{LookupError, LookupOutcome, LookupPool, LookupRequest, PoolError};
pub use resolver::{
    DEFAULT_LOOKUP_TIMEOUT, DEFAULT_WORKERS, MemberResolver, ResolveError, Resolved,
};
pub use sqlite::SqliteBatchSink;
