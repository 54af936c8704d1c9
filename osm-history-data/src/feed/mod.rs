//! Record feeds backed by files on disk.

mod pbf;

pub use pbf::{PbfFeedError, PbfHistoryFeed};
