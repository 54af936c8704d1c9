//! Read access to committed feature history.
//!
//! The `HistoryStore` trait answers the two questions member resolution needs:
//! which version of a point was current at an instant, and whether any
//! version of a path or relation has been committed. Implementations must
//! only observe committed rows.

use std::{error::Error as StdError, sync::Arc};

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::{FeatureKey, MemberKind};

#[cfg(feature = "store-sqlite")]
mod sqlite;

#[cfg(feature = "store-sqlite")]
pub use sqlite::{SqliteHistoryStore, SqliteHistoryStoreError};

/// Committed point version returned by [`HistoryStore::point_as_of`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PointRecord {
    /// Identity of the matched version.
    pub key: FeatureKey,
    /// Creation instant of the matched version.
    pub created_at: DateTime<Utc>,
    /// Longitude in degrees scaled by 10^7.
    pub lon: i32,
    /// Latitude in degrees scaled by 10^7.
    pub lat: i32,
}

/// How a point lookup found its version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointMatch {
    /// The newest version created at or before the requested instant.
    AsOf,
    /// No version predates the instant; the earliest version was used.
    EarliestFallback,
}

/// Result of a point lookup together with how it matched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PointResolution {
    /// Matched point version.
    pub record: PointRecord,
    /// Matching rule that produced `record`.
    pub matched: PointMatch,
}

impl PointResolution {
    /// Whether the lookup fell back to the earliest version.
    pub const fn is_fallback(&self) -> bool {
        matches!(self.matched, PointMatch::EarliestFallback)
    }
}

/// Errors raised by [`HistoryStore`] implementations.
#[derive(Debug, Error)]
pub enum HistoryStoreError {
    /// The backing store failed to answer a query.
    #[error("{operation} failed for feature {id}")]
    Query {
        /// Query being executed.
        operation: &'static str,
        /// Feature identifier that was looked up.
        id: i64,
        /// Underlying failure.
        #[source]
        source: Box<dyn StdError + Send + Sync>,
    },
    /// A stored creation timestamp could not be represented.
    #[error("stored timestamp {millis} for feature {id} is out of range")]
    InvalidTimestamp {
        /// Feature identifier whose row held the value.
        id: i64,
        /// Raw milliseconds since the Unix epoch.
        millis: i64,
    },
}

/// Read-only view of committed history used during member resolution.
///
/// Implementations are shared across lookup workers, hence `Send + Sync`.
///
/// # Examples
///
/// ```rust
/// use chrono::{DateTime, TimeZone, Utc};
/// use osm_history_core::{
///     FeatureKey, HistoryStore, HistoryStoreError, MemberKind, PointMatch, PointRecord,
///     PointResolution,
/// };
///
/// struct SinglePoint(PointRecord);
///
/// impl HistoryStore for SinglePoint {
///     fn point_as_of(
///         &self,
///         point_id: i64,
///         at: DateTime<Utc>,
///     ) -> Result<Option<PointResolution>, HistoryStoreError> {
///         if point_id != self.0.key.id {
///             return Ok(None);
///         }
///         let matched = if self.0.created_at <= at {
///             PointMatch::AsOf
///         } else {
///             PointMatch::EarliestFallback
///         };
///         Ok(Some(PointResolution { record: self.0, matched }))
///     }
///
///     fn latest_exists(&self, kind: MemberKind, id: i64) -> Result<bool, HistoryStoreError> {
///         Ok(kind == MemberKind::Point && id == self.0.key.id)
///     }
/// }
///
/// let created = Utc.with_ymd_and_hms(2011, 1, 1, 0, 0, 0).single().expect("valid date");
/// let store = SinglePoint(PointRecord { key: FeatureKey::new(1, 1), created_at: created, lon: 0, lat: 0 });
/// let earlier = Utc.with_ymd_and_hms(2010, 1, 1, 0, 0, 0).single().expect("valid date");
/// let found = store.point_as_of(1, earlier)?.expect("point exists");
/// assert!(found.is_fallback());
/// # Ok::<(), HistoryStoreError>(())
/// ```
pub trait HistoryStore: Send + Sync {
    /// Return the point version current at `at`.
    ///
    /// The newest version with `created_at <= at` wins. When every committed
    /// version is newer than `at`, the earliest one is returned and flagged
    /// as [`PointMatch::EarliestFallback`]. `None` means the point was never
    /// committed.
    fn point_as_of(
        &self,
        point_id: i64,
        at: DateTime<Utc>,
    ) -> Result<Option<PointResolution>, HistoryStoreError>;

    /// Report whether any version of a feature has been committed.
    fn latest_exists(&self, kind: MemberKind, id: i64) -> Result<bool, HistoryStoreError>;
}

impl<T: HistoryStore + ?Sized> HistoryStore for Arc<T> {
    fn point_as_of(
        &self,
        point_id: i64,
        at: DateTime<Utc>,
    ) -> Result<Option<PointResolution>, HistoryStoreError> {
        (**self).point_as_of(point_id, at)
    }

    fn latest_exists(&self, kind: MemberKind, id: i64) -> Result<bool, HistoryStoreError> {
        (**self).latest_exists(kind, id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{MemoryHistoryStore, at};
    use rstest::{fixture, rstest};

    #[fixture]
    fn store() -> MemoryHistoryStore {
        MemoryHistoryStore::default()
            .with_point(1, 1, at(2010, 1, 1), 10, 20)
            .with_point(1, 2, at(2012, 1, 1), 11, 21)
            .with_point(1, 3, at(2014, 1, 1), 12, 22)
            .with_path(5)
    }

    #[rstest]
    #[case(at(2011, 6, 1), 1)]
    #[case(at(2012, 1, 1), 2)]
    #[case(at(2013, 1, 1), 2)]
    #[case(at(2020, 1, 1), 3)]
    fn picks_newest_version_not_after_instant(
        store: MemoryHistoryStore,
        #[case] instant: DateTime<Utc>,
        #[case] expected: i64,
    ) {
        let found = store
            .point_as_of(1, instant)
            .expect("lookup succeeds")
            .expect("point exists");
        assert_eq!(found.record.key.version, expected);
        assert_eq!(found.matched, PointMatch::AsOf);
    }

    #[rstest]
    fn falls_back_to_earliest_version(store: MemoryHistoryStore) {
        let found = store
            .point_as_of(1, at(2000, 1, 1))
            .expect("lookup succeeds")
            .expect("point exists");
        assert_eq!(found.record.key, FeatureKey::new(1, 1));
        assert!(found.is_fallback());
    }

    #[rstest]
    fn unknown_point_is_absent(store: MemoryHistoryStore) {
        let found = store.point_as_of(99, at(2020, 1, 1)).expect("lookup succeeds");
        assert!(found.is_none());
    }

    #[rstest]
    #[case(MemberKind::Point, 1, true)]
    #[case(MemberKind::Path, 5, true)]
    #[case(MemberKind::Path, 1, false)]
    #[case(MemberKind::Relation, 5, false)]
    fn existence_checks_by_kind(
        store: MemoryHistoryStore,
        #[case] kind: MemberKind,
        #[case] id: i64,
        #[case] expected: bool,
    ) {
        assert_eq!(store.latest_exists(kind, id).expect("lookup succeeds"), expected);
    }

    #[rstest]
    fn shared_store_delegates(store: MemoryHistoryStore) {
        let shared: Arc<dyn HistoryStore> = Arc::new(store);
        assert!(shared.latest_exists(MemberKind::Path, 5).expect("lookup succeeds"));
    }
}
