//! Resolution of path and relation members against committed history.

use std::{sync::Arc, time::Duration};

use log::debug;
use osm_history_core::{
    EntityKind, FeatureKey, HistoryStore, MemberKind, PathFeature, PathMemberRow, PointRecord,
    RelationFeature, RelationMemberRow,
};
use thiserror::Error;

use super::pool::{LookupError, LookupOutcome, LookupPool, LookupRequest, PoolError};

/// Worker threads used when none are configured.
pub const DEFAULT_WORKERS: usize = 25;

/// Per-lookup timeout used when none is configured.
pub const DEFAULT_LOOKUP_TIMEOUT: Duration = Duration::from_secs(5);

/// Surviving member rows of one owner plus lookup diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolved<R> {
    /// Member rows numbered densely from zero in original order.
    pub rows: Vec<R>,
    /// Point members matched through the earliest-version fallback.
    pub fallbacks: u64,
    /// Members dropped because their lookup timed out.
    pub timed_out: u64,
}

impl<R> Resolved<R> {
    /// Whether no member survived, so the owner must be discarded.
    #[must_use]
    pub fn discarded(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Error raised when an owner's members could not be resolved.
#[derive(Debug, Error)]
#[error("failed to resolve members of {kind} {owner}")]
pub struct ResolveError {
    /// Kind of the owner.
    pub kind: EntityKind,
    /// Owner whose members were being resolved.
    pub owner: FeatureKey,
    /// Lookup failure.
    #[source]
    pub source: LookupError,
}

/// Keeps the members of a path or relation that resolve against history.
///
/// A point member survives when some version of the point was committed; the
/// version current at the owner's creation instant is recorded. Path and
/// relation members survive when any version of them was committed.
#[derive(Debug)]
pub struct MemberResolver {
    pool: LookupPool,
}

impl MemberResolver {
    /// Start a resolver backed by a pool of `workers` lookup threads.
    pub fn new(
        history: Arc<dyn HistoryStore>,
        workers: usize,
        timeout: Duration,
    ) -> Result<Self, PoolError> {
        LookupPool::new(history, workers, timeout).map(|pool| Self { pool })
    }

    /// Resolve the point references of a path version.
    pub fn resolve_path(&self, path: &PathFeature) -> Result<Resolved<PathMemberRow>, ResolveError> {
        let owner = path.meta.key();
        let at = path.meta.created_at;
        let requests: Vec<_> = path
            .nodes
            .iter()
            .map(|&point_id| LookupRequest::PointAsOf { point_id, at })
            .collect();
        let outcomes = self
            .pool
            .run_all(&requests)
            .map_err(|source| ResolveError {
                kind: EntityKind::Paths,
                owner,
                source,
            })?;
        let resolved = renumber(&path.nodes, &outcomes, |&point_id, record, sequence| {
            record.map(|record| PathMemberRow {
                path: owner,
                point_id,
                point_version: record.key.version,
                sequence,
                lon: record.lon,
                lat: record.lat,
            })
        });
        log_diagnostics(EntityKind::Paths, owner, &resolved);
        Ok(resolved)
    }

    /// Resolve the typed members of a relation version.
    pub fn resolve_relation(
        &self,
        relation: &RelationFeature,
    ) -> Result<Resolved<RelationMemberRow>, ResolveError> {
        let owner = relation.meta.key();
        let at = relation.meta.created_at;
        let requests: Vec<_> = relation
            .members
            .iter()
            .map(|member| match member.kind {
                MemberKind::Point => LookupRequest::PointAsOf {
                    point_id: member.member_id,
                    at,
                },
                kind => LookupRequest::Exists {
                    kind,
                    id: member.member_id,
                },
            })
            .collect();
        let outcomes = self
            .pool
            .run_all(&requests)
            .map_err(|source| ResolveError {
                kind: EntityKind::Relations,
                owner,
                source,
            })?;
        let resolved = renumber(&relation.members, &outcomes, |member, _, sequence| {
            Some(RelationMemberRow {
                relation: owner,
                member_id: member.member_id,
                kind: member.kind,
                role: member.role.clone(),
                sequence,
            })
        });
        log_diagnostics(EntityKind::Relations, owner, &resolved);
        Ok(resolved)
    }
}

/// Pair members with their outcomes and number the survivors from zero.
fn renumber<M, R>(
    members: &[M],
    outcomes: &[LookupOutcome],
    mut build: impl FnMut(&M, Option<&PointRecord>, i64) -> Option<R>,
) -> Resolved<R> {
    let mut resolved = Resolved {
        rows: Vec::new(),
        fallbacks: 0,
        timed_out: 0,
    };
    let mut sequence: i64 = 0;
    for (member, outcome) in members.iter().zip(outcomes) {
        let record = match outcome {
            LookupOutcome::Point(Some(resolution)) => {
                if resolution.is_fallback() {
                    resolved.fallbacks += 1;
                }
                Some(&resolution.record)
            }
            LookupOutcome::Exists(true) => None,
            LookupOutcome::Point(None) | LookupOutcome::Exists(false) => continue,
            LookupOutcome::TimedOut => {
                resolved.timed_out += 1;
                continue;
            }
        };
        if let Some(row) = build(member, record, sequence) {
            resolved.rows.push(row);
            sequence += 1;
        }
    }
    resolved
}

fn log_diagnostics<R>(kind: EntityKind, owner: FeatureKey, resolved: &Resolved<R>) {
    if resolved.fallbacks > 0 {
        debug!(
            "{kind} {owner}: {} point members had no version at creation time and used their earliest one",
            resolved.fallbacks
        );
    }
    if resolved.timed_out > 0 {
        debug!(
            "{kind} {owner}: {} member lookups timed out",
            resolved.timed_out
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use osm_history_core::test_support::{Gate, MemoryHistoryStore, at};
    use osm_history_core::{EntityMeta, RelationMember};
    use rstest::{fixture, rstest};

    #[fixture]
    fn resolver() -> MemberResolver {
        let store = MemoryHistoryStore::default()
            .with_point(1, 1, at(2010, 1, 1), 10, 10)
            .with_point(1, 2, at(2014, 1, 1), 11, 11)
            .with_point(3, 1, at(2010, 1, 1), 30, 30)
            .with_point(5, 1, at(2018, 1, 1), 50, 50)
            .with_path(20)
            .with_relation(30);
        MemberResolver::new(Arc::new(store), 4, Duration::from_secs(5)).expect("start resolver")
    }

    fn path(nodes: Vec<i64>) -> PathFeature {
        PathFeature::new(EntityMeta::new(100, 1, at(2012, 6, 1)), nodes)
    }

    #[rstest]
    fn renumbers_surviving_points_densely(resolver: MemberResolver) {
        let resolved = resolver
            .resolve_path(&path(vec![1, 2, 3]))
            .expect("resolve");
        let summary: Vec<_> = resolved
            .rows
            .iter()
            .map(|row| (row.point_id, row.sequence))
            .collect();
        assert_eq!(summary, [(1, 0), (3, 1)]);
        assert!(!resolved.discarded());
    }

    #[rstest]
    fn records_version_current_at_owner_creation(resolver: MemberResolver) {
        let resolved = resolver.resolve_path(&path(vec![1])).expect("resolve");
        let row = resolved.rows[0];
        assert_eq!((row.point_version, row.lon, row.lat), (1, 10, 10));
    }

    #[rstest]
    fn counts_earliest_version_fallbacks(resolver: MemberResolver) {
        let resolved = resolver.resolve_path(&path(vec![5])).expect("resolve");
        assert_eq!(resolved.rows.len(), 1);
        assert_eq!(resolved.rows[0].point_version, 1);
        assert_eq!(resolved.fallbacks, 1);
    }

    #[rstest]
    fn path_without_known_points_is_discarded(resolver: MemberResolver) {
        let resolved = resolver.resolve_path(&path(vec![7, 8])).expect("resolve");
        assert!(resolved.discarded());
    }

    #[rstest]
    fn empty_path_is_discarded(resolver: MemberResolver) {
        assert!(resolver.resolve_path(&path(Vec::new())).expect("resolve").discarded());
    }

    #[rstest]
    fn relation_keeps_resolved_members_with_roles(resolver: MemberResolver) {
        let relation = RelationFeature::new(
            EntityMeta::new(200, 1, at(2015, 1, 1)),
            vec![
                RelationMember::new(20, MemberKind::Path, Some("outer")),
                RelationMember::new(21, MemberKind::Path, Some("inner")),
                RelationMember::new(3, MemberKind::Point, Some("label")),
                RelationMember::new(30, MemberKind::Relation, None),
            ],
        );
        let resolved = resolver.resolve_relation(&relation).expect("resolve");
        let summary: Vec<_> = resolved
            .rows
            .iter()
            .map(|row| (row.member_id, row.kind, row.role.as_deref(), row.sequence))
            .collect();
        assert_eq!(
            summary,
            [
                (20, MemberKind::Path, Some("outer"), 0),
                (3, MemberKind::Point, Some("label"), 1),
                (30, MemberKind::Relation, None, 2),
            ]
        );
    }

    #[rstest]
    fn timed_out_members_are_dropped_and_counted() {
        let gate = Gate::default();
        let store = MemoryHistoryStore::default()
            .with_point(1, 1, at(2010, 1, 1), 0, 0)
            .with_point(2, 1, at(2010, 1, 1), 0, 0)
            .with_gate(2, &gate);
        let resolver = MemberResolver::new(Arc::new(store), 2, Duration::from_millis(250))
            .expect("start resolver");
        let resolved = resolver.resolve_path(&path(vec![1, 2])).expect("resolve");
        gate.open();
        assert_eq!(resolved.rows.len(), 1);
        assert_eq!(resolved.rows[0].point_id, 1);
        assert_eq!(resolved.timed_out, 1);
    }

    #[rstest]
    fn members_queued_behind_a_stalled_lookup_survive() {
        let gate = Gate::default();
        let store = MemoryHistoryStore::default()
            .with_point(1, 1, at(2010, 1, 1), 0, 0)
            .with_point(2, 1, at(2010, 1, 1), 0, 0)
            .with_point(3, 1, at(2010, 1, 1), 0, 0)
            .with_point(4, 1, at(2010, 1, 1), 0, 0)
            .with_gate(1, &gate);
        let resolver = MemberResolver::new(Arc::new(store), 1, Duration::from_millis(250))
            .expect("start resolver");
        let opener = gate.open_after(Duration::from_millis(750));
        let resolved = resolver
            .resolve_path(&path(vec![1, 2, 3, 4]))
            .expect("resolve");
        opener.join().expect("gate opener");
        assert!(!resolved.discarded());
        assert_eq!(resolved.timed_out, 1);
        let kept: Vec<_> = resolved
            .rows
            .iter()
            .map(|row| (row.point_id, row.sequence))
            .collect();
        assert_eq!(kept, [(2, 0), (3, 1), (4, 2)]);
    }

    #[rstest]
    fn store_failure_names_the_owner() {
        let store = MemoryHistoryStore::default().failing_on(4);
        let resolver =
            MemberResolver::new(Arc::new(store), 1, Duration::from_secs(5)).expect("start");
        let err = resolver
            .resolve_path(&path(vec![4]))
            .expect_err("store failure is fatal");
        assert_eq!(err.kind, EntityKind::Paths);
        assert_eq!(err.owner, FeatureKey::new(100, 1));
    }
}
