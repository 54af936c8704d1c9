//! Run-scoped import statistics.

use std::{fmt, time::Duration};

use crate::{EntityKind, EntityMeta};

/// Counters for one record kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct KindStats {
    /// Versions written to the store.
    pub added: u64,
    /// Versions dropped by the zone filter or member resolution.
    pub discarded: u64,
    /// Written versions with version number 1.
    pub created: u64,
    /// Written versions past version 1 that are not deletions.
    pub modified: u64,
    /// Written versions marking a deletion.
    pub deleted: u64,
    /// Point members resolved to their earliest version.
    pub fallback_lookups: u64,
    /// Member lookups abandoned after the timeout.
    pub timed_out_lookups: u64,
    /// Written versions whose tags lost data during sanitisation.
    pub sanitised_tags: u64,
}

impl KindStats {
    /// Count a written version and classify it by edit type.
    pub fn record_added(&mut self, meta: &EntityMeta) {
        self.added += 1;
        if meta.deleted {
            self.deleted += 1;
        } else if meta.version == 1 {
            self.created += 1;
        } else {
            self.modified += 1;
        }
    }

    /// Count a discarded version.
    pub fn record_discarded(&mut self) {
        self.discarded += 1;
    }

    /// Versions seen during the pass.
    #[must_use]
    pub const fn processed(&self) -> u64 {
        self.added + self.discarded
    }
}

/// Statistics for a whole import run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportStats {
    /// Point counters.
    pub points: KindStats,
    /// Path counters.
    pub paths: KindStats,
    /// Relation counters.
    pub relations: KindStats,
    /// Transactions committed by the writer.
    pub batches: u64,
    /// Wall-clock duration of the run.
    pub elapsed: Duration,
    /// Whether the relations pass was disabled.
    pub relations_skipped: bool,
}

impl ImportStats {
    /// Counters for `kind`.
    #[must_use]
    pub const fn kind(&self, kind: EntityKind) -> &KindStats {
        match kind {
            EntityKind::Points => &self.points,
            EntityKind::Paths => &self.paths,
            EntityKind::Relations => &self.relations,
        }
    }

    /// Mutable counters for `kind`.
    pub fn kind_mut(&mut self, kind: EntityKind) -> &mut KindStats {
        match kind {
            EntityKind::Points => &mut self.points,
            EntityKind::Paths => &mut self.paths,
            EntityKind::Relations => &mut self.relations,
        }
    }
}

impl fmt::Display for ImportStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for kind in EntityKind::ALL {
            if kind == EntityKind::Relations && self.relations_skipped {
                writeln!(f, "{kind:<10} skipped")?;
                continue;
            }
            let stats = self.kind(kind);
            writeln!(
                f,
                "{kind:<10} added {} discarded {} (created {}, modified {}, deleted {}) \
                 lookups: {} earliest-version fallbacks, {} timed out; {} tag sets sanitised",
                stats.added,
                stats.discarded,
                stats.created,
                stats.modified,
                stats.deleted,
                stats.fallback_lookups,
                stats.timed_out_lookups,
                stats.sanitised_tags
            )?;
        }
        write!(
            f,
            "{} batches in {:.1}s",
            self.batches,
            self.elapsed.as_secs_f64()
        )
    }
}
