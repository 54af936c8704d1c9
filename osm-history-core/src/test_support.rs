//! Test-only, in-memory `HistoryStore` implementation used by unit and
//! behaviour tests.

use std::{
    collections::{HashMap, HashSet},
    io,
    sync::{
        Arc, Condvar, Mutex, PoisonError,
        atomic::{AtomicUsize, Ordering},
    },
    thread::{self, JoinHandle},
    time::Duration,
};

use chrono::{DateTime, TimeZone, Utc};

use crate::{
    FeatureKey, HistoryStore, HistoryStoreError, MemberKind, PointMatch, PointRecord,
    PointResolution,
};

/// Midnight UTC on the given date.
///
/// # Panics
///
/// Panics when the date does not exist.
pub fn at(year: i32, month: u32, day: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(year, month, day, 0, 0, 0)
        .single()
        .unwrap_or_else(|| panic!("{year}-{month}-{day} is not a valid date"))
}

/// Latch holding lookups back until a test opens it.
#[derive(Debug, Clone, Default)]
pub struct Gate {
    state: Arc<(Mutex<bool>, Condvar)>,
}

impl Gate {
    /// Release every lookup waiting on the gate, now and later.
    pub fn open(&self) {
        let (open, changed) = &*self.state;
        *open.lock().unwrap_or_else(PoisonError::into_inner) = true;
        changed.notify_all();
    }

    /// Open the gate from a helper thread once `delay` has passed.
    #[must_use]
    pub fn open_after(&self, delay: Duration) -> JoinHandle<()> {
        let gate = self.clone();
        thread::spawn(move || {
            thread::sleep(delay);
            gate.open();
        })
    }

    fn wait(&self) {
        let (open, changed) = &*self.state;
        let mut is_open = open.lock().unwrap_or_else(PoisonError::into_inner);
        while !*is_open {
            is_open = changed
                .wait(is_open)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }
}

/// In-memory history with optional per-id delays, gates and failures.
///
/// Delays, gates and failures apply to every lookup of the given id, whatever its
/// kind, which lets tests exercise timeouts and fatal store errors.
#[derive(Debug, Default)]
pub struct MemoryHistoryStore {
    points: HashMap<i64, Vec<PointRecord>>,
    paths: HashSet<i64>,
    relations: HashSet<i64>,
    delays: HashMap<i64, Duration>,
    gates: HashMap<i64, Gate>,
    failing: HashSet<i64>,
    lookups: AtomicUsize,
}

impl MemoryHistoryStore {
    /// Add a committed point version.
    #[must_use]
    pub fn with_point(
        mut self,
        id: i64,
        version: i64,
        created_at: DateTime<Utc>,
        lon: i32,
        lat: i32,
    ) -> Self {
        self.points.entry(id).or_default().push(PointRecord {
            key: FeatureKey::new(id, version),
            created_at,
            lon,
            lat,
        });
        self
    }

    /// Mark a path id as committed.
    #[must_use]
    pub fn with_path(mut self, id: i64) -> Self {
        self.paths.insert(id);
        self
    }

    /// Mark a relation id as committed.
    #[must_use]
    pub fn with_relation(mut self, id: i64) -> Self {
        self.relations.insert(id);
        self
    }

    /// Sleep for `delay` before answering any lookup of `id`.
    #[must_use]
    pub fn with_delay(mut self, id: i64, delay: Duration) -> Self {
        self.delays.insert(id, delay);
        self
    }

    /// Hold every lookup of `id` until `gate` opens.
    #[must_use]
    pub fn with_gate(mut self, id: i64, gate: &Gate) -> Self {
        self.gates.insert(id, gate.clone());
        self
    }

    /// Fail every lookup of `id`.
    #[must_use]
    pub fn failing_on(mut self, id: i64) -> Self {
        self.failing.insert(id);
        self
    }

    /// Number of lookups answered or failed so far.
    #[must_use]
    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }

    fn enter(&self, operation: &'static str, id: i64) -> Result<(), HistoryStoreError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delays.get(&id) {
            thread::sleep(*delay);
        }
        if let Some(gate) = self.gates.get(&id) {
            gate.wait();
        }
        if self.failing.contains(&id) {
            return Err(HistoryStoreError::Query {
                operation,
                id,
                source: Box::new(io::Error::other("injected failure")),
            });
        }
        Ok(())
    }
}

impl HistoryStore for MemoryHistoryStore {
    fn point_as_of(
        &self,
        point_id: i64,
        at: DateTime<Utc>,
    ) -> Result<Option<PointResolution>, HistoryStoreError> {
        self.enter("point lookup", point_id)?;
        let Some(versions) = self.points.get(&point_id) else {
            return Ok(None);
        };
        let as_of = versions
            .iter()
            .filter(|record| record.created_at <= at)
            .max_by_key(|record| (record.created_at, record.key.version));
        if let Some(record) = as_of {
            return Ok(Some(PointResolution {
                record: *record,
                matched: PointMatch::AsOf,
            }));
        }
        Ok(versions
            .iter()
            .min_by_key(|record| (record.created_at, record.key.version))
            .map(|record| PointResolution {
                record: *record,
                matched: PointMatch::EarliestFallback,
            }))
    }

    fn latest_exists(&self, kind: MemberKind, id: i64) -> Result<bool, HistoryStoreError> {
        self.enter("existence check", id)?;
        Ok(match kind {
            MemberKind::Point => self.points.contains_key(&id),
            MemberKind::Path => self.paths.contains(&id),
            MemberKind::Relation => self.relations.contains(&id),
        })
    }
}
