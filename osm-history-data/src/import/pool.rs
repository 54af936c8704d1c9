//! Persistent worker pool answering member lookups against the history.
//!
//! Workers are named OS threads pulling jobs from one shared queue. Each
//! call to [`LookupPool::run_all`] gets its own reply channel, and every
//! reply carries the index of its request, so results come back in request
//! order whatever order the workers finish in. Workers stamp the moment they
//! pick a job up; timeouts run from that stamp.

use std::{
    sync::{
        Arc, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicBool, Ordering},
        mpsc::{self, Receiver, RecvTimeoutError, Sender},
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use chrono::{DateTime, Utc};
use log::{debug, warn};
use osm_history_core::{HistoryStore, HistoryStoreError, MemberKind, PointResolution};
use thiserror::Error;

/// One question for the history store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookupRequest {
    /// Point version current at `at`.
    PointAsOf {
        /// Referenced point.
        point_id: i64,
        /// Creation instant of the owner.
        at: DateTime<Utc>,
    },
    /// Whether any version of a feature was committed.
    Exists {
        /// Kind of the referenced feature.
        kind: MemberKind,
        /// Referenced feature.
        id: i64,
    },
}

/// Answer to a [`LookupRequest`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookupOutcome {
    /// Result of a point lookup.
    Point(Option<PointResolution>),
    /// Result of an existence check.
    Exists(bool),
    /// No answer arrived within the lookup timeout.
    TimedOut,
}

/// Errors raised when the pool cannot be started.
#[derive(Debug, Error)]
pub enum PoolError {
    /// A pool needs at least one worker.
    #[error("lookup pool needs at least one worker")]
    NoWorkers,
    /// The operating system refused to start a worker thread.
    #[error("failed to spawn lookup worker {index}")]
    Spawn {
        /// Zero-based worker index.
        index: usize,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

/// Errors raised while running a set of lookups.
#[derive(Debug, Error)]
pub enum LookupError {
    /// The pool has been shut down.
    #[error("lookup pool is closed")]
    PoolClosed,
    /// Every worker stopped before answering.
    #[error("lookup workers exited before answering")]
    WorkersExited,
    /// The history store failed to answer a request.
    #[error("lookup {index} failed")]
    Store {
        /// Position of the failed request.
        index: usize,
        /// Store failure.
        #[source]
        source: HistoryStoreError,
    },
}

struct Job {
    index: usize,
    request: LookupRequest,
    call: Arc<Call>,
    reply: Sender<Reply>,
}

/// State shared between one `run_all` call and the workers serving it.
struct Call {
    abandoned: AtomicBool,
    started: Mutex<Vec<Option<Instant>>>,
}

impl Call {
    fn new(count: usize) -> Self {
        Self {
            abandoned: AtomicBool::new(false),
            started: Mutex::new(vec![None; count]),
        }
    }

    fn abandon(&self) {
        self.abandoned.store(true, Ordering::Release);
    }

    fn is_abandoned(&self) -> bool {
        self.abandoned.load(Ordering::Acquire)
    }

    fn started(&self) -> MutexGuard<'_, Vec<Option<Instant>>> {
        self.started.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Stamp the moment a worker picked up request `index`.
    fn mark_started(&self, index: usize) -> Instant {
        let now = Instant::now();
        if let Some(slot) = self.started().get_mut(index) {
            *slot = Some(now);
        }
        now
    }
}

struct Reply {
    index: usize,
    result: Result<LookupOutcome, HistoryStoreError>,
}

/// Fixed-size pool of lookup workers sharing one history store.
pub struct LookupPool {
    sender: Option<Sender<Job>>,
    workers: Vec<JoinHandle<()>>,
    timeout: Duration,
}

impl std::fmt::Debug for LookupPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LookupPool")
            .field("workers", &self.workers.len())
            .field("timeout", &self.timeout)
            .field("open", &self.sender.is_some())
            .finish()
    }
}

impl LookupPool {
    /// Start `workers` threads answering lookups against `history`.
    ///
    /// A lookup still unanswered `timeout` after a worker picked it up is
    /// reported as [`LookupOutcome::TimedOut`].
    pub fn new(
        history: Arc<dyn HistoryStore>,
        workers: usize,
        timeout: Duration,
    ) -> Result<Self, PoolError> {
        if workers == 0 {
            return Err(PoolError::NoWorkers);
        }
        let (sender, receiver) = mpsc::channel::<Job>();
        let receiver = Arc::new(Mutex::new(receiver));
        let mut pool = Self {
            sender: Some(sender),
            workers: Vec::with_capacity(workers),
            timeout,
        };
        for index in 0..workers {
            let history = Arc::clone(&history);
            let receiver = Arc::clone(&receiver);
            let handle = thread::Builder::new()
                .name(format!("osm-lookup-{index}"))
                .spawn(move || worker_loop(history.as_ref(), &receiver, timeout))
                .map_err(|source| PoolError::Spawn { index, source })?;
            pool.workers.push(handle);
        }
        Ok(pool)
    }

    /// Number of worker threads.
    #[must_use]
    pub fn size(&self) -> usize {
        self.workers.len()
    }

    /// Run every request and return the outcomes in request order.
    ///
    /// The timeout of a request starts when a worker picks it up, so requests
    /// queued behind a slow one wait for a free worker. A request still running
    /// once its timeout elapses reports [`LookupOutcome::TimedOut`] and any late
    /// answer is ignored. A store failure aborts the whole call, and workers
    /// skip its requests that are still queued.
    pub fn run_all(&self, requests: &[LookupRequest]) -> Result<Vec<LookupOutcome>, LookupError> {
        if requests.is_empty() {
            return Ok(Vec::new());
        }
        let sender = self.sender.as_ref().ok_or(LookupError::PoolClosed)?;
        let (reply, replies) = mpsc::channel();
        let call = Arc::new(Call::new(requests.len()));
        for (index, request) in requests.iter().enumerate() {
            let job = Job {
                index,
                request: *request,
                call: Arc::clone(&call),
                reply: reply.clone(),
            };
            if sender.send(job).is_err() {
                call.abandon();
                return Err(LookupError::WorkersExited);
            }
        }
        drop(reply);

        let result = self.collect(&call, &replies, requests.len());
        call.abandon();
        result
    }

    fn collect(
        &self,
        call: &Call,
        replies: &Receiver<Reply>,
        count: usize,
    ) -> Result<Vec<LookupOutcome>, LookupError> {
        let mut slots: Vec<Option<LookupOutcome>> = vec![None; count];
        let mut remaining = count;
        while remaining > 0 {
            let wait = self
                .next_expiry(call, &slots)
                .map_or(self.timeout, |expiry| {
                    expiry.saturating_duration_since(Instant::now())
                });
            match replies.recv_timeout(wait) {
                Ok(Reply { index, result }) => {
                    let outcome = result.map_err(|source| LookupError::Store { index, source })?;
                    if let Some(slot) = slots.get_mut(index).filter(|slot| slot.is_none()) {
                        *slot = Some(outcome);
                        remaining -= 1;
                    }
                }
                Err(RecvTimeoutError::Timeout) => remaining -= self.expire(call, &mut slots),
                Err(RecvTimeoutError::Disconnected) => return Err(LookupError::WorkersExited),
            }
        }
        Ok(slots
            .into_iter()
            .map(|slot| slot.unwrap_or(LookupOutcome::TimedOut))
            .collect())
    }

    /// Earliest instant at which a running, unanswered request times out.
    fn next_expiry(&self, call: &Call, slots: &[Option<LookupOutcome>]) -> Option<Instant> {
        call.started()
            .iter()
            .zip(slots)
            .filter(|(_, outcome)| outcome.is_none())
            .filter_map(|(started, _)| started.and_then(|at| at.checked_add(self.timeout)))
            .min()
    }

    /// Mark every request running for longer than the timeout as timed out.
    /// Queued requests are left alone.
    fn expire(&self, call: &Call, slots: &mut [Option<LookupOutcome>]) -> usize {
        let starts = call.started();
        let mut expired = 0;
        for (slot, started) in slots.iter_mut().zip(starts.iter()) {
            if slot.is_none() && started.is_some_and(|at| at.elapsed() >= self.timeout) {
                *slot = Some(LookupOutcome::TimedOut);
                expired += 1;
            }
        }
        if expired > 0 {
            warn!("{expired} lookups still running after {:?}", self.timeout);
        }
        expired
    }
}

impl Drop for LookupPool {
    fn drop(&mut self) {
        drop(self.sender.take());
        for handle in self.workers.drain(..) {
            let name = handle.thread().name().map(str::to_owned);
            if handle.join().is_err() {
                warn!("lookup worker {name:?} panicked");
            }
        }
    }
}

fn worker_loop(history: &dyn HistoryStore, receiver: &Mutex<Receiver<Job>>, timeout: Duration) {
    loop {
        let next = receiver
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .recv();
        let Ok(job) = next else {
            break;
        };
        if job.call.is_abandoned() {
            continue;
        }
        let started = job.call.mark_started(job.index);
        let result = match job.request {
            LookupRequest::PointAsOf { point_id, at } => history
                .point_as_of(point_id, at)
                .map(LookupOutcome::Point),
            LookupRequest::Exists { kind, id } => {
                history.latest_exists(kind, id).map(LookupOutcome::Exists)
            }
        };
        let elapsed = started.elapsed();
        let result = match result {
            Ok(_) if elapsed > timeout => {
                warn!(
                    "lookup {} took {elapsed:?}, over the {timeout:?} timeout",
                    job.index
                );
                Ok(LookupOutcome::TimedOut)
            }
            other => other,
        };
        let reply = Reply {
            index: job.index,
            result,
        };
        if job.reply.send(reply).is_err() {
            debug!("lookup {} answered after its caller stopped waiting", job.index);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use osm_history_core::test_support::{Gate, MemoryHistoryStore, at};
    use rstest::rstest;

    fn pool(store: MemoryHistoryStore, workers: usize, timeout: Duration) -> LookupPool {
        LookupPool::new(Arc::new(store), workers, timeout).expect("start pool")
    }

    fn exists(id: i64) -> LookupRequest {
        LookupRequest::Exists {
            kind: MemberKind::Path,
            id,
        }
    }

    #[rstest]
    fn rejects_empty_pool() {
        let err = LookupPool::new(
            Arc::new(MemoryHistoryStore::default()),
            0,
            Duration::from_secs(1),
        )
        .expect_err("zero workers fails");
        assert!(matches!(err, PoolError::NoWorkers));
    }

    #[rstest]
    fn returns_outcomes_in_request_order() {
        // Earlier requests are slower, so completion order is reversed.
        let store = MemoryHistoryStore::default()
            .with_path(1)
            .with_path(3)
            .with_delay(1, Duration::from_millis(60))
            .with_delay(2, Duration::from_millis(30));
        let pool = pool(store, 4, Duration::from_secs(5));
        let outcomes = pool
            .run_all(&[exists(1), exists(2), exists(3)])
            .expect("lookups succeed");
        assert_eq!(
            outcomes,
            [
                LookupOutcome::Exists(true),
                LookupOutcome::Exists(false),
                LookupOutcome::Exists(true),
            ]
        );
    }

    #[rstest]
    fn answers_point_lookups() {
        let store = MemoryHistoryStore::default().with_point(7, 1, at(2010, 1, 1), 5, 6);
        let pool = pool(store, 2, Duration::from_secs(5));
        let outcomes = pool
            .run_all(&[LookupRequest::PointAsOf {
                point_id: 7,
                at: at(2011, 1, 1),
            }])
            .expect("lookup succeeds");
        let [LookupOutcome::Point(Some(found))] = outcomes.as_slice() else {
            panic!("unexpected outcomes {outcomes:?}");
        };
        assert_eq!(found.record.lon, 5);
    }

    #[rstest]
    fn stalled_lookup_times_out() {
        let gate = Gate::default();
        let store = MemoryHistoryStore::default()
            .with_path(1)
            .with_path(2)
            .with_gate(2, &gate);
        let pool = pool(store, 2, Duration::from_millis(250));
        let outcomes = pool
            .run_all(&[exists(1), exists(2)])
            .expect("timeouts are not errors");
        gate.open();
        assert_eq!(
            outcomes,
            [LookupOutcome::Exists(true), LookupOutcome::TimedOut]
        );
    }

    #[rstest]
    fn queued_lookups_wait_for_a_free_worker() {
        // One worker: requests 2..=4 only start once the stalled request 1
        // finishes, long after its own timeout.
        let gate = Gate::default();
        let store = Arc::new(
            MemoryHistoryStore::default()
                .with_path(1)
                .with_path(2)
                .with_path(3)
                .with_path(4)
                .with_gate(1, &gate),
        );
        let pool = LookupPool::new(
            Arc::clone(&store) as Arc<dyn HistoryStore>,
            1,
            Duration::from_millis(250),
        )
        .expect("start pool");
        let opener = gate.open_after(Duration::from_millis(750));
        let outcomes = pool
            .run_all(&[exists(1), exists(2), exists(3), exists(4)])
            .expect("timeouts are not errors");
        opener.join().expect("gate opener");
        assert_eq!(
            outcomes,
            [
                LookupOutcome::TimedOut,
                LookupOutcome::Exists(true),
                LookupOutcome::Exists(true),
                LookupOutcome::Exists(true),
            ]
        );
        assert_eq!(store.lookups(), 4);
    }

    #[rstest]
    fn late_answers_do_not_leak_into_the_next_call() {
        let gate = Gate::default();
        let store = MemoryHistoryStore::default()
            .with_path(1)
            .with_path(5)
            .with_gate(1, &gate);
        let pool = pool(store, 2, Duration::from_millis(100));
        let first = pool.run_all(&[exists(1)]).expect("first call");
        gate.open();
        let second = pool.run_all(&[exists(5), exists(6)]).expect("second call");
        assert_eq!(first, [LookupOutcome::TimedOut]);
        assert_eq!(
            second,
            [LookupOutcome::Exists(true), LookupOutcome::Exists(false)]
        );
    }

    #[rstest]
    fn store_failure_is_fatal() {
        let store = MemoryHistoryStore::default().failing_on(9);
        let pool = pool(store, 2, Duration::from_secs(5));
        let err = pool
            .run_all(&[exists(1), exists(9)])
            .expect_err("store failure aborts");
        assert!(matches!(err, LookupError::Store { index: 1, .. }), "got {err:?}");
    }

    #[rstest]
    fn pool_is_reusable_across_calls() {
        let store = MemoryHistoryStore::default().with_path(4);
        let pool = pool(store, 3, Duration::from_secs(5));
        for _ in 0..5 {
            let outcomes = pool.run_all(&[exists(4), exists(5)]).expect("lookups");
            assert_eq!(
                outcomes,
                [LookupOutcome::Exists(true), LookupOutcome::Exists(false)]
            );
        }
        assert_eq!(pool.size(), 3);
    }

    #[rstest]
    fn empty_request_list_returns_immediately() {
        let pool = pool(MemoryHistoryStore::default(), 1, Duration::from_secs(5));
        assert!(pool.run_all(&[]).expect("no lookups").is_empty());
    }
}
