//! Section identity and per-call-site aggregation
//!
//! A [`Section`] attributes elapsed wall time and call counts to one code
//! location under two hazards: re-entrant recursion on a single thread and
//! concurrent execution by multiple threads. Per-thread reference counts
//! handle both: the outermost `begin` on a thread starts the clock, the
//! matching outermost `end` stops it, and nested entries in between only bump
//! counters.

use std::cmp::Ordering as CmpOrdering;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::sampler::{ResourceSampler, ResourceSnapshot};

static NEXT_THREAD_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static THREAD_ID: u64 = NEXT_THREAD_ID.fetch_add(1, Ordering::Relaxed);
}

/// Stable identifier for the calling thread, assigned on first use.
pub fn current_thread_id() -> u64 {
    THREAD_ID.with(|id| *id)
}

/// Identity of an instrumented code location.
///
/// Equality and hashing are deliberately defined over `(file, function,
/// line)` only: `description` is informational, and two call sites differing
/// only in description text collide to the same section. Both `Hash` and
/// `PartialEq` go through the same key extraction so they can never diverge.
#[derive(Debug, Clone, Serialize)]
pub struct SectionId {
    /// Source file basename (no directory components).
    pub file: String,
    pub function: String,
    pub line: u32,
    /// Free-form description; not part of the identity.
    pub description: String,
}

impl SectionId {
    pub fn new(file: &str, function: &str, line: u32, description: &str) -> Self {
        Self {
            file: basename(file).to_string(),
            function: function.to_string(),
            line,
            description: description.to_string(),
        }
    }

    fn key(&self) -> (&str, &str, u32) {
        (&self.file, &self.function, self.line)
    }
}

impl PartialEq for SectionId {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for SectionId {}

impl Hash for SectionId {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key().hash(state);
    }
}

// Display ordering: by line, then file, then function.
impl Ord for SectionId {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        (self.line, &self.file, &self.function).cmp(&(other.line, &other.file, &other.function))
    }
}

impl PartialOrd for SectionId {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

fn basename(path: &str) -> &str {
    path.rsplit(['/', '\\']).next().unwrap_or(path)
}

/// Per-thread timing/call figures in a snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct ThreadStats {
    pub thread_id: u64,
    pub cost: Duration,
    pub calls: u64,
}

/// Point-in-time consistent view of a section, taken under its lock.
#[derive(Debug, Clone, Serialize)]
pub struct SectionSnapshot {
    pub threads: Vec<ThreadStats>,
    pub total_cost: Duration,
    pub total_calls: u64,
    /// True when begin/end calls are unbalanced (total reference count != 0).
    pub mismatch: bool,
    pub resources: Option<ResourceSnapshot>,
}

#[derive(Debug, Default)]
struct SectionState {
    begin_times: HashMap<u64, Instant>,
    costs: HashMap<u64, Duration>,
    calls: HashMap<u64, u64>,
    ref_counts: HashMap<u64, i64>,
    total_ref: i64,
}

/// Timing/call-count aggregator for one instrumented code location.
pub struct Section {
    state: Mutex<SectionState>,
    sampler: Option<ResourceSampler>,
}

impl Section {
    pub(crate) fn new(sampler: Option<ResourceSampler>) -> Self {
        Self {
            state: Mutex::new(SectionState::default()),
            sampler,
        }
    }

    /// Enters the section on the given thread.
    pub fn begin(&self, thread_id: u64) {
        let mut state = self.state.lock().expect("section lock poisoned");

        *state.calls.entry(thread_id).or_insert(0) += 1;

        // Only the outermost entry on this thread starts the clock; inner
        // recursive entries must not reset it.
        let ref_count = *state.ref_counts.get(&thread_id).unwrap_or(&0);
        if ref_count == 0 {
            state.begin_times.insert(thread_id, Instant::now());
            if let Some(sampler) = &self.sampler {
                sampler.acquire();
            }
        }

        *state.ref_counts.entry(thread_id).or_insert(0) += 1;
        state.total_ref += 1;
    }

    /// Leaves the section on the given thread.
    ///
    /// An `end` with no matching `begin` never panics: it drives the thread's
    /// reference count negative, which flags the section as mismatched in the
    /// next snapshot, and overwrites (rather than accumulates) the thread's
    /// cost with the elapsed time since the stale begin timestamp if one
    /// exists.
    pub fn end(&self, thread_id: u64) {
        let mut state = self.state.lock().expect("section lock poisoned");

        let entry = state.ref_counts.entry(thread_id).or_insert(0);
        *entry -= 1;
        let ref_count = *entry;
        state.total_ref -= 1;

        if ref_count <= 0 {
            if let Some(&begin) = state.begin_times.get(&thread_id) {
                let elapsed = begin.elapsed();
                if ref_count == 0 {
                    *state.costs.entry(thread_id).or_insert(Duration::ZERO) += elapsed;
                } else {
                    state.costs.insert(thread_id, elapsed);
                }
            }
            if let Some(sampler) = &self.sampler {
                sampler.release();
            }
        }
    }

    /// Takes a consistent snapshot of all counters under the section lock.
    pub fn snapshot(&self) -> SectionSnapshot {
        let state = self.state.lock().expect("section lock poisoned");

        let mut thread_ids: Vec<u64> = state
            .calls
            .keys()
            .chain(state.costs.keys())
            .copied()
            .collect();
        thread_ids.sort_unstable();
        thread_ids.dedup();

        let mut threads = Vec::with_capacity(thread_ids.len());
        let mut total_cost = Duration::ZERO;
        let mut total_calls = 0u64;
        for thread_id in thread_ids {
            let cost = state.costs.get(&thread_id).copied().unwrap_or(Duration::ZERO);
            let calls = state.calls.get(&thread_id).copied().unwrap_or(0);
            total_cost += cost;
            total_calls += calls;
            threads.push(ThreadStats {
                thread_id,
                cost,
                calls,
            });
        }

        SectionSnapshot {
            threads,
            total_cost,
            total_calls,
            mismatch: state.total_ref != 0,
            resources: self.sampler.as_ref().map(ResourceSampler::snapshot),
        }
    }

    pub fn has_sampler(&self) -> bool {
        self.sampler.is_some()
    }
}
