//! Background resource sampling for active sections
//!
//! One sampler (and one polling thread) exists per section that asked for
//! resource statistics. Overlapping callers on the same section share the
//! thread through a reference count: the loop parks on a condition variable
//! while nobody is inside the section and wakes on the 0→1 transition. A fixed
//! polling interval bounds sampling overhead independent of call frequency.

use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::{debug, warn};
use serde::Serialize;

use crate::stats::{ProcessStatsReader, RunningStat};

/// Point-in-time view of a sampler's accumulators.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct ResourceSnapshot {
    /// CPU utilization percent, peak/average over the active span.
    pub cpu: RunningStat,
    /// Resident memory in bytes, peak/average over the active span.
    pub memory: RunningStat,
}

#[derive(Debug)]
struct SamplerState {
    active: u32,
    shutdown: bool,
    // The CPU rate baseline must be re-seeded whenever sampling resumes,
    // otherwise the first sample after an idle period computes a rate
    // against stale data.
    baseline_stale: bool,
    cpu: RunningStat,
    memory: RunningStat,
}

struct Shared {
    state: Mutex<SamplerState>,
    wakeup: Condvar,
}

/// Reference-counted background poller feeding CPU/memory readings into two
/// [`RunningStat`]s for the time span during which at least one caller is
/// inside the instrumented region.
pub struct ResourceSampler {
    shared: Arc<Shared>,
    worker: Option<JoinHandle<()>>,
}

impl ResourceSampler {
    /// Starts the polling thread. It parks immediately and samples only while
    /// the active-caller count is non-zero.
    pub fn spawn(reader: Box<dyn ProcessStatsReader>, interval: Duration) -> Self {
        let shared = Arc::new(Shared {
            state: Mutex::new(SamplerState {
                active: 0,
                shutdown: false,
                baseline_stale: true,
                cpu: RunningStat::default(),
                memory: RunningStat::default(),
            }),
            wakeup: Condvar::new(),
        });

        let worker_shared = Arc::clone(&shared);
        let worker = thread::Builder::new()
            .name("sprof-sampler".to_string())
            .spawn(move || sample_loop(worker_shared, reader, interval));
        // A process that cannot spawn the polling thread still gets timing
        // and call counts; the resource summary just stays empty.
        let worker = match worker {
            Ok(handle) => Some(handle),
            Err(err) => {
                warn!("cannot spawn sampler thread, resource stats disabled: {}", err);
                None
            }
        };

        Self { shared, worker }
    }

    /// Registers an active caller, waking the loop on the 0→1 transition.
    pub fn acquire(&self) {
        let mut state = self.shared.state.lock().expect("sampler lock poisoned");
        state.active += 1;
        if state.active == 1 {
            state.baseline_stale = true;
            self.shared.wakeup.notify_all();
        }
    }

    /// Drops an active caller; the loop goes idle when the last one leaves.
    ///
    /// A release without a matching acquire (the section mismatch path) is
    /// logged and ignored rather than driving the count negative.
    pub fn release(&self) {
        let mut state = self.shared.state.lock().expect("sampler lock poisoned");
        if state.active == 0 {
            debug!("sampler release without matching acquire");
            return;
        }
        state.active -= 1;
        if state.active == 0 {
            state.baseline_stale = true;
        }
    }

    /// Current peak/average accumulators.
    pub fn snapshot(&self) -> ResourceSnapshot {
        let state = self.shared.state.lock().expect("sampler lock poisoned");
        ResourceSnapshot {
            cpu: state.cpu,
            memory: state.memory,
        }
    }

    /// Number of callers currently inside the instrumented region.
    pub fn active_callers(&self) -> u32 {
        self.shared.state.lock().expect("sampler lock poisoned").active
    }
}

impl Drop for ResourceSampler {
    fn drop(&mut self) {
        {
            let mut state = self.shared.state.lock().expect("sampler lock poisoned");
            state.shutdown = true;
            self.shared.wakeup.notify_all();
        }
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

fn sample_loop(shared: Arc<Shared>, mut reader: Box<dyn ProcessStatsReader>, interval: Duration) {
    loop {
        // Park until a caller enters the section (or shutdown).
        let reseed = {
            let mut state = shared.state.lock().expect("sampler lock poisoned");
            while state.active == 0 && !state.shutdown {
                state = shared
                    .wakeup
                    .wait(state)
                    .expect("sampler lock poisoned");
            }
            if state.shutdown {
                return;
            }
            std::mem::replace(&mut state.baseline_stale, false)
        };

        if reseed {
            reader.reset_baseline();
        }

        // Readings happen outside the lock; a transient failure skips the
        // sample and never terminates the loop.
        let cpu = reader.cpu_percent();
        let memory = reader.memory_bytes();

        {
            let mut state = shared.state.lock().expect("sampler lock poisoned");
            match cpu {
                Some(value) => state.cpu.update(value),
                None => debug!("no CPU sample this round"),
            }
            match memory {
                Some(value) => state.memory.update(value),
                None => warn!("process memory reading unavailable, sample skipped"),
            }

            // Sleep one interval, but stay wakeable for shutdown.
            let deadline = Instant::now() + interval;
            loop {
                if state.shutdown {
                    return;
                }
                let now = Instant::now();
                if now >= deadline {
                    break;
                }
                let (next, _timeout) = shared
                    .wakeup
                    .wait_timeout(state, deadline - now)
                    .expect("sampler lock poisoned");
                state = next;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

    /// Deterministic reader for sampler tests; counts reads and baseline
    /// resets through shared atomics so the test can observe the loop.
    struct FakeReader {
        reads: Arc<AtomicU64>,
        resets: Arc<AtomicU64>,
        cpu: Arc<AtomicI64>,
    }

    impl ProcessStatsReader for FakeReader {
        fn cpu_percent(&mut self) -> Option<i64> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            let value = self.cpu.load(Ordering::SeqCst);
            if value < 0 {
                None
            } else {
                Some(value)
            }
        }

        fn memory_bytes(&mut self) -> Option<i64> {
            Some(4096)
        }

        fn reset_baseline(&mut self) {
            self.resets.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn fake_sampler(interval_ms: u64) -> (ResourceSampler, Arc<AtomicU64>, Arc<AtomicU64>, Arc<AtomicI64>) {
        let reads = Arc::new(AtomicU64::new(0));
        let resets = Arc::new(AtomicU64::new(0));
        let cpu = Arc::new(AtomicI64::new(10));
        let reader = FakeReader {
            reads: Arc::clone(&reads),
            resets: Arc::clone(&resets),
            cpu: Arc::clone(&cpu),
        };
        let sampler = ResourceSampler::spawn(Box::new(reader), Duration::from_millis(interval_ms));
        (sampler, reads, resets, cpu)
    }

    #[test]
    fn idle_sampler_does_not_read() {
        let (sampler, reads, _resets, _cpu) = fake_sampler(5);
        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(reads.load(Ordering::SeqCst), 0);
        drop(sampler);
    }

    #[test]
    fn overlapping_acquires_share_one_loop() {
        let (sampler, reads, _resets, _cpu) = fake_sampler(5);

        // Two overlapping callers: the loop must stay active across the
        // union of both intervals.
        sampler.acquire();
        sampler.acquire();
        std::thread::sleep(Duration::from_millis(40));
        sampler.release();
        assert_eq!(sampler.active_callers(), 1);

        let mid = reads.load(Ordering::SeqCst);
        std::thread::sleep(Duration::from_millis(40));
        let after_first_release = reads.load(Ordering::SeqCst);
        assert!(
            after_first_release > mid,
            "loop must keep sampling until the last caller leaves"
        );

        sampler.release();
        assert_eq!(sampler.active_callers(), 0);

        // Allow any in-flight iteration to finish, then verify idleness.
        std::thread::sleep(Duration::from_millis(30));
        let settled = reads.load(Ordering::SeqCst);
        std::thread::sleep(Duration::from_millis(60));
        assert_eq!(reads.load(Ordering::SeqCst), settled);
    }

    #[test]
    fn reactivation_reseeds_baseline() {
        let (sampler, _reads, resets, _cpu) = fake_sampler(5);

        sampler.acquire();
        std::thread::sleep(Duration::from_millis(30));
        sampler.release();
        std::thread::sleep(Duration::from_millis(30));

        let resets_after_first = resets.load(Ordering::SeqCst);
        assert!(resets_after_first >= 1);

        sampler.acquire();
        std::thread::sleep(Duration::from_millis(30));
        sampler.release();

        assert!(resets.load(Ordering::SeqCst) > resets_after_first);
    }

    #[test]
    fn negative_readings_leave_stats_untouched() {
        let (sampler, reads, _resets, cpu) = fake_sampler(5);
        cpu.store(-1, Ordering::SeqCst);

        sampler.acquire();
        std::thread::sleep(Duration::from_millis(40));
        sampler.release();

        assert!(reads.load(Ordering::SeqCst) > 0);
        let snapshot = sampler.snapshot();
        assert!(snapshot.cpu.is_empty());
        // Memory readings were fine all along.
        assert_eq!(snapshot.memory.peak, 4096);
    }

    #[test]
    fn sampler_without_worker_stays_inert() {
        // Degraded mode when the polling thread could not be spawned: the
        // counting interface keeps working and the summary stays empty.
        let sampler = ResourceSampler {
            shared: Arc::new(Shared {
                state: Mutex::new(SamplerState {
                    active: 0,
                    shutdown: false,
                    baseline_stale: true,
                    cpu: RunningStat::default(),
                    memory: RunningStat::default(),
                }),
                wakeup: Condvar::new(),
            }),
            worker: None,
        };

        sampler.acquire();
        assert_eq!(sampler.active_callers(), 1);
        sampler.release();

        let snapshot = sampler.snapshot();
        assert!(snapshot.cpu.is_empty());
        assert!(snapshot.memory.is_empty());
        drop(sampler);
    }

    #[test]
    fn release_without_acquire_is_ignored() {
        let (sampler, reads, _resets, _cpu) = fake_sampler(5);
        sampler.release();
        assert_eq!(sampler.active_callers(), 0);
        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(reads.load(Ordering::SeqCst), 0);
    }
}
