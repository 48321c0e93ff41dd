//! Process stats reading and peak/average accumulation
//!
//! [`ProcessStatsReader`] is the capability the resource sampler polls: an
//! instantaneous CPU utilization percent and resident memory for the current
//! process. A reading of `None` means "no sample this round" and is never
//! treated as zero. [`SysinfoStatsReader`] is the production backend; on Linux
//! the CPU rate is derived from `/proc/self/stat` tick deltas for better
//! accuracy, everywhere else sysinfo's own rate computation is used.

use serde::Serialize;
use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};

#[cfg(target_os = "linux")]
use std::time::Instant;

/// Peak/average accumulator over a stream of integer readings.
///
/// `avg` is `total / count` with integer truncation, a continuously
/// recomputed mean rather than a precise statistic. Negative readings are the
/// "no reading available yet" sentinel and are discarded entirely: they
/// perturb neither peak nor total nor count.
#[derive(Debug, Default, Clone, Copy, Serialize)]
pub struct RunningStat {
    pub peak: i64,
    pub total: i64,
    pub count: i64,
}

impl RunningStat {
    pub fn update(&mut self, value: i64) {
        if value < 0 {
            return;
        }
        if value > self.peak {
            self.peak = value;
        }
        self.total += value;
        self.count += 1;
    }

    pub fn avg(&self) -> i64 {
        if self.count == 0 {
            0
        } else {
            self.total / self.count
        }
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }
}

/// Source of CPU%/memory readings for the current process.
///
/// CPU usage is a rate (cumulative kernel+user time at two points divided by
/// wall time), so implementations keep a baseline between calls;
/// `reset_baseline` invalidates it after an idle period so the first sample
/// after reactivation seeds fresh instead of computing a rate against stale
/// data.
pub trait ProcessStatsReader: Send {
    /// Instantaneous CPU utilization percent, `None` when no sample is
    /// available this round (e.g. the rate baseline was just seeded).
    fn cpu_percent(&mut self) -> Option<i64>;

    /// Resident memory of the current process in bytes.
    fn memory_bytes(&mut self) -> Option<i64>;

    /// Invalidate rate baselines; called when sampling resumes after idling.
    fn reset_baseline(&mut self);
}

/// CPU rate clock backed by `/proc/self/stat` tick deltas.
#[cfg(target_os = "linux")]
#[derive(Debug, Default)]
struct ProcCpuClock {
    last: Option<(Instant, u64)>,
}

#[cfg(target_os = "linux")]
impl ProcCpuClock {
    fn percent(&mut self) -> Option<i64> {
        let stat = procfs::process::Process::myself().ok()?.stat().ok()?;
        let ticks = stat.utime + stat.stime;
        let now = Instant::now();

        let ticks_per_sec = unsafe { libc::sysconf(libc::_SC_CLK_TCK) };
        if ticks_per_sec <= 0 {
            return None;
        }

        let percent = match self.last {
            // First read seeds the baseline and reports nothing.
            None => None,
            Some((then, then_ticks)) => {
                let wall_secs = now.duration_since(then).as_secs_f64();
                if wall_secs > 0.0 {
                    let cpu_secs =
                        ticks.saturating_sub(then_ticks) as f64 / ticks_per_sec as f64;
                    Some((cpu_secs / wall_secs * 100.0) as i64)
                } else {
                    None
                }
            }
        };

        self.last = Some((now, ticks));
        percent
    }

    fn reset(&mut self) {
        self.last = None;
    }
}

/// Production stats reader for the current process.
pub struct SysinfoStatsReader {
    system: System,
    pid: Pid,
    #[cfg(target_os = "linux")]
    cpu_clock: ProcCpuClock,
    #[cfg(not(target_os = "linux"))]
    cpu_primed: bool,
}

impl SysinfoStatsReader {
    pub fn for_current_process() -> Self {
        Self {
            system: System::new(),
            pid: Pid::from(std::process::id() as usize),
            #[cfg(target_os = "linux")]
            cpu_clock: ProcCpuClock::default(),
            #[cfg(not(target_os = "linux"))]
            cpu_primed: false,
        }
    }

    fn refresh(&mut self, kind: ProcessRefreshKind) {
        self.system
            .refresh_processes_specifics(ProcessesToUpdate::Some(&[self.pid]), true, kind);
    }
}

impl ProcessStatsReader for SysinfoStatsReader {
    fn cpu_percent(&mut self) -> Option<i64> {
        #[cfg(target_os = "linux")]
        {
            self.cpu_clock.percent()
        }

        #[cfg(not(target_os = "linux"))]
        {
            self.refresh(ProcessRefreshKind::nothing().with_cpu());
            let usage = self.system.process(self.pid)?.cpu_usage();
            if self.cpu_primed {
                Some(usage as i64)
            } else {
                // sysinfo needs two refreshes before cpu_usage means anything.
                self.cpu_primed = true;
                None
            }
        }
    }

    fn memory_bytes(&mut self) -> Option<i64> {
        self.refresh(ProcessRefreshKind::nothing().with_memory());
        self.system
            .process(self.pid)
            .map(|process| process.memory() as i64)
    }

    fn reset_baseline(&mut self) {
        #[cfg(target_os = "linux")]
        {
            self.cpu_clock.reset();
        }

        #[cfg(not(target_os = "linux"))]
        {
            self.cpu_primed = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn running_stat_tracks_peak_and_truncated_avg() {
        let mut stat = RunningStat::default();
        assert!(stat.is_empty());
        assert_eq!(stat.avg(), 0);

        stat.update(10);
        stat.update(5);
        stat.update(20);

        assert_eq!(stat.peak, 20);
        assert_eq!(stat.total, 35);
        assert_eq!(stat.count, 3);
        // 35 / 3 truncates.
        assert_eq!(stat.avg(), 11);
    }

    #[test]
    fn running_stat_discards_negative_readings() {
        let mut stat = RunningStat::default();
        stat.update(8);
        stat.update(-1);
        stat.update(-100);

        assert_eq!(stat.peak, 8);
        assert_eq!(stat.total, 8);
        assert_eq!(stat.count, 1);
        assert_eq!(stat.avg(), 8);
    }

    #[test]
    fn sysinfo_reader_reports_memory() {
        let mut reader = SysinfoStatsReader::for_current_process();
        let memory = reader.memory_bytes();
        assert!(memory.is_some(), "current process should have an RSS reading");
        assert!(memory.unwrap() > 0);
    }

    #[test]
    fn sysinfo_reader_seeds_cpu_baseline_first() {
        let mut reader = SysinfoStatsReader::for_current_process();
        // First read after a reset seeds the baseline.
        reader.reset_baseline();
        assert!(reader.cpu_percent().is_none());

        std::thread::sleep(std::time::Duration::from_millis(30));
        if let Some(percent) = reader.cpu_percent() {
            assert!(percent >= 0);
        }
    }
}
