//! Runtime flags and construction-time settings
//!
//! Two kinds of configuration live here. [`ConfigStore`] is the small set of
//! flags the control channel mutates while the program runs (profiling on/off,
//! which sinks receive reports, sort order); reads happen on hot
//! instrumentation paths so everything is an atomic, never a lock.
//! [`ProfilerConfig`] is the validated, build-once settings object passed to
//! [`crate::Profiler::new`].

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::time::Duration;

use crate::error::{Error, Result};

/// Report sink selection bits, combinable in [`ConfigStore`].
pub mod sink {
    /// Emit reports to stdout.
    pub const CONSOLE: u8 = 1 << 0;
    /// Emit reports to the configured report file.
    pub const FILE: u8 = 1 << 1;
}

/// Ordering applied to report entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortMode {
    /// Identity order (line, then file, then function), a stable fallback.
    None,
    /// Descending by total cost time.
    Cost,
    /// Descending by total call count.
    Calls,
}

impl SortMode {
    fn from_u8(value: u8) -> SortMode {
        match value {
            1 => SortMode::Cost,
            2 => SortMode::Calls,
            _ => SortMode::None,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            SortMode::None => 0,
            SortMode::Cost => 1,
            SortMode::Calls => 2,
        }
    }

    /// Short human-readable name, used by the `state` control command.
    pub fn name(self) -> &'static str {
        match self {
            SortMode::None => "none",
            SortMode::Cost => "cost",
            SortMode::Calls => "calls",
        }
    }
}

/// Process-wide runtime flags, mutable from any thread.
///
/// The control-server loop writes these while instrumentation call sites read
/// them concurrently; plain atomics keep both sides wait-free.
#[derive(Debug)]
pub struct ConfigStore {
    enabled: AtomicBool,
    sinks: AtomicU8,
    sort: AtomicU8,
}

impl ConfigStore {
    pub fn new() -> Self {
        Self {
            enabled: AtomicBool::new(false),
            sinks: AtomicU8::new(0),
            sort: AtomicU8::new(SortMode::None.as_u8()),
        }
    }

    /// Whether instrumentation call sites should record anything.
    pub fn enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    pub fn set_enabled(&self, on: bool) {
        self.enabled.store(on, Ordering::Relaxed);
    }

    /// Current sink bit-set (see [`sink`]).
    pub fn sinks(&self) -> u8 {
        self.sinks.load(Ordering::Relaxed)
    }

    pub fn add_sink(&self, bit: u8) {
        self.sinks.fetch_or(bit, Ordering::Relaxed);
    }

    pub fn clear_sinks(&self) {
        self.sinks.store(0, Ordering::Relaxed);
    }

    pub fn sort_mode(&self) -> SortMode {
        SortMode::from_u8(self.sort.load(Ordering::Relaxed))
    }

    pub fn set_sort_mode(&self, mode: SortMode) {
        self.sort.store(mode.as_u8(), Ordering::Relaxed);
    }

    /// One-line dump of all flags, the reply body of the `state` command.
    pub fn describe(&self) -> String {
        let sinks = self.sinks();
        let mut targets = Vec::new();
        if sinks & sink::CONSOLE != 0 {
            targets.push("console");
        }
        if sinks & sink::FILE != 0 {
            targets.push("file");
        }
        let targets = if targets.is_empty() {
            "none".to_string()
        } else {
            targets.join("|")
        };
        format!(
            "profiling: {}, sinks: {}, sort: {}",
            if self.enabled() { "enabled" } else { "disabled" },
            targets,
            self.sort_mode().name(),
        )
    }
}

impl Default for ConfigStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Construction-time profiler settings.
#[derive(Debug, Clone)]
pub struct ProfilerConfig {
    /// Interval between resource samples while a section is active.
    pub sample_interval: Duration,
    /// Path the file sink writes reports to.
    pub report_path: PathBuf,
    /// Control socket path override; `None` derives one from the PID.
    pub control_socket: Option<PathBuf>,
}

impl ProfilerConfig {
    pub fn builder() -> ProfilerConfigBuilder {
        ProfilerConfigBuilder::default()
    }

    fn validate(&self) -> Result<()> {
        if self.sample_interval.is_zero() {
            return Err(Error::InvalidConfiguration(
                "sample interval cannot be zero".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for ProfilerConfig {
    fn default() -> Self {
        Self {
            sample_interval: Duration::from_millis(100),
            report_path: PathBuf::from("sprof_report.txt"),
            control_socket: None,
        }
    }
}

/// Builder for [`ProfilerConfig`].
#[derive(Debug, Default)]
pub struct ProfilerConfigBuilder {
    sample_interval_ms: Option<u64>,
    report_path: Option<PathBuf>,
    control_socket: Option<PathBuf>,
}

impl ProfilerConfigBuilder {
    pub fn sample_interval_ms(mut self, ms: u64) -> Self {
        self.sample_interval_ms = Some(ms);
        self
    }

    pub fn report_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.report_path = Some(path.into());
        self
    }

    pub fn control_socket(mut self, path: impl Into<PathBuf>) -> Self {
        self.control_socket = Some(path.into());
        self
    }

    pub fn build(self) -> Result<ProfilerConfig> {
        let defaults = ProfilerConfig::default();
        let config = ProfilerConfig {
            sample_interval: self
                .sample_interval_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.sample_interval),
            report_path: self.report_path.unwrap_or(defaults.report_path),
            control_socket: self.control_socket,
        };
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_rejects_zero_interval() {
        let config = ProfilerConfig::builder().sample_interval_ms(0).build();
        assert!(config.is_err());
    }

    #[test]
    fn builder_applies_overrides() -> Result<()> {
        let config = ProfilerConfig::builder()
            .sample_interval_ms(50)
            .report_path("/tmp/report.txt")
            .build()?;

        assert_eq!(config.sample_interval, Duration::from_millis(50));
        assert_eq!(config.report_path, PathBuf::from("/tmp/report.txt"));
        assert!(config.control_socket.is_none());
        Ok(())
    }

    #[test]
    fn store_flags_round_trip() {
        let store = ConfigStore::new();
        assert!(!store.enabled());

        store.set_enabled(true);
        store.add_sink(sink::FILE);
        store.set_sort_mode(SortMode::Cost);

        assert!(store.enabled());
        assert_eq!(store.sinks(), sink::FILE);
        assert_eq!(store.sort_mode(), SortMode::Cost);

        let state = store.describe();
        assert!(state.contains("enabled"));
        assert!(state.contains("file"));
        assert!(state.contains("cost"));

        store.clear_sinks();
        assert_eq!(store.sinks(), 0);
    }
}
