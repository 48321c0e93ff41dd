//! In-process section profiler with live resource sampling.
//!
//! sprof measures wall-clock cost, call frequency, and resource consumption
//! (CPU%, memory) of marked code regions in a running multi-threaded program.
//! A side-channel control socket toggles instrumentation and dumps reports
//! without restarting the instrumented process; the `sprofctl` binary drives
//! it from outside.
//!
//! ```no_run
//! use sprof::{measure, Profiler, ProfilerConfig};
//!
//! let profiler = Profiler::new(ProfilerConfig::default());
//! profiler.config().set_enabled(true);
//!
//! fn work(profiler: &Profiler) {
//!     let _section = measure!(profiler, "hot loop");
//!     // ... the region being measured ...
//! }
//!
//! work(&profiler);
//! println!("{}", profiler.report().to_text());
//! ```

pub mod config;
#[cfg(unix)]
pub mod control;
pub mod error;
pub mod profiler;
pub mod registry;
pub mod report;
pub mod sampler;
pub mod section;
pub mod stats;

pub use config::{sink, ConfigStore, ProfilerConfig, SortMode};
pub use error::{Error, Result};
pub use profiler::{Profiler, SectionGuard};
pub use registry::Registry;
pub use report::{build_report, Report, ReportEntry, Sink};
pub use sampler::{ResourceSampler, ResourceSnapshot};
pub use section::{current_thread_id, Section, SectionId, SectionSnapshot};
pub use stats::{ProcessStatsReader, RunningStat, SysinfoStatsReader};

/// Expands to the path of the enclosing function.
///
/// Used by the [`measure!`] macros to fill in the `function` part of a
/// section identity without the caller spelling it out.
#[macro_export]
macro_rules! current_function {
    () => {{
        fn f() {}
        fn type_name_of<T>(_: T) -> &'static str {
            std::any::type_name::<T>()
        }
        let name = type_name_of(f);
        // Strip the trailing "::f".
        &name[..name.len() - 3]
    }};
}

/// Measures the enclosing scope as a section (wall time and call count).
///
/// Expands to an `Option<SectionGuard>` bound to the call site's file, line
/// and function; bind it to a named `_guard`-style variable so it lives to
/// the end of the scope. Yields `None` (and records nothing) while profiling
/// is disabled.
#[macro_export]
macro_rules! measure {
    ($profiler:expr, $desc:expr) => {
        $profiler.enter(file!(), $crate::current_function!(), line!(), $desc, false)
    };
}

/// Like [`measure!`], but additionally samples process CPU% and memory while
/// any caller is inside the section.
#[macro_export]
macro_rules! measure_resources {
    ($profiler:expr, $desc:expr) => {
        $profiler.enter(file!(), $crate::current_function!(), line!(), $desc, true)
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn measure_macro_captures_call_site() {
        let profiler = Profiler::new(ProfilerConfig::default());
        profiler.config().set_enabled(true);

        {
            let _section = measure!(&profiler, "macro test");
        }

        let report = profiler.report();
        assert_eq!(report.entries.len(), 1);
        let id = &report.entries[0].id;
        assert_eq!(id.file, "lib.rs");
        assert!(id.function.contains("measure_macro_captures_call_site"));
        assert_eq!(id.description, "macro test");
    }

    #[test]
    fn resource_macro_attaches_a_sampler() {
        let profiler = Profiler::new(ProfilerConfig::default());
        profiler.config().set_enabled(true);

        {
            let _section = measure_resources!(&profiler, "sampled");
        }

        let entries = profiler.registry().entries();
        assert_eq!(entries.len(), 1);
        assert!(entries[0].1.has_sampler());
    }
}
