//! Profiler context object and scoped call-site instrumentation
//!
//! A [`Profiler`] is the one-per-process entry point: it owns the registry and
//! runtime flags and is passed explicitly to call sites and the control loop
//! instead of living behind ambient global state. Call sites use
//! [`Profiler::enter`] (usually through the [`measure!`](crate::measure)
//! macros), which returns a guard whose drop ends the section, so the pairing
//! holds across early returns and error exits.

use std::sync::Arc;

use crate::config::{ConfigStore, ProfilerConfig};
use crate::registry::Registry;
use crate::report::{build_report, write_report, Report};
use crate::section::{current_thread_id, Section, SectionId};

#[cfg(unix)]
use crate::control::{ControlServer, ControlServerHandle};
#[cfg(unix)]
use crate::error::Result;

/// Process-scoped profiler context.
pub struct Profiler {
    registry: Arc<Registry>,
    config_store: Arc<ConfigStore>,
    settings: ProfilerConfig,
}

impl Profiler {
    pub fn new(settings: ProfilerConfig) -> Self {
        Self {
            registry: Arc::new(Registry::new(settings.sample_interval)),
            config_store: Arc::new(ConfigStore::new()),
            settings,
        }
    }

    /// Runtime flags, shared with the control server.
    pub fn config(&self) -> &ConfigStore {
        &self.config_store
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Resolves (or lazily creates) the section for a call site.
    pub fn section(
        &self,
        file: &str,
        function: &str,
        line: u32,
        description: &str,
        resources: bool,
    ) -> Arc<Section> {
        self.registry
            .get_or_create(SectionId::new(file, function, line, description), resources)
    }

    /// Enters a section and returns a guard that ends it on drop.
    ///
    /// Returns `None` when profiling is disabled, which keeps disabled call
    /// sites down to one atomic load.
    pub fn enter(
        &self,
        file: &str,
        function: &str,
        line: u32,
        description: &str,
        resources: bool,
    ) -> Option<SectionGuard> {
        if !self.config_store.enabled() {
            return None;
        }
        let section = self.section(file, function, line, description, resources);
        let thread_id = current_thread_id();
        section.begin(thread_id);
        Some(SectionGuard { section, thread_id })
    }

    /// Builds a report with the currently configured sort order.
    pub fn report(&self) -> Report {
        build_report(&self.registry, self.config_store.sort_mode())
    }

    /// Builds a report and emits it to the currently active sinks.
    pub fn save_report(&self) {
        let report = self.report();
        write_report(
            &report,
            self.config_store.sinks(),
            &self.settings.report_path,
        );
    }

    /// Starts the control-plane server for this profiler.
    #[cfg(unix)]
    pub fn serve_control(&self) -> Result<ControlServerHandle> {
        ControlServer::new(
            Arc::clone(&self.registry),
            Arc::clone(&self.config_store),
            self.settings.clone(),
        )
        .spawn()
    }
}

impl Default for Profiler {
    fn default() -> Self {
        Self::new(ProfilerConfig::default())
    }
}

/// Scoped section entry; dropping it ends the section on the entering thread.
#[must_use = "dropping the guard immediately ends the section"]
pub struct SectionGuard {
    section: Arc<Section>,
    thread_id: u64,
}

impl Drop for SectionGuard {
    fn drop(&mut self) {
        self.section.end(self.thread_id);
    }
}
