//! Process-wide map from code-location identity to section
//!
//! Entries are created lazily on first use and never removed; growth is
//! bounded by the number of distinct instrumented call sites. One registry
//! lock guards creation only; `begin`/`end` run under each section's own
//! lock and never touch this one.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::sampler::ResourceSampler;
use crate::section::{Section, SectionId};
use crate::stats::SysinfoStatsReader;

pub struct Registry {
    sections: Mutex<HashMap<SectionId, Arc<Section>>>,
    started: Instant,
    sample_interval: Duration,
}

impl Registry {
    pub fn new(sample_interval: Duration) -> Self {
        Self {
            sections: Mutex::new(HashMap::new()),
            started: Instant::now(),
            sample_interval,
        }
    }

    /// Looks up the section for `id`, constructing it on first use.
    ///
    /// Concurrent first use from many threads racing on the same identity
    /// yields exactly one `Section` instance. `wants_resources` only matters
    /// for the call that wins construction: the sampler is created once, at
    /// section-creation time, and lives as long as the section. Likewise the
    /// stored identity (including its description text) is the winner's.
    pub fn get_or_create(&self, id: SectionId, wants_resources: bool) -> Arc<Section> {
        let mut sections = self.sections.lock().expect("registry lock poisoned");
        Arc::clone(sections.entry(id).or_insert_with(|| {
            let sampler = if wants_resources {
                Some(ResourceSampler::spawn(
                    Box::new(SysinfoStatsReader::for_current_process()),
                    self.sample_interval,
                ))
            } else {
                None
            };
            Arc::new(Section::new(sampler))
        }))
    }

    /// All registered sections, for reporting.
    pub fn entries(&self) -> Vec<(SectionId, Arc<Section>)> {
        let sections = self.sections.lock().expect("registry lock poisoned");
        sections
            .iter()
            .map(|(id, section)| (id.clone(), Arc::clone(section)))
            .collect()
    }

    /// When this registry (and thus the profiler) was created.
    pub fn started(&self) -> Instant {
        self.started
    }

    pub fn len(&self) -> usize {
        self.sections.lock().expect("registry lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn test_registry() -> Registry {
        Registry::new(Duration::from_millis(100))
    }

    #[test]
    fn same_identity_yields_same_section() {
        let registry = test_registry();
        let a = registry.get_or_create(SectionId::new("a.rs", "f", 1, "first"), false);
        let b = registry.get_or_create(SectionId::new("a.rs", "f", 1, "second"), false);

        // Description is not part of the identity.
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn concurrent_first_use_constructs_once() {
        let registry = Arc::new(test_registry());

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = Arc::clone(&registry);
                thread::spawn(move || {
                    registry.get_or_create(SectionId::new("race.rs", "go", 7, ""), false)
                })
            })
            .collect();

        let sections: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        for section in &sections[1..] {
            assert!(Arc::ptr_eq(&sections[0], section));
        }
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn sampler_attachment_is_decided_at_creation() {
        let registry = test_registry();
        let plain = registry.get_or_create(SectionId::new("a.rs", "f", 1, ""), false);
        assert!(!plain.has_sampler());

        // Later requests cannot retrofit a sampler onto an existing section.
        let same = registry.get_or_create(SectionId::new("a.rs", "f", 1, ""), true);
        assert!(Arc::ptr_eq(&plain, &same));
        assert!(!same.has_sampler());

        let sampled = registry.get_or_create(SectionId::new("a.rs", "f", 2, ""), true);
        assert!(sampled.has_sampler());
    }
}
