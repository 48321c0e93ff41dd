//! Report building and sink output
//!
//! Drains the registry into an ordered [`Report`] and renders it as plain
//! text to any number of [`Sink`]s, or as JSON. Sorting is explicit: entries
//! default to identity order (line, file, function) as a stable fallback, and
//! can be reordered descending by total cost or call count.

use std::fs::File;
use std::io::{self, Write};
use std::path::Path;

use log::warn;
use serde::Serialize;

use crate::config::{sink, SortMode};
use crate::registry::Registry;
use crate::section::{SectionId, SectionSnapshot};

/// Destination for rendered report text. Any number of sinks may be active
/// simultaneously per the configured sink flags.
pub trait Sink {
    fn write_all(&mut self, text: &str) -> io::Result<()>;
}

/// Sink writing to stdout.
pub struct ConsoleSink;

impl Sink for ConsoleSink {
    fn write_all(&mut self, text: &str) -> io::Result<()> {
        let mut stdout = io::stdout().lock();
        stdout.write_all(text.as_bytes())?;
        stdout.flush()
    }
}

/// Sink writing to a report file, truncated per report.
pub struct FileSink {
    file: File,
}

impl FileSink {
    pub fn create(path: &Path) -> io::Result<Self> {
        Ok(Self {
            file: File::create(path)?,
        })
    }
}

impl Sink for FileSink {
    fn write_all(&mut self, text: &str) -> io::Result<()> {
        self.file.write_all(text.as_bytes())?;
        self.file.flush()
    }
}

/// One section in a report: identity plus its snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct ReportEntry {
    pub id: SectionId,
    pub snapshot: SectionSnapshot,
}

/// Ordered sequence of section snapshots plus report-wide header data.
#[derive(Debug, Clone, Serialize)]
pub struct Report {
    /// Seconds since the profiler was created.
    pub uptime_secs: u64,
    pub entries: Vec<ReportEntry>,
}

impl Report {
    /// Plain-text rendering, the format sinks receive.
    pub fn to_text(&self) -> String {
        let mut out = String::new();
        out.push_str("=============== sprof report ===============\n");
        out.push_str(&format!(
            "uptime: {}s, sections: {}\n\n",
            self.uptime_secs,
            self.entries.len()
        ));

        for (index, entry) in self.entries.iter().enumerate() {
            let id = &entry.id;
            let snapshot = &entry.snapshot;

            out.push_str(&format!(
                "#{} {}:{} {}",
                index + 1,
                id.file,
                id.line,
                id.function
            ));
            if !id.description.is_empty() {
                out.push_str(&format!(" ({})", id.description));
            }
            out.push('\n');

            for thread in &snapshot.threads {
                out.push_str(&format!(
                    "   thread {}: cost {:.2}s, calls {}\n",
                    thread.thread_id,
                    thread.cost.as_secs_f64(),
                    thread.calls
                ));
            }

            out.push_str(&format!(
                "   total: cost {:.2}s, calls {}{}\n",
                snapshot.total_cost.as_secs_f64(),
                snapshot.total_calls,
                if snapshot.mismatch { " [unbalanced]" } else { "" }
            ));

            if let Some(resources) = &snapshot.resources {
                out.push_str(&format!(
                    "   cpu: peak {}%, avg {}% | memory: peak {}, avg {}\n",
                    resources.cpu.peak,
                    resources.cpu.avg(),
                    format_bytes(resources.memory.peak.max(0) as u64),
                    format_bytes(resources.memory.avg().max(0) as u64),
                ));
            }

            out.push('\n');
        }

        out.push_str("=============== end ===============\n");
        out
    }

    /// JSON rendering of the same data.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// Builds an ordered report from the registry's current contents.
pub fn build_report(registry: &Registry, sort: SortMode) -> Report {
    let mut entries: Vec<ReportEntry> = registry
        .entries()
        .into_iter()
        .map(|(id, section)| ReportEntry {
            snapshot: section.snapshot(),
            id,
        })
        .collect();

    sort_entries(&mut entries, sort);

    Report {
        uptime_secs: registry.started().elapsed().as_secs(),
        entries,
    }
}

fn sort_entries(entries: &mut [ReportEntry], sort: SortMode) {
    // Identity order first so the explicit sorts tie-break deterministically
    // (both are stable).
    entries.sort_by(|a, b| a.id.cmp(&b.id));
    match sort {
        SortMode::None => {}
        SortMode::Cost => {
            entries.sort_by(|a, b| b.snapshot.total_cost.cmp(&a.snapshot.total_cost));
        }
        SortMode::Calls => {
            entries.sort_by(|a, b| b.snapshot.total_calls.cmp(&a.snapshot.total_calls));
        }
    }
}

/// Writes the report text to every sink selected in `sinks`.
///
/// A sink that cannot be opened or written is skipped with a warning; the
/// reporting pass continues for the others.
pub fn write_report(report: &Report, sinks: u8, report_path: &Path) {
    let text = report.to_text();

    if sinks & sink::CONSOLE != 0 {
        if let Err(err) = ConsoleSink.write_all(&text) {
            warn!("console report emission failed: {}", err);
        }
    }

    if sinks & sink::FILE != 0 {
        match FileSink::create(report_path) {
            Ok(mut file_sink) => {
                if let Err(err) = file_sink.write_all(&text) {
                    warn!("report file write failed: {}", err);
                }
            }
            Err(err) => {
                warn!(
                    "cannot open report file {}: {}",
                    report_path.display(),
                    err
                );
            }
        }
    }
}

fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{}B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1}KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1}MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.1}GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}
