//! Statistics over the archive state
//!
//! This module gathers counts from the state database (subjects, watermarks,
//! adjacency edges, crawl outcomes) and the queue, and renders them for the
//! `stats` command.

use crate::model::ResourceKind;
use crate::queue::QueueDepth;
use crate::storage::{CrawlStatus, Storage, StorageResult};
use std::collections::BTreeMap;
use std::fmt::Write;

/// Archive statistics summary
#[derive(Debug, Clone, Default)]
pub struct ArchiveStatistics {
    /// Registered subjects
    pub total_subjects: u64,

    /// Subjects with each resource kind enabled
    pub subjects_by_resource: BTreeMap<ResourceKind, u64>,

    /// Stored watermarks per resource kind
    pub watermarks_by_resource: BTreeMap<ResourceKind, u64>,

    /// Adjacency edges per resource kind
    pub adjacency_by_resource: BTreeMap<ResourceKind, u64>,

    /// Crawl steps by outcome
    pub crawl_outcomes: BTreeMap<CrawlStatus, u64>,

    /// Queue depth, when a queue was available
    pub queue: Option<QueueDepth>,
}

impl ArchiveStatistics {
    pub fn total_crawls(&self) -> u64 {
        self.crawl_outcomes.values().sum()
    }
}

/// Loads statistics from storage
pub fn load_statistics(
    storage: &dyn Storage,
    queue: Option<QueueDepth>,
) -> StorageResult<ArchiveStatistics> {
    let subjects = storage.list_subjects()?;

    let mut subjects_by_resource = BTreeMap::new();
    for subject in &subjects {
        for kind in subject.flags.iter() {
            *subjects_by_resource.entry(kind).or_insert(0) += 1;
        }
    }

    let mut watermarks_by_resource = BTreeMap::new();
    for record in storage.list_watermarks()? {
        *watermarks_by_resource.entry(record.resource).or_insert(0) += 1;
    }

    let adjacency_by_resource = storage.adjacency_totals()?.into_iter().collect();
    let crawl_outcomes = storage.crawl_outcome_counts()?.into_iter().collect();

    Ok(ArchiveStatistics {
        total_subjects: subjects.len() as u64,
        subjects_by_resource,
        watermarks_by_resource,
        adjacency_by_resource,
        crawl_outcomes,
        queue,
    })
}

/// Renders statistics as plain text
pub fn format_statistics(stats: &ArchiveStatistics) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "=== Archive Statistics ===\n");

    let _ = writeln!(out, "Subjects: {}", stats.total_subjects);
    for kind in ResourceKind::all() {
        let enabled = stats.subjects_by_resource.get(&kind).copied().unwrap_or(0);
        let marks = stats.watermarks_by_resource.get(&kind).copied().unwrap_or(0);
        let _ = write!(
            out,
            "  {:<10} enabled: {:>5}  watermarks: {:>5}",
            kind.as_str(),
            enabled,
            marks
        );
        if kind.tracks_adjacency() {
            let edges = stats.adjacency_by_resource.get(&kind).copied().unwrap_or(0);
            let _ = write!(out, "  edges: {}", edges);
        }
        out.push('\n');
    }
    out.push('\n');

    let total = stats.total_crawls();
    let _ = writeln!(out, "Crawl steps: {}", total);
    for status in CrawlStatus::all() {
        let count = stats.crawl_outcomes.get(&status).copied().unwrap_or(0);
        let percentage = if total > 0 {
            (count as f64 / total as f64) * 100.0
        } else {
            0.0
        };
        let _ = writeln!(out, "  {}: {} ({:.1}%)", status, count, percentage);
    }

    if let Some(depth) = stats.queue {
        out.push('\n');
        let _ = writeln!(out, "Queue:");
        let _ = writeln!(out, "  visible: {}", depth.visible);
        let _ = writeln!(out, "  in flight: {}", depth.in_flight);
        let _ = writeln!(out, "  dead-lettered: {}", depth.dead);
    }

    out
}

/// Prints statistics to stdout
pub fn print_statistics(stats: &ArchiveStatistics) {
    print!("{}", format_statistics(stats));
}
