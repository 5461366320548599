//! Output module for reporting on the archive
//!
//! This module handles loading and rendering archive statistics for the
//! `stats` command.

pub mod stats;

pub use stats::{format_statistics, load_statistics, print_statistics, ArchiveStatistics};
