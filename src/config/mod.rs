//! Configuration module for the archiver
//!
//! This module handles loading, parsing, and validating the TOML configuration
//! file. The resulting `Config` is typed and fully validated before any
//! collaborator is constructed.
//!
//! # Example
//!
//! ```no_run
//! use timeline_archiver::config::load_config;
//! use std::path::Path;
//!
//! let config = load_config(Path::new("archiver.toml")).unwrap();
//! println!("Fetching pages of {} items", config.api.page_size);
//! ```

mod parser;
mod types;
mod validation;

// Re-export types
pub use types::{ApiConfig, Config, QueueConfig, RunnerConfig, StorageConfig, WorkerConfig};

// Re-export parser functions
pub use parser::{compute_config_hash, load_config, load_config_with_hash, parse_config};
