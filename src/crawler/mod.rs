//! Crawler module: the incremental crawl state machine and its consumers
//!
//! This module contains the core crawl logic, including:
//! - Page fetching from the upstream API
//! - Watermark reconciliation after each page
//! - Failure classification (transient vs. fatal)
//! - Fan-out of embedded references onto the queue
//! - Recursive resolution of queued work
//! - Periodic crawl dispatch and the queue worker pool

mod classify;
mod context;
mod fanout;
mod fetcher;
mod reconcile;
mod resolver;
mod runner;
mod worker;

pub use classify::{classify, classify_status, upstream_error, FailureClass};
pub use context::{ArchiveContext, CrawlSettings};
pub use fanout::{dispatch, emit, fan_out, prune_stored};
pub use fetcher::{FetchError, HttpPageFetcher, Page, PageFetcher, PageRequest};
pub use reconcile::{id_bounds, reconcile, Reconciliation};
pub use resolver::{
    crawl_resource, fetch_media, process_message, resolve_post, CrawlOutcome, Resolution,
};
pub use runner::{dispatch_crawls, Runner};
pub use worker::{DeliveryOutcome, Worker, WorkerOptions, WorkerStats};
