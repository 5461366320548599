//! Integration tests for the archiver
//!
//! These tests use wiremock to stand in for the upstream API and media hosts,
//! and exercise crawl steps, resolution and the worker pool end-to-end against
//! in-memory SQLite state and a temporary blob root.

mod common;
mod crawl_tests;
mod resolver_tests;
