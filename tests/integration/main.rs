//! Integration tests for Tidewater
//!
//! These tests wire the supervisor, the message queue and the crawl worker
//! together over one control database, with wiremock standing in for the
//! crawled site.

mod common;
mod crawl_tests;
mod recrawl_tests;
