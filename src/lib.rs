//! Proxy Fetch - Resilient URL fetching through untrusted proxies
//!
//! This crate resolves a target URL to a successful HTTP response by routing
//! requests through unreliable proxies, using two complementary strategies:
//! a sequential fallback with exponential backoff against a small set of
//! trusted proxies (SmartFetch), and a concurrent race against a large pool
//! of low-quality proxies (BruteFetch).

pub mod fetch;

pub use fetch::*;

/// Application result type
pub type Result<T> = anyhow::Result<T>;
