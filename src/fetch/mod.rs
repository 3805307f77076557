//! Fetch module for routing requests through untrusted proxies
//!
//! This module provides functionality for:
//! - Executing a single HTTP request through a single proxy
//! - Sequential fallback fetching with exponential backoff (SmartFetch)
//! - Concurrent racing across a proxy pool with bounded parallelism (BruteFetch)
//! - Randomized browser headers and redirect-origin verification

pub mod backoff;
pub mod brute;
pub mod executor;
pub mod headers;
pub mod meta;
pub mod models;
pub mod origin;
pub mod smart;

pub use backoff::exponential_backoff;
pub use brute::{BruteFetch, BruteFetchConfig, ProgressObserver};
pub use executor::ProxyAttemptExecutor;
pub use headers::random_headers;
pub use meta::{parse_license, sanitize_filename, LicenseInfo};
pub use models::{
    AttemptFailure, AttemptOutcome, AttemptSuccess, FailureKind, FetchError, FetchSuccess,
    HttpMethod, Proxy, ProxyAuth, ProxyScheme, RequestSpec,
};
pub use smart::{SmartFetch, SmartFetchConfig};
