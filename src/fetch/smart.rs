//! Sequential fallback fetching through trusted proxies
//!
//! SmartFetch runs a fixed, ordered attempt plan against at most two
//! proxies: cheap HEAD probes through the HTTP proxy, one full GET through
//! the HTTP proxy, then GET attempts through the SOCKS fallback. Attempts
//! never overlap; a trusted proxy's goodwill is a scarce resource and this
//! controller deliberately does not hammer it.

use crate::fetch::backoff::exponential_backoff;
use crate::fetch::executor::ProxyAttemptExecutor;
use crate::fetch::headers::random_headers;
use crate::fetch::models::{
    AttemptFailure, AttemptOutcome, FetchError, FetchSuccess, HttpMethod, Proxy, RequestSpec,
};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info};

/// Ceiling on inter-attempt backoff sleeps
const MAX_BACKOFF: Duration = Duration::from_secs(60);

/// Default request timeout for each attempt
const DEFAULT_INIT_TIMEOUT: Duration = Duration::from_secs(3);

/// Default retries per phase
const DEFAULT_RETRIES: u32 = 3;

/// Configuration for SmartFetch
#[derive(Debug, Clone)]
pub struct SmartFetchConfig {
    /// Verify TLS certificates on the target
    pub verify_ssl: bool,
    /// Number of HEAD probe attempts through the HTTP proxy
    pub http_retries: u32,
    /// Number of GET attempts through the SOCKS fallback
    pub socks_retries: u32,
    /// Per-attempt request timeout; also seeds the backoff progression
    pub init_timeout: Duration,
    /// Optional liveness probe URL; when set, the HTTP proxy is probed
    /// upfront and demoted (skipped) if the probe fails
    pub probe_url: Option<String>,
}

impl Default for SmartFetchConfig {
    fn default() -> Self {
        Self {
            verify_ssl: true,
            http_retries: DEFAULT_RETRIES,
            socks_retries: DEFAULT_RETRIES,
            init_timeout: DEFAULT_INIT_TIMEOUT,
            probe_url: None,
        }
    }
}

impl SmartFetchConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_verify_ssl(mut self, verify_ssl: bool) -> Self {
        self.verify_ssl = verify_ssl;
        self
    }

    pub fn with_http_retries(mut self, retries: u32) -> Self {
        self.http_retries = retries;
        self
    }

    pub fn with_socks_retries(mut self, retries: u32) -> Self {
        self.socks_retries = retries;
        self
    }

    pub fn with_init_timeout(mut self, timeout: Duration) -> Self {
        self.init_timeout = timeout;
        self
    }

    pub fn with_probe_url(mut self, url: String) -> Self {
        self.probe_url = Some(url);
        self
    }
}

/// Sequential fetch controller
pub struct SmartFetch {
    config: SmartFetchConfig,
    executor: ProxyAttemptExecutor,
}

impl SmartFetch {
    pub fn new() -> Self {
        Self::with_config(SmartFetchConfig::default())
    }

    pub fn with_config(config: SmartFetchConfig) -> Self {
        let executor = ProxyAttemptExecutor::new().with_verify_ssl(config.verify_ssl);
        Self { config, executor }
    }

    /// Fetch `url` according to the fixed plan.
    ///
    /// `method` is the caller's requested method; it is recorded as the
    /// result's `initial_method` while `final_method` reflects the attempt
    /// that actually won. The plan itself does not vary with it.
    ///
    /// At least one of `http_proxy` and `socks_proxy` is required; neither
    /// being present is a configuration error raised before any network
    /// activity. On success the first winning response is returned; once
    /// the whole plan is exhausted the ordered failure history comes back
    /// as [`FetchError::Exhausted`].
    ///
    /// Cancellation is drop-based: nothing is spawned, so dropping the
    /// returned future aborts the in-flight attempt and no further
    /// attempts start.
    pub async fn fetch(
        &self,
        url: &str,
        method: HttpMethod,
        http_proxy: Option<&Proxy>,
        socks_proxy: Option<&Proxy>,
        headers: Option<HashMap<String, String>>,
    ) -> Result<FetchSuccess, FetchError> {
        if http_proxy.is_none() && socks_proxy.is_none() {
            return Err(FetchError::Config(
                "at least one of 'http_proxy' or 'socks_proxy' must be provided".to_string(),
            ));
        }

        let headers = headers.unwrap_or_else(|| random_headers(&mut rand::thread_rng()));
        let mut failures: Vec<AttemptFailure> = Vec::new();

        let mut http_proxy = http_proxy;
        if let (Some(proxy), Some(probe_url)) = (http_proxy, &self.config.probe_url) {
            if !self.probe(proxy, probe_url).await {
                info!(proxy = %proxy, "HTTP proxy failed liveness probe, skipping its phases");
                http_proxy = None;
            }
        }

        // Phase 1: HEAD probes through the HTTP proxy. Cheap liveness
        // checks before committing to a full-body transfer.
        if let Some(proxy) = http_proxy {
            for attempt in 0..self.config.http_retries {
                let request = RequestSpec::new(
                    HttpMethod::Head,
                    url,
                    headers.clone(),
                    self.config.init_timeout,
                );
                match self.executor.submit(&request, proxy).await {
                    AttemptOutcome::Success(success) => {
                        info!(proxy = %proxy, attempt, "HEAD probe succeeded");
                        return Ok(FetchSuccess::from_attempt(
                            success,
                            proxy,
                            attempt,
                            method,
                            HttpMethod::Head,
                        ));
                    }
                    AttemptOutcome::Failure(failure) => {
                        debug!(proxy = %proxy, attempt, %failure, "HEAD probe failed");
                        failures.push(failure);
                    }
                }
                if attempt + 1 < self.config.http_retries {
                    self.sleep_backoff(attempt).await;
                }
            }

            // Phase 2: one full GET through the HTTP proxy, with a wider
            // timeout since the probes already burned the quick budget.
            let request = RequestSpec::new(
                HttpMethod::Get,
                url,
                headers.clone(),
                self.config.init_timeout * self.config.http_retries.max(1),
            );
            match self.executor.submit(&request, proxy).await {
                AttemptOutcome::Success(success) => {
                    info!(proxy = %proxy, "HTTP GET fallback succeeded");
                    return Ok(FetchSuccess::from_attempt(
                        success,
                        proxy,
                        0,
                        method,
                        HttpMethod::Get,
                    ));
                }
                AttemptOutcome::Failure(failure) => {
                    debug!(proxy = %proxy, %failure, "HTTP GET fallback failed");
                    failures.push(failure);
                }
            }
        }

        // Phase 3: GET attempts through the SOCKS fallback.
        if let Some(proxy) = socks_proxy {
            for attempt in 0..self.config.socks_retries {
                let request = RequestSpec::new(
                    HttpMethod::Get,
                    url,
                    headers.clone(),
                    self.config.init_timeout,
                );
                match self.executor.submit(&request, proxy).await {
                    AttemptOutcome::Success(success) => {
                        info!(proxy = %proxy, attempt, "SOCKS GET succeeded");
                        return Ok(FetchSuccess::from_attempt(
                            success,
                            proxy,
                            attempt,
                            method,
                            HttpMethod::Get,
                        ));
                    }
                    AttemptOutcome::Failure(failure) => {
                        debug!(proxy = %proxy, attempt, %failure, "SOCKS GET failed");
                        failures.push(failure);
                    }
                }
                if attempt + 1 < self.config.socks_retries {
                    self.sleep_backoff(attempt).await;
                }
            }
        }

        info!(failures = failures.len(), url, "fetch plan exhausted");
        Err(FetchError::Exhausted { failures })
    }

    /// Quick GET against the probe URL to decide whether the HTTP proxy is
    /// alive at all.
    async fn probe(&self, proxy: &Proxy, probe_url: &str) -> bool {
        let executor = ProxyAttemptExecutor::new()
            .with_verify_ssl(false)
            .with_verify_origin(false);
        let request = RequestSpec::new(
            HttpMethod::Get,
            probe_url,
            random_headers(&mut rand::thread_rng()),
            Duration::from_secs(5),
        );
        match executor.submit(&request, proxy).await {
            AttemptOutcome::Success(success) => success.status == 200,
            AttemptOutcome::Failure(failure) => {
                debug!(proxy = %proxy, %failure, "liveness probe failed");
                false
            }
        }
    }

    async fn sleep_backoff(&self, attempt: u32) {
        let delay = exponential_backoff(
            attempt,
            self.config.init_timeout,
            true,
            MAX_BACKOFF,
            &mut rand::thread_rng(),
        );
        debug!(attempt, delay_ms = delay.as_millis() as u64, "backing off");
        tokio::time::sleep(delay).await;
    }
}

impl Default for SmartFetch {
    fn default() -> Self {
        Self::new()
    }
}
