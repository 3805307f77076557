//! Concurrent racing across a proxy pool
//!
//! BruteFetch fans a single URL out across a large pool of low-quality
//! proxies with bounded parallelism. The first completed success wins and
//! every sibling attempt is cancelled before the controller returns; an
//! attempt still in flight after the result is produced would leak
//! connections and keep hitting the target for no reason.

use crate::fetch::executor::ProxyAttemptExecutor;
use crate::fetch::headers::random_headers;
use crate::fetch::models::{
    AttemptFailure, AttemptOutcome, FetchError, FetchSuccess, HttpMethod, Proxy, RequestSpec,
};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Default number of simultaneously in-flight attempts
const DEFAULT_CONCURRENCY: usize = 15;

/// Default per-attempt timeout
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(3);

/// Observer notified as race attempts are dispatched and completed.
///
/// Counts are monotonically increasing. Purely observational: a no-op
/// implementation changes nothing about the race.
pub trait ProgressObserver: Send + Sync {
    fn attempt_started(&self, dispatched: usize, total: usize);
    fn attempt_finished(&self, completed: usize, total: usize);
}

/// Configuration for BruteFetch
#[derive(Debug, Clone)]
pub struct BruteFetchConfig {
    /// Verify TLS certificates on the target
    pub verify_ssl: bool,
    /// Follow redirects up to `max_redirects`
    pub allow_redirects: bool,
    /// Redirect ceiling per attempt
    pub max_redirects: usize,
    /// Reject responses whose final URL left the target's domain
    pub verify_origin: bool,
    /// Upper bound on simultaneously in-flight attempts
    pub concurrency_limit: usize,
    /// Per-attempt timeout
    pub timeout: Duration,
    /// Optional deadline for the whole race; expiry cancels all workers
    pub deadline: Option<Duration>,
}

impl Default for BruteFetchConfig {
    fn default() -> Self {
        Self {
            verify_ssl: true,
            allow_redirects: true,
            max_redirects: 10,
            verify_origin: true,
            concurrency_limit: DEFAULT_CONCURRENCY,
            timeout: DEFAULT_TIMEOUT,
            deadline: None,
        }
    }
}

impl BruteFetchConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_verify_ssl(mut self, verify_ssl: bool) -> Self {
        self.verify_ssl = verify_ssl;
        self
    }

    pub fn with_allow_redirects(mut self, allow_redirects: bool) -> Self {
        self.allow_redirects = allow_redirects;
        self
    }

    pub fn with_max_redirects(mut self, max_redirects: usize) -> Self {
        self.max_redirects = max_redirects;
        self
    }

    pub fn with_verify_origin(mut self, verify_origin: bool) -> Self {
        self.verify_origin = verify_origin;
        self
    }

    pub fn with_concurrency_limit(mut self, limit: usize) -> Self {
        self.concurrency_limit = limit;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }
}

/// Concurrent race controller
pub struct BruteFetch {
    config: BruteFetchConfig,
    executor: Arc<ProxyAttemptExecutor>,
}

impl BruteFetch {
    pub fn new() -> Self {
        Self::with_config(BruteFetchConfig::default())
    }

    pub fn with_config(config: BruteFetchConfig) -> Self {
        let executor = Arc::new(
            ProxyAttemptExecutor::new()
                .with_verify_ssl(config.verify_ssl)
                .with_allow_redirects(config.allow_redirects)
                .with_max_redirects(config.max_redirects)
                .with_verify_origin(config.verify_origin),
        );
        Self { config, executor }
    }

    /// Race `url` across the proxy pool; first completed success wins.
    ///
    /// "First" means first to finish, not first in pool order. Callers that
    /// need deterministic ordering should pre-order the pool and set the
    /// concurrency limit to one. Exhausting the pool without a success
    /// returns [`FetchError::Exhausted`] with one failure per attempted
    /// proxy.
    pub async fn fetch(
        &self,
        url: &str,
        proxies: Vec<Proxy>,
        http_method: HttpMethod,
        headers: Option<HashMap<String, String>>,
        progress: Option<Arc<dyn ProgressObserver>>,
    ) -> Result<FetchSuccess, FetchError> {
        if proxies.is_empty() {
            return Err(FetchError::Config(
                "proxy pool must not be empty".to_string(),
            ));
        }
        if self.config.concurrency_limit == 0 {
            return Err(FetchError::Config(
                "concurrency_limit must be greater than zero".to_string(),
            ));
        }

        // Caller headers take precedence; missing entries are filled from a
        // random browser profile so the request never goes out bare.
        let mut headers = headers.unwrap_or_default();
        for (name, value) in random_headers(&mut rand::thread_rng()) {
            headers.entry(name).or_insert(value);
        }

        let total = proxies.len();
        info!(total, concurrency = self.config.concurrency_limit, url, "starting race");

        let queue = Arc::new(Mutex::new(VecDeque::from(proxies)));
        // Write-once result slot: the first success commits under the lock
        // and later successes become no-ops.
        let winner: Arc<Mutex<Option<FetchSuccess>>> = Arc::new(Mutex::new(None));
        let failures: Arc<Mutex<Vec<AttemptFailure>>> = Arc::new(Mutex::new(Vec::new()));
        let progress = Arc::new(RaceProgress::new(total, progress));
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let cancel_tx = Arc::new(cancel_tx);
        // Dropping the fetch future (caller-side cancellation) must not
        // leave spawned workers running against the pool.
        let _cancel_guard = CancelOnDrop(Arc::clone(&cancel_tx));

        let worker_count = self.config.concurrency_limit.min(total);
        let workers: Vec<_> = (0..worker_count)
            .map(|_| {
                tokio::spawn(run_worker(WorkerContext {
                    executor: Arc::clone(&self.executor),
                    url: url.to_string(),
                    http_method,
                    headers: headers.clone(),
                    timeout: self.config.timeout,
                    queue: Arc::clone(&queue),
                    winner: Arc::clone(&winner),
                    failures: Arc::clone(&failures),
                    progress: Arc::clone(&progress),
                    cancel_tx: Arc::clone(&cancel_tx),
                    cancel_rx: cancel_rx.clone(),
                }))
            })
            .collect();

        let mut join = futures::future::join_all(workers);
        match self.config.deadline {
            Some(deadline) => {
                if tokio::time::timeout(deadline, &mut join).await.is_err() {
                    warn!(url, "race deadline expired, cancelling workers");
                    let _ = cancel_tx.send(true);
                    // Workers observe the signal and stop promptly; joining
                    // them guarantees nothing is in flight after we return.
                    join.await;
                }
            }
            None => {
                join.await;
            }
        }

        let result = winner
            .lock()
            .expect("winner slot lock poisoned")
            .take();
        match result {
            Some(success) => {
                info!(proxy = %success.used_proxy, url, "race won");
                Ok(success)
            }
            None => {
                let failures = std::mem::take(
                    &mut *failures.lock().expect("failure list lock poisoned"),
                );
                warn!(failures = failures.len(), url, "no proxy succeeded");
                Err(FetchError::Exhausted { failures })
            }
        }
    }
}

impl Default for BruteFetch {
    fn default() -> Self {
        Self::new()
    }
}

struct CancelOnDrop(Arc<watch::Sender<bool>>);

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        let _ = self.0.send(true);
    }
}

/// Race progress counters shared by all workers.
///
/// Each increment and the observer call it feeds happen under one lock, so
/// the counts an observer sees are strictly increasing even when workers
/// complete on different runtime threads.
struct RaceProgress {
    total: usize,
    observer: Option<Arc<dyn ProgressObserver>>,
    dispatched: Mutex<usize>,
    completed: Mutex<usize>,
}

impl RaceProgress {
    fn new(total: usize, observer: Option<Arc<dyn ProgressObserver>>) -> Self {
        Self {
            total,
            observer,
            dispatched: Mutex::new(0),
            completed: Mutex::new(0),
        }
    }

    fn started(&self) {
        let mut count = self
            .dispatched
            .lock()
            .expect("dispatch counter lock poisoned");
        *count += 1;
        if let Some(observer) = &self.observer {
            observer.attempt_started(*count, self.total);
        }
    }

    fn finished(&self) {
        let mut count = self
            .completed
            .lock()
            .expect("completion counter lock poisoned");
        *count += 1;
        if let Some(observer) = &self.observer {
            observer.attempt_finished(*count, self.total);
        }
    }
}

struct WorkerContext {
    executor: Arc<ProxyAttemptExecutor>,
    url: String,
    http_method: HttpMethod,
    headers: HashMap<String, String>,
    timeout: Duration,
    queue: Arc<Mutex<VecDeque<Proxy>>>,
    winner: Arc<Mutex<Option<FetchSuccess>>>,
    failures: Arc<Mutex<Vec<AttemptFailure>>>,
    progress: Arc<RaceProgress>,
    cancel_tx: Arc<watch::Sender<bool>>,
    cancel_rx: watch::Receiver<bool>,
}

async fn run_worker(mut ctx: WorkerContext) {
    loop {
        if *ctx.cancel_rx.borrow() {
            break;
        }
        let Some(proxy) = ctx
            .queue
            .lock()
            .expect("proxy queue lock poisoned")
            .pop_front()
        else {
            break;
        };

        ctx.progress.started();

        let request = RequestSpec::new(
            ctx.http_method,
            &ctx.url,
            ctx.headers.clone(),
            ctx.timeout,
        );
        debug!(proxy = %proxy, url = %ctx.url, "trying proxy");

        tokio::select! {
            // Dropping the submit future closes its connection, so a
            // cancelled loser stops touching the network immediately.
            _ = ctx.cancel_rx.changed() => break,
            outcome = ctx.executor.submit(&request, &proxy) => {
                ctx.progress.finished();
                match outcome {
                    AttemptOutcome::Success(success) => {
                        let mut slot = ctx.winner.lock().expect("winner slot lock poisoned");
                        if slot.is_none() {
                            *slot = Some(FetchSuccess::from_attempt(
                                success,
                                &proxy,
                                0,
                                ctx.http_method,
                                ctx.http_method,
                            ));
                            let _ = ctx.cancel_tx.send(true);
                        }
                        break;
                    }
                    AttemptOutcome::Failure(failure) => {
                        debug!(proxy = %proxy, %failure, "proxy failed");
                        ctx.failures
                            .lock()
                            .expect("failure list lock poisoned")
                            .push(failure);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::testutil::{refused_proxy_url, spawn_stub_proxy, StubMode};
    use std::sync::atomic::{AtomicIsize, Ordering};
    use std::time::Instant;

    /// Tracks the maximum number of attempts in flight at once.
    #[derive(Default)]
    struct InFlightProbe {
        current: AtomicIsize,
        max: AtomicIsize,
    }

    impl ProgressObserver for InFlightProbe {
        fn attempt_started(&self, _dispatched: usize, _total: usize) {
            let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
            self.max.fetch_max(now, Ordering::SeqCst);
        }

        fn attempt_finished(&self, _completed: usize, _total: usize) {
            self.current.fetch_sub(1, Ordering::SeqCst);
        }
    }

    /// Records the raw counter values the controller reports.
    #[derive(Default)]
    struct CountRecorder {
        started: Mutex<Vec<usize>>,
        finished: Mutex<Vec<usize>>,
    }

    impl ProgressObserver for CountRecorder {
        fn attempt_started(&self, dispatched: usize, _total: usize) {
            self.started.lock().unwrap().push(dispatched);
        }

        fn attempt_finished(&self, completed: usize, _total: usize) {
            self.finished.lock().unwrap().push(completed);
        }
    }

    fn test_headers() -> HashMap<String, String> {
        HashMap::from([("User-Agent".to_string(), "test-agent/1.0".to_string())])
    }

    #[tokio::test]
    async fn test_empty_pool_is_config_error() {
        let brute = BruteFetch::new();
        let err = brute
            .fetch("http://example.com/", vec![], HttpMethod::Get, None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Config(_)));
    }

    #[tokio::test]
    async fn test_zero_concurrency_is_config_error() {
        let brute = BruteFetch::with_config(BruteFetchConfig::new().with_concurrency_limit(0));
        let proxies = vec![Proxy::parse("http://127.0.0.1:8080").unwrap()];
        let err = brute
            .fetch("http://example.com/", proxies, HttpMethod::Get, None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Config(_)));
    }

    #[tokio::test]
    async fn test_single_winner_among_hangers_cancels_the_rest() {
        // Pool of 10: one instant winner at position 7, the rest accept
        // and never answer. Hangers release their worker at the 1s attempt
        // timeout, so the winner is reached on the third wave; the race
        // must return its body promptly and never exceed the concurrency
        // limit.
        let mut proxies = Vec::new();
        for _ in 0..6 {
            let addr = spawn_stub_proxy(StubMode::Hang).await;
            proxies.push(Proxy::parse(&format!("http://{addr}")).unwrap());
        }
        let winner_addr = spawn_stub_proxy(StubMode::Ok { body: b"the winner" }).await;
        let winner_proxy = Proxy::parse(&format!("http://{winner_addr}")).unwrap();
        proxies.push(winner_proxy.clone());
        for _ in 0..3 {
            let addr = spawn_stub_proxy(StubMode::Hang).await;
            proxies.push(Proxy::parse(&format!("http://{addr}")).unwrap());
        }
        assert_eq!(proxies.len(), 10);

        let probe = Arc::new(InFlightProbe::default());
        let brute = BruteFetch::with_config(
            BruteFetchConfig::new()
                .with_concurrency_limit(3)
                .with_timeout(Duration::from_secs(1)),
        );

        let started = Instant::now();
        let result = brute
            .fetch(
                "http://example.com/",
                proxies,
                HttpMethod::Get,
                Some(test_headers()),
                Some(probe.clone() as Arc<dyn ProgressObserver>),
            )
            .await
            .unwrap();

        assert_eq!(result.body, b"the winner");
        assert_eq!(result.used_proxy, winner_proxy.url());
        assert!(
            started.elapsed() < Duration::from_secs(8),
            "race did not return promptly after the winner completed"
        );
        assert!(
            probe.max.load(Ordering::SeqCst) <= 3,
            "more than 3 attempts were in flight"
        );
    }

    #[tokio::test]
    async fn test_exhaustion_reports_one_failure_per_proxy() {
        let mut proxies = Vec::new();
        for _ in 0..5 {
            proxies.push(Proxy::parse(&refused_proxy_url().await).unwrap());
        }
        let brute = BruteFetch::with_config(
            BruteFetchConfig::new()
                .with_concurrency_limit(2)
                .with_timeout(Duration::from_millis(500)),
        );

        let err = brute
            .fetch(
                "http://example.com/",
                proxies,
                HttpMethod::Get,
                Some(test_headers()),
                None,
            )
            .await
            .unwrap_err();

        assert_eq!(err.failure_count(), 5);
    }

    // Multi-threaded runtime so workers genuinely complete in parallel;
    // the counts each observer call carries must still arrive in order.
    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_progress_counts_are_monotonic_across_threads() {
        let mut proxies = Vec::new();
        for _ in 0..8 {
            proxies.push(Proxy::parse(&refused_proxy_url().await).unwrap());
        }
        let recorder = Arc::new(CountRecorder::default());
        let brute = BruteFetch::with_config(
            BruteFetchConfig::new()
                .with_concurrency_limit(4)
                .with_timeout(Duration::from_millis(500)),
        );

        let _ = brute
            .fetch(
                "http://example.com/",
                proxies,
                HttpMethod::Get,
                Some(test_headers()),
                Some(recorder.clone() as Arc<dyn ProgressObserver>),
            )
            .await;

        let started = recorder.started.lock().unwrap();
        let finished = recorder.finished.lock().unwrap();
        assert_eq!(started.len(), 8);
        assert_eq!(finished.len(), 8);
        assert!(started.windows(2).all(|w| w[0] < w[1]));
        assert!(finished.windows(2).all(|w| w[0] < w[1]));
    }

    #[tokio::test]
    async fn test_deadline_cancels_a_stalled_race() {
        let mut proxies = Vec::new();
        for _ in 0..3 {
            let addr = spawn_stub_proxy(StubMode::Hang).await;
            proxies.push(Proxy::parse(&format!("http://{addr}")).unwrap());
        }
        let brute = BruteFetch::with_config(
            BruteFetchConfig::new()
                .with_concurrency_limit(3)
                .with_timeout(Duration::from_secs(30))
                .with_deadline(Duration::from_millis(200)),
        );

        let started = Instant::now();
        let err = brute
            .fetch(
                "http://example.com/",
                proxies,
                HttpMethod::Get,
                Some(test_headers()),
                None,
            )
            .await
            .unwrap_err();

        assert!(matches!(err, FetchError::Exhausted { .. }));
        assert!(
            started.elapsed() < Duration::from_secs(5),
            "deadline did not cut the race short"
        );
    }

    #[tokio::test]
    async fn test_two_instant_winners_commit_exactly_one() {
        let a = spawn_stub_proxy(StubMode::Ok { body: b"a" }).await;
        let b = spawn_stub_proxy(StubMode::Ok { body: b"b" }).await;
        let proxy_a = Proxy::parse(&format!("http://{a}")).unwrap();
        let proxy_b = Proxy::parse(&format!("http://{b}")).unwrap();
        let brute = BruteFetch::with_config(BruteFetchConfig::new().with_concurrency_limit(2));

        let result = brute
            .fetch(
                "http://example.com/",
                vec![proxy_a.clone(), proxy_b.clone()],
                HttpMethod::Get,
                Some(test_headers()),
                None,
            )
            .await
            .unwrap();

        assert!(result.used_proxy == proxy_a.url() || result.used_proxy == proxy_b.url());
        assert!(result.body == b"a" || result.body == b"b");
    }
}
