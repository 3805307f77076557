//! Single-attempt executor: one request, one proxy, one outcome

use crate::fetch::headers::random_headers;
use crate::fetch::models::{
    AttemptFailure, AttemptOutcome, AttemptSuccess, FailureKind, Proxy, RequestSpec,
};
use crate::fetch::origin::same_origin;
use reqwest::{redirect, Client};
use std::collections::HashMap;
use std::error::Error as StdError;
use tracing::{debug, warn};

/// Executes exactly one HTTP request through exactly one proxy.
///
/// Transport errors never escape as `Err`: every call yields exactly one
/// [`AttemptOutcome`]. The executor performs no retries, no caching and no
/// side effects beyond the network call itself.
#[derive(Debug, Clone)]
pub struct ProxyAttemptExecutor {
    verify_ssl: bool,
    allow_redirects: bool,
    max_redirects: usize,
    verify_origin: bool,
}

impl ProxyAttemptExecutor {
    pub fn new() -> Self {
        Self {
            verify_ssl: true,
            allow_redirects: true,
            max_redirects: 10,
            verify_origin: true,
        }
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

    /// Perform one attempt of `spec` through `proxy`.
    pub async fn submit(&self, spec: &RequestSpec, proxy: &Proxy) -> AttemptOutcome {
        let client = match self.build_client(spec, proxy) {
            Ok(client) => client,
            Err(e) => {
                return AttemptOutcome::Failure(AttemptFailure::new(
                    FailureKind::Protocol,
                    format!("failed to build client: {e}"),
                    proxy,
                ))
            }
        };

        // An empty header map would make the request trivially
        // fingerprintable, so substitute a realistic browser set.
        let headers = if spec.headers.is_empty() {
            warn!(url = %spec.url, "no headers supplied, substituting random browser headers");
            random_headers(&mut rand::thread_rng())
        } else {
            spec.headers.clone()
        };

        debug!(
            method = %spec.method,
            url = %spec.url,
            proxy = %proxy,
            timeout_ms = spec.timeout.as_millis() as u64,
            "submitting attempt"
        );

        let mut request = client.request(spec.method.into(), &spec.url);
        for (name, value) in &headers {
            request = request.header(name.as_str(), value.as_str());
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => {
                let kind = classify_failure(&e);
                debug!(proxy = %proxy, %kind, "attempt failed: {e}");
                return AttemptOutcome::Failure(AttemptFailure::new(kind, e.to_string(), proxy));
            }
        };

        let final_url = response.url().to_string();
        if self.verify_origin && !same_origin(&spec.url, &final_url) {
            // A compromised proxy can serve substituted content behind a
            // clean 200 by quietly redirecting elsewhere.
            warn!(
                url = %spec.url,
                final_url = %final_url,
                proxy = %proxy,
                "response origin does not match the target"
            );
            return AttemptOutcome::Failure(AttemptFailure::new(
                FailureKind::OriginMismatch,
                format!("request for '{}' ended at '{final_url}'", spec.url),
                proxy,
            ));
        }

        let status = response.status().as_u16();
        let response_headers: HashMap<String, String> = response
            .headers()
            .iter()
            .map(|(name, value)| {
                (
                    name.to_string(),
                    String::from_utf8_lossy(value.as_bytes()).into_owned(),
                )
            })
            .collect();

        // Raw bytes regardless of declared content type; decoding is the
        // caller's concern.
        match response.bytes().await {
            Ok(body) => {
                debug!(
                    status,
                    bytes = body.len(),
                    final_url = %final_url,
                    "attempt succeeded"
                );
                AttemptOutcome::Success(AttemptSuccess {
                    status,
                    final_url,
                    body: body.to_vec(),
                    headers: response_headers,
                })
            }
            Err(e) => {
                let kind = classify_failure(&e);
                AttemptOutcome::Failure(AttemptFailure::new(kind, e.to_string(), proxy))
            }
        }
    }

    fn build_client(&self, spec: &RequestSpec, proxy: &Proxy) -> crate::Result<Client> {
        let redirect_policy = if self.allow_redirects {
            redirect::Policy::limited(self.max_redirects)
        } else {
            redirect::Policy::none()
        };

        let client = Client::builder()
            .proxy(reqwest::Proxy::all(proxy.url())?)
            .danger_accept_invalid_certs(!self.verify_ssl)
            .redirect(redirect_policy)
            .timeout(spec.timeout)
            .connect_timeout(spec.timeout)
            .build()?;

        Ok(client)
    }
}

impl Default for ProxyAttemptExecutor {
    fn default() -> Self {
        Self::new()
    }
}

/// Map a transport error onto the failure taxonomy.
fn classify_failure(error: &reqwest::Error) -> FailureKind {
    if error.is_timeout() {
        return if error.is_connect() {
            FailureKind::ConnectTimeout
        } else {
            FailureKind::ReadTimeout
        };
    }
    if error.is_redirect() {
        return FailureKind::TooManyRedirects;
    }

    // The interesting causes (DNS, TLS) only surface in the source chain.
    let mut source: Option<&(dyn StdError + 'static)> = error.source();
    while let Some(cause) = source {
        let text = cause.to_string().to_ascii_lowercase();
        if text.contains("dns") || text.contains("resolve") {
            return FailureKind::Dns;
        }
        if text.contains("certificate")
            || text.contains("tls")
            || text.contains("ssl")
            || text.contains("handshake")
        {
            return FailureKind::Tls;
        }
        source = cause.source();
    }

    if error.is_connect() {
        FailureKind::ProxyRefused
    } else {
        FailureKind::Protocol
    }
}
