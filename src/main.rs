use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use proxy_fetch::fetch::{
    meta, AttemptFailure, BruteFetch, BruteFetchConfig, FetchError, FetchSuccess, HttpMethod,
    ProgressObserver, Proxy, SmartFetch, SmartFetchConfig,
};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Default URL used to probe HTTP proxy liveness
const DEFAULT_PROBE_URL: &str = "https://api.ipify.org?format=json";

/// Fetch URLs through untrusted proxies with sequential fallback or racing
#[derive(Parser)]
#[command(name = "proxy-fetch")]
#[command(about = "Fetch URLs through untrusted proxies with sequential fallback or racing")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch through one or two trusted proxies with retries and backoff
    Smart {
        /// Target URL
        url: String,
        /// Trusted HTTP proxy URL (http://[user:pass@]host:port)
        #[arg(long)]
        http_proxy: Option<String>,
        /// SOCKS fallback proxy URL (socks5://[user:pass@]host:port)
        #[arg(long)]
        socks_proxy: Option<String>,
        /// Requested HTTP method, recorded on the result
        #[arg(short, long, default_value = "get")]
        method: String,
        /// HEAD probe attempts through the HTTP proxy
        #[arg(long, default_value = "3")]
        http_retries: u32,
        /// GET attempts through the SOCKS fallback
        #[arg(long, default_value = "3")]
        socks_retries: u32,
        /// Per-attempt timeout in seconds
        #[arg(long, default_value = "3.0")]
        timeout: f64,
        /// Probe the HTTP proxy for liveness before running the plan
        #[arg(long)]
        probe: bool,
        /// Skip TLS certificate verification
        #[arg(short = 'k', long)]
        insecure: bool,
        /// File to write the response body to
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Write the body to a filename derived from the URL
        #[arg(long)]
        save: bool,
        /// Scan the response for license metadata
        #[arg(long)]
        license: bool,
    },
    /// Race a whole proxy pool concurrently; first success wins
    Brute {
        /// Target URL
        url: String,
        /// File containing proxy URLs, one per line
        #[arg(short, long)]
        proxies: PathBuf,
        /// HTTP method to use for each attempt
        #[arg(short, long, default_value = "get")]
        method: String,
        /// Number of simultaneously in-flight attempts
        #[arg(short = 'n', long, default_value = "15")]
        concurrency: usize,
        /// Per-attempt timeout in seconds
        #[arg(long, default_value = "3.0")]
        timeout: f64,
        /// Overall deadline in seconds for the whole race
        #[arg(long)]
        deadline: Option<f64>,
        /// Skip TLS certificate verification
        #[arg(short = 'k', long)]
        insecure: bool,
        /// Accept responses even when redirects leave the target's domain
        #[arg(long)]
        no_verify_origin: bool,
        /// Print progress as proxies are tried
        #[arg(long)]
        progress: bool,
        /// File to write the response body to
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Write the body to a filename derived from the URL
        #[arg(long)]
        save: bool,
        /// Scan the response for license metadata
        #[arg(long)]
        license: bool,
    },
}

/// Prints completion counts as the race advances
struct StdoutProgress;

impl ProgressObserver for StdoutProgress {
    fn attempt_started(&self, _dispatched: usize, _total: usize) {}

    fn attempt_finished(&self, completed: usize, total: usize) {
        println!("[{completed}/{total}] proxies tried");
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "proxy_fetch=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Smart {
            url,
            http_proxy,
            socks_proxy,
            method,
            http_retries,
            socks_retries,
            timeout,
            probe,
            insecure,
            output,
            save,
            license,
        } => {
            let http_proxy = http_proxy.as_deref().map(Proxy::parse).transpose()?;
            let socks_proxy = socks_proxy.as_deref().map(Proxy::parse).transpose()?;

            let mut config = SmartFetchConfig::new()
                .with_verify_ssl(!insecure)
                .with_http_retries(http_retries)
                .with_socks_retries(socks_retries)
                .with_init_timeout(parse_seconds("timeout", timeout)?);
            if probe {
                config = config.with_probe_url(DEFAULT_PROBE_URL.to_string());
            }

            let smart = SmartFetch::with_config(config);
            let result = smart
                .fetch(
                    &url,
                    parse_method(&method)?,
                    http_proxy.as_ref(),
                    socks_proxy.as_ref(),
                    None,
                )
                .await;
            handle_result(result, &url, output, save, license)
        }
        Commands::Brute {
            url,
            proxies,
            method,
            concurrency,
            timeout,
            deadline,
            insecure,
            no_verify_origin,
            progress,
            output,
            save,
            license,
        } => {
            let pool = load_proxies(&proxies)?;
            println!("Loaded {} proxies from {:?}", pool.len(), proxies);

            let mut config = BruteFetchConfig::new()
                .with_verify_ssl(!insecure)
                .with_verify_origin(!no_verify_origin)
                .with_concurrency_limit(concurrency)
                .with_timeout(parse_seconds("timeout", timeout)?);
            if let Some(deadline) = deadline {
                config = config.with_deadline(parse_seconds("deadline", deadline)?);
            }

            let observer: Option<Arc<dyn ProgressObserver>> = if progress {
                Some(Arc::new(StdoutProgress))
            } else {
                None
            };

            let brute = BruteFetch::with_config(config);
            let result = brute
                .fetch(&url, pool, parse_method(&method)?, None, observer)
                .await;
            handle_result(result, &url, output, save, license)
        }
    }
}

/// Load a proxy pool from a file, one URL per line; `#` lines are comments.
fn load_proxies(path: &PathBuf) -> Result<Vec<Proxy>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read proxy list {path:?}"))?;
    let mut pool = Vec::new();
    for line in content.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        pool.push(Proxy::parse(trimmed)?);
    }
    Ok(pool)
}

/// Convert a seconds flag to a `Duration`, rejecting negative and
/// non-finite values with a usage error.
fn parse_seconds(flag: &str, seconds: f64) -> Result<Duration> {
    Duration::try_from_secs_f64(seconds).map_err(|_| {
        anyhow!("Invalid --{flag} value {seconds}: expected a non-negative number of seconds")
    })
}

fn parse_method(s: &str) -> Result<HttpMethod> {
    match s.to_lowercase().as_str() {
        "get" => Ok(HttpMethod::Get),
        "head" => Ok(HttpMethod::Head),
        "post" => Ok(HttpMethod::Post),
        "put" => Ok(HttpMethod::Put),
        "delete" => Ok(HttpMethod::Delete),
        _ => Err(anyhow!(
            "Invalid HTTP method: {}. Use: get, head, post, put, delete",
            s
        )),
    }
}

fn handle_result(
    result: std::result::Result<FetchSuccess, FetchError>,
    url: &str,
    output: Option<PathBuf>,
    save: bool,
    license: bool,
) -> Result<()> {
    match result {
        Ok(success) => {
            println!(
                "{} {} via {} ({} bytes)",
                success.status,
                success.final_url,
                success.used_proxy,
                success.body.len()
            );

            let destination = output.or_else(|| {
                save.then(|| PathBuf::from(format!("{}.html", meta::sanitize_filename(url))))
            });
            if let Some(path) = destination {
                std::fs::write(&path, &success.body)
                    .with_context(|| format!("failed to write body to {path:?}"))?;
                println!("Saved {} bytes to {:?}", success.body.len(), path);
            }

            if license {
                match meta::parse_license(&success.body) {
                    Some(info) => {
                        println!("{}", serde_json::to_string_pretty(&info)?);
                    }
                    None => println!("No license metadata found."),
                }
            }
            Ok(())
        }
        Err(FetchError::Exhausted { failures }) => {
            eprintln!(
                "No proxy succeeded for {} ({} attempts): {}",
                url,
                failures.len(),
                summarize_failures(&failures)
            );
            Err(anyhow!("all attempts failed"))
        }
        Err(error) => Err(error.into()),
    }
}

/// Condense a failure history into per-kind counts
fn summarize_failures(failures: &[AttemptFailure]) -> String {
    let mut counts: BTreeMap<String, usize> = BTreeMap::new();
    for failure in failures {
        *counts.entry(failure.kind.to_string()).or_default() += 1;
    }
    counts
        .into_iter()
        .map(|(kind, count)| format!("{kind} x{count}"))
        .collect::<Vec<_>>()
        .join(", ")
}
