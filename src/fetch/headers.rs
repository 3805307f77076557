//! Randomized realistic browser headers
//!
//! Target servers routinely reject requests with empty or obviously
//! synthetic header sets. Each generated set is internally consistent:
//! the User-Agent, Accept values and client-hint headers all belong to
//! the same browser family and platform.

use rand::Rng;
use std::collections::HashMap;

const ACCEPT_HTML: &str =
    "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8";
const ACCEPT_HTML_WEBP: &str =
    "text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,*/*;q=0.8";

/// Generate a random, realistic set of browser HTTP headers.
///
/// Pure in the supplied random source: a seeded RNG yields the same header
/// set every time, so tests can pin the output.
pub fn random_headers<R: Rng + ?Sized>(rng: &mut R) -> HashMap<String, String> {
    let mut headers = match rng.gen_range(0..5) {
        0 => chrome_headers(rng, true),
        1 => chrome_headers(rng, false),
        2 => firefox_headers(rng, true),
        3 => firefox_headers(rng, false),
        _ => safari_headers(),
    };

    let referers = [
        Some("https://www.google.com/"),
        Some("https://www.bing.com/"),
        Some("https://duckduckgo.com/"),
        Some("https://news.ycombinator.com/"),
        None,
    ];
    if let Some(referer) = referers[rng.gen_range(0..referers.len())] {
        headers.insert("Referer".to_string(), referer.to_string());
    }

    let cache_controls = [
        Some("max-age=0"),
        Some("no-cache"),
        Some("no-store"),
        Some("private"),
        None,
    ];
    if let Some(cc) = cache_controls[rng.gen_range(0..cache_controls.len())] {
        headers.insert("Cache-Control".to_string(), cc.to_string());
    }

    headers
}

fn common(headers: &mut HashMap<String, String>) {
    headers.insert(
        "Accept-Encoding".to_string(),
        "gzip, deflate, br".to_string(),
    );
    headers.insert("Connection".to_string(), "keep-alive".to_string());
}

fn accept_language<R: Rng + ?Sized>(rng: &mut R) -> String {
    if rng.gen_bool(0.5) {
        "en-US,en;q=0.9".to_string()
    } else {
        "en-GB,en;q=0.8".to_string()
    }
}

fn dnt<R: Rng + ?Sized>(rng: &mut R) -> String {
    (if rng.gen_bool(0.5) { "1" } else { "0" }).to_string()
}

fn chrome_headers<R: Rng + ?Sized>(rng: &mut R, windows: bool) -> HashMap<String, String> {
    let mut headers = HashMap::new();
    let user_agent = if windows {
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
         (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36"
    } else {
        "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 \
         (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36"
    };
    headers.insert("User-Agent".to_string(), user_agent.to_string());
    headers.insert(
        "Accept".to_string(),
        if rng.gen_bool(0.5) {
            ACCEPT_HTML_WEBP
        } else {
            ACCEPT_HTML
        }
        .to_string(),
    );
    headers.insert("Accept-Language".to_string(), accept_language(rng));
    headers.insert(
        "Sec-CH-UA".to_string(),
        if windows {
            r#""Chromium";v="124", "Google Chrome";v="124", "Not.A/Brand";v="99""#
        } else {
            r#""Google Chrome";v="124", "Chromium";v="124", "Not=A?Brand";v="24""#
        }
        .to_string(),
    );
    headers.insert("Sec-CH-UA-Mobile".to_string(), "?0".to_string());
    headers.insert(
        "Sec-CH-UA-Platform".to_string(),
        if windows { r#""Windows""# } else { r#""macOS""# }.to_string(),
    );
    headers.insert("Sec-Fetch-Site".to_string(), "none".to_string());
    headers.insert("Sec-Fetch-Mode".to_string(), "navigate".to_string());
    headers.insert("Sec-Fetch-User".to_string(), "?1".to_string());
    headers.insert("Sec-Fetch-Dest".to_string(), "document".to_string());
    headers.insert(
        "Upgrade-Insecure-Requests".to_string(),
        "1".to_string(),
    );
    headers.insert("DNT".to_string(), dnt(rng));
    common(&mut headers);
    headers
}

fn firefox_headers<R: Rng + ?Sized>(rng: &mut R, windows: bool) -> HashMap<String, String> {
    let mut headers = HashMap::new();
    let user_agent = if windows {
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:125.0) Gecko/20100101 Firefox/125.0"
    } else {
        "Mozilla/5.0 (Macintosh; Intel Mac OS X 10.15; rv:125.0) Gecko/20100101 Firefox/125.0"
    };
    headers.insert("User-Agent".to_string(), user_agent.to_string());
    headers.insert("Accept".to_string(), ACCEPT_HTML.to_string());
    headers.insert("Accept-Language".to_string(), accept_language(rng));
    headers.insert("DNT".to_string(), dnt(rng));
    common(&mut headers);
    headers
}

fn safari_headers() -> HashMap<String, String> {
    let mut headers = HashMap::new();
    headers.insert(
        "User-Agent".to_string(),
        "Mozilla/5.0 (Macintosh; Intel Mac OS X 13_4_1) AppleWebKit/605.1.15 \
         (KHTML, like Gecko) Version/17.4 Safari/605.1.15"
            .to_string(),
    );
    headers.insert("Accept".to_string(), ACCEPT_HTML.to_string());
    headers.insert("Accept-Language".to_string(), "en-US,en;q=0.9".to_string());
    common(&mut headers);
    headers
}
