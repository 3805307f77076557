//! Registrable-domain extraction for redirect-origin verification

use url::{Host, Url};

/// Extract the registrable domain of a URL's host.
///
/// Approximated as the last two DNS labels; IP addresses and single-label
/// hosts pass through unchanged. Returns `None` for unparseable URLs or
/// URLs without a host.
pub fn registrable_domain(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    match parsed.host()? {
        Host::Domain(domain) => {
            let domain = domain.to_ascii_lowercase();
            let labels: Vec<&str> = domain.split('.').filter(|l| !l.is_empty()).collect();
            if labels.is_empty() {
                return None;
            }
            if labels.len() <= 2 {
                Some(labels.join("."))
            } else {
                Some(labels[labels.len() - 2..].join("."))
            }
        }
        Host::Ipv4(ip) => Some(ip.to_string()),
        Host::Ipv6(ip) => Some(ip.to_string()),
    }
}

/// Check whether two URLs share a registrable domain.
pub fn same_origin(a: &str, b: &str) -> bool {
    match (registrable_domain(a), registrable_domain(b)) {
        (Some(da), Some(db)) => da == db,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strips_subdomains() {
        assert_eq!(
            registrable_domain("https://cdn.images.example.com/a/b").as_deref(),
            Some("example.com")
        );
        assert_eq!(
            registrable_domain("http://example.com/").as_deref(),
            Some("example.com")
        );
    }

    #[test]
    fn test_case_insensitive() {
        assert_eq!(
            registrable_domain("https://WWW.Example.COM/").as_deref(),
            Some("example.com")
        );
    }

    #[test]
    fn test_ip_hosts_pass_through() {
        assert_eq!(
            registrable_domain("http://127.0.0.1:8080/x").as_deref(),
            Some("127.0.0.1")
        );
    }

    #[test]
    fn test_single_label_host() {
        assert_eq!(registrable_domain("http://localhost:3000/").as_deref(), Some("localhost"));
    }

    #[test]
    fn test_unparseable_url() {
        assert_eq!(registrable_domain("not a url"), None);
    }

    #[test]
    fn test_same_origin() {
        assert!(same_origin(
            "https://example.com/page",
            "https://www.example.com/other"
        ));
        assert!(!same_origin(
            "https://example.com/",
            "https://evil-mirror.net/"
        ));
        assert!(!same_origin("garbage", "https://example.com/"));
    }
}
