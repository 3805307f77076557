//! License metadata extraction and filename sanitization
//!
//! Edge helpers consumed after a fetch completes; they never touch the
//! request/retry machinery.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use tracing::debug;

static META_TAG_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<meta\b[^>]*>").expect("Invalid meta tag regex"));

static ATTR_NAME_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?i)name\s*=\s*["']([^"']+)["']"#).expect("Invalid name attr regex"));

static ATTR_CONTENT_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)content\s*=\s*["']([^"']*)["']"#).expect("Invalid content attr regex")
});

static LICENSE_TEXT_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)license.{0,50}?(https?://\S+|cc\s*by|creative\s*commons)")
        .expect("Invalid license text regex")
});

static JSONLD_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?is)<script[^>]*type\s*=\s*["']application/ld\+json["'][^>]*>(.*?)</script>"#)
        .expect("Invalid JSON-LD regex")
});

static UNSAFE_FILENAME_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"[\\/*?:"<>|]"#).expect("Invalid filename regex"));

const LICENSE_META_WORDS: [&str; 4] = ["license", "copyright", "rights", "attribution"];

/// License, copyright and attribution metadata found in a page
#[derive(Debug, Clone, Default, Serialize)]
pub struct LicenseInfo {
    /// `<meta>` tags whose name mentions licensing
    pub meta: HashMap<String, String>,
    /// License-adjacent matches in the raw HTML text
    pub regex_matches: Vec<String>,
    /// `license` values from JSON-LD blocks
    pub jsonld: Vec<Value>,
}

impl LicenseInfo {
    pub fn is_empty(&self) -> bool {
        self.meta.is_empty() && self.regex_matches.is_empty() && self.jsonld.is_empty()
    }
}

/// Scan HTML bytes for license, copyright and attribution metadata.
///
/// Returns `None` when nothing license-related is found.
pub fn parse_license(html: &[u8]) -> Option<LicenseInfo> {
    let html = String::from_utf8_lossy(html);
    let mut info = LicenseInfo::default();

    for tag in META_TAG_REGEX.find_iter(&html) {
        let tag = tag.as_str();
        let Some(name) = ATTR_NAME_REGEX.captures(tag) else {
            continue;
        };
        let name = name[1].to_lowercase();
        if LICENSE_META_WORDS.iter().any(|word| name.contains(word)) {
            let content = ATTR_CONTENT_REGEX
                .captures(tag)
                .map(|c| c[1].to_string())
                .unwrap_or_default();
            info.meta.insert(name, content);
        }
    }

    for captures in LICENSE_TEXT_REGEX.captures_iter(&html) {
        info.regex_matches.push(captures[1].to_string());
    }

    for captures in JSONLD_REGEX.captures_iter(&html) {
        match serde_json::from_str::<Value>(&captures[1]) {
            Ok(Value::Object(object)) => {
                if let Some(license) = object.get("license") {
                    info.jsonld.push(license.clone());
                }
            }
            Ok(Value::Array(entries)) => {
                for entry in entries {
                    if let Some(license) = entry.as_object().and_then(|o| o.get("license")) {
                        info.jsonld.push(license.clone());
                    }
                }
            }
            Ok(_) => {}
            Err(e) => debug!("skipping unparseable JSON-LD block: {e}"),
        }
    }

    if info.is_empty() {
        None
    } else {
        Some(info)
    }
}

/// Sanitize a string for use as a filename.
pub fn sanitize_filename(name: &str) -> String {
    UNSAFE_FILENAME_REGEX.replace_all(name, "_").into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_meta_tags_extracted() {
        let html = br#"<html><head>
            <meta name="license" content="CC BY 4.0">
            <meta name="dc.rights" content="All rights reserved">
            <meta name="viewport" content="width=device-width">
        </head></html>"#;
        let info = parse_license(html).unwrap();
        assert_eq!(info.meta.get("license").map(String::as_str), Some("CC BY 4.0"));
        assert_eq!(
            info.meta.get("dc.rights").map(String::as_str),
            Some("All rights reserved")
        );
        assert!(!info.meta.contains_key("viewport"));
    }

    #[test]
    fn test_text_matches_extracted() {
        let html = b"<p>Content under license: https://creativecommons.org/licenses/by/4.0/</p>";
        let info = parse_license(html).unwrap();
        assert_eq!(info.regex_matches.len(), 1);
        assert!(info.regex_matches[0].starts_with("https://creativecommons.org"));
    }

    #[test]
    fn test_jsonld_license_extracted() {
        let html = br#"<script type="application/ld+json">
            {"@type": "ImageObject", "license": "https://example.com/license"}
        </script>"#;
        let info = parse_license(html).unwrap();
        assert_eq!(info.jsonld, vec![Value::from("https://example.com/license")]);
    }

    #[test]
    fn test_jsonld_array_form() {
        let html = br#"<script type="application/ld+json">
            [{"license": "CC0"}, {"name": "no license here"}]
        </script>"#;
        let info = parse_license(html).unwrap();
        assert_eq!(info.jsonld, vec![Value::from("CC0")]);
    }

    #[test]
    fn test_broken_jsonld_is_skipped() {
        let html = br#"<script type="application/ld+json">{not json</script>
            <meta name="copyright" content="2024">"#;
        let info = parse_license(html).unwrap();
        assert!(info.jsonld.is_empty());
        assert!(info.meta.contains_key("copyright"));
    }

    #[test]
    fn test_no_license_info_is_none() {
        assert!(parse_license(b"<html><body>plain page</body></html>").is_none());
    }

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename("a/b\\c:d"), "a_b_c_d");
        assert_eq!(sanitize_filename("query?x=1&y=2"), "query_x=1&y=2");
        assert_eq!(sanitize_filename("plain-name.html"), "plain-name.html");
        assert_eq!(sanitize_filename(r#"<"pipe|">"#), r#"__pipe___"#);
    }
}
