//! Utility functions and helpers.

pub mod http;
pub mod log;

use std::sync::LazyLock;

use regex::Regex;
use sha2::{Digest, Sha256};
use unicode_segmentation::UnicodeSegmentation;
use url::Url;

/// Maximum length of a single path label, in grapheme clusters.
pub const MAX_LABEL_LEN: usize = 40;

static DISALLOWED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"[<>:"/\\|?*,\x00-\x1f\x7f]"#).expect("static pattern")
});

static WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").expect("static pattern"));

/// Graphemes kept in front of the digest suffix of a shortened label.
const SHORTENED_PREFIX_LEN: usize = 28;

/// Hex digits of `sha256(raw)` appended to a shortened label.
const SHORTENED_DIGEST_LEN: usize = 8;

/// Turn an arbitrary label into a single filesystem-safe path component.
///
/// Disallowed characters become `_` and whitespace runs collapse to `_`.
/// Labels longer than [`MAX_LABEL_LEN`] grapheme clusters keep a prefix and
/// get `-<8 hex of sha256(raw)>` appended, so two inputs sharing a long
/// prefix still map to different components. Deterministic and idempotent.
pub fn sanitize_label(raw: &str) -> String {
    let replaced = DISALLOWED.replace_all(raw.trim(), "_");
    let collapsed = WHITESPACE.replace_all(&replaced, "_");
    let trim = |s: &str| {
        s.trim_matches(|c| c == '.' || c == '_' || c == ' ')
            .to_string()
    };

    let label = if collapsed.graphemes(true).count() > MAX_LABEL_LEN {
        let prefix: String = collapsed
            .graphemes(true)
            .take(SHORTENED_PREFIX_LEN)
            .collect();
        format!(
            "{}-{}",
            trim(&prefix),
            &digest(raw.as_bytes())[..SHORTENED_DIGEST_LEN]
        )
    } else {
        trim(&collapsed)
    };

    if label.is_empty() {
        "_".to_string()
    } else {
        label
    }
}

/// Hex-encoded SHA-256 of the given bytes.
pub fn digest(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Resolve a potentially relative URL against a base URL.
pub fn resolve_url(base: &Url, href: &str) -> String {
    base.join(href)
        .map(|u| u.to_string())
        .unwrap_or_else(|_| href.to_string())
}

/// Strip HTML-escaping artefacts that leak into scraped `href` values.
pub fn clean_href(href: &str) -> String {
    href.trim().replace("amp;", "")
}

/// Label derived from a URL, e.g. `example.com/a?b=1` -> `example.com_a_b=1`.
pub fn url_label(url: &str) -> String {
    let stripped = url
        .trim()
        .trim_start_matches("https://")
        .trim_start_matches("http://");
    sanitize_label(&stripped.replace(['/', '?', '&'], "_"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_replaces_disallowed() {
        assert_eq!(sanitize_label("a/b:c"), "a_b_c");
        assert_eq!(sanitize_label("Foo Bar, Inc."), "Foo_Bar__Inc");
        assert_eq!(sanitize_label("  spaced   out  "), "spaced_out");
    }

    #[test]
    fn test_sanitize_shortens_long_labels() {
        let long = "ä".repeat(100);
        let label = sanitize_label(&long);

        assert_eq!(
            label.graphemes(true).count(),
            SHORTENED_PREFIX_LEN + 1 + SHORTENED_DIGEST_LEN
        );
        assert!(label.starts_with(&"ä".repeat(SHORTENED_PREFIX_LEN)));
        assert!(label.ends_with(&digest(long.as_bytes())[..SHORTENED_DIGEST_LEN]));
        assert_eq!(sanitize_label(&label), label);
    }

    #[test]
    fn test_long_labels_with_shared_prefix_stay_distinct() {
        let prefix = "Payment institutions - Account information service provider";
        let a = sanitize_label(&format!("{prefix} (AISP)"));
        let b = sanitize_label(&format!("{prefix} (PISP)"));

        assert_ne!(a, b);
        assert!(a.graphemes(true).count() <= MAX_LABEL_LEN);
        assert_eq!(a, sanitize_label(&format!("{prefix} (AISP)")));
    }

    #[test]
    fn test_labels_at_the_limit_are_kept_whole() {
        let exact = "x".repeat(MAX_LABEL_LEN);
        assert_eq!(sanitize_label(&exact), exact);
    }

    #[test]
    fn test_long_urls_get_distinct_labels() {
        let a = url_label("https://www.fma.gv.at/en/search-company-database/?cname=alpha");
        let b = url_label("https://www.fma.gv.at/en/search-company-database/?cname=beta");

        assert_ne!(a, b);
        assert!(a.starts_with("www.fma.gv.at_en_search-"));
    }

    #[test]
    fn test_sanitize_never_empty_or_relative() {
        assert_eq!(sanitize_label(""), "_");
        assert_eq!(sanitize_label(".."), "_");
        assert_eq!(sanitize_label("///"), "_");
    }

    #[test]
    fn test_sanitize_is_deterministic() {
        let a = sanitize_label("Banks - Banks licensed in Austria");
        let b = sanitize_label("Banks - Banks licensed in Austria");
        assert_eq!(a, b);
        assert_eq!(a, "Banks_-_Banks_licensed_in_Austria");
    }

    #[test]
    fn test_digest_is_hex_sha256() {
        let d = digest(b"v1");
        assert_eq!(d.len(), 64);
        assert_eq!(d, digest(b"v1"));
        assert_ne!(d, digest(b"v2"));
    }

    #[test]
    fn test_clean_href() {
        assert_eq!(
            clean_href(" detail.do?id=1&amp;locale=en "),
            "detail.do?id=1&locale=en"
        );
    }

    #[test]
    fn test_url_label() {
        assert_eq!(
            url_label("https://example.com/list?page=1&x=2"),
            "example.com_list_page=1_x=2"
        );
    }

    #[test]
    fn test_resolve_url() {
        let base = Url::parse("https://example.com/path/").unwrap();
        assert_eq!(
            resolve_url(&base, "page.html"),
            "https://example.com/path/page.html"
        );
        assert_eq!(
            resolve_url(&base, "https://other.com/x"),
            "https://other.com/x"
        );
    }
}
