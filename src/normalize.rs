//! Image URL canonicalization.
//!
//! Storefront CDNs serve the same asset at many sizes through query
//! parameters. These helpers reduce a URL to a size-independent form and a
//! comparison key so that resolutions of one asset collapse to one entry.

use once_cell::sync::Lazy;
use regex::Regex;
use url::{form_urlencoded, Url};

const SIZE_PARAMS: &[&str] = &["width", "height", "crop"];

static SIZE_PARAM_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"([?&])(?:width|height|crop)=[^&#]*").unwrap());

// "?&" → "?", "&&" → "&"
static DOUBLE_SEP_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"([?&])&+").unwrap());

static TRAILING_SEP_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[?&]+(#|$)").unwrap());

static FILES_SEGMENT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)/files/([^?#]+)").unwrap());

static SEQUENCE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"_(\d{2})\b").unwrap());

/// Strips `width`, `height` and `crop` query parameters.
///
/// Only the size segments are dropped; every other segment is kept
/// byte-for-byte, so URLs differing only in size normalize identically.
/// Unparseable input goes through a textual strip instead. Either way the
/// function is idempotent.
pub fn normalize(raw: &str) -> String {
    match Url::parse(raw) {
        Ok(url) => normalize_parsed(url),
        Err(_) => strip_size_params_textually(raw),
    }
}

fn normalize_parsed(mut url: Url) -> String {
    let Some(query) = url.query() else {
        return url.to_string();
    };
    if !query.split('&').any(is_size_segment) {
        return url.to_string();
    }

    let kept = query
        .split('&')
        .filter(|segment| !segment.is_empty() && !is_size_segment(segment))
        .collect::<Vec<_>>()
        .join("&");

    url.set_query((!kept.is_empty()).then_some(kept.as_str()));
    url.to_string()
}

/// Compares the decoded key, so `%77idth=…` counts as well.
fn is_size_segment(segment: &str) -> bool {
    form_urlencoded::parse(segment.as_bytes())
        .next()
        .is_some_and(|(key, _)| SIZE_PARAMS.contains(&key.as_ref()))
}

fn strip_size_params_textually(raw: &str) -> String {
    let mut current = raw.to_string();
    // Each pass can expose a separator the previous one could not see.
    loop {
        let stripped = SIZE_PARAM_RE.replace_all(&current, "$1");
        let collapsed = DOUBLE_SEP_RE.replace_all(&stripped, "$1");
        let next = TRAILING_SEP_RE.replace_all(&collapsed, "$1").into_owned();
        if next == current {
            return next;
        }
        current = next;
    }
}

/// Dedup key: the path after `/files/` when present, else the whole
/// normalized URL, lower-cased. Never shown to users.
pub fn canonical_key(raw: &str) -> String {
    let clean = normalize(raw);
    FILES_SEGMENT_RE
        .captures(&clean)
        .and_then(|caps| caps.get(1))
        .map_or(clean.as_str(), |m| m.as_str())
        .to_lowercase()
}

/// Two-digit gallery position encoded as `_NN` in the file name.
pub fn sequence_suffix(key: &str) -> Option<u8> {
    SEQUENCE_RE
        .captures(key)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_size_parameters_and_keeps_others() {
        assert_eq!(
            normalize("https://shop.example/cdn/shop/files/a_01.jpg?v=17&width=800&crop=center"),
            "https://shop.example/cdn/shop/files/a_01.jpg?v=17"
        );
        assert_eq!(
            normalize("https://shop.example/cdn/shop/files/a_01.jpg?width=800&height=600"),
            "https://shop.example/cdn/shop/files/a_01.jpg"
        );
    }

    #[test]
    fn leaves_urls_without_size_parameters_alone() {
        let url = "https://shop.example/cdn/shop/files/a.jpg?v=1&q=a%20b";
        assert_eq!(normalize(url), url);
    }

    #[test]
    fn normalize_is_idempotent() {
        let inputs = [
            "https://shop.example/cdn/shop/files/a.jpg?width=100&v=2#frag",
            "https://shop.example/a.jpg?q=a+b&width=1&name=%C3%A9",
            "https://shop.example/a.jpg?flag&height=20",
            "//cdn.example/cdn/shop/files/b.jpg?width=300",
            "/cdn/shop/files/c.jpg?width=300&v=1",
            "/cdn/shop/files/c.jpg?v=1&width=300&&crop=top&",
            "not a url ?width=5width=6",
            "x?&&width=",
            "",
        ];
        for input in inputs {
            let once = normalize(input);
            assert_eq!(normalize(&once), once, "not idempotent for {input:?}");
        }
    }

    #[test]
    fn malformed_urls_fall_back_to_textual_strip() {
        assert_eq!(
            normalize("/cdn/shop/files/c.jpg?width=300&v=1"),
            "/cdn/shop/files/c.jpg?v=1"
        );
        assert_eq!(normalize("/cdn/shop/files/c.jpg?v=1&width=300"), "/cdn/shop/files/c.jpg?v=1");
        assert_eq!(normalize("/cdn/shop/files/c.jpg?width=300"), "/cdn/shop/files/c.jpg");
    }

    #[test]
    fn size_variants_share_a_canonical_key() {
        let small = "https://shop.example/cdn/shop/files/Brisa_01.jpg?v=3&width=200";
        let large = "https://shop.example/cdn/shop/files/Brisa_01.jpg?width=1600&v=3&crop=center";
        assert_eq!(canonical_key(small), canonical_key(large));
        assert_eq!(canonical_key(small), "brisa_01.jpg");
    }

    #[test]
    fn other_parameters_survive_byte_for_byte() {
        let plain = "https://shop.example/cdn/shop/products/x.jpg?v=a%20b";
        let sized = "https://shop.example/cdn/shop/products/x.jpg?v=a%20b&width=100";
        assert_eq!(normalize(sized), plain);
        assert_eq!(canonical_key(sized), canonical_key(plain));

        let bare = "https://shop.example/cdn/shop/products/x.jpg?flag";
        let bare_sized = "https://shop.example/cdn/shop/products/x.jpg?flag&width=100";
        assert_eq!(normalize(bare_sized), bare);
        assert_eq!(canonical_key(bare_sized), canonical_key(bare));
    }

    #[test]
    fn percent_encoded_size_key_is_still_stripped() {
        assert_eq!(
            normalize("https://shop.example/a.jpg?%77idth=10&v=1"),
            "https://shop.example/a.jpg?v=1"
        );
    }

    #[test]
    fn key_without_files_marker_is_whole_url() {
        assert_eq!(
            canonical_key("https://Shop.example/cdn/shop/products/X.jpg?width=10"),
            "https://shop.example/cdn/shop/products/x.jpg"
        );
    }

    #[test]
    fn sequence_suffix_needs_a_word_boundary() {
        assert_eq!(sequence_suffix("brisa_01.jpg"), Some(1));
        assert_eq!(sequence_suffix("brisa_12"), Some(12));
        assert_eq!(sequence_suffix("brisa_123.jpg"), None);
        assert_eq!(sequence_suffix("brisa-01.jpg"), None);
        assert_eq!(sequence_suffix("brisa.jpg"), None);
    }
}
