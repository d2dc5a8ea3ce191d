use dom_query::Document;

use crate::layout::NODE_ID_ATTR;

/// Elements that would re-run client code or undo the swap once the snapshot
/// is opened elsewhere.
const STRIP_SELECTORS: &[&str] = &[
    "script",
    r#"link[rel~="modulepreload"]"#,
    r#"link[rel~="preload"][as="script"]"#,
    "base",
];

/// Serializes a swapped page into a standalone document.
pub fn serialize(html: &str) -> String {
    let doc = Document::from(html);
    scrub(&doc);
    doc.html().to_string()
}

/// In-place form of [`serialize`] for callers already holding a document.
pub(crate) fn scrub(doc: &Document) {
    doc.select(&STRIP_SELECTORS.join(", ")).remove();

    for meta in doc.select("meta[http-equiv]").iter() {
        let is_csp = meta
            .attr("http-equiv")
            .is_some_and(|v| v.trim().eq_ignore_ascii_case("content-security-policy"));
        if is_csp {
            meta.remove();
        }
    }

    doc.select(&format!("[{NODE_ID_ATTR}]"))
        .remove_attr(NODE_ID_ATTR);
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"<!doctype html><html><head>
        <base href="https://shop.example/">
        <meta http-equiv="Content-Security-Policy" content="img-src 'self'">
        <meta http-equiv="content-security-policy" content="default-src 'self'">
        <meta http-equiv="refresh" content="30">
        <link rel="modulepreload" href="/app.js">
        <link rel="preload" as="script" href="/chunk.js">
        <link rel="preload" as="image" href="/hero.jpg">
        <link rel="stylesheet" href="/site.css">
        <script>window.hydrate()</script>
        </head><body>
        <h1 data-pswap-id="0">Brisa Ace</h1>
        <script src="/app.js"></script>
        </body></html>"#;

    #[test]
    fn strips_scripts_csp_base_and_script_preloads() {
        let out = serialize(PAGE);
        assert!(!out.contains("<script"));
        assert!(!out.contains("<base"));
        assert!(!out.to_lowercase().contains("content-security-policy"));
        assert!(!out.contains("modulepreload"));
        assert!(!out.contains("chunk.js"));
    }

    #[test]
    fn keeps_unrelated_head_elements() {
        let out = serialize(PAGE);
        assert!(out.contains(r#"http-equiv="refresh""#));
        assert!(out.contains("/hero.jpg"));
        assert!(out.contains("/site.css"));
    }

    #[test]
    fn removes_probe_markers_but_not_content() {
        let out = serialize(PAGE);
        assert!(!out.contains(NODE_ID_ATTR));
        assert!(out.contains("<h1>Brisa Ace</h1>"));
    }
}
