use std::collections::HashSet;

use once_cell::sync::Lazy;
use scraper::{ElementRef, Html, Selector};
use url::Url;

use crate::error::SwapError;
use crate::fetch::HttpFetcher;
use crate::jsonld::{find_product, ProductNode};
use crate::models::ProductRecord;
use crate::normalize::{canonical_key, normalize, sequence_suffix};

// ── Constants ────────────────────────────────────────────────────────────────

/// Only storefront CDN assets are product imagery; everything else on the
/// page (logos, payment badges, trackers) is ignored.
const ASSET_PATH_MARKER: &str = "/cdn/shop/";
const MAX_IMAGES: usize = 10;
const DEFAULT_TITLE: &str = "Product";

// ── Lazy static selectors ────────────────────────────────────────────────────

static IMG_SEL: Lazy<Selector> = Lazy::new(|| Selector::parse("img").unwrap());
static TITLE_SEL: Lazy<Selector> = Lazy::new(|| Selector::parse("title").unwrap());
static BASE_SEL: Lazy<Selector> = Lazy::new(|| Selector::parse("base[href]").unwrap());
static OG_TITLE_SEL: Lazy<Selector> =
    Lazy::new(|| Selector::parse(r#"meta[property="og:title"]"#).unwrap());
static OG_DESCRIPTION_SEL: Lazy<Selector> =
    Lazy::new(|| Selector::parse(r#"meta[property="og:description"]"#).unwrap());

// ── Public API ───────────────────────────────────────────────────────────────

/// Fetches `source` and lifts its product data.
///
/// Missing structured data is not an error; only fetch failures and
/// non-markup responses are.
pub async fn extract_product(
    fetcher: &HttpFetcher,
    source: &Url,
) -> Result<ProductRecord, SwapError> {
    let document = fetcher.fetch_html(source).await?;
    let record = extract_from_html(&document.body, &document.url);
    tracing::info!(
        source = %document.url,
        title = %record.title,
        price = %record.price,
        images = record.images.len(),
        "extracted product"
    );
    Ok(record)
}

// ── Main extraction pipeline ─────────────────────────────────────────────────

pub fn extract_from_html(html: &str, page_url: &Url) -> ProductRecord {
    let document = Html::parse_document(html);
    let base = document_base(&document, page_url);
    let product = find_product(&document);

    // Resolve title: product name → og:title → <title> → constant.
    let title = product
        .as_ref()
        .and_then(ProductNode::name)
        .or_else(|| meta_content(&document, &OG_TITLE_SEL))
        .or_else(|| {
            document
                .select(&TITLE_SEL)
                .next()
                .map(|el| normalize_text(&collect_text(el)))
                .filter(|s| !s.is_empty())
        })
        .unwrap_or_else(|| DEFAULT_TITLE.to_string());

    let description_html = product
        .as_ref()
        .and_then(ProductNode::description)
        .or_else(|| meta_content(&document, &OG_DESCRIPTION_SEL))
        .map(|text| format!("<p>{}</p>", escape_html(&text)))
        .unwrap_or_default();

    let price = product.as_ref().and_then(ProductNode::price).unwrap_or_default();
    let currency = product.as_ref().and_then(ProductNode::currency).unwrap_or_default();

    let candidates = harvest_candidates(&document, &base);
    let images = order_images(dedupe_images(candidates));

    ProductRecord {
        title,
        description_html,
        price,
        currency,
        images,
    }
}

// ── Image harvesting ─────────────────────────────────────────────────────────

/// Every accepted URL from `src`, `data-src` and `srcset`, in DOM order,
/// resolved against `base`.
fn harvest_candidates(document: &Html, base: &Url) -> Vec<String> {
    let mut candidates = Vec::new();
    let mut push = |raw: &str| {
        let Some(first) = raw.split_whitespace().next() else {
            return;
        };
        if !first.contains(ASSET_PATH_MARKER) {
            return;
        }
        candidates.push(
            base.join(first)
                .map(|u| u.to_string())
                .unwrap_or_else(|_| first.to_string()),
        );
    };

    for img in document.select(&IMG_SEL) {
        let v = img.value();
        if let Some(src) = v.attr("src") {
            push(src);
        }
        if let Some(lazy) = v.attr("data-src") {
            push(lazy);
        }
        if let Some(srcset) = v.attr("srcset") {
            // Each entry is "url descriptor"; the URL ends at the first space.
            srcset.split(',').for_each(|entry| push(entry.trim()));
        }
    }
    candidates
}

/// Keeps the first normalized form of each canonical key.
fn dedupe_images(candidates: Vec<String>) -> Vec<(String, String)> {
    let mut seen = HashSet::new();
    candidates
        .into_iter()
        .filter_map(|raw| {
            let url = normalize(&raw);
            let key = canonical_key(&url);
            seen.insert(key.clone()).then_some((key, url))
        })
        .collect()
}

/// Orders by `_NN` suffix when at least two images carry one (dropping the
/// rest), otherwise keeps harvest order. Capped at [`MAX_IMAGES`].
fn order_images(entries: Vec<(String, String)>) -> Vec<String> {
    let mut sequenced: Vec<(u8, String, String)> = entries
        .iter()
        .filter_map(|(key, url)| sequence_suffix(key).map(|n| (n, key.clone(), url.clone())))
        .collect();

    if sequenced.len() >= 2 {
        sequenced.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(&b.1)));
        return sequenced
            .into_iter()
            .take(MAX_IMAGES)
            .map(|(_, _, url)| url)
            .collect();
    }

    entries
        .into_iter()
        .take(MAX_IMAGES)
        .map(|(_, url)| url)
        .collect()
}

// ── Document helpers ─────────────────────────────────────────────────────────

/// `<base href>` resolved against the page URL, or the page URL itself.
fn document_base(document: &Html, page_url: &Url) -> Url {
    document
        .select(&BASE_SEL)
        .next()
        .and_then(|el| el.value().attr("href"))
        .and_then(|href| page_url.join(href.trim()).ok())
        .unwrap_or_else(|| page_url.clone())
}

fn meta_content(document: &Html, selector: &Selector) -> Option<String> {
    document
        .select(selector)
        .next()
        .and_then(|el| el.value().attr("content"))
        .map(|content| content.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Recursively collect all text from an element and its descendants.
fn collect_text(el: ElementRef<'_>) -> String {
    el.text().collect()
}

/// Collapse whitespace and trim.
fn normalize_text(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

pub(crate) fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(ch),
        }
    }
    out
}
