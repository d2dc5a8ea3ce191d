//! Static swap for when no browser is available.
//!
//! Works on the fetched markup rather than a rendered page, so there is no
//! geometry: images are replaced in document order inside the content root
//! selectors instead of by size and position.

use dom_query::{Document, Selection};

use crate::layout::SelectorChain;
use crate::locator::SelectorProfile;
use crate::models::ProductRecord;
use crate::serialize::scrub;

const MAX_STATIC_IMAGES: usize = 10;

/// Applies `record` to `html` and returns the serialized result.
pub fn static_swap(html: &str, profile: &SelectorProfile, record: &ProductRecord) -> String {
    let doc = Document::from(html);

    for sel in profile.title_nodes.selectors() {
        set_text(&doc.select(sel).first(), &record.title);
    }
    set_text(&doc.select("title").first(), &record.title);

    if let Some(el) = first_of(&doc, &profile.description) {
        el.set_html(record.description_html.as_str());
    }

    if !record.price.is_empty() {
        if let Some(el) = first_of(&doc, &profile.price) {
            set_text(&el, &record.price_label());
        }
    }

    if let Some(primary) = record.images.first() {
        let scope = profile
            .content_root
            .selectors()
            .iter()
            .map(|root| format!("{root} img"))
            .collect::<Vec<_>>()
            .join(", ");
        let limit = MAX_STATIC_IMAGES.min(record.images.len().max(1));
        for (i, img) in doc.select(&scope).iter().take(limit).enumerate() {
            let url = record.images.get(i).unwrap_or(primary);
            img.set_attr("src", url);
            img.set_attr("data-src", url);
            img.remove_attr("srcset");
            img.remove_attr("data-srcset");
        }
    }

    scrub(&doc);
    doc.html().to_string()
}

fn first_of<'a>(doc: &'a Document, chain: &SelectorChain) -> Option<Selection<'a>> {
    chain
        .selectors()
        .iter()
        .map(|sel| doc.select(sel).first())
        .find(Selection::exists)
}

fn set_text(sel: &Selection, text: &str) {
    if sel.exists() {
        sel.set_text(text);
    }
}
