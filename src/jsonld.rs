//! Product lookup in embedded JSON-LD blocks.

use once_cell::sync::Lazy;
use scraper::{Html, Selector};
use serde_json::Value;

static JSONLD_SEL: Lazy<Selector> =
    Lazy::new(|| Selector::parse(r#"script[type="application/ld+json"]"#).unwrap());

/// A schema.org `Product` object found in the document.
#[derive(Debug, Clone, PartialEq)]
pub struct ProductNode(Value);

impl ProductNode {
    pub fn name(&self) -> Option<String> {
        text_field(&self.0, "name")
    }

    pub fn description(&self) -> Option<String> {
        text_field(&self.0, "description")
    }

    /// The first offer: `offers` may be a single object or a list.
    pub fn offer(&self) -> Option<&Value> {
        let offers = self.0.get("offers")?;
        match offers {
            Value::Array(items) => items.first(),
            Value::Object(_) => Some(offers),
            _ => None,
        }
    }

    pub fn price(&self) -> Option<String> {
        self.offer().and_then(|offer| text_field(offer, "price"))
    }

    pub fn currency(&self) -> Option<String> {
        self.offer().and_then(|offer| text_field(offer, "priceCurrency"))
    }
}

/// Returns the first `Product` in block order.
///
/// Blocks that fail to parse are skipped. Only arrays and `@graph`
/// collections are descended into, so a product nested under an unrelated
/// object (a `WebPage.mainEntity`, say) is not found.
pub fn find_product(document: &Html) -> Option<ProductNode> {
    document
        .select(&JSONLD_SEL)
        .filter_map(|script| {
            let text: String = script.text().collect();
            let trimmed = text.trim();
            if trimmed.is_empty() {
                return None;
            }
            match serde_json::from_str::<Value>(trimmed) {
                Ok(value) => Some(value),
                Err(e) => {
                    tracing::debug!(error = %e, "skipping malformed JSON-LD block");
                    None
                }
            }
        })
        .find_map(|block| scan(&block).cloned())
        .map(ProductNode)
}

fn scan(value: &Value) -> Option<&Value> {
    match value {
        Value::Array(items) => items.iter().find_map(scan),
        Value::Object(map) => {
            if is_product(map.get("@type")) {
                return Some(value);
            }
            map.get("@graph").and_then(scan)
        }
        _ => None,
    }
}

fn is_product(kind: Option<&Value>) -> bool {
    match kind {
        Some(Value::String(s)) => s == "Product",
        Some(Value::Array(kinds)) => kinds.iter().any(|k| k.as_str() == Some("Product")),
        _ => false,
    }
}

/// String fields, with numbers rendered in their JSON form (`49.9`).
fn text_field(value: &Value, key: &str) -> Option<String> {
    let text = match value.get(key)? {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        _ => return None,
    };
    (!text.is_empty()).then_some(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(blocks: &[&str]) -> Html {
        let scripts: String = blocks
            .iter()
            .map(|b| format!(r#"<script type="application/ld+json">{b}</script>"#))
            .collect();
        Html::parse_document(&format!("<html><head>{scripts}</head><body></body></html>"))
    }

    #[test]
    fn finds_top_level_product() {
        let d = doc(&[r#"{"@type":"Product","name":"Brisa Ace","offers":{"price":"49.90","priceCurrency":"EUR"}}"#]);
        let p = find_product(&d).unwrap();
        assert_eq!(p.name().as_deref(), Some("Brisa Ace"));
        assert_eq!(p.price().as_deref(), Some("49.90"));
        assert_eq!(p.currency().as_deref(), Some("EUR"));
    }

    #[test]
    fn skips_malformed_blocks_and_keeps_scanning() {
        let d = doc(&[
            "{ not json",
            r#"{"@type":"Organization","name":"Shop"}"#,
            r#"[{"@type":"BreadcrumbList"},{"@type":"Product","name":"Second"}]"#,
        ]);
        assert_eq!(find_product(&d).unwrap().name().as_deref(), Some("Second"));
    }

    #[test]
    fn recurses_into_graph() {
        let d = doc(&[r#"{"@context":"https://schema.org","@graph":[{"@type":"WebPage"},{"@type":["Product","Thing"],"name":"Graphed"}]}"#]);
        assert_eq!(find_product(&d).unwrap().name().as_deref(), Some("Graphed"));
    }

    #[test]
    fn does_not_descend_into_arbitrary_keys() {
        let d = doc(&[r#"{"@type":"WebPage","mainEntity":{"@type":"Product","name":"Hidden"}}"#]);
        assert!(find_product(&d).is_none());
    }

    #[test]
    fn first_offer_of_a_list_and_numeric_price() {
        let d = doc(&[r#"{"@type":"Product","offers":[{"price":12.5,"priceCurrency":"DKK"},{"price":"99"}]}"#]);
        let p = find_product(&d).unwrap();
        assert_eq!(p.price().as_deref(), Some("12.5"));
        assert_eq!(p.currency().as_deref(), Some("DKK"));
        assert_eq!(p.name(), None);
    }
}
