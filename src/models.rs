use serde::{Deserialize, Serialize};

/// Parameters of one swap request. The camel-case aliases keep older form
/// posts working; a missing field is rejected later as an invalid URL.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SwapRequest {
    #[serde(default, alias = "clientUrl")]
    pub target_url: String,
    #[serde(default, alias = "huneUrl")]
    pub source_url: String,
}

/// Canonical product data lifted from the source page.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ProductRecord {
    pub title: String,
    pub description_html: String,
    pub price: String,
    pub currency: String,
    /// Canonical image URLs; the first one is the main image.
    pub images: Vec<String>,
}

impl ProductRecord {
    /// Price as shown on the target page: `"49.90 EUR"`, or the bare price
    /// when no currency is known.
    pub fn price_label(&self) -> String {
        if self.currency.is_empty() {
            self.price.clone()
        } else {
            format!("{} {}", self.price, self.currency)
        }
    }
}
