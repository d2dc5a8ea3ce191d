//! Lifts product data from one storefront page and swaps it into another.
//!
//! Extraction runs over fetched markup. The swap runs inside a headless
//! browser when one is available, locating regions by selector chains and
//! rendered geometry, and otherwise falls back to a static markup rewrite.

pub mod browser;
pub mod config;
pub mod error;
pub mod extract;
pub mod fallback;
pub mod fetch;
pub mod generate;
pub mod jsonld;
pub mod layout;
pub mod locator;
pub mod models;
pub mod normalize;
pub mod serialize;
pub mod server;
pub mod swap;

pub use error::SwapError;
pub use extract::{extract_from_html, extract_product};
pub use generate::{generate, AppState, Generated, RenderCapability};
pub use models::{ProductRecord, SwapRequest};
pub use serialize::serialize;
pub use swap::{swap, SwapPolicy, SwapReport};
