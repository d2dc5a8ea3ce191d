//! Geometry-based region location.
//!
//! Finds the title, description, price, main image and thumbnails of a
//! rendered product page from selector chains and bounding boxes. The main
//! image is the largest visible image in the content root; thumbnails are
//! small images just below it.
//!
//! This is a heuristic. Pages whose main image is not the largest visible
//! image, or whose thumbnails sit beside it rather than below, are matched
//! wrongly. That boundary is accepted: doubtful situations are reported as
//! [`Ambiguity`] values rather than patched with more rules.

use serde::Serialize;

use crate::layout::{NodeId, PageLayout, Rect, Scope, SelectorChain};

// ── Constants ────────────────────────────────────────────────────────────────

pub const IMAGE_SELECTOR: &str = "img";

/// Both edges must be at or under this to count as a thumbnail.
const THUMB_MAX_EDGE: f64 = 170.0;
/// A thumbnail's top may sit this far above the main image's bottom edge.
const THUMB_ABOVE_TOLERANCE: f64 = 10.0;
/// ...and at most this far below it.
const THUMB_BELOW_REACH: f64 = 420.0;
const MAX_THUMBNAILS: usize = 8;

// ── Selector profile ─────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct SelectorProfile {
    pub title_anchor: SelectorChain,
    pub content_root: SelectorChain,
    pub title_nodes: SelectorChain,
    pub description: SelectorChain,
    pub price: SelectorChain,
}

impl Default for SelectorProfile {
    fn default() -> Self {
        Self {
            title_anchor: SelectorChain::new([
                ".product_name",
                ".product-title",
                ".product__title",
                "h1",
                "[itemprop='name']",
            ]),
            content_root: SelectorChain::new(["main", ".product", ".product-page"]),
            title_nodes: SelectorChain::new([
                ".product_name",
                ".product-title",
                ".product__title",
                "h1",
                "[itemprop='name']",
            ]),
            description: SelectorChain::new([
                ".product-description",
                ".product__description",
                ".rte",
                "[itemprop='description']",
                ".product_description",
            ]),
            price: SelectorChain::new([
                ".product-price",
                ".price",
                ".product__price",
                "[itemprop='price']",
            ]),
        }
    }
}

impl SelectorProfile {
    /// Every selector the browser has to report on, deduplicated.
    pub fn probe_selectors(&self) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        let chains = [
            &self.title_anchor,
            &self.content_root,
            &self.title_nodes,
            &self.description,
            &self.price,
        ];
        for sel in chains
            .iter()
            .flat_map(|c| c.selectors())
            .map(String::as_str)
            .chain(std::iter::once(IMAGE_SELECTOR))
        {
            if !out.iter().any(|s| s == sel) {
                out.push(sel.to_string());
            }
        }
        out
    }
}

// ── Snapshot ─────────────────────────────────────────────────────────────────

/// Situations where the heuristic guessed rather than knew.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Ambiguity {
    /// No title anchor; everything was searched document-wide.
    NoTitleAnchor,
    /// An anchor exists but none of its ancestors is a content container.
    NoContentRoot,
    /// Several visible images share the largest area.
    TiedMainImage,
    NoMainImage,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RegionSnapshot {
    pub title_nodes: Vec<NodeId>,
    pub description: Option<NodeId>,
    pub price: Option<NodeId>,
    pub main_image: Option<NodeId>,
    pub thumbnails: Vec<NodeId>,
    pub ambiguities: Vec<Ambiguity>,
}

// ── Locator ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct RegionLocator {
    profile: SelectorProfile,
}

impl RegionLocator {
    pub fn new(profile: SelectorProfile) -> Self {
        Self { profile }
    }

    pub fn profile(&self) -> &SelectorProfile {
        &self.profile
    }

    /// Resolves every region from one probe. `available_images` caps the
    /// thumbnail count, since there is nothing to put in extra slots.
    pub fn locate(&self, layout: &PageLayout, available_images: usize) -> RegionSnapshot {
        let mut ambiguities = Vec::new();

        let scope = match self.profile.title_anchor.first_match(layout, Scope::Document) {
            Some(anchor) => match self.profile.content_root.closest(layout, anchor) {
                Some(root) => Scope::Within(root),
                None => {
                    ambiguities.push(Ambiguity::NoContentRoot);
                    Scope::Document
                }
            },
            None => {
                ambiguities.push(Ambiguity::NoTitleAnchor);
                Scope::Document
            }
        };

        let title_nodes = self.profile.title_nodes.all_matches(layout, scope);
        let description = self.profile.description.first_match(layout, scope);
        let price = self.profile.price.first_match(layout, scope);

        let visible: Vec<(NodeId, Rect)> = layout
            .query_all(IMAGE_SELECTOR, scope)
            .into_iter()
            .filter_map(|id| layout.rect(id).map(|rect| (id, rect)))
            .collect();

        let main = largest(&visible);
        let thumbnails = match main {
            Some((main_id, main_rect)) => {
                if visible
                    .iter()
                    .any(|(id, r)| *id != main_id && r.area() == main_rect.area())
                {
                    ambiguities.push(Ambiguity::TiedMainImage);
                }
                thumbnails_below(&visible, main_id, main_rect, available_images)
            }
            None => {
                ambiguities.push(Ambiguity::NoMainImage);
                Vec::new()
            }
        };

        RegionSnapshot {
            title_nodes,
            description,
            price,
            main_image: main.map(|(id, _)| id),
            thumbnails,
            ambiguities,
        }
    }
}

/// Largest area wins; the earliest image keeps a tie.
fn largest(images: &[(NodeId, Rect)]) -> Option<(NodeId, Rect)> {
    images.iter().copied().fold(None, |best, candidate| match best {
        Some((_, rect)) if rect.area() >= candidate.1.area() => best,
        _ => Some(candidate),
    })
}

fn thumbnails_below(
    images: &[(NodeId, Rect)],
    main_id: NodeId,
    main_rect: Rect,
    available_images: usize,
) -> Vec<NodeId> {
    let mut by_area: Vec<(NodeId, Rect)> = images
        .iter()
        .copied()
        .filter(|(id, _)| *id != main_id)
        .collect();
    by_area.sort_by(|a, b| b.1.area().total_cmp(&a.1.area()));

    let window_top = main_rect.bottom() - THUMB_ABOVE_TOLERANCE;
    let window_bottom = main_rect.bottom() + THUMB_BELOW_REACH;

    let mut thumbs: Vec<(NodeId, Rect)> = by_area
        .into_iter()
        .filter(|(_, r)| r.width <= THUMB_MAX_EDGE && r.height <= THUMB_MAX_EDGE)
        .filter(|(_, r)| r.top() > window_top && r.top() < window_bottom)
        .collect();
    thumbs.sort_by(|a, b| a.1.left().total_cmp(&b.1.left()));

    thumbs
        .into_iter()
        .take(MAX_THUMBNAILS.min(available_images))
        .map(|(id, _)| id)
        .collect()
}
