//! Layout probe taken from a rendered page.
//!
//! The browser side tags every element matched by the probe selectors with a
//! numeric id and reports, per element, its matched-ancestor chain and its
//! bounding box. Region location then runs in Rust against this snapshot, so
//! it is pure and testable without a browser.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Attribute carrying a node's probe id on the live page.
pub const NODE_ID_ATTR: &str = "data-pswap-id";

pub type NodeId = usize;

#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn area(&self) -> f64 {
        self.width * self.height
    }

    pub fn top(&self) -> f64 {
        self.y
    }

    pub fn bottom(&self) -> f64 {
        self.y + self.height
    }

    pub fn left(&self) -> f64 {
        self.x
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ProbedNode {
    pub tag: String,
    /// Ancestors that are themselves probed nodes, nearest first.
    #[serde(default)]
    pub ancestors: Vec<NodeId>,
    /// `None` when the element has no layout box (hidden, detached).
    pub rect: Option<Rect>,
}

/// One probe of the page. Node ids are indexes into `nodes` and follow
/// document order.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct PageLayout {
    /// Selector → matching node ids, document order.
    pub matches: HashMap<String, Vec<NodeId>>,
    pub nodes: Vec<ProbedNode>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    Document,
    /// Strict descendants of a node, like `root.querySelectorAll`.
    Within(NodeId),
}

impl PageLayout {
    pub fn node(&self, id: NodeId) -> Option<&ProbedNode> {
        self.nodes.get(id)
    }

    pub fn rect(&self, id: NodeId) -> Option<Rect> {
        self.node(id).and_then(|n| n.rect)
    }

    pub fn in_scope(&self, id: NodeId, scope: Scope) -> bool {
        match scope {
            Scope::Document => true,
            Scope::Within(root) => self
                .node(id)
                .is_some_and(|n| n.ancestors.contains(&root)),
        }
    }

    /// Matches of `selector` inside `scope`, document order.
    pub fn query_all(&self, selector: &str, scope: Scope) -> Vec<NodeId> {
        self.matches
            .get(selector)
            .map(|ids| {
                ids.iter()
                    .copied()
                    .filter(|&id| self.in_scope(id, scope))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn matches(&self, id: NodeId, selector: &str) -> bool {
        self.matches
            .get(selector)
            .is_some_and(|ids| ids.contains(&id))
    }

    /// Like `Element.closest`: the node itself or its nearest ancestor
    /// matching `selector`.
    pub fn closest(&self, id: NodeId, selector: &str) -> Option<NodeId> {
        let node = self.node(id)?;
        std::iter::once(id)
            .chain(node.ancestors.iter().copied())
            .find(|&candidate| self.matches(candidate, selector))
    }
}

// ── Selector chains ──────────────────────────────────────────────────────────

/// An ordered list of CSS selectors tried in turn; the first one that
/// produces a result wins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectorChain(Vec<String>);

impl SelectorChain {
    pub fn new<I, S>(selectors: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(selectors.into_iter().map(Into::into).collect())
    }

    pub fn selectors(&self) -> &[String] {
        &self.0
    }

    /// First match of the first selector that matches anything in scope.
    pub fn first_match(&self, layout: &PageLayout, scope: Scope) -> Option<NodeId> {
        self.0
            .iter()
            .find_map(|sel| layout.query_all(sel, scope).first().copied())
    }

    /// Union of all selectors' matches in scope, document order.
    pub fn all_matches(&self, layout: &PageLayout, scope: Scope) -> Vec<NodeId> {
        let mut ids: Vec<NodeId> = self
            .0
            .iter()
            .flat_map(|sel| layout.query_all(sel, scope))
            .collect();
        ids.sort_unstable();
        ids.dedup();
        ids
    }

    /// `closest` for each selector in turn; selector order beats nearness.
    pub fn closest(&self, layout: &PageLayout, id: NodeId) -> Option<NodeId> {
        self.0.iter().find_map(|sel| layout.closest(id, sel))
    }

    /// The selectors joined into one CSS selector list.
    pub fn joined(&self) -> String {
        self.0.join(", ")
    }
}
