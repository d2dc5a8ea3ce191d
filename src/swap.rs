//! Content swap on a live page.
//!
//! A bounded polling loop: probe the page, locate regions, push edits, and
//! stop once the title, the description and at least three images have been
//! written. The delay between attempts only gives the page's own scripts
//! time to finish hydrating; it is not what makes the result correct.

use std::future::Future;
use std::time::Duration;

use serde::Serialize;

use crate::error::SwapError;
use crate::layout::{NodeId, PageLayout};
use crate::locator::{Ambiguity, RegionLocator, RegionSnapshot};
use crate::models::ProductRecord;

// ── Page seam ────────────────────────────────────────────────────────────────

/// One DOM mutation, addressed by probe node id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum DomEdit {
    SetText { node: NodeId, text: String },
    SetHtml { node: NodeId, html: String },
    /// Points an image at `url`, clearing responsive sources; `relink` also
    /// retargets a wrapping `a[href]`.
    SetImage { node: NodeId, url: String, relink: bool },
    SetDocumentTitle { text: String },
}

/// The operations the swap loop needs from a rendered page.
pub trait LivePage {
    /// Tags and measures every element matching `selectors`.
    fn probe(
        &self,
        selectors: &[String],
    ) -> impl Future<Output = Result<PageLayout, SwapError>> + Send;

    /// Applies edits against the ids of the latest probe. Returns one flag
    /// per edit, `true` only when its node was still there and got changed.
    fn apply(
        &self,
        edits: &[DomEdit],
    ) -> impl Future<Output = Result<Vec<bool>, SwapError>> + Send;

    /// Removes every script element so client code cannot undo the edits.
    fn freeze(&self) -> impl Future<Output = Result<(), SwapError>> + Send;
}

// ── Policy and report ────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct SwapPolicy {
    pub max_iterations: usize,
    pub delay: Duration,
    pub min_image_changes: usize,
}

impl Default for SwapPolicy {
    fn default() -> Self {
        Self {
            max_iterations: 8,
            delay: Duration::from_millis(250),
            min_image_changes: 3,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SwapReport {
    pub title_done: bool,
    pub description_done: bool,
    pub price_done: bool,
    /// Image writes in the last successful iteration.
    pub images_changed: usize,
    pub iterations: usize,
    pub converged: bool,
    pub ambiguities: Vec<Ambiguity>,
}

impl SwapReport {
    fn is_converged(&self, policy: &SwapPolicy) -> bool {
        self.title_done && self.description_done && self.images_changed >= policy.min_image_changes
    }

    /// Compact `key=value` form for response headers and logs.
    pub fn summary(&self) -> String {
        format!(
            "title={};description={};price={};images={};iterations={};converged={}",
            u8::from(self.title_done),
            u8::from(self.description_done),
            u8::from(self.price_done),
            self.images_changed,
            self.iterations,
            u8::from(self.converged),
        )
    }
}

// ── Edit planning ────────────────────────────────────────────────────────────

/// The report field an edit counts towards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Region {
    Title,
    /// `document.title`; never counts as the title region being done.
    DocumentTitle,
    Description,
    Price,
    Image,
}

#[derive(Debug, Default, PartialEq)]
pub struct EditPlan {
    pub edits: Vec<DomEdit>,
    /// Parallel to `edits`.
    pub regions: Vec<Region>,
}

/// What one iteration changed on the page.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Progress {
    pub title: bool,
    pub description: bool,
    pub price: bool,
    pub image_changes: usize,
}

impl EditPlan {
    fn push(&mut self, region: Region, edit: DomEdit) {
        self.regions.push(region);
        self.edits.push(edit);
    }

    /// Progress counting only the edits flagged in `landed`; missing flags
    /// count as not landed.
    pub fn progress(&self, landed: &[bool]) -> Progress {
        let mut progress = Progress::default();
        for (region, &ok) in self.regions.iter().zip(landed) {
            if !ok {
                continue;
            }
            match region {
                Region::Title => progress.title = true,
                Region::DocumentTitle => {}
                Region::Description => progress.description = true,
                Region::Price => progress.price = true,
                Region::Image => progress.image_changes += 1,
            }
        }
        progress
    }

    /// Progress if every edit lands.
    pub fn planned(&self) -> Progress {
        self.progress(&vec![true; self.edits.len()])
    }
}

/// Turns one snapshot into the edits for this iteration.
pub fn plan_edits(snapshot: &RegionSnapshot, record: &ProductRecord) -> EditPlan {
    let mut plan = EditPlan::default();

    if !snapshot.title_nodes.is_empty() {
        for &node in &snapshot.title_nodes {
            plan.push(
                Region::Title,
                DomEdit::SetText {
                    node,
                    text: record.title.clone(),
                },
            );
        }
        plan.push(
            Region::DocumentTitle,
            DomEdit::SetDocumentTitle {
                text: record.title.clone(),
            },
        );
    }

    if let Some(node) = snapshot.description {
        plan.push(
            Region::Description,
            DomEdit::SetHtml {
                node,
                html: record.description_html.clone(),
            },
        );
    }

    if let Some(node) = snapshot.price.filter(|_| !record.price.is_empty()) {
        plan.push(
            Region::Price,
            DomEdit::SetText {
                node,
                text: record.price_label(),
            },
        );
    }

    let Some(primary) = record.images.first() else {
        return plan;
    };

    if let Some(node) = snapshot.main_image {
        plan.push(
            Region::Image,
            DomEdit::SetImage {
                node,
                url: primary.clone(),
                relink: false,
            },
        );

        for (i, &node) in snapshot.thumbnails.iter().enumerate() {
            let url = record.images.get(i).unwrap_or(primary);
            plan.push(
                Region::Image,
                DomEdit::SetImage {
                    node,
                    url: url.clone(),
                    relink: true,
                },
            );
        }
    }

    plan
}

// ── Swap loop ────────────────────────────────────────────────────────────────

/// Runs the swap loop and then freezes the page.
///
/// Never fails: regions that cannot be found stay untouched and show up as
/// `false`/`0` in the report. A probe or apply error costs one iteration.
pub async fn swap<P: LivePage>(
    page: &P,
    locator: &RegionLocator,
    record: &ProductRecord,
    policy: &SwapPolicy,
) -> SwapReport {
    let selectors = locator.profile().probe_selectors();
    let mut report = SwapReport::default();

    for iteration in 1..=policy.max_iterations {
        report.iterations = iteration;

        match run_iteration(page, locator, record, &selectors).await {
            Ok((snapshot, progress)) => {
                report.title_done |= progress.title;
                report.description_done |= progress.description;
                report.price_done |= progress.price;
                report.images_changed = progress.image_changes;
                report.ambiguities = snapshot.ambiguities;
                tracing::debug!(
                    iteration,
                    titles = snapshot.title_nodes.len(),
                    thumbnails = snapshot.thumbnails.len(),
                    images_changed = progress.image_changes,
                    "swap iteration"
                );
            }
            Err(e) => {
                tracing::warn!(iteration, error = %e, "swap iteration failed");
            }
        }

        if report.is_converged(policy) {
            report.converged = true;
            break;
        }
        if iteration < policy.max_iterations {
            tokio::time::sleep(policy.delay).await;
        }
    }

    if let Err(e) = page.freeze().await {
        tracing::warn!(error = %e, "could not strip scripts from live page");
    }

    if !report.ambiguities.is_empty() {
        tracing::warn!(ambiguities = ?report.ambiguities, "region location was ambiguous");
    }
    report
}

async fn run_iteration<P: LivePage>(
    page: &P,
    locator: &RegionLocator,
    record: &ProductRecord,
    selectors: &[String],
) -> Result<(RegionSnapshot, Progress), SwapError> {
    let layout = page.probe(selectors).await?;
    let snapshot = locator.locate(&layout, record.images.len());
    let plan = plan_edits(&snapshot, record);
    if plan.edits.is_empty() {
        return Ok((snapshot, Progress::default()));
    }

    // The page may re-render between probe and apply, so only edits whose
    // node survived count.
    let landed = page.apply(&plan.edits).await?;
    let changed = landed.iter().filter(|&&ok| ok).count();
    if changed < plan.edits.len() {
        let lost = plan.edits.len() - changed;
        tracing::debug!(lost, planned = plan.edits.len(), "some edits lost their node");
    }
    Ok((snapshot, plan.progress(&landed)))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use super::*;
    use crate::layout::{ProbedNode, Rect};

    fn record(images: usize) -> ProductRecord {
        ProductRecord {
            title: "Brisa Ace".into(),
            description_html: "<p>Open ear</p>".into(),
            price: "49.90".into(),
            currency: "EUR".into(),
            images: (1..=images)
                .map(|i| format!("https://www.hune.eco/cdn/shop/files/brisa_{i:02}.jpg"))
                .collect(),
        }
    }

    fn fast_policy() -> SwapPolicy {
        SwapPolicy {
            delay: Duration::ZERO,
            ..SwapPolicy::default()
        }
    }

    /// main > h1, .rte, .price, big image, two thumbnails.
    fn product_layout() -> PageLayout {
        let node = |tag: &str, ancestors: Vec<NodeId>, rect: Option<Rect>| ProbedNode {
            tag: tag.into(),
            ancestors,
            rect,
        };
        PageLayout {
            matches: HashMap::from([
                ("main".to_string(), vec![0]),
                ("h1".to_string(), vec![1]),
                (".rte".to_string(), vec![2]),
                (".price".to_string(), vec![3]),
                ("img".to_string(), vec![4, 5, 6]),
            ]),
            nodes: vec![
                node("main", vec![], None),
                node("h1", vec![0], None),
                node("div", vec![0], None),
                node("span", vec![0], None),
                node("img", vec![0], Some(Rect::new(0.0, 0.0, 800.0, 600.0))),
                node("img", vec![0], Some(Rect::new(0.0, 610.0, 100.0, 100.0))),
                node("img", vec![0], Some(Rect::new(110.0, 610.0, 100.0, 100.0))),
            ],
        }
    }

    /// Serves a scripted sequence of probes; the last one repeats.
    struct FakePage {
        layouts: Vec<Result<PageLayout, String>>,
        /// Hydration replaced every tagged node before the edits arrived.
        nodes_replaced: bool,
        probes: Mutex<usize>,
        applied: Mutex<Vec<Vec<DomEdit>>>,
        frozen: Mutex<bool>,
    }

    impl FakePage {
        fn new(layouts: Vec<Result<PageLayout, String>>) -> Self {
            Self {
                layouts,
                nodes_replaced: false,
                probes: Mutex::new(0),
                applied: Mutex::new(Vec::new()),
                frozen: Mutex::new(false),
            }
        }
    }

    impl LivePage for FakePage {
        async fn probe(&self, _selectors: &[String]) -> Result<PageLayout, SwapError> {
            let mut probes = self.probes.lock().unwrap();
            let idx = (*probes).min(self.layouts.len() - 1);
            *probes += 1;
            self.layouts[idx].clone().map_err(SwapError::Browser)
        }

        async fn apply(&self, edits: &[DomEdit]) -> Result<Vec<bool>, SwapError> {
            self.applied.lock().unwrap().push(edits.to_vec());
            Ok(vec![!self.nodes_replaced; edits.len()])
        }

        async fn freeze(&self) -> Result<(), SwapError> {
            *self.frozen.lock().unwrap() = true;
            Ok(())
        }
    }

    #[tokio::test]
    async fn converges_in_one_iteration_when_everything_is_present() {
        let page = FakePage::new(vec![Ok(product_layout())]);
        let report = swap(&page, &RegionLocator::default(), &record(4), &fast_policy()).await;

        assert_eq!(report.iterations, 1);
        assert!(report.converged);
        assert!(report.title_done && report.description_done && report.price_done);
        assert_eq!(report.images_changed, 3);
        assert!(*page.frozen.lock().unwrap());

        let applied = page.applied.lock().unwrap();
        assert_eq!(applied.len(), 1);
        assert!(applied[0].contains(&DomEdit::SetText {
            node: 3,
            text: "49.90 EUR".into()
        }));
        assert!(applied[0].contains(&DomEdit::SetImage {
            node: 6,
            url: "https://www.hune.eco/cdn/shop/files/brisa_02.jpg".into(),
            relink: true,
        }));
    }

    #[tokio::test]
    async fn waits_for_hydration_before_converging() {
        let empty = PageLayout::default();
        let page = FakePage::new(vec![
            Ok(empty.clone()),
            Err("context destroyed".into()),
            Ok(product_layout()),
        ]);
        let report = swap(&page, &RegionLocator::default(), &record(3), &fast_policy()).await;

        assert_eq!(report.iterations, 3);
        assert!(report.converged);
        assert_eq!(page.applied.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn exhausts_budget_without_description_and_still_freezes() {
        let mut layout = product_layout();
        layout.matches.remove(".rte");
        let page = FakePage::new(vec![Ok(layout)]);
        let report = swap(&page, &RegionLocator::default(), &record(3), &fast_policy()).await;

        assert_eq!(report.iterations, 8);
        assert!(!report.converged);
        assert!(report.title_done);
        assert!(!report.description_done);
        assert_eq!(report.images_changed, 3);
        assert!(*page.frozen.lock().unwrap());
    }

    #[tokio::test]
    async fn edits_that_miss_their_node_do_not_count() {
        let mut page = FakePage::new(vec![Ok(product_layout())]);
        page.nodes_replaced = true;
        let report = swap(&page, &RegionLocator::default(), &record(3), &fast_policy()).await;

        assert!(!report.converged);
        assert_eq!(report.iterations, 8);
        assert!(!report.title_done && !report.description_done && !report.price_done);
        assert_eq!(report.images_changed, 0);
        assert_eq!(page.applied.lock().unwrap().len(), 8);
        assert!(*page.frozen.lock().unwrap());
    }

    #[test]
    fn progress_follows_landed_flags() {
        let snapshot = RegionSnapshot {
            title_nodes: vec![0],
            description: Some(1),
            main_image: Some(2),
            thumbnails: vec![3, 4],
            ..RegionSnapshot::default()
        };
        let plan = plan_edits(&snapshot, &record(3));
        // title, document title, description, price skipped (no node), main, two thumbs
        assert_eq!(plan.regions.len(), 6);

        let landed = [false, true, true, true, false, true];
        let progress = plan.progress(&landed);
        assert!(!progress.title);
        assert!(progress.description);
        assert_eq!(progress.image_changes, 2);

        // A short answer leaves the tail unlanded.
        assert_eq!(plan.progress(&[true, true]).image_changes, 0);
    }

    #[test]
    fn thumbnails_reuse_first_image_when_record_runs_short() {
        let snapshot = RegionSnapshot {
            main_image: Some(1),
            thumbnails: vec![2, 3],
            ..RegionSnapshot::default()
        };
        let mut rec = record(1);
        rec.price.clear();
        let plan = plan_edits(&snapshot, &rec);
        let first = rec.images[0].clone();
        assert_eq!(
            plan.edits,
            vec![
                DomEdit::SetImage { node: 1, url: first.clone(), relink: false },
                DomEdit::SetImage { node: 2, url: first.clone(), relink: true },
                DomEdit::SetImage { node: 3, url: first, relink: true },
            ]
        );
        assert_eq!(plan.planned().image_changes, 3);
        assert!(!plan.planned().price);
    }

    #[test]
    fn no_images_means_no_image_edits() {
        let snapshot = RegionSnapshot {
            title_nodes: vec![0, 5],
            price: Some(2),
            main_image: Some(1),
            ..RegionSnapshot::default()
        };
        let mut rec = record(0);
        rec.currency.clear();
        let plan = plan_edits(&snapshot, &rec);
        assert!(plan.planned().title);
        assert_eq!(plan.planned().image_changes, 0);
        assert!(plan.edits.contains(&DomEdit::SetText { node: 2, text: "49.90".into() }));
        assert!(plan.edits.contains(&DomEdit::SetDocumentTitle { text: "Brisa Ace".into() }));
    }

    #[test]
    fn edits_serialize_with_op_tag() {
        let json = serde_json::to_value(DomEdit::SetImage {
            node: 4,
            url: "u".into(),
            relink: false,
        })
        .unwrap();
        assert_eq!(json, serde_json::json!({"op": "set_image", "node": 4, "url": "u", "relink": false}));
    }
}
