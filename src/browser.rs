//! Headless Chromium pool.
//!
//! One browser process per service; pages are leased under a semaphore so at
//! most `max_pages` render at once. The DOM-side work is three small scripts:
//! a probe that tags and measures elements, an edit applier, and a freeze
//! that strips scripts.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::page::NavigateParams;
use chromiumoxide::cdp::js_protocol::runtime::EvaluateParams;
use chromiumoxide::handler::viewport::Viewport;
use chromiumoxide::Page;
use futures::StreamExt;
use serde::de::DeserializeOwned;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;

use crate::config::BrowserSettings;
use crate::error::SwapError;
use crate::layout::{PageLayout, NODE_ID_ATTR};
use crate::swap::{DomEdit, LivePage};

const VIEWPORT_WIDTH: u32 = 1280;
const VIEWPORT_HEIGHT: u32 = 720;
const ANCHOR_POLL: Duration = Duration::from_millis(100);

// ── Page scripts ─────────────────────────────────────────────────────────────
//
// Each script is a function expression invoked with JSON arguments. The
// attribute name is spliced in at `__ATTR__`.

const PROBE_JS: &str = r#"(selectors) => {
  const attr = "__ATTR__";
  document.querySelectorAll("[" + attr + "]").forEach((el) => el.removeAttribute(attr));
  const perSelector = {};
  const seen = new Set();
  for (const sel of selectors) {
    let found = [];
    try { found = Array.from(document.querySelectorAll(sel)); } catch (_) {}
    perSelector[sel] = found;
    found.forEach((el) => seen.add(el));
  }
  const ordered = Array.from(seen).sort((a, b) =>
    a === b ? 0 : (a.compareDocumentPosition(b) & Node.DOCUMENT_POSITION_FOLLOWING ? -1 : 1));
  const ids = new Map();
  ordered.forEach((el, i) => { ids.set(el, i); el.setAttribute(attr, String(i)); });
  const nodes = ordered.map((el) => {
    const ancestors = [];
    for (let p = el.parentElement; p; p = p.parentElement) {
      if (ids.has(p)) ancestors.push(ids.get(p));
    }
    let rect = null;
    if (el.getClientRects().length > 0) {
      const r = el.getBoundingClientRect();
      rect = { x: r.left, y: r.top, width: r.width, height: r.height };
    }
    return { tag: el.tagName.toLowerCase(), ancestors, rect };
  });
  const matches = {};
  for (const sel of selectors) matches[sel] = perSelector[sel].map((el) => ids.get(el));
  return { matches, nodes };
}"#;

const APPLY_JS: &str = r#"(edits) => {
  const attr = "__ATTR__";
  const byId = (id) => document.querySelector("[" + attr + "=\"" + id + "\"]");
  const lazyClasses = ["lazyload", "lazyloaded", "blur-up", "loading", "is-loading", "is-placeholder"];
  return edits.map((edit) => {
    if (edit.op === "set_document_title") { document.title = edit.text; return true; }
    const el = byId(edit.node);
    if (!el) return false;
    if (edit.op === "set_text") {
      el.textContent = edit.text;
    } else if (edit.op === "set_html") {
      el.innerHTML = edit.html;
    } else if (edit.op === "set_image") {
      const picture = el.closest("picture");
      if (picture) picture.querySelectorAll("source").forEach((s) => {
        s.setAttribute("srcset", edit.url);
        s.removeAttribute("data-srcset");
      });
      el.setAttribute("src", edit.url);
      el.setAttribute("data-src", edit.url);
      el.removeAttribute("srcset");
      el.removeAttribute("data-srcset");
      el.style.filter = "none";
      el.style.opacity = "1";
      lazyClasses.forEach((c) => el.classList.remove(c));
      if (edit.relink) {
        const link = el.closest("a[href]");
        if (link) link.setAttribute("href", edit.url);
      }
    } else {
      return false;
    }
    return true;
  });
}"#;

const FREEZE_JS: &str = r#"() => {
  document.querySelectorAll("script").forEach((s) => s.remove());
  return true;
}"#;

fn invocation(script: &str, args: &str) -> String {
    format!("({})({args})", script.replace("__ATTR__", NODE_ID_ATTR))
}

// ── Pool ─────────────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct BrowserPool {
    inner: Arc<PoolInner>,
}

struct PoolInner {
    browser: Browser,
    handler: JoinHandle<()>,
    permits: Arc<Semaphore>,
    page_wait: Duration,
}

impl Drop for PoolInner {
    fn drop(&mut self) {
        self.handler.abort();
    }
}

impl BrowserPool {
    pub async fn launch(settings: &BrowserSettings) -> Result<Self, SwapError> {
        let mut builder = BrowserConfig::builder()
            .viewport(Some(Viewport {
                width: VIEWPORT_WIDTH,
                height: VIEWPORT_HEIGHT,
                device_scale_factor: Some(1.0),
                ..Default::default()
            }))
            .window_size(VIEWPORT_WIDTH, VIEWPORT_HEIGHT)
            .no_sandbox()
            .args(["--disable-dev-shm-usage", "--disable-gpu", "--no-first-run"]);
        if !settings.headless {
            builder = builder.with_head();
        }
        if let Some(path) = &settings.executable {
            builder = builder.chrome_executable(path);
        }
        let config = builder.build().map_err(SwapError::Browser)?;

        let (browser, mut handler) = Browser::launch(config).await.map_err(SwapError::browser)?;
        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    tracing::debug!(error = %e, "browser handler event error");
                }
            }
        });

        tracing::info!(
            max_pages = settings.max_pages,
            headless = settings.headless,
            "browser launched"
        );
        Ok(Self {
            inner: Arc::new(PoolInner {
                browser,
                handler,
                permits: Arc::new(Semaphore::new(settings.max_pages.max(1))),
                page_wait: settings.page_wait,
            }),
        })
    }

    /// Waits up to `page_wait` for a free slot and opens a blank page in it.
    pub async fn checkout(&self) -> Result<PageLease, SwapError> {
        let started = Instant::now();
        let permit = tokio::time::timeout(
            self.inner.page_wait,
            Arc::clone(&self.inner.permits).acquire_owned(),
        )
        .await
        .map_err(|_| SwapError::PageUnavailable {
            waited_ms: started.elapsed().as_millis(),
        })?
        .map_err(SwapError::browser)?;

        let page = self
            .inner
            .browser
            .new_page("about:blank")
            .await
            .map_err(SwapError::browser)?;

        Ok(PageLease {
            page: Some(page),
            permit: Some(permit),
        })
    }
}

// ── Lease ────────────────────────────────────────────────────────────────────

/// A page plus its pool slot. Dropping the lease closes the page in the
/// background; [`PageLease::release`] closes it inline. Either way the slot
/// is only freed once the page is closed.
pub struct PageLease {
    page: Option<Page>,
    permit: Option<OwnedSemaphorePermit>,
}

impl PageLease {
    fn page(&self) -> Result<&Page, SwapError> {
        self.page
            .as_ref()
            .ok_or_else(|| SwapError::Browser("page already released".into()))
    }

    /// Starts navigation and returns once the document has committed, i.e.
    /// without waiting for the load event.
    pub async fn navigate(&self, url: &str, limit: Duration) -> Result<(), SwapError> {
        let page = self.page()?;
        let response = tokio::time::timeout(limit, page.execute(NavigateParams::new(url)))
            .await
            .map_err(|_| SwapError::NavigationTimeout {
                url: url.to_string(),
                stage: "navigating",
            })?
            .map_err(SwapError::browser)?;

        if let Some(reason) = response.result.error_text.as_deref() {
            return Err(navigation_failure(url, reason));
        }
        Ok(())
    }

    /// Polls until one element matches `selector`, attached or not.
    pub async fn wait_for_any(
        &self,
        url: &str,
        selector: &str,
        limit: Duration,
    ) -> Result<(), SwapError> {
        let selector_json = serde_json::to_string(selector).map_err(SwapError::browser)?;
        let check = format!("document.querySelector({selector_json}) !== null");
        let deadline = Instant::now() + limit;

        loop {
            // Evaluation fails while the old document is being torn down.
            if let Ok(true) = self.eval::<bool>(check.clone()).await {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(SwapError::NavigationTimeout {
                    url: url.to_string(),
                    stage: "waiting for the title anchor",
                });
            }
            tokio::time::sleep(ANCHOR_POLL).await;
        }
    }

    pub async fn content(&self) -> Result<String, SwapError> {
        self.page()?.content().await.map_err(SwapError::browser)
    }

    pub async fn release(mut self) {
        if let Some(page) = self.page.take() {
            if let Err(e) = page.close().await {
                tracing::debug!(error = %e, "page close failed");
            }
        }
        self.permit.take();
    }

    async fn eval<T: DeserializeOwned>(&self, expression: String) -> Result<T, SwapError> {
        let params = EvaluateParams::builder()
            .expression(expression)
            .return_by_value(true)
            .await_promise(true)
            .build()
            .map_err(SwapError::Browser)?;
        self.page()?
            .evaluate_expression(params)
            .await
            .map_err(SwapError::browser)?
            .into_value::<T>()
            .map_err(SwapError::browser)
    }
}

impl Drop for PageLease {
    fn drop(&mut self) {
        if let (Some(page), Some(permit)) = (self.page.take(), self.permit.take()) {
            close_in_background(
                async move {
                    let _ = page.close().await;
                },
                permit,
            );
        }
    }
}

/// Runs `close` on the current runtime and frees the pool slot after it.
/// Without a runtime the slot is freed at once.
fn close_in_background<F>(close: F, permit: OwnedSemaphorePermit)
where
    F: Future<Output = ()> + Send + 'static,
{
    if let Ok(runtime) = tokio::runtime::Handle::try_current() {
        runtime.spawn(async move {
            close.await;
            drop(permit);
        });
    }
}

/// The browser gave up on the target, e.g. `net::ERR_NAME_NOT_RESOLVED`.
fn navigation_failure(url: &str, reason: &str) -> SwapError {
    SwapError::Fetch {
        url: url.to_string(),
        reason: format!("navigation failed: {reason}"),
    }
}

impl LivePage for PageLease {
    async fn probe(&self, selectors: &[String]) -> Result<PageLayout, SwapError> {
        let args = serde_json::to_string(selectors).map_err(SwapError::browser)?;
        self.eval(invocation(PROBE_JS, &args)).await
    }

    async fn apply(&self, edits: &[DomEdit]) -> Result<Vec<bool>, SwapError> {
        let args = serde_json::to_string(edits).map_err(SwapError::browser)?;
        self.eval(invocation(APPLY_JS, &args)).await
    }

    async fn freeze(&self) -> Result<(), SwapError> {
        self.eval::<bool>(invocation(FREEZE_JS, "")).await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scripts_carry_the_node_attribute() {
        let call = invocation(PROBE_JS, r#"["h1"]"#);
        assert!(call.contains(NODE_ID_ATTR));
        assert!(!call.contains("__ATTR__"));
        assert!(call.ends_with(r#"(["h1"])"#));
    }

    #[test]
    fn failed_navigation_is_a_fetch_error() {
        let err = navigation_failure("https://shop.invalid/p", "net::ERR_NAME_NOT_RESOLVED");
        assert!(matches!(err, SwapError::Fetch { .. }), "got {err:?}");
        assert!(err.to_string().contains("net::ERR_NAME_NOT_RESOLVED"));
    }

    #[tokio::test]
    async fn slot_stays_taken_until_background_close_finishes() {
        let permits = Arc::new(Semaphore::new(1));
        let permit = Arc::clone(&permits).acquire_owned().await.unwrap();
        let (closed_tx, closed_rx) = tokio::sync::oneshot::channel::<()>();

        close_in_background(
            async move {
                let _ = closed_rx.await;
            },
            permit,
        );
        tokio::task::yield_now().await;
        assert_eq!(permits.available_permits(), 0);

        closed_tx.send(()).unwrap();
        let slot = tokio::time::timeout(Duration::from_secs(1), permits.acquire()).await;
        assert!(matches!(slot, Ok(Ok(_))));
    }

    #[test]
    fn apply_script_reports_per_edit_results() {
        assert!(APPLY_JS.contains("edits.map"));
        assert!(APPLY_JS.contains("return false"));
    }

    #[test]
    fn apply_script_knows_every_edit_op() {
        for op in ["set_text", "set_html", "set_image", "set_document_title"] {
            assert!(APPLY_JS.contains(op), "{op} missing");
        }
    }
}
